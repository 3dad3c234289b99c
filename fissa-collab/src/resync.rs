use std::sync::{Arc, Weak};

use fissa_core::SyncConfig;
use log::debug;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

use crate::RoomSession;

/// Whether the app is currently visible to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

/// Resyncs a session whenever the app comes back to the foreground, and
/// optionally on a fixed interval while it stays there.
///
/// Broker messages are missed while the app is suspended, so the snapshot can
/// only be trusted again after a full refetch. The trigger stops when dropped.
pub struct ResyncTrigger {
    state: watch::Sender<AppState>,
    task: JoinHandle<()>,
}

impl ResyncTrigger {
    /// Starts watching for foreground transitions. Must be called from within a tokio runtime.
    pub fn spawn(session: &Arc<RoomSession>, config: &SyncConfig) -> Self {
        let (state, receiver) = watch::channel(AppState::Foreground);

        let interval = config.resync_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let task = tokio::spawn(watch_state(Arc::downgrade(session), receiver, interval));

        Self { state, task }
    }

    /// Reports the current app state. Only a change to foreground causes a resync.
    pub fn set_state(&self, state: AppState) {
        self.state.send_replace(state);
    }
}

impl Drop for ResyncTrigger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_state(
    session: Weak<RoomSession>,
    mut receiver: watch::Receiver<AppState>,
    mut interval: Option<Interval>,
) {
    let mut last = *receiver.borrow_and_update();

    loop {
        let resync = tokio::select! {
            changed = receiver.changed() => {
                if changed.is_err() {
                    break;
                }

                let state = *receiver.borrow_and_update();
                let resync = state == AppState::Foreground && last == AppState::Background;

                last = state;
                resync
            }
            _ = tick(&mut interval) => last == AppState::Foreground,
        };

        if !resync {
            continue;
        }

        let Some(session) = session.upgrade() else {
            break;
        };

        session.resync().await;
    }

    debug!("Resync trigger stopped");
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use fissa_core::SyncConfig;

    use super::{AppState, ResyncTrigger};
    use crate::testing::{pin, settle, Fixture};

    const SNAPSHOT_REQUESTS: usize = 3;

    #[tokio::test(start_paused = true)]
    async fn test_returning_to_foreground_resyncs() {
        let fixture = Fixture::new();
        fixture.serve_room("ABCD", &["t1"]);
        fixture.session.join(pin("ABCD")).await.unwrap();

        let trigger = ResyncTrigger::spawn(&fixture.session, &SyncConfig::default());
        let before = fixture.gateway.requests().len();

        trigger.set_state(AppState::Foreground);
        settle().await;
        assert_eq!(fixture.gateway.requests().len(), before);

        trigger.set_state(AppState::Background);
        settle().await;
        assert_eq!(fixture.gateway.requests().len(), before);

        trigger.set_state(AppState::Foreground);
        settle().await;
        assert_eq!(fixture.gateway.requests().len(), before + SNAPSHOT_REQUESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_resyncs_only_in_foreground() {
        let fixture = Fixture::new();
        fixture.serve_room("ABCD", &["t1"]);
        fixture.session.join(pin("ABCD")).await.unwrap();

        let config = SyncConfig {
            resync_interval: Some(Duration::from_secs(30)),
        };
        let trigger = ResyncTrigger::spawn(&fixture.session, &config);
        let before = fixture.gateway.requests().len();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(fixture.gateway.requests().len(), before + 2 * SNAPSHOT_REQUESTS);

        trigger.set_state(AppState::Background);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fixture.gateway.requests().len(), before + 2 * SNAPSHOT_REQUESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_trigger_stops_it() {
        let fixture = Fixture::new();
        fixture.serve_room("ABCD", &["t1"]);
        fixture.session.join(pin("ABCD")).await.unwrap();

        let config = SyncConfig {
            resync_interval: Some(Duration::from_secs(30)),
        };
        let before = fixture.gateway.requests().len();

        drop(ResyncTrigger::spawn(&fixture.session, &config));
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(fixture.gateway.requests().len(), before);
    }
}
