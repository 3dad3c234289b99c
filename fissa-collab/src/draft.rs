use thiserror::Error;
use tokio::task::JoinHandle;

use crate::RoomSession;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("No tracks are selected")]
    Empty,
    #[error("Not in a session")]
    NoRoom,
}

/// The tracks a user picked to add to the queue, before they are submitted
#[derive(Debug, Default)]
pub struct QueueDraft {
    selected: Vec<String>,
}

impl QueueDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a track. Selecting a track twice keeps it once.
    pub fn add_track(&mut self, track_id: impl Into<String>) {
        let track_id = track_id.into();

        if !self.is_selected(&track_id) {
            self.selected.push(track_id);
        }
    }

    pub fn remove_track(&mut self, track_id: &str) {
        self.selected.retain(|id| id != track_id);
    }

    /// Selects or deselects a track, returns true if it is now selected
    pub fn toggle_track(&mut self, track_id: &str) -> bool {
        if self.is_selected(track_id) {
            self.remove_track(track_id);
            false
        } else {
            self.add_track(track_id);
            true
        }
    }

    pub fn is_selected(&self, track_id: &str) -> bool {
        self.selected.iter().any(|id| id == track_id)
    }

    /// The selected track ids, in the order they were picked
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Drops the selection without submitting it
    pub fn cancel(&mut self) {
        self.selected.clear();
    }

    /// Adds the selection to the session's queue and clears it right away.
    ///
    /// The request is not awaited, a failure is reported as a notification
    /// on the session's events.
    pub fn submit(&mut self, session: &RoomSession) -> Result<JoinHandle<()>, DraftError> {
        if self.selected.is_empty() {
            return Err(DraftError::Empty);
        }

        let handle = session
            .add_tracks(self.selected.clone())
            .map_err(|_| DraftError::NoRoom)?;

        self.selected.clear();

        Ok(handle)
    }
}

#[cfg(test)]
mod test {
    use serde_json::Value;

    use super::{DraftError, QueueDraft};
    use crate::testing::{pin, Fixture};

    #[test]
    fn test_selection() {
        let mut draft = QueueDraft::new();

        draft.add_track("t1");
        draft.add_track("t2");
        draft.add_track("t1");
        assert_eq!(draft.selected(), ["t1", "t2"]);

        assert!(!draft.toggle_track("t1"));
        assert!(draft.toggle_track("t3"));
        assert_eq!(draft.selected(), ["t2", "t3"]);

        draft.remove_track("t2");
        assert_eq!(draft.len(), 1);

        draft.cancel();
        assert!(draft.is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_selection_and_room() {
        let fixture = Fixture::new();
        let mut draft = QueueDraft::new();

        assert_eq!(
            draft.submit(&fixture.session).unwrap_err(),
            DraftError::Empty
        );

        draft.add_track("t1");

        assert_eq!(
            draft.submit(&fixture.session).unwrap_err(),
            DraftError::NoRoom
        );
        assert_eq!(draft.selected(), ["t1"]);
    }

    #[tokio::test]
    async fn test_submit_clears_selection_immediately() {
        let fixture = Fixture::new();
        fixture.serve_room("ABCD", &["t1"]);
        fixture.gateway.respond("/room/track", Value::Null);
        fixture.session.join(pin("ABCD")).await.unwrap();

        let mut draft = QueueDraft::new();
        draft.add_track("t2");
        draft.add_track("t3");

        let request = draft.submit(&fixture.session).unwrap();
        assert!(draft.is_empty());

        request.await.unwrap();
        assert_eq!(fixture.gateway.count("POST /room/track"), 1);
    }
}
