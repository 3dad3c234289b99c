use std::{env, sync::Arc, thread};

use colored::Colorize;
use commands::{Command, HELP};
use fissa_collab::{
    AppState, QueueDraft, ResyncTrigger, RoomSession, SessionContext, SessionError, SessionEvent,
};
use fissa_core::{
    gateway::{Api, GatewayError},
    Config, ConfigError, Credentials, VoteState,
};
use fissa_impls::{Catalog, CatalogError, CatalogTrack, HttpGateway, MqttConnection};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::{self, Runtime},
};

mod commands;
mod logging;

/// A headless fissa client driven by lines on stdin
struct Fissa {
    client: Client,
    connection: MqttConnection,
    startup: Startup,
    runtime: Runtime,
}

struct Client {
    session: Arc<RoomSession>,
    trigger: ResyncTrigger,
    catalog: Catalog,
    draft: QueueDraft,
}

/// What to do once the client is running
enum Startup {
    Join(String),
    Create { playlist_id: String },
    Idle,
}

#[derive(Debug, Error)]
enum FissaError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0} is not set")]
    MissingCredentials(&'static str),

    #[error("Could not set up the backend client: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Fissa {
    fn new() -> Result<Self, FissaError> {
        let config = Config::from_env()?;
        let credentials = credentials_from_env()?;

        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("fissa-async")
            .build()
            .map_err(|e| FissaError::Fatal(e.to_string()))?;

        let gateway = HttpGateway::new(&config.api)?;
        let catalog = Catalog::new(&config.catalog, credentials.access_token.clone());

        let (connection, session, trigger) = {
            let _guard = runtime.enter();

            let connection = MqttConnection::connect(&config.broker);
            let session = RoomSession::new(SessionContext {
                api: Api::new(Arc::new(gateway)),
                broker: connection.broker(),
                credentials,
            });
            let trigger = ResyncTrigger::spawn(&session, &config.sync);

            (connection, session, trigger)
        };

        Ok(Self {
            client: Client {
                session,
                trigger,
                catalog,
                draft: QueueDraft::new(),
            },
            connection,
            startup: startup_from_env(),
            runtime,
        })
    }

    fn run(self) {
        let Fissa {
            mut client,
            connection,
            startup,
            runtime,
        } = self;

        let events = client.session.events();
        thread::spawn(move || {
            for event in events {
                log_event(event)
            }
        });

        runtime.block_on(async move {
            client.start(startup).await;

            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match line.parse::<Command>() {
                            Ok(command) => client.execute(command).await,
                            Err(e) => warn!("{}", e),
                        },
                        Ok(None) => {
                            // Without input the client keeps running until interrupted
                            if let Err(e) = tokio::signal::ctrl_c().await {
                                error!("Failed to wait for interrupt: {}", e);
                            }
                            break;
                        }
                        Err(e) => {
                            error!("Failed to read input: {}", e);
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            info!("Shutting down...");
            client.session.leave();
            connection.close().await;
        });
    }
}

impl Client {
    async fn start(&self, startup: Startup) {
        match startup {
            Startup::Join(pin) => report(self.session.set_pin(&pin).await),
            Startup::Create { playlist_id } => report(
                self.session
                    .create_room(Some(playlist_id))
                    .await
                    .map(drop),
            ),
            Startup::Idle => info!("Type help for a list of commands"),
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Foreground => self.trigger.set_state(AppState::Foreground),
            Command::Background => self.trigger.set_state(AppState::Background),
            Command::Join(pin) => report(self.session.set_pin(&pin).await),
            Command::Leave => self.session.leave(),
            Command::Vote { track_id, state } => {
                report(self.session.cast_vote(track_id, state).map(drop))
            }
            Command::Pick(track_id) => {
                let selected = self.draft.toggle_track(&track_id);
                let verb = if selected { "Selected" } else { "Deselected" };

                info!("{} {}, {} selected", verb, track_id, self.draft.len());
            }
            Command::Submit => match self.draft.submit(&self.session) {
                Ok(_) => info!("Adding tracks to the queue"),
                Err(e) => warn!("{}", e),
            },
            Command::Cancel => self.draft.cancel(),
            Command::Queue => self.print_queue(),
            Command::Playlist(id) => {
                let tracks = self.catalog.playlist_tracks(&id).await;
                self.print_catalog(tracks)
            }
            Command::Saved => {
                let tracks = self.catalog.saved_tracks().await;
                self.print_catalog(tracks)
            }
            Command::Play => report(self.session.play().await),
            Command::Skip => report(self.session.skip().await),
            Command::Help => info!("Commands:\n{}", HELP),
        }
    }

    fn print_queue(&self) {
        let tracks = self.session.tracks();
        let current = self.session.room().map(|r| r.current_index);

        if tracks.is_empty() {
            info!("The queue is empty");
            return;
        }

        for track in tracks {
            let marker = if Some(track.index) == current { ">" } else { " " };
            let vote = match self.session.my_vote(&track.id) {
                Some(VoteState::Up) => "+".green(),
                Some(VoteState::Down) => "-".red(),
                None => " ".clear(),
            };

            info!(
                "{} {:>3} {:>+3} {} {} - {} ({})",
                marker,
                track.index,
                self.session.score(&track.id),
                vote,
                track.name.bold(),
                track.artists.join(", "),
                track.id.bright_black()
            );
        }
    }

    fn print_catalog(&self, tracks: Result<Vec<CatalogTrack>, CatalogError>) {
        let tracks = match tracks {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("Could not list tracks: {}", e);
                return;
            }
        };

        for track in &tracks {
            let marker = if self.draft.is_selected(&track.id) { "*" } else { " " };

            info!(
                "{} {} - {} ({})",
                marker,
                track.name.bold(),
                track.artists.join(", "),
                track.id.bright_black()
            );
        }

        info!("{} tracks, pick them by id", tracks.len());
    }
}

impl FissaError {
    fn hint(&self) -> String {
        match self {
            FissaError::Config(_) => "Check the FISSA_* environment variables, unset ones fall back to their defaults.".to_string(),
            FissaError::MissingCredentials(_) => "Sign in with your music provider and export FISSA_USER_ID and FISSA_ACCESS_TOKEN.".to_string(),
            FissaError::Gateway(_) => "Make sure FISSA_API_URL points to a fissa backend.".to_string(),
            FissaError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn credentials_from_env() -> Result<Credentials, FissaError> {
    let required = |name: &'static str| env::var(name).map_err(|_| FissaError::MissingCredentials(name));

    Ok(Credentials {
        user_id: required("FISSA_USER_ID")?,
        access_token: required("FISSA_ACCESS_TOKEN")?,
        refresh_token: env::var("FISSA_REFRESH_TOKEN").ok(),
    })
}

fn startup_from_env() -> Startup {
    if let Ok(pin) = env::var("FISSA_PIN") {
        return Startup::Join(pin);
    }

    match env::var("FISSA_PLAYLIST_ID") {
        Ok(playlist_id) => Startup::Create { playlist_id },
        Err(_) => Startup::Idle,
    }
}

/// Session actions notify the user on their own, so only missing preconditions are logged here
fn report(result: Result<(), SessionError>) {
    match result {
        Ok(()) => {}
        Err(SessionError::NotJoined) => warn!("Join a session first"),
        Err(SessionError::InvalidPin(e)) => warn!("{}", e),
        Err(e) => debug!("{}", e),
    }
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::Joined { pin } => info!("Joined session {}", pin.as_str().bold()),
        SessionEvent::Left { pin } => info!("Left session {}", pin),
        SessionEvent::RoomUpdated(room) => {
            debug!("Session {} is at track {}", room.pin, room.current_index)
        }
        SessionEvent::TracksUpdated(tracks) => info!("The queue has {} tracks", tracks.len()),
        SessionEvent::VotesUpdated(votes) => debug!("{} tracks have votes", votes.len()),
        SessionEvent::Notification(notification) => {
            warn!("{}", notification.to_string().bold())
        }
    }
}

fn main() {
    logging::init_logger(env::var("FISSA_VERBOSE").is_ok());

    match Fissa::new() {
        Ok(fissa) => {
            info!("Initialized successfully.");
            fissa.run();
        }
        Err(error) => {
            error!("{} Read the error below to troubleshoot the issue.", "Fissa failed to start!".bold().red());
            error!("{}", error);
            error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
        }
    }
}
