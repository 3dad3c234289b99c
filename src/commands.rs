use std::str::FromStr;

use fissa_core::VoteState;
use thiserror::Error;

/// A line typed into the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The app came back to the foreground
    Foreground,
    /// The app was suspended
    Background,
    Join(String),
    Leave,
    Vote { track_id: String, state: VoteState },
    /// Selects or deselects a track for the next submit
    Pick(String),
    Submit,
    Cancel,
    Queue,
    Playlist(String),
    Saved,
    Play,
    Skip,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command \"{0}\", type help for a list")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
}

pub const HELP: &str = "\
fg | bg            report the app state
join <pin>         join a session
leave              leave the session
up | down <track>  vote on a track
pick <track>       select a track to add
submit | cancel    add or drop the selection
queue              show the queue
playlist <id>      list a playlist's tracks
saved              list your saved tracks
play | skip        control playback";

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let argument = words.next().map(str::to_string);

        let required = |name: &'static str| argument.clone().ok_or(CommandError::MissingArgument(name));

        let command = match name {
            "fg" => Command::Foreground,
            "bg" => Command::Background,
            "join" => Command::Join(required("join")?),
            "leave" => Command::Leave,
            "up" => Command::Vote {
                track_id: required("up")?,
                state: VoteState::Up,
            },
            "down" => Command::Vote {
                track_id: required("down")?,
                state: VoteState::Down,
            },
            "pick" => Command::Pick(required("pick")?),
            "submit" => Command::Submit,
            "cancel" => Command::Cancel,
            "queue" => Command::Queue,
            "playlist" => Command::Playlist(required("playlist")?),
            "saved" => Command::Saved,
            "play" => Command::Play,
            "skip" => Command::Skip,
            "help" | "" => Command::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        Ok(command)
    }
}
