use std::collections::HashMap;

use crate::Vote;

/// Votes grouped by the id of the track they target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Votes {
    by_track: HashMap<String, Vec<Vote>>,
}

/// Groups a list of votes by track id.
///
/// Votes keep the order they were encountered in within a group, and no
/// deduplication by user happens here.
pub fn aggregate<I>(votes: I) -> Votes
where
    I: IntoIterator<Item = Vote>,
{
    let mut by_track: HashMap<String, Vec<Vote>> = HashMap::new();

    for vote in votes {
        by_track.entry(vote.track_id.clone()).or_default().push(vote);
    }

    Votes { by_track }
}

impl Votes {
    /// Returns the votes for a track, which is empty if nobody voted on it
    pub fn get(&self, track_id: &str) -> &[Vote] {
        self.by_track
            .get(track_id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// Returns the net score of a track: up votes minus down votes
    pub fn score(&self, track_id: &str) -> i64 {
        self.get(track_id).iter().map(|v| v.state.weight()).sum()
    }

    /// Returns the vote a user cast on a track, if any.
    /// If the user somehow voted more than once, the last vote wins.
    pub fn by_user(&self, track_id: &str, user_id: &str) -> Option<&Vote> {
        self.get(track_id)
            .iter()
            .rev()
            .find(|v| v.created_by == user_id)
    }

    /// Returns the ids of all tracks that have at least one vote
    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.by_track.keys().map(|k| k.as_str())
    }

    /// The number of tracks that have votes
    pub fn len(&self) -> usize {
        self.by_track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty()
    }
}
