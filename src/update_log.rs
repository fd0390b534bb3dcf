//! The logical write-ahead log of cell changes.
//!
//! Every entry carries an update ID that is strictly increasing across the
//! whole store, so sorting by ID gives a total order of writes. Entries are
//! never edited once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UpdateId = u64;
pub type SheetId = u64;

/// A change waiting to be appended. The store assigns its ID and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUpdate {
    pub sheet: SheetId,
    pub submitter: String,
    pub payload: String,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: UpdateId,
    pub sheet: SheetId,
    pub submitter: String,
    pub payload: String,
    /// `true` for owner writes that are part of the authoritative state,
    /// `false` for subscriber proposals awaiting review.
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn from_new(id: UpdateId, update: NewUpdate) -> Self {
        LogEntry {
            id,
            sheet: update.sheet,
            submitter: update.submitter,
            payload: update.payload,
            accepted: update.accepted,
            timestamp: Utc::now(),
        }
    }
}

/// Which entries a per-sheet scan returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    Any,
    Accepted,
    Proposed,
}

impl Acceptance {
    pub fn matches(&self, accepted: bool) -> bool {
        match self {
            Acceptance::Any => true,
            Acceptance::Accepted => accepted,
            Acceptance::Proposed => !accepted,
        }
    }
}

/// Result of a delta query: concatenated payload plus the highest update ID
/// it covers, which the caller sends back as its next `since` cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub payload: String,
    pub last_id: UpdateId,
}

impl Delta {
    /// Concatenates entries in the order given. A payload stored without a
    /// terminal newline gets one so lines of adjacent entries never merge.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut delta = Delta::default();
        for entry in entries {
            delta.payload.push_str(&entry.payload);
            if !entry.payload.is_empty() && !entry.payload.ends_with('\n') {
                delta.payload.push('\n');
            }
            delta.last_id = delta.last_id.max(entry.id);
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: UpdateId, payload: &str, accepted: bool) -> LogEntry {
        LogEntry::from_new(
            id,
            NewUpdate {
                sheet: 1,
                submitter: "team".into(),
                payload: payload.into(),
                accepted,
            },
        )
    }

    #[test]
    fn delta_concatenates_in_order() {
        let entries = vec![entry(3, "$A1 1\n", true), entry(7, "$A2 2", false)];
        let delta = Delta::from_entries(&entries);
        assert_eq!(delta.payload, "$A1 1\n$A2 2\n");
        assert_eq!(delta.last_id, 7);

        let none: Vec<LogEntry> = Vec::new();
        let empty = Delta::from_entries(&none);
        assert_eq!(empty, Delta::default());
        assert_eq!(empty.last_id, 0);
    }

    #[test]
    fn acceptance_filter() {
        assert!(Acceptance::Any.matches(false));
        assert!(Acceptance::Accepted.matches(true));
        assert!(!Acceptance::Accepted.matches(false));
        assert!(Acceptance::Proposed.matches(false));
    }
}
