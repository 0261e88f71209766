//! The replicated log: entries, and the 1-based indexing scheme used
//! throughout `spec.md` §3/§9.
//!
//! Internally entries are stored 0-based (`entries[0]` is log index 1); all
//! public methods translate at the boundary so the rest of the crate never
//! has to reason about the off-by-one itself.

use serde::{Deserialize, Serialize};

use crate::{LogIndex, NodeId, Term};

/// The client operation an entry carries — the "command" in `(term, command)`.
///
/// Only `write` and `cas` ever get logged; `read` is served entirely by the
/// gateway and never touches the log (`spec.md` §4.1.3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientCommand {
    Write { msg_id: u64, key: String, value: serde_json::Value },
    Cas { msg_id: u64, key: String, from: serde_json::Value, to: serde_json::Value },
}

impl ClientCommand {
    pub fn key(&self) -> &str {
        match self {
            ClientCommand::Write { key, .. } => key,
            ClientCommand::Cas { key, .. } => key,
        }
    }

    pub fn msg_id(&self) -> u64 {
        match self {
            ClientCommand::Write { msg_id, .. } => *msg_id,
            ClientCommand::Cas { msg_id, .. } => *msg_id,
        }
    }
}

/// A single replicated log entry: `(term, command)`, plus the client node
/// id the command came from so its eventual reply can be addressed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub term: Term,
    pub command: ClientCommand,
    pub client: NodeId,
}

/// A 1-indexed, append-only (from the leader's perspective) sequence of
/// [`LogEntry`] values.
#[derive(Clone, Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The index of the last entry, or 0 if the log is empty.
    pub fn len(&self) -> LogIndex {
        self.entries.len() as LogIndex
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the entry at 1-based `index`, or `None` if out of range.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            None
        } else {
            self.entries.get((index - 1) as usize)
        }
    }

    /// The term of the entry at 1-based `index`. Index 0 always returns
    /// `Some(0)` (the vacuous base case used by `prev_log_index = 0`).
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            Some(0)
        } else {
            self.get(index).map(|e| e.term)
        }
    }

    /// The term of the last entry, or 0 if the log is empty.
    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Log Matching check: does this log contain an entry at `index` with
    /// term `term`? Index 0 matches vacuously (`spec.md` §4.1.1).
    pub fn matches(&self, index: LogIndex, term: Term) -> bool {
        if index == 0 {
            return true;
        }
        self.term_at(index) == Some(term)
    }

    /// Append a single entry (used by a leader, which never truncates its
    /// own log — `spec.md` §3 invariant).
    pub fn append(&mut self, entry: LogEntry) -> LogIndex {
        self.entries.push(entry);
        self.len()
    }

    /// Truncate to keep entries `[1, prev_log_index]`, then append
    /// `new_entries` as the new tail. This is the follower-side "overwrite
    /// the suffix" operation from `spec.md` §4.1.1.
    pub fn truncate_and_append(&mut self, prev_log_index: LogIndex, new_entries: &[LogEntry]) {
        self.entries.truncate(prev_log_index as usize);
        self.entries.extend_from_slice(new_entries);
    }

    /// The tail starting at 1-based `from_index` (inclusive) through the
    /// end of the log. Used by a leader to build the `entries` field of an
    /// `append_entries` RPC for a given peer.
    pub fn tail_from(&self, from_index: LogIndex) -> Vec<LogEntry> {
        if from_index == 0 || from_index > self.len() + 1 {
            return Vec::new();
        }
        self.entries[(from_index - 1) as usize..].to_vec()
    }

    /// Entries with 1-based index strictly greater than `after_index`,
    /// through the end of the log. Used both to apply committed entries and
    /// by the gateway's conflict check over `log[last_applied+1..]`.
    pub fn tail_after(&self, after_index: LogIndex) -> &[LogEntry] {
        let start = (after_index as usize).min(self.entries.len());
        &self.entries[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(term: Term) -> LogEntry {
        LogEntry {
            term,
            command: ClientCommand::Write { msg_id: 1, key: "k".into(), value: json!(1) },
            client: "c1".into(),
        }
    }

    #[test]
    fn empty_log_matches_index_zero_vacuously() {
        let log = Log::new();
        assert!(log.matches(0, 0));
        assert!(!log.matches(1, 0));
        assert_eq!(log.last_term(), 0);
    }

    #[test]
    fn append_and_index_are_one_based() {
        let mut log = Log::new();
        assert_eq!(log.append(entry(1)), 1);
        assert_eq!(log.append(entry(2)), 2);
        assert_eq!(log.get(1).unwrap().term, 1);
        assert_eq!(log.get(2).unwrap().term, 2);
        assert!(log.get(3).is_none());
        assert!(log.matches(2, 2));
        assert!(!log.matches(2, 1));
    }

    #[test]
    fn truncate_and_append_overwrites_suffix() {
        let mut log = Log::new();
        log.append(entry(1));
        log.append(entry(1));
        log.append(entry(1)); // conflicting suffix from a stale leader
        log.truncate_and_append(1, &[entry(2), entry(2)]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.get(2).unwrap().term, 2);
        assert_eq!(log.get(3).unwrap().term, 2);
    }

    #[test]
    fn tail_from_builds_leader_replication_payload() {
        let mut log = Log::new();
        log.append(entry(1));
        log.append(entry(1));
        log.append(entry(2));
        assert_eq!(log.tail_from(2).len(), 2);
        assert_eq!(log.tail_from(4).len(), 0);
        assert_eq!(log.tail_from(1).len(), 3);
    }

    #[test]
    fn tail_after_feeds_conflict_detection() {
        let mut log = Log::new();
        log.append(entry(1));
        log.append(entry(1));
        assert_eq!(log.tail_after(1).len(), 1);
        assert_eq!(log.tail_after(2).len(), 0);
        assert_eq!(log.tail_after(0).len(), 2);
    }
}
