//! The Leader role (`spec.md` §4.1.3).

use std::collections::HashMap;

use tracing::instrument;

use super::{grant_vote, reply_for_applied, warn_unexpected, Node, RaftCore};
use crate::log::LogEntry;
use crate::message::{Body, Message, Outbox};
use crate::quorum::majority_of;
use crate::timer::HeartbeatTimer;
use crate::{LogIndex, NodeId};

pub struct LeaderNode {
    pub(crate) core: RaftCore,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    heartbeat: HeartbeatTimer,
}

impl LeaderNode {
    /// Enter the Leader role from `core` (a Candidate that just won a
    /// majority). Initializes replication bookkeeping, starts the heartbeat
    /// timer, and sends an immediate append_entries to assert leadership
    /// right away rather than waiting out the first heartbeat period.
    pub fn from_core(core: RaftCore, out: &mut Outbox) -> Node {
        let next = core.log.len() + 1;
        let next_index = core.peers.iter().cloned().map(|p| (p, next)).collect();
        let match_index = core.peers.iter().cloned().map(|p| (p, 0)).collect();
        let heartbeat = HeartbeatTimer::start(core.node_id.clone(), core.inbox.clone(), core.config.heartbeat_rate);

        let mut leader = Self { core, next_index, match_index, heartbeat };
        leader.replicate_to_all(out);
        Node::Leader(leader)
    }

    pub(crate) fn into_core(self) -> RaftCore {
        self.core
    }

    fn build_append_entries(&mut self, entries: Vec<LogEntry>, prev_log_index: LogIndex) -> Body {
        let msg_id = self.core.next_msg_id();
        let prev_log_term = self.core.log.term_at(prev_log_index).unwrap_or(0);
        Body::AppendEntries {
            msg_id,
            term: self.core.current_term,
            leader_id: self.core.node_id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.core.commit_index,
        }
    }

    /// Send every peer whatever log tail it is missing (used after a client
    /// write appends a new entry, and immediately on becoming leader).
    fn replicate_to_all(&mut self, out: &mut Outbox) {
        for peer in self.core.peers.clone() {
            let next = *self.next_index.get(&peer).unwrap_or(&1);
            let prev_log_index = next.saturating_sub(1);
            let entries = self.core.log.tail_from(next);
            let body = self.build_append_entries(entries, prev_log_index);
            out.send(peer, body);
        }
    }

    /// Heartbeat ticks always carry an empty `entries` — real replication
    /// happens eagerly on write and on `append_entries_response` failure, not
    /// on the next tick (`spec.md` §4.3).
    fn send_heartbeats(&mut self, out: &mut Outbox) {
        for peer in self.core.peers.clone() {
            let prev_log_index = self.core.log.len();
            let body = self.build_append_entries(Vec::new(), prev_log_index);
            out.send(peer, body);
        }
    }

    fn retry_peer(&mut self, peer: &NodeId, out: &mut Outbox) {
        let next = *self.next_index.get(peer).unwrap_or(&1);
        let prev_log_index = next.saturating_sub(1);
        let entries = self.core.log.tail_from(next);
        let body = self.build_append_entries(entries, prev_log_index);
        out.send(peer.clone(), body);
    }

    /// Find the largest `N > commit_index` backed by a majority of
    /// `match_index` (leader implicitly counts itself) whose entry was
    /// written in the current term (State Machine Safety, `spec.md` §8),
    /// then apply and reply to clients for everything newly committed.
    fn attempt_commit(&mut self, out: &mut Outbox) {
        let need = majority_of(self.core.cluster_size());
        let mut new_commit = self.core.commit_index;
        let mut candidate = self.core.commit_index + 1;
        while candidate <= self.core.log.len() {
            let mut count = 1;
            for peer in &self.core.peers {
                if *self.match_index.get(peer).unwrap_or(&0) >= candidate {
                    count += 1;
                }
            }
            if count >= need && self.core.log.term_at(candidate) == Some(self.core.current_term) {
                new_commit = candidate;
            }
            candidate += 1;
        }
        if new_commit > self.core.commit_index {
            self.core.commit_index = new_commit;
            let applied = self.core.apply_up_to(new_commit);
            for entry in &applied {
                out.send(entry.client.clone(), reply_for_applied(entry));
            }
            self.replicate_to_all(out);
        }
    }

    #[instrument(skip_all, fields(node_id = %self.core.node_id, term = self.core.current_term))]
    pub fn handle(mut self, msg: Message, out: &mut Outbox) -> Node {
        match msg.body {
            Body::Write { msg_id, ref key, ref value } => {
                let entry = LogEntry {
                    term: self.core.current_term,
                    command: crate::log::ClientCommand::Write { msg_id, key: key.clone(), value: value.clone() },
                    client: msg.src.clone(),
                };
                self.core.log.append(entry);
                self.replicate_to_all(out);
                if self.core.peers.is_empty() {
                    self.attempt_commit(out);
                }
                Node::Leader(self)
            }
            Body::Cas { msg_id, ref key, ref from, ref to } => {
                let entry = LogEntry {
                    term: self.core.current_term,
                    command: crate::log::ClientCommand::Cas { msg_id, key: key.clone(), from: from.clone(), to: to.clone() },
                    client: msg.src.clone(),
                };
                self.core.log.append(entry);
                self.replicate_to_all(out);
                if self.core.peers.is_empty() {
                    self.attempt_commit(out);
                }
                Node::Leader(self)
            }
            Body::AppendEntriesResponse { term, success, last_index, .. } => {
                if term != self.core.current_term {
                    return Node::Leader(self);
                }
                if success {
                    let last_index = last_index.unwrap_or(self.core.commit_index);
                    self.match_index.insert(msg.src.clone(), last_index);
                    self.next_index.insert(msg.src.clone(), last_index + 1);
                    self.attempt_commit(out);
                } else {
                    let next = self.next_index.entry(msg.src.clone()).or_insert(1);
                    *next = next.saturating_sub(1).max(1);
                    self.retry_peer(&msg.src, out);
                }
                Node::Leader(self)
            }
            Body::RequestVote { msg_id, term, ref candidate_id, last_log_index, last_log_term } => {
                grant_vote(&mut self.core, &msg, msg_id, term, candidate_id, last_log_index, last_log_term, out);
                Node::Leader(self)
            }
            Body::AppendEntries { msg_id, term, .. } => {
                // Election Safety guarantees at most one leader per term, so a
                // same-term append_entries here would indicate a bug upstream;
                // treat defensively rather than panic.
                warn_unexpected(&self.core.node_id, "leader", &msg.body);
                out.reply(
                    &msg,
                    Body::AppendEntriesResponse { in_reply_to: msg_id, term: self.core.current_term.max(term), success: false, last_index: None },
                );
                Node::Leader(self)
            }
            Body::Heartbeat => {
                self.send_heartbeats(out);
                Node::Leader(self)
            }
            other => {
                warn_unexpected(&self.core.node_id, "leader", &other);
                Node::Leader(self)
            }
        }
    }
}
