//! The Raft role state machine: `RaftCore` (state shared across every role)
//! plus the `Node` enum that owns exactly one role struct at a time.
//!
//! Role transitions are modeled the teacher's way — `handle(self, msg) ->
//! Node` consumes the old role and produces the new one — rather than the
//! teacher's generic `RaftCore<D, R, N, S>` with a `target_state` dispatch
//! loop, since this system has exactly three concrete roles and no pluggable
//! storage/network layer to parameterize over.

pub mod candidate;
pub mod follower;
pub mod leader;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::config::Config;
use crate::log::{ClientCommand, Log};
use crate::message::{error_body, Body, Message, Outbox};
use crate::store::{CasError, KvStore};
use crate::{LogIndex, NodeId, Term};

pub use candidate::CandidateNode;
pub use follower::FollowerNode;
pub use leader::LeaderNode;

/// Persistent and volatile state shared by every role (`spec.md` §3/§4).
pub struct RaftCore {
    pub node_id: NodeId,
    pub peers: Vec<NodeId>,
    pub config: Arc<Config>,
    pub inbox: UnboundedSender<Message>,
    pub store: KvStore,

    // persistent state
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Log,

    // volatile state
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,

    /// Tracked so a `leaseholder_read` has somewhere to forward to. Updated
    /// whenever a Follower accepts an `append_entries` from a current leader.
    pub known_leader: Option<NodeId>,

    next_msg_id: u64,
}

impl RaftCore {
    pub fn new(node_id: NodeId, peers: Vec<NodeId>, config: Arc<Config>, inbox: UnboundedSender<Message>) -> Self {
        Self {
            node_id,
            peers,
            config,
            inbox,
            store: KvStore::new(),
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            last_applied: 0,
            known_leader: None,
            next_msg_id: 0,
        }
    }

    /// Total cluster size, this node included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn next_msg_id(&mut self) -> u64 {
        self.next_msg_id += 1;
        self.next_msg_id
    }
}

/// The outcome of applying one committed entry to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    WriteOk,
    CasOk,
    CasKeyNotFound,
    CasMismatch,
}

/// A committed entry that has just been applied, with enough context to
/// build the eventual client reply.
pub struct Applied {
    pub client: NodeId,
    pub client_msg_id: u64,
    pub result: ApplyResult,
}

fn apply_command(store: &mut KvStore, command: &ClientCommand) -> ApplyResult {
    match command {
        ClientCommand::Write { key, value, .. } => {
            store.write(key.clone(), value.clone());
            ApplyResult::WriteOk
        }
        ClientCommand::Cas { key, from, to, .. } => match store.cas(key, from, to.clone()) {
            Ok(()) => ApplyResult::CasOk,
            Err(CasError::KeyNotFound) => ApplyResult::CasKeyNotFound,
            Err(CasError::Mismatch) => ApplyResult::CasMismatch,
        },
    }
}

impl RaftCore {
    /// Apply every committed-but-unapplied entry up through `target`
    /// (1-based, inclusive), advancing `last_applied`. Returns what was
    /// applied so a Leader can turn each into a client reply; a Follower
    /// just discards the return value (`spec.md` §4.1.1/§4.2.3).
    pub fn apply_up_to(&mut self, target: LogIndex) -> Vec<Applied> {
        let mut applied = Vec::new();
        while self.last_applied < target {
            let index = self.last_applied + 1;
            let entry = self
                .log
                .get(index)
                .expect("a committed index must exist in the log")
                .clone();
            let result = apply_command(&mut self.store, &entry.command);
            applied.push(Applied {
                client: entry.client,
                client_msg_id: entry.command.msg_id(),
                result,
            });
            self.last_applied = index;
        }
        applied
    }
}

/// Build the `error`/`*_ok` reply for one applied entry.
pub fn reply_for_applied(applied: &Applied) -> Body {
    match applied.result {
        ApplyResult::WriteOk => Body::WriteOk { in_reply_to: applied.client_msg_id },
        ApplyResult::CasOk => Body::CasOk { in_reply_to: applied.client_msg_id },
        ApplyResult::CasKeyNotFound => error_body(applied.client_msg_id, crate::error::ClientError::KeyNotFound),
        ApplyResult::CasMismatch => error_body(applied.client_msg_id, crate::error::ClientError::CasMismatch),
    }
}

/// Common `request_vote` handling, available in any role (`spec.md` §4.1.2).
pub fn grant_vote(
    core: &mut RaftCore,
    msg: &Message,
    msg_id: u64,
    term: Term,
    candidate_id: &NodeId,
    last_log_index: LogIndex,
    last_log_term: Term,
    out: &mut Outbox,
) {
    let candidate_log_ok = if last_log_term != core.log.last_term() {
        last_log_term > core.log.last_term()
    } else {
        last_log_index >= core.log.len()
    };
    let can_vote = core.voted_for.as_ref().map_or(true, |v| v == candidate_id);
    let grant = term >= core.current_term && can_vote && candidate_log_ok;
    if grant {
        core.voted_for = Some(candidate_id.clone());
    }
    out.reply(
        msg,
        Body::RequestVoteResponse {
            in_reply_to: msg_id,
            term: core.current_term,
            vote_granted: grant,
        },
    );
}

/// Shared client-op rejection: only a Leader accepts writes (`spec.md` §4.1/§7).
pub fn reply_not_leader(msg: &Message, out: &mut Outbox) {
    if let Some(msg_id) = crate::message::msg_id_of(&msg.body) {
        out.reply(msg, error_body(msg_id, crate::error::ClientError::NotLeader));
    }
}

/// One Raft node, in exactly one of the three roles at a time.
pub enum Node {
    Follower(FollowerNode),
    Candidate(CandidateNode),
    Leader(LeaderNode),
}

impl Node {
    pub fn bootstrap(node_id: NodeId, peers: Vec<NodeId>, config: Arc<Config>, inbox: UnboundedSender<Message>) -> Self {
        let core = RaftCore::new(node_id, peers, config, inbox);
        Node::Follower(FollowerNode::from_core(core))
    }

    pub fn core(&self) -> &RaftCore {
        match self {
            Node::Follower(f) => &f.core,
            Node::Candidate(c) => &c.core,
            Node::Leader(l) => &l.core,
        }
    }

    fn into_core(self) -> RaftCore {
        match self {
            Node::Follower(f) => f.into_core(),
            Node::Candidate(c) => c.into_core(),
            Node::Leader(l) => l.into_core(),
        }
    }

    /// Current leader, if this node knows of one — used by the gateway to
    /// route `leaseholder_read`.
    pub fn known_leader(&self) -> Option<NodeId> {
        match self {
            Node::Leader(l) => Some(l.core.node_id.clone()),
            _ => self.core().known_leader.clone(),
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Node::Leader(_))
    }

    /// Term carried by messages that participate in the Raft RPC protocol,
    /// i.e. the ones the higher-term preamble applies to. Client messages
    /// (`read`/`write`/`cas`) and self-addressed control messages carry no
    /// term and are excluded.
    fn rpc_term(body: &Body) -> Option<Term> {
        match body {
            Body::AppendEntries { term, .. }
            | Body::RequestVote { term, .. }
            | Body::AppendEntriesResponse { term, .. }
            | Body::RequestVoteResponse { term, .. } => Some(*term),
            _ => None,
        }
    }

    /// Dispatch one inbound message, producing the (possibly new) node and
    /// any outbound messages via `out`.
    ///
    /// Implements the common preamble from `spec.md` §4.1: any role that
    /// observes a strictly higher term steps down to Follower first, then
    /// re-dispatches the message into the new Follower. We also step down a
    /// Candidate that observes a *current-term* `append_entries` — a
    /// necessary refinement beyond the literal "term > current_term" rule,
    /// since without it a Candidate would never recognize a leader that won
    /// this same term's election before it did (classic Raft §5.2).
    pub fn handle(self, msg: Message, out: &mut Outbox) -> Node {
        if let Some(term) = Self::rpc_term(&msg.body) {
            if term > self.core().current_term {
                let mut core = self.into_core();
                core.current_term = term;
                core.voted_for = None;
                return Node::Follower(FollowerNode::from_core(core)).handle(msg, out);
            }
            if term == self.core().current_term
                && matches!(self, Node::Candidate(_))
                && matches!(msg.body, Body::AppendEntries { .. })
            {
                let core = self.into_core();
                return Node::Follower(FollowerNode::from_core(core)).handle(msg, out);
            }
        }
        match self {
            Node::Follower(f) => f.handle(msg, out),
            Node::Candidate(c) => c.handle(msg, out),
            Node::Leader(l) => l.handle(msg, out),
        }
    }
}

pub(crate) fn warn_unexpected(node_id: &NodeId, role: &str, body: &Body) {
    warn!(node_id, role, r#type = body.type_name(), "unexpected message for role");
}
