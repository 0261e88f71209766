//! Wire types for the Maelstrom-style JSON transport described in
//! `spec.md` §3 and §6.
//!
//! Every message on the bus is `{src, dst, body}`, where `body` carries a
//! `type` tag plus type-specific fields. We model that as one
//! `#[serde(tag = "type")]` enum rather than one struct per RPC the way the
//! teacher crate does (`AppendEntriesRequest`, `VoteRequest`, ...) because
//! the transport itself is untyped JSON, not a typed channel per RPC.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::{ClientReqId, LogIndex, NodeId, Term};

/// A full transport envelope: `{src, dst, body}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dst: NodeId,
    pub body: Body,
}

/// Every message body this system sends or receives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Body {
    // -- bootstrap --
    Init { msg_id: u64, node_id: NodeId, node_ids: Vec<NodeId> },
    InitOk { in_reply_to: u64 },

    // -- client KV protocol --
    Read { msg_id: u64, key: String },
    ReadOk { in_reply_to: u64, value: serde_json::Value },
    Write { msg_id: u64, key: String, value: serde_json::Value },
    WriteOk { in_reply_to: u64 },
    Cas { msg_id: u64, key: String, from: serde_json::Value, to: serde_json::Value },
    CasOk { in_reply_to: u64 },
    Error { in_reply_to: u64, code: u64, text: String },

    // -- Raft internal protocol --
    AppendEntries {
        msg_id: u64,
        term: Term,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
    },
    AppendEntriesResponse {
        in_reply_to: u64,
        term: Term,
        success: bool,
        last_index: Option<LogIndex>,
    },
    RequestVote {
        msg_id: u64,
        term: Term,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    RequestVoteResponse {
        in_reply_to: u64,
        term: Term,
        vote_granted: bool,
    },

    // -- gateway quorum reads --
    QuorumRead {
        msg_id: u64,
        key: String,
        client_req_id: ClientReqId,
    },
    QuorumReadResponse {
        in_reply_to: u64,
        client_req_id: ClientReqId,
        timestamp: LogIndex,
        data: Option<serde_json::Value>,
        has_conflict: bool,
    },

    // -- gateway leaseholder reads --
    LeaseholderRead {
        key: String,
        client_id: NodeId,
        in_reply_to: u64,
    },
    LeaseholderReadResponse {
        success: bool,
        value: Option<serde_json::Value>,
        client_id: NodeId,
        in_reply_to: u64,
    },

    // -- self-addressed control (never sent over the wire to a peer) --
    TurnCandidate,
    NewElection,
    Heartbeat,
    DeleteQuorumState { client_req_id: ClientReqId },
}

impl Body {
    /// The `type` string this body would serialize with, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Body::Init { .. } => "init",
            Body::InitOk { .. } => "init_ok",
            Body::Read { .. } => "read",
            Body::ReadOk { .. } => "read_ok",
            Body::Write { .. } => "write",
            Body::WriteOk { .. } => "write_ok",
            Body::Cas { .. } => "cas",
            Body::CasOk { .. } => "cas_ok",
            Body::Error { .. } => "error",
            Body::AppendEntries { .. } => "append_entries",
            Body::AppendEntriesResponse { .. } => "append_entries_response",
            Body::RequestVote { .. } => "request_vote",
            Body::RequestVoteResponse { .. } => "request_vote_response",
            Body::QuorumRead { .. } => "quorum_read",
            Body::QuorumReadResponse { .. } => "quorum_read_response",
            Body::LeaseholderRead { .. } => "leaseholder_read",
            Body::LeaseholderReadResponse { .. } => "leaseholder_read_response",
            Body::TurnCandidate => "turn_candidate",
            Body::NewElection => "new_election",
            Body::Heartbeat => "heartbeat",
            Body::DeleteQuorumState { .. } => "delete_quorum_state",
        }
    }
}

/// Build an [`ClientError`](crate::error::ClientError)-shaped error body.
pub fn error_body(in_reply_to: u64, err: crate::error::ClientError) -> Body {
    Body::Error {
        in_reply_to,
        code: err.code(),
        text: err.text().to_string(),
    }
}

/// Accumulates outbound messages produced while handling a single inbound
/// message, for the worker to flush to the transport afterwards.
///
/// This is the synchronous stand-in for `send`/`reply` transport primitives
/// from `spec.md` §6: handlers never perform I/O directly, they just push
/// onto this buffer.
pub struct Outbox {
    src: NodeId,
    messages: Vec<Message>,
}

impl Outbox {
    pub fn new(src: NodeId) -> Self {
        Self { src, messages: Vec::new() }
    }

    /// `send(dst, body)`: emit a message from this node to `dst`.
    pub fn send(&mut self, dst: NodeId, body: Body) {
        self.messages.push(Message { src: self.src.clone(), dst, body });
    }

    /// `reply(msg, body)`: emit a message back to `msg`'s sender.
    ///
    /// The caller is responsible for populating `body`'s `in_reply_to`
    /// field from `msg`'s `msg_id` — each variant carries its own
    /// `in_reply_to`, so there is no single generic field to stamp here.
    pub fn reply(&mut self, to: &Message, body: Body) {
        self.send(to.src.clone(), body);
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Extract the `msg_id` carried by an inbound client/internal request body,
/// if it has one. Used to build `in_reply_to` fields.
pub fn msg_id_of(body: &Body) -> Option<u64> {
    match body {
        Body::Init { msg_id, .. }
        | Body::Read { msg_id, .. }
        | Body::Write { msg_id, .. }
        | Body::Cas { msg_id, .. }
        | Body::AppendEntries { msg_id, .. }
        | Body::RequestVote { msg_id, .. }
        | Body::QuorumRead { msg_id, .. } => Some(*msg_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let msg = Message {
            src: "n0".into(),
            dst: "n1".into(),
            body: Body::RequestVote {
                msg_id: 1,
                term: 4,
                candidate_id: "n0".into(),
                last_log_index: 2,
                last_log_term: 3,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"request_vote\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        match back.body {
            Body::RequestVote { term, .. } => assert_eq!(term, 4),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn outbox_reply_targets_sender() {
        let incoming = Message { src: "client1".into(), dst: "n0".into(), body: Body::Read { msg_id: 9, key: "x".into() } };
        let mut out = Outbox::new("n0".into());
        out.reply(&incoming, Body::ReadOk { in_reply_to: 9, value: serde_json::json!(42) });
        let sent = out.into_vec();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, "client1");
    }
}
