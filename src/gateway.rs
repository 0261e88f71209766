//! The read-routing gateway that wraps a Raft [`Node`] (`spec.md` §4.2).
//!
//! Writes and compare-and-swaps pass straight through to the node. Reads are
//! intercepted: a leader serves them locally, a non-leader probabilistically
//! picks between a quorum read (sample a majority of peers, take the
//! freshest, detect conflicts against the uncommitted log tail) and a
//! leaseholder read (forward to the tracked leader).

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::instrument;

use crate::message::{error_body, msg_id_of, Body, Message, Outbox};
use crate::node::Node;
use crate::{ClientReqId, LogIndex, NodeId};

/// Per-outstanding-quorum-read bookkeeping (`spec.md` §3/§4.2.1).
struct QuorumReadState {
    client_id: NodeId,
    client_msg_id: u64,
    number_responses: usize,
    most_updated: QuorumResponse,
}

#[derive(Clone)]
struct QuorumResponse {
    from: NodeId,
    timestamp: LogIndex,
    data: Option<serde_json::Value>,
    has_conflict: bool,
}

pub struct Gateway {
    node: Option<Node>,
    quorum_reads: HashMap<ClientReqId, QuorumReadState>,
    /// Cached once at construction (`spec.md` §4.2): probability a client
    /// `read` is served via the quorum path rather than leaseholder forward.
    quorum_read_fraction: f64,
}

impl Gateway {
    pub fn new(node: Node) -> Self {
        let fraction = quorum_read_fraction(node.core().cluster_size());
        Self { node: Some(node), quorum_reads: HashMap::new(), quorum_read_fraction: fraction }
    }

    /// The wrapped Raft node, for inspecting role/leader/store state.
    pub fn node(&self) -> &Node {
        self.node.as_ref().expect("node is only ever briefly absent mid-handle")
    }

    fn take_node(&mut self) -> Node {
        self.node.take().expect("node is only ever briefly absent mid-handle")
    }

    /// Quorum-read sample size: a majority of peers (self excluded), per
    /// `spec.md` §4.2.1: `m = ceil((n-1)/2)`.
    fn quorum_sample_size(&self) -> usize {
        let n = self.node().core().cluster_size();
        (n.saturating_sub(1) + 1) / 2
    }

    #[instrument(skip_all, fields(node_id = %self.node().core().node_id))]
    pub fn handle(&mut self, msg: Message, out: &mut Outbox) {
        match &msg.body {
            Body::Read { msg_id, key } => {
                let msg_id = *msg_id;
                let key = key.clone();
                self.handle_read(msg, msg_id, key, out);
            }
            Body::QuorumRead { msg_id, key, client_req_id } => {
                let (msg_id, key, client_req_id) = (*msg_id, key.clone(), *client_req_id);
                self.handle_quorum_read_request(&msg, msg_id, &key, client_req_id, out);
            }
            Body::QuorumReadResponse { client_req_id, timestamp, data, has_conflict, .. } => {
                let (client_req_id, timestamp, data, has_conflict) = (*client_req_id, *timestamp, data.clone(), *has_conflict);
                self.handle_quorum_read_response(&msg.src, client_req_id, timestamp, data, has_conflict, out);
            }
            Body::LeaseholderRead { key, client_id, in_reply_to } => {
                let (key, client_id, in_reply_to) = (key.clone(), client_id.clone(), *in_reply_to);
                self.handle_leaseholder_read_request(&msg, &key, client_id, in_reply_to, out);
            }
            Body::LeaseholderReadResponse { success, value, client_id, in_reply_to } => {
                let (success, value, client_id, in_reply_to) = (*success, value.clone(), client_id.clone(), *in_reply_to);
                Self::handle_leaseholder_read_response(success, value, &client_id, in_reply_to, out);
            }
            Body::DeleteQuorumState { client_req_id } => {
                self.quorum_reads.remove(client_req_id);
            }
            _ => {
                let node = self.take_node();
                self.node = Some(node.handle(msg, out));
            }
        }
    }

    fn handle_read(&mut self, msg: Message, msg_id: u64, key: String, out: &mut Outbox) {
        if self.node().is_leader() {
            let value = self.node().core().store.read(&key);
            match value {
                Some(value) => out.reply(&msg, Body::ReadOk { in_reply_to: msg_id, value }),
                None => out.reply(&msg, error_body(msg_id, crate::error::ClientError::KeyNotFound)),
            }
            return;
        }

        let r: f64 = rand::thread_rng().gen_range(0.0..1.0);
        if r <= self.quorum_read_fraction {
            self.start_quorum_read(msg, msg_id, key, out);
        } else {
            self.start_leaseholder_read(&msg, msg_id, key, out);
        }
    }

    fn start_quorum_read(&mut self, msg: Message, msg_id: u64, key: String, out: &mut Outbox) {
        let client_req_id = self.next_msg_id();
        let node_id = self.node().core().node_id.clone();
        let (timestamp, data, has_conflict) = build_quorum_read_response(self.node().core(), &key);

        let sample = self.sample_peers();
        for peer in &sample {
            let id = self.next_msg_id();
            out.send(peer.clone(), Body::QuorumRead { msg_id: id, key: key.clone(), client_req_id });
        }

        self.quorum_reads.insert(
            client_req_id,
            QuorumReadState {
                client_id: msg.src.clone(),
                client_msg_id: msg_id,
                number_responses: 1,
                most_updated: QuorumResponse { from: node_id, timestamp, data, has_conflict },
            },
        );

        self.schedule_quorum_cleanup(client_req_id);

        if sample.is_empty() {
            // solo/no-peer cluster: the local response alone already exceeds
            // the (zero) quorum threshold, reply immediately.
            self.finish_quorum_read(client_req_id, out);
        }
    }

    fn next_msg_id(&mut self) -> u64 {
        let mut node = self.take_node();
        let id = node_id_next_msg_id(&mut node);
        self.node = Some(node);
        id
    }

    fn sample_peers(&self) -> Vec<NodeId> {
        let core = self.node().core();
        let m = self.quorum_sample_size();
        let mut peers = core.peers.clone();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(m);
        peers
    }

    fn schedule_quorum_cleanup(&self, client_req_id: ClientReqId) {
        let core = self.node().core();
        let inbox = core.inbox.clone();
        let node_id = core.node_id.clone();
        let delay = core.config.quorum_read_cleanup_after();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Message { src: node_id.clone(), dst: node_id, body: Body::DeleteQuorumState { client_req_id } });
        });
    }

    fn handle_quorum_read_request(&mut self, msg: &Message, msg_id: u64, key: &str, client_req_id: ClientReqId, out: &mut Outbox) {
        let (timestamp, data, has_conflict) = build_quorum_read_response(self.node().core(), key);
        out.reply(msg, Body::QuorumReadResponse { in_reply_to: msg_id, client_req_id, timestamp, data, has_conflict });
    }

    fn handle_quorum_read_response(
        &mut self,
        from: &NodeId,
        client_req_id: ClientReqId,
        timestamp: LogIndex,
        data: Option<serde_json::Value>,
        has_conflict: bool,
        out: &mut Outbox,
    ) {
        let Some(state) = self.quorum_reads.get_mut(&client_req_id) else {
            return; // already answered or cleaned up
        };
        state.number_responses += 1;
        let replace = timestamp > state.most_updated.timestamp
            || (timestamp == state.most_updated.timestamp && *from > state.most_updated.from);
        if replace {
            state.most_updated = QuorumResponse { from: from.clone(), timestamp, data, has_conflict };
        }

        let m = self.quorum_sample_size();
        if state.number_responses > m {
            self.finish_quorum_read(client_req_id, out);
        }
    }

    fn finish_quorum_read(&mut self, client_req_id: ClientReqId, out: &mut Outbox) {
        let Some(state) = self.quorum_reads.remove(&client_req_id) else { return };
        let body = if state.most_updated.has_conflict {
            error_body(state.client_msg_id, crate::error::ClientError::WriteConflict)
        } else if let Some(value) = state.most_updated.data {
            Body::ReadOk { in_reply_to: state.client_msg_id, value }
        } else {
            error_body(state.client_msg_id, crate::error::ClientError::KeyNotFound)
        };
        out.send(state.client_id, body);
    }

    fn start_leaseholder_read(&mut self, msg: &Message, msg_id: u64, key: String, out: &mut Outbox) {
        match self.node().known_leader() {
            Some(leader) => {
                out.send(leader, Body::LeaseholderRead { key, client_id: msg.src.clone(), in_reply_to: msg_id });
            }
            None => {
                out.reply(msg, error_body(msg_id, crate::error::ClientError::NoKnownLeaseholder));
            }
        }
    }

    fn handle_leaseholder_read_request(&mut self, msg: &Message, key: &str, client_id: NodeId, in_reply_to: u64, out: &mut Outbox) {
        let is_leader = self.node().is_leader();
        let value = if is_leader { self.node().core().store.read(key) } else { None };
        out.reply(msg, Body::LeaseholderReadResponse { success: is_leader, value, client_id, in_reply_to });
    }

    fn handle_leaseholder_read_response(
        success: bool,
        value: Option<serde_json::Value>,
        client_id: &NodeId,
        in_reply_to: u64,
        out: &mut Outbox,
    ) {
        if !success {
            out.send(client_id.clone(), error_body(in_reply_to, crate::error::ClientError::OutdatedLeaseholder));
            return;
        }
        match value {
            Some(value) => out.send(client_id.clone(), Body::ReadOk { in_reply_to, value }),
            None => out.send(client_id.clone(), error_body(in_reply_to, crate::error::ClientError::KeyNotFound)),
        }
    }
}

fn node_id_next_msg_id(node: &mut Node) -> u64 {
    // `RaftCore::next_msg_id` needs `&mut`; `Node` only exposes `core()` by
    // shared reference since handlers otherwise own it by value. The gateway
    // is the one caller that needs to mint ids outside of a `handle` call, so
    // it reaches in through the same per-role `core` field directly.
    match node {
        Node::Follower(f) => f.core.next_msg_id(),
        Node::Candidate(c) => c.core.next_msg_id(),
        Node::Leader(l) => l.core.next_msg_id(),
    }
}

/// `build_quorum_read_response` (`spec.md` §4.2.1): conflict iff an
/// uncommitted logged write/cas on `key` exists past `last_applied`.
fn build_quorum_read_response(core: &crate::node::RaftCore, key: &str) -> (LogIndex, Option<serde_json::Value>, bool) {
    let has_conflict = core.log.tail_after(core.last_applied).iter().any(|e| e.command.key() == key);
    let data = if has_conflict { None } else { core.store.read(key) };
    (core.last_applied, data, has_conflict)
}

/// `quorum_read_fraction` (`spec.md` §4.2): the fraction of non-leaseholder
/// reads routed to the quorum path rather than forwarded to the leader.
///
/// `n` is the full cluster size including self. The combinatorial term `p`
/// is the probability that a uniformly random majority of the `n-1` peers
/// happens to include the leaseholder; clusters of 1-2 nodes have no
/// meaningful "majority of peers" to sample, so they always take the
/// leaseholder path.
fn quorum_read_fraction(n: usize) -> f64 {
    if n <= 2 {
        return 0.0;
    }
    let n = n as u64;
    let half = (n as f64 / 2.0).ceil() as u64;
    let p = if n == 3 { 1.0 } else { binom(n - 3, half - 1) / binom(n - 2, half) };
    let denom = n as f64 + p * (n - 2) as f64;
    1.0 - p * (n - 2) as f64 / denom
}

fn binom(n: u64, k: u64) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut result = 1.0f64;
    for i in 0..k {
        result *= (n - i) as f64 / (i + 1) as f64;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fraction_matches_n3_special_case() {
        // n=3: p is defined as 1 directly rather than via the binomial ratio.
        let f = quorum_read_fraction(3);
        assert!(f > 0.0 && f < 1.0);
    }

    #[test]
    fn fraction_stays_in_unit_interval_for_small_clusters() {
        for n in 1..=11 {
            let f = quorum_read_fraction(n);
            assert!((0.0..=1.0).contains(&f), "n={n} fraction={f}");
        }
    }

    #[test]
    fn tiny_clusters_never_take_quorum_path() {
        assert_eq!(quorum_read_fraction(1), 0.0);
        assert_eq!(quorum_read_fraction(2), 0.0);
    }

    fn bootstrap_follower(peers: Vec<&str>) -> Node {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let config = Arc::new(
            crate::config::ConfigBuilder::new()
                .lower_timeout_millis(5_000)
                .upper_timeout_millis(6_000)
                .heartbeat_rate_millis(500)
                .build(),
        );
        Node::bootstrap("n0".into(), peers.into_iter().map(String::from).collect(), config, tx)
    }

    #[tokio::test]
    async fn local_response_flags_uncommitted_conflict_on_key() {
        use crate::log::{ClientCommand, LogEntry};

        let mut node = bootstrap_follower(vec!["n1", "n2"]);
        if let Node::Follower(f) = &mut node {
            f.core.log.append(LogEntry {
                term: 1,
                command: ClientCommand::Write { msg_id: 1, key: "x".into(), value: serde_json::json!(1) },
                client: "c1".into(),
            });
        }
        let (timestamp, data, has_conflict) = build_quorum_read_response(node.core(), "x");
        assert!(has_conflict);
        assert!(data.is_none());
        assert_eq!(timestamp, 0); // nothing applied yet, so last_applied is still 0
    }

    #[tokio::test]
    async fn local_response_returns_value_for_unconflicted_key() {
        let node = bootstrap_follower(vec!["n1", "n2"]);
        let (_, data, has_conflict) = build_quorum_read_response(node.core(), "missing");
        assert!(!has_conflict);
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn finishing_quorum_read_prefers_the_freshest_timestamp() {

        let node = bootstrap_follower(vec!["n1", "n2"]);
        let mut gw = Gateway::new(node);
        gw.quorum_reads.insert(
            7,
            QuorumReadState {
                client_id: "c1".into(),
                client_msg_id: 42,
                number_responses: 1,
                most_updated: QuorumResponse {
                    from: "n0".into(),
                    timestamp: 2,
                    data: Some(serde_json::json!("old")),
                    has_conflict: false,
                },
            },
        );

        // cluster size 3 -> m = ceil((3-1)/2) = 1, so the second counted
        // response (the local one plus this one) crosses the `> m` threshold.
        let mut out = Outbox::new("n0".into());
        gw.handle_quorum_read_response(&"n1".to_string(), 7, 5, Some(serde_json::json!("new")), false, &mut out);

        let sent = out.into_vec();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            Body::ReadOk { in_reply_to, value } => {
                assert_eq!(*in_reply_to, 42);
                assert_eq!(value, &serde_json::json!("new"));
            }
            other => panic!("expected read_ok, got {other:?}"),
        }
        assert!(gw.quorum_reads.is_empty());
    }

    #[tokio::test]
    async fn finishing_quorum_read_reports_conflict_as_write_conflict_error() {

        let node = bootstrap_follower(vec!["n1", "n2"]);
        let mut gw = Gateway::new(node);
        gw.quorum_reads.insert(
            7,
            QuorumReadState {
                client_id: "c1".into(),
                client_msg_id: 42,
                number_responses: 1,
                most_updated: QuorumResponse { from: "n0".into(), timestamp: 0, data: Some(serde_json::json!(1)), has_conflict: false },
            },
        );

        let mut out = Outbox::new("n0".into());
        gw.handle_quorum_read_response(&"n1".to_string(), 7, 9, None, true, &mut out);

        let sent = out.into_vec();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            Body::Error { code, .. } => assert_eq!(*code, 11),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leaseholder_read_without_known_leader_errors_immediately() {

        let node = bootstrap_follower(vec!["n1", "n2"]);
        let mut gw = Gateway::new(node);
        let incoming = Message { src: "c1".into(), dst: "n0".into(), body: Body::Read { msg_id: 1, key: "x".into() } };

        // force the leaseholder path regardless of the random draw
        gw.quorum_read_fraction = -1.0;

        let mut out = Outbox::new("n0".into());
        gw.handle(incoming, &mut out);

        let sent = out.into_vec();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            Body::Error { code, .. } => assert_eq!(*code, 11),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
