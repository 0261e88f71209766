//! The Candidate role (`spec.md` §4.1.2).

use std::collections::HashSet;

use tracing::instrument;

use super::{grant_vote, reply_not_leader, warn_unexpected, LeaderNode, Node, RaftCore};
use crate::message::{Body, Message, Outbox};
use crate::quorum::majority_of;
use crate::timer::ElectionTimer;
use crate::NodeId;

pub struct CandidateNode {
    pub(crate) core: RaftCore,
    timer: ElectionTimer,
    voters: HashSet<NodeId>,
    majority: usize,
}

impl CandidateNode {
    /// Enter the Candidate role from `core`: bump the term, vote for self,
    /// arm a fresh election timer, and broadcast `request_vote` to every peer.
    pub fn from_core(mut core: RaftCore, out: &mut Outbox) -> Node {
        core.current_term += 1;
        core.voted_for = Some(core.node_id.clone());
        let mut voters = HashSet::new();
        voters.insert(core.node_id.clone());
        let majority = majority_of(core.cluster_size());

        let timer = ElectionTimer::start(core.node_id.clone(), core.inbox.clone(), core.config.clone(), Body::NewElection);

        let last_log_index = core.log.len();
        let last_log_term = core.log.last_term();
        for peer in core.peers.clone() {
            let msg_id = core.next_msg_id();
            out.send(
                peer,
                Body::RequestVote {
                    msg_id,
                    term: core.current_term,
                    candidate_id: core.node_id.clone(),
                    last_log_index,
                    last_log_term,
                },
            );
        }

        Node::Candidate(Self { core, timer, voters, majority })
    }

    pub(crate) fn into_core(self) -> RaftCore {
        self.core
    }

    #[instrument(skip_all, fields(node_id = %self.core.node_id, term = self.core.current_term))]
    pub fn handle(mut self, msg: Message, out: &mut Outbox) -> Node {
        match msg.body {
            Body::RequestVoteResponse { term, vote_granted, .. } => {
                if term != self.core.current_term || !vote_granted {
                    return Node::Candidate(self);
                }
                self.voters.insert(msg.src.clone());
                if self.voters.len() >= self.majority {
                    return LeaderNode::from_core(self.core, out);
                }
                Node::Candidate(self)
            }
            Body::RequestVote { msg_id, term, ref candidate_id, last_log_index, last_log_term } => {
                grant_vote(&mut self.core, &msg, msg_id, term, candidate_id, last_log_index, last_log_term, out);
                Node::Candidate(self)
            }
            Body::Write { .. } | Body::Cas { .. } => {
                reply_not_leader(&msg, out);
                Node::Candidate(self)
            }
            Body::NewElection => CandidateNode::from_core(self.core, out),
            Body::AppendEntriesResponse { .. } => Node::Candidate(self),
            other => {
                warn_unexpected(&self.core.node_id, "candidate", &other);
                Node::Candidate(self)
            }
        }
    }
}
