//! The Follower role (`spec.md` §4.1.1).

use tracing::instrument;

use super::{grant_vote, reply_not_leader, warn_unexpected, Node, RaftCore};
use crate::message::{Body, Message, Outbox};
use crate::timer::ElectionTimer;

pub struct FollowerNode {
    pub(crate) core: RaftCore,
    timer: ElectionTimer,
}

impl FollowerNode {
    pub fn from_core(core: RaftCore) -> Self {
        let timer = ElectionTimer::start(core.node_id.clone(), core.inbox.clone(), core.config.clone(), Body::TurnCandidate);
        Self { core, timer }
    }

    pub(crate) fn into_core(self) -> RaftCore {
        self.core
    }

    #[instrument(skip_all, fields(node_id = %self.core.node_id, term = self.core.current_term))]
    pub fn handle(mut self, msg: Message, out: &mut Outbox) -> Node {
        match &msg.body {
            Body::AppendEntries { msg_id, term, leader_id, prev_log_index, prev_log_term, entries, leader_commit } => {
                let (msg_id, term, prev_log_index, prev_log_term, leader_commit) =
                    (*msg_id, *term, *prev_log_index, *prev_log_term, *leader_commit);
                self.timer.reset();
                if term < self.core.current_term {
                    out.reply(
                        &msg,
                        Body::AppendEntriesResponse { in_reply_to: msg_id, term: self.core.current_term, success: false, last_index: None },
                    );
                    return Node::Follower(self);
                }
                self.core.known_leader = Some(leader_id.clone());
                if !self.core.log.matches(prev_log_index, prev_log_term) {
                    out.reply(
                        &msg,
                        Body::AppendEntriesResponse { in_reply_to: msg_id, term: self.core.current_term, success: false, last_index: None },
                    );
                    return Node::Follower(self);
                }
                self.core.log.truncate_and_append(prev_log_index, entries);
                if leader_commit > self.core.commit_index {
                    self.core.commit_index = leader_commit.min(self.core.log.len());
                    self.core.apply_up_to(self.core.commit_index);
                }
                out.reply(
                    &msg,
                    Body::AppendEntriesResponse {
                        in_reply_to: msg_id,
                        term: self.core.current_term,
                        success: true,
                        last_index: Some(self.core.log.len()),
                    },
                );
                Node::Follower(self)
            }
            Body::RequestVote { msg_id, term, candidate_id, last_log_index, last_log_term } => {
                let (msg_id, term, last_log_index, last_log_term) = (*msg_id, *term, *last_log_index, *last_log_term);
                let candidate_id = candidate_id.clone();
                self.timer.reset();
                grant_vote(&mut self.core, &msg, msg_id, term, &candidate_id, last_log_index, last_log_term, out);
                Node::Follower(self)
            }
            Body::Write { .. } | Body::Cas { .. } => {
                reply_not_leader(&msg, out);
                Node::Follower(self)
            }
            Body::TurnCandidate => super::CandidateNode::from_core(self.core, out),
            Body::RequestVoteResponse { .. } | Body::AppendEntriesResponse { .. } => {
                // stale reply from a role we've since left; nothing to do.
                Node::Follower(self)
            }
            other => {
                let other = (*other).clone();
                warn_unexpected(&self.core.node_id, "follower", &other);
                Node::Follower(self)
            }
        }
    }
}
