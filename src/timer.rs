//! The two timer flavors described in `spec.md` §4.3: a randomized
//! single-shot election timer and a fixed-period heartbeat timer.
//!
//! Neither timer touches node state directly (`spec.md` §5, §9): firing
//! just enqueues a self-addressed [`Message`] onto the shared inbox, which
//! the single worker task later dequeues and dispatches like any other
//! inbound message. Both timers cancel their background task on `Drop`, so
//! a role transition that simply drops the old role's timer field cancels
//! it with no explicit "stop" call required.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::message::{Body, Message};
use crate::NodeId;

fn self_message(node_id: &NodeId, body: Body) -> Message {
    Message { src: node_id.clone(), dst: node_id.clone(), body }
}

/// A randomized, resettable, single-shot election timer.
pub struct ElectionTimer {
    node_id: NodeId,
    inbox: UnboundedSender<Message>,
    config: Arc<Config>,
    fire: Body,
    handle: JoinHandle<()>,
}

impl ElectionTimer {
    /// Start the timer, drawing a fresh interval and arming it to enqueue
    /// `fire` (e.g. `Body::TurnCandidate`) when it elapses.
    pub fn start(node_id: NodeId, inbox: UnboundedSender<Message>, config: Arc<Config>, fire: Body) -> Self {
        let handle = Self::spawn(&node_id, &inbox, &config, fire.clone());
        Self { node_id, inbox, config, fire, handle }
    }

    fn spawn(node_id: &NodeId, inbox: &UnboundedSender<Message>, config: &Arc<Config>, fire: Body) -> JoinHandle<()> {
        let node_id = node_id.clone();
        let inbox = inbox.clone();
        let duration = config.new_rand_election_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = inbox.send(self_message(&node_id, fire));
        })
    }

    /// Cancel the outstanding wait and draw a fresh randomized interval.
    pub fn reset(&mut self) {
        self.handle.abort();
        self.handle = Self::spawn(&self.node_id, &self.inbox, &self.config, self.fire.clone());
    }
}

impl Drop for ElectionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A fixed-period heartbeat timer, used only by the Leader role.
pub struct HeartbeatTimer {
    handle: JoinHandle<()>,
}

impl HeartbeatTimer {
    pub fn start(node_id: NodeId, inbox: UnboundedSender<Message>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // the first tick fires immediately; consume it so heartbeats start one period out
            loop {
                interval.tick().await;
                if inbox.send(self_message(&node_id, Body::Heartbeat)).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
