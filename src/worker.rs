//! The single-threaded cooperative worker (`spec.md` §5): one task owns the
//! `Gateway`/`Node` state and processes the inbound stream serially. Timer
//! tasks and the stdin reader both only ever enqueue onto the shared inbox;
//! they never touch state directly.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::message::{Body, Message, Outbox};
use crate::node::Node;
use crate::transport;
use crate::NodeId;

/// Drop anything received before `init` is observed (`spec.md` §6), then
/// reply `init_ok` and return the bootstrapped node id and peer list.
async fn bootstrap(inbox: &mut UnboundedReceiver<Message>) -> (NodeId, Vec<NodeId>) {
    loop {
        let msg = inbox.recv().await.expect("stdin reader must stay alive until bootstrap completes");
        if let Body::Init { msg_id, node_id, node_ids } = msg.body {
            let peers = node_ids.into_iter().filter(|n| *n != node_id).collect();
            transport::write_message(&Message {
                src: node_id.clone(),
                dst: msg.src,
                body: Body::InitOk { in_reply_to: msg_id },
            });
            return (node_id, peers);
        }
        warn!(r#type = msg.body.type_name(), "dropping message received before init");
    }
}

/// Run the node forever: bootstrap, then dispatch inbound messages to the
/// gateway one at a time, flushing whatever it produced after each one.
pub async fn run(config: Arc<Config>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(transport::read_stdin_into(tx.clone()));

    let (node_id, peers) = bootstrap(&mut rx).await;
    info!(node_id, ?peers, "bootstrapped");

    let node = Node::bootstrap(node_id.clone(), peers, config, tx);
    let mut gateway = Gateway::new(node);

    while let Some(msg) = rx.recv().await {
        let mut out = Outbox::new(node_id.clone());
        gateway.handle(msg, &mut out);
        for message in out.into_vec() {
            transport::write_message(&message);
        }
    }
}
