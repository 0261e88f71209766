//! Maelstrom-style line-delimited JSON transport over stdio (`spec.md` §6).
//!
//! Out of scope as a design problem (`spec.md` §1 calls the transport an
//! "external collaborator"), but still has to exist and still follows
//! `spec.md` §7's error policy: an unrecognized `body.type` is logged and
//! dropped, while a recognized type that fails to parse is a protocol bug
//! and exits the process.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::message::Message;

const KNOWN_TYPES: &[&str] = &[
    "init",
    "init_ok",
    "read",
    "read_ok",
    "write",
    "write_ok",
    "cas",
    "cas_ok",
    "error",
    "append_entries",
    "append_entries_response",
    "request_vote",
    "request_vote_response",
    "quorum_read",
    "quorum_read_response",
    "leaseholder_read",
    "leaseholder_read_response",
    "turn_candidate",
    "new_election",
    "heartbeat",
    "delete_quorum_state",
];

/// Read newline-delimited JSON messages from stdin and forward each one onto
/// `inbox`. Runs until stdin closes or the receiver is dropped.
pub async fn read_stdin_into(inbox: UnboundedSender<Message>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(%err, "failed reading stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(msg) => {
                if inbox.send(msg).is_err() {
                    break;
                }
            }
            Err(err) => {
                let type_name = peek_type(&line);
                if type_name.as_deref().map(|t| KNOWN_TYPES.contains(&t)).unwrap_or(false) {
                    error!(%err, line, "malformed message of a known type; exiting");
                    std::process::exit(1);
                } else {
                    warn!(
                        %err,
                        r#type = type_name.as_deref().unwrap_or("<missing>"),
                        "dropping message of unrecognized type"
                    );
                }
            }
        }
    }
}

fn peek_type(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("body")?.get("type")?.as_str().map(str::to_string)
}

/// Write one outbound message as a single JSON line to stdout.
pub fn write_message(msg: &Message) {
    let line = serde_json::to_string(msg).expect("Message always serializes");
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let _ = writeln!(handle, "{line}");
    let _ = handle.flush();
}
