//! `raftkv-node`: wires the `raftkv` library to a Maelstrom-style stdio
//! transport. A thin runnable beside the library, the way the teacher ships
//! `memstore` beside `async-raft`.

use std::sync::Arc;

use raftkv::config::Config;
use raftkv::worker;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::default());
    worker::run(config).await;
}
