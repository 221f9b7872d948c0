//! Echo server: answers `"message"` with the payload it was sent and
//! `"upper"` with the payload uppercased.
//!
//! Run with:
//!   cargo run -p ipcemit --example echo-server --features logging
//!
//! In another terminal:
//!   cargo run -p ipcemit --example request --features logging

use std::path::PathBuf;
use std::sync::Arc;

use ipcemit::emitter::Failure;
use ipcemit::logging::{init_logging, LogFormat, LogLevel};
use ipcemit::transport::{Endpoint, UdsListener};
use ipcemit::{AckConfig, IpcEmitter};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::Text, LogLevel::Debug);

    let sock_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("ipcemit-echo.sock"));
    let listener = UdsListener::bind(&sock_path)?;
    let emitter = IpcEmitter::new(AckConfig::default())?;
    eprintln!("Listening on {}", listener.path().display());

    loop {
        let peer = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };
        info!(endpoint = %peer.id(), pid = ?peer.pid(), "peer connected");

        emitter.add_listener(&peer, "message", |message: Value, _| async move {
            Ok::<_, Failure>(message)
        })?;
        emitter.add_listener(&peer, "upper", |message: Value, _| async move {
            match message.as_str() {
                Some(text) => Ok(Value::String(text.to_uppercase())),
                None => Err(Failure::from("expected a string")),
            }
        })?;

        // Hold the endpoint until the peer hangs up.
        let closed = Arc::new(Notify::new());
        let notify = Arc::clone(&closed);
        peer.hub().on_close(Arc::new(move || notify.notify_one()));
        tokio::spawn(async move {
            closed.notified().await;
            info!(endpoint = %peer.id(), "peer disconnected");
        });
    }

    eprintln!("Shutting down");
    Ok(())
}
