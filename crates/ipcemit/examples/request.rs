//! Client for the echo-server example: one fire-and-forget emit, then a few
//! acknowledged calls.
//!
//! Run with:
//!   cargo run -p ipcemit --example request --features logging [socket-path]

use std::path::PathBuf;
use std::time::Duration;

use ipcemit::logging::{init_logging, LogFormat, LogLevel};
use ipcemit::transport::StreamEndpoint;
use ipcemit::{AckConfig, AsyncEmitOptions, EmitOptions, IpcEmitter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::Text, LogLevel::Info);

    let sock_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("ipcemit-echo.sock"));
    let endpoint = StreamEndpoint::connect(&sock_path).await?;
    let emitter = IpcEmitter::new(AckConfig::default())?;
    let options = AsyncEmitOptions::with_timeout(Duration::from_secs(3));

    emitter.send(&*endpoint, json!("fire-and-forget"), &EmitOptions::default());

    let echoed = emitter
        .send_async(&*endpoint, json!({"hello": "world"}), &options)
        .await?;
    println!("message -> {echoed}");

    let upper = emitter
        .emit_async(&*endpoint, "upper", json!("shout"), &options)
        .await?;
    println!("upper -> {upper}");

    match emitter
        .emit_async(&*endpoint, "missing", json!(null), &options)
        .await
    {
        Ok(value) => println!("missing -> {value}"),
        Err(err) => println!("missing -> error ({}): {err}", err.kind()),
    }

    endpoint.disconnect();
    Ok(())
}
