#![cfg(all(unix, feature = "emitter"))]

use std::path::PathBuf;
use std::time::Duration;

use ipcemit::emitter::{AckErrorKind, Failure};
use ipcemit::transport::{Endpoint, SendHandle, StreamEndpoint, UdsListener};
use ipcemit::{AckConfig, AsyncEmitOptions, EmitOptions, IpcEmitter};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ipcemit-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[tokio::test]
async fn request_and_fire_and_forget_over_unix_socket() {
    let dir = unique_temp_dir("uds-e2e");
    let sock_path = dir.join("emit.sock");
    let listener = UdsListener::bind(&sock_path).unwrap();

    let client = StreamEndpoint::connect(&sock_path).await.unwrap();
    let server = listener.accept().await.unwrap();

    let server_side = IpcEmitter::new(AckConfig::default()).unwrap();
    let client_side = IpcEmitter::new(AckConfig::default()).unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    server_side
        .add_listener(&server, "message", move |message: Value, _| {
            let _ = seen_tx.send(message.clone());
            async move {
                if message == json!("ping") {
                    Ok(json!("pong"))
                } else {
                    Err(Failure::from(format!("unexpected {message}")))
                }
            }
        })
        .unwrap();

    // Fire-and-forget.
    assert!(client_side.send(&*client, json!("hello"), &EmitOptions::default()));
    assert_eq!(seen_rx.recv().await.unwrap(), json!("hello"));

    // Acknowledged request.
    let options = AsyncEmitOptions::with_timeout(Duration::from_secs(5));
    let reply = client_side.send_async(&*client, json!("ping"), &options).await;
    assert_eq!(reply.unwrap(), json!("pong"));
    assert_eq!(seen_rx.recv().await.unwrap(), json!("ping"));

    // Remote failure crosses the socket as an ACK error.
    let err = client_side
        .send_async(&*client, json!(42), &options)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AckErrorKind::Remote);
    assert_eq!(err.message(), "unexpected 42");

    drop(listener);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn send_handle_is_dropped_by_stream_transport() {
    let dir = unique_temp_dir("uds-handle");
    let sock_path = dir.join("handle.sock");
    let listener = UdsListener::bind(&sock_path).unwrap();

    let client = StreamEndpoint::connect(&sock_path).await.unwrap();
    let server = listener.accept().await.unwrap();
    let emitter = IpcEmitter::new(AckConfig::default()).unwrap();

    emitter
        .add_listener(&server, "handle?", |_, handle: Option<SendHandle>| async move {
            Ok::<_, Failure>(json!(handle.is_some()))
        })
        .unwrap();

    let options = AsyncEmitOptions {
        emit: EmitOptions::with_handle(SendHandle::new(7u8)),
        timeout: Some(Duration::from_secs(5)),
    };
    let reply = emitter.emit_async(&*client, "handle?", json!(null), &options).await;
    assert_eq!(reply.unwrap(), json!(false));

    drop(listener);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn server_hangup_drops_client_tables() {
    let dir = unique_temp_dir("uds-hangup");
    let sock_path = dir.join("hangup.sock");
    let listener = UdsListener::bind(&sock_path).unwrap();

    let client = StreamEndpoint::connect(&sock_path).await.unwrap();
    let server = listener.accept().await.unwrap();
    let emitter = IpcEmitter::new(AckConfig::default()).unwrap();
    emitter
        .add_listener(&client, "message", |message: Value, _| async move {
            Ok::<_, Failure>(message)
        })
        .unwrap();
    assert!(emitter.has_listener(&*client, "message"));

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    client.hub().on_close(std::sync::Arc::new(move || {
        let _ = closed_tx.send(());
    }));
    server.disconnect();

    tokio::time::timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());
    assert!(!emitter.has_listener(&*client, "message"));
    assert_eq!(emitter.endpoint_count(), 0);

    drop(listener);
    let _ = std::fs::remove_dir_all(&dir);
}
