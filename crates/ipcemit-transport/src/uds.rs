use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use ipcemit_frame::JsonCodec;
use serde_json::Value;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, EndpointId, Inbound, SendOptions};
use crate::error::{Result, TransportError};
use crate::hub::MessageHub;

/// Listening side of a filesystem-path Unix domain socket.
///
/// Each accepted connection becomes a [`StreamEndpoint`]. The socket file is
/// removed on drop, unless something else has replaced it in the meantime.
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UdsListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen at `path`.
    ///
    /// A stale socket file at `path` is removed first; any other kind of file
    /// is left alone and binding fails. Must be called within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TransportError::Bind { path, source }
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(TransportError::Bind {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err(&path))?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err(&path))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err(&path))?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err(&path))?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<Arc<StreamEndpoint>> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(StreamEndpoint::from_stream(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// A connected Unix stream carrying length-prefixed JSON frames.
///
/// A reader task decodes frames into the hub; a writer task drains the
/// outbound queue. Either side failing tears the endpoint down and closes
/// the hub. Send handles cannot cross a byte stream and are dropped.
pub struct StreamEndpoint {
    id: EndpointId,
    pid: Option<u32>,
    outbound: mpsc::UnboundedSender<Value>,
    shared: Arc<Shared>,
}

struct Shared {
    connected: AtomicBool,
    shutdown: CancellationToken,
    hub: MessageHub,
}

impl Shared {
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.shutdown.cancel();
            self.hub.close();
        }
    }
}

impl StreamEndpoint {
    /// Connect to a listening socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| TransportError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream. Spawns the reader and writer tasks.
    pub fn from_stream(stream: UnixStream) -> Arc<Self> {
        let pid = stream
            .peer_cred()
            .ok()
            .and_then(|cred| cred.pid())
            .and_then(|pid| u32::try_from(pid).ok());
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            hub: MessageHub::new(),
        });
        let id = EndpointId::next();

        tokio::spawn(read_loop(id, read_half, Arc::clone(&shared)));
        tokio::spawn(write_loop(id, write_half, queue, Arc::clone(&shared)));

        Arc::new(Self {
            id,
            pid,
            outbound,
            shared,
        })
    }

    /// Close the connection. The hub closes.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }
}

async fn read_loop(id: EndpointId, read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut frames = FramedRead::new(read_half, JsonCodec::new());
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(payload)) => shared.hub.emit(Inbound::new(payload)),
                Some(Err(e)) => {
                    warn!(endpoint = %id, error = %e, "read failed; closing stream");
                    break;
                }
                None => {
                    debug!(endpoint = %id, "peer closed stream");
                    break;
                }
            },
        }
    }
    shared.disconnect();
}

async fn write_loop(
    id: EndpointId,
    write_half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Value>,
    shared: Arc<Shared>,
) {
    let mut frames = FramedWrite::new(write_half, JsonCodec::new());
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(payload) => {
                    if let Err(e) = frames.send(payload).await {
                        warn!(endpoint = %id, error = %e, "write failed; closing stream");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    shared.disconnect();
}

impl Endpoint for StreamEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn transmit(&self, payload: Value, options: &SendOptions) -> bool {
        if !self.is_connected() {
            return false;
        }
        if options.send_handle.is_some() {
            warn!(
                endpoint = %self.id,
                keep_open = options.keep_open,
                "stream transport cannot carry a send handle; dropping it"
            );
        }
        self.outbound.send(payload).is_ok()
    }

    fn hub(&self) -> &MessageHub {
        &self.shared.hub
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("connected", &self.is_connected())
            .finish()
    }
}
