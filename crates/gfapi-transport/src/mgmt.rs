//! Volfile fetch: the client side asks a management daemon for the volume
//! specification of a volume id; the server side answers from a
//! [`VolfileSource`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{DialConfig, FramedConnection, FrameStream};
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::protocol::{Frame, Opcode};

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Body of a `GetVolfile` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolfileRequest {
    /// Volume id (the volume name).
    pub volume_id: String,
    /// Identifies the requesting client process.
    pub client_uid: Uuid,
}

/// Body of a successful `GetVolfile` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolfileReply {
    /// Volume id echoed back.
    pub volume_id: String,
    /// Volfile text.
    pub volfile: String,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct MgmtClientConfig {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for MgmtClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            request_timeout_ms: 30000,
        }
    }
}

/// Management client bound to one daemon connection.
pub struct MgmtClient {
    conn: FramedConnection,
    config: MgmtClientConfig,
    client_uid: Uuid,
    next_id: AtomicU64,
}

impl MgmtClient {
    /// Dials the daemon.
    pub async fn connect(endpoint: &Endpoint, config: MgmtClientConfig) -> Result<Self> {
        let dial = DialConfig {
            connect_timeout_ms: config.connect_timeout_ms,
            ..DialConfig::default()
        };
        let conn = FramedConnection::dial(endpoint, &dial).await?;
        Ok(Self::from_connection(conn, config))
    }

    /// Wraps an established connection.
    pub fn from_connection(conn: FramedConnection, config: MgmtClientConfig) -> Self {
        Self {
            conn,
            config,
            client_uid: Uuid::new_v4(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Process identity sent with every volfile request.
    pub fn client_uid(&self) -> Uuid {
        self.client_uid
    }

    async fn exchange(&self, request: &Frame) -> Result<Frame> {
        self.conn.send_frame(request).await?;
        loop {
            let frame = self.conn.recv_frame().await?;
            if frame.is_response() && frame.request_id() == request.request_id() {
                return Ok(frame);
            }
            warn!(
                request_id = frame.request_id(),
                "discarding unexpected frame from {}",
                self.conn.peer()
            );
        }
    }

    async fn call(&self, opcode: Opcode, payload: Vec<u8>) -> Result<Frame> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Frame::new(opcode, request_id, payload);
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        let response = tokio::time::timeout(timeout, self.exchange(&request))
            .await
            .map_err(|_| TransportError::RequestTimeout {
                request_id,
                timeout_ms: self.config.request_timeout_ms,
            })??;

        if response.is_error() {
            return Err(TransportError::Remote {
                message: String::from_utf8_lossy(&response.payload).into_owned(),
            });
        }
        Ok(response)
    }

    /// Liveness check; returns the echoed payload.
    pub async fn ping(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self.call(Opcode::Ping, payload.to_vec()).await?.payload)
    }

    /// Fetches the volfile text for `volume_id`.
    pub async fn fetch_volfile(&self, volume_id: &str) -> Result<String> {
        let request = VolfileRequest {
            volume_id: volume_id.to_string(),
            client_uid: self.client_uid,
        };
        let response = self
            .call(Opcode::GetVolfile, bincode::serialize(&request)?)
            .await?;
        let reply: VolfileReply = bincode::deserialize(&response.payload)?;
        if reply.volume_id != volume_id {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "asked for volume {} but daemon answered for {}",
                    volume_id, reply.volume_id
                ),
            });
        }
        debug!(
            volume = volume_id,
            bytes = reply.volfile.len(),
            "fetched volfile from {}",
            self.conn.peer()
        );
        Ok(reply.volfile)
    }
}

/// One-shot helper: dial, fetch, hang up.
pub async fn fetch_volfile(
    endpoint: &Endpoint,
    volume_id: &str,
    config: MgmtClientConfig,
) -> Result<String> {
    let client = MgmtClient::connect(endpoint, config).await?;
    client.fetch_volfile(volume_id).await
}

/// Where a volfile server looks up volume specifications.
pub trait VolfileSource: Send + Sync + 'static {
    /// Volfile text for the volume id, if the volume is known.
    fn volfile(&self, volume_id: &str) -> Option<String>;
}

impl VolfileSource for HashMap<String, String> {
    fn volfile(&self, volume_id: &str) -> Option<String> {
        self.get(volume_id).cloned()
    }
}

/// Serves `<dir>/<volume_id>.vol` files.
#[derive(Debug, Clone)]
pub struct VolfileDir {
    dir: PathBuf,
}

impl VolfileDir {
    /// Serves volfiles out of `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl VolfileSource for VolfileDir {
    fn volfile(&self, volume_id: &str) -> Option<String> {
        if volume_id.is_empty()
            || volume_id.contains('/')
            || volume_id.contains('\\')
            || volume_id.starts_with('.')
        {
            return None;
        }
        let path = self.dir.join(format!("{}.vol", volume_id));
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "volfile not readable");
                None
            }
        }
    }
}

/// Management daemon answering `Ping` and `GetVolfile`.
#[derive(Clone)]
pub struct VolfileServer {
    source: Arc<dyn VolfileSource>,
}

impl VolfileServer {
    /// Creates a server backed by `source`.
    pub fn new(source: Arc<dyn VolfileSource>) -> Self {
        Self { source }
    }

    /// Answers a single request frame. A reply too large for the wire is
    /// replaced by an error frame.
    pub fn handle(&self, request: &Frame) -> Frame {
        let response = self.respond(request);
        match response.check_size() {
            Ok(()) => response,
            Err(e) => {
                warn!(request_id = request.request_id(), error = %e, "mgmt reply too large");
                request.make_error(&e.to_string())
            }
        }
    }

    fn respond(&self, request: &Frame) -> Frame {
        match request.opcode() {
            Opcode::Ping => request.make_response(request.payload.clone()),
            Opcode::GetVolfile => {
                let parsed: std::result::Result<VolfileRequest, _> =
                    bincode::deserialize(&request.payload);
                match parsed {
                    Ok(req) => match self.source.volfile(&req.volume_id) {
                        Some(volfile) => {
                            info!(
                                volume = %req.volume_id,
                                client = %req.client_uid,
                                "serving volfile"
                            );
                            let reply = VolfileReply {
                                volume_id: req.volume_id,
                                volfile,
                            };
                            match bincode::serialize(&reply) {
                                Ok(payload) => request.make_response(payload),
                                Err(e) => request.make_error(&e.to_string()),
                            }
                        }
                        None => request
                            .make_error(&format!("volume {} not found", req.volume_id)),
                    },
                    Err(e) => request.make_error(&format!("malformed volfile request: {}", e)),
                }
            }
        }
    }

    /// Runs the request loop for one connection until the peer hangs up.
    pub async fn serve_connection(&self, conn: FramedConnection) {
        loop {
            let frame = match conn.recv_frame().await {
                Ok(f) => f,
                Err(TransportError::ConnectionReset) => {
                    debug!(peer = conn.peer(), "mgmt peer disconnected");
                    break;
                }
                Err(e) => {
                    warn!(peer = conn.peer(), error = %e, "dropping mgmt connection");
                    break;
                }
            };
            let response = self.handle(&frame);
            if let Err(e) = conn.send_frame(&response).await {
                warn!(peer = conn.peer(), error = %e, "failed to send mgmt response");
                break;
            }
        }
    }

    fn spawn_connection<S: FrameStream>(&self, stream: S, peer: String) {
        let server = self.clone();
        tokio::spawn(async move {
            server
                .serve_connection(FramedConnection::from_stream(stream, peer))
                .await;
        });
    }

    async fn admit<S: FrameStream>(&self, accepted: std::io::Result<(S, String)>) {
        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "accepted mgmt connection");
                self.spawn_connection(stream, peer);
            }
            Err(e) => {
                warn!(error = %e, "mgmt accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    /// Accept loop over TCP. Spawns a task per connection; a failed accept
    /// is logged and the loop keeps going.
    pub async fn serve_tcp(&self, listener: tokio::net::TcpListener) -> Result<()> {
        loop {
            let accepted = listener.accept().await.map(|(stream, peer)| {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(peer = %peer, error = %e, "set_nodelay failed");
                }
                (stream, peer.to_string())
            });
            self.admit(accepted).await;
        }
    }

    /// Accept loop over a UNIX socket.
    pub async fn serve_unix(&self, listener: tokio::net::UnixListener) -> Result<()> {
        loop {
            let accepted = listener
                .accept()
                .await
                .map(|(stream, _)| (stream, "unix".to_string()));
            self.admit(accepted).await;
        }
    }
}
