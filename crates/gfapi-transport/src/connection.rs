//! Framed connections to a management daemon over TCP or UNIX sockets.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::endpoint::{Endpoint, TransportKind};
use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameHeader, FRAME_HEADER_SIZE};

/// Byte stream a framed connection can run over.
pub trait FrameStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> FrameStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Dialer configuration.
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whether to enable TCP_NODELAY.
    pub nodelay: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
        }
    }
}

/// A connection exchanging whole frames.
pub struct FramedConnection {
    stream: Mutex<Box<dyn FrameStream>>,
    peer: String,
}

impl FramedConnection {
    /// Wraps an already established stream.
    pub fn from_stream<S: FrameStream>(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Mutex::new(Box::new(stream)),
            peer: peer.into(),
        }
    }

    /// Dials the endpoint within the configured timeout.
    pub async fn dial(endpoint: &Endpoint, config: &DialConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let timed_out = || TransportError::ConnectionTimeout {
            addr: endpoint.to_string(),
            timeout_ms: config.connect_timeout_ms,
        };
        match endpoint.transport {
            TransportKind::Socket => {
                let addr = endpoint.socket_addr();
                let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| connect_error(&addr, e))?;
                if config.nodelay {
                    stream.set_nodelay(true)?;
                }
                tracing::debug!(addr = %addr, "mgmt TCP connected");
                Ok(Self::from_stream(stream, addr))
            }
            TransportKind::Unix => {
                let path = endpoint.unix_path();
                let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(&path))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| connect_error(&endpoint.host, e))?;
                tracing::debug!(path = %path.display(), "mgmt UNIX socket connected");
                Ok(Self::from_stream(stream, endpoint.host.clone()))
            }
            TransportKind::Rdma => Err(TransportError::RdmaNotAvailable {
                reason: "management fetch over rdma is not supported".into(),
            }),
        }
    }

    /// Sends one frame. Oversized payloads are rejected before any byte
    /// is written.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        frame.check_size()?;
        let encoded = frame.encode();
        let mut stream = self.stream.lock().await;
        stream.write_all(&encoded).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Receives one frame, validating header and checksum.
    pub async fn recv_frame(&self) -> Result<Frame> {
        let mut stream = self.stream.lock().await;
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        stream
            .read_exact(&mut header_buf)
            .await
            .map_err(eof_as_reset)?;
        let header = FrameHeader::decode(&header_buf)?;
        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            stream.read_exact(&mut payload).await.map_err(eof_as_reset)?;
        }
        let frame = Frame { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// Peer description (address or socket path).
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

fn connect_error(addr: &str, e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::ConnectionRefused {
        TransportError::ConnectionRefused {
            addr: addr.to_string(),
        }
    } else {
        TransportError::IoError(e)
    }
}

fn eof_as_reset(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionReset
    } else {
        TransportError::IoError(e)
    }
}
