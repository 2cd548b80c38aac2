//! Errors raised by the management-plane transport.

use thiserror::Error;

/// Management-plane transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer refused the connection.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Address that refused the connection.
        addr: String,
    },

    /// Connecting took longer than the configured timeout.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address being dialed.
        addr: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The peer closed the connection mid-exchange.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A frame failed structural validation.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Why the frame was rejected.
        reason: String,
    },

    /// The frame did not start with the protocol magic.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Magic found on the wire.
        got: u32,
    },

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Local protocol version.
        expected: u8,
        /// Peer protocol version.
        got: u8,
    },

    /// Payload CRC32 did not match the header.
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried by the header.
        expected: u32,
        /// Checksum computed over the received payload.
        computed: u32,
    },

    /// Payload exceeds the protocol maximum.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Announced payload size.
        size: u32,
        /// Protocol maximum.
        max_size: u32,
    },

    /// No response arrived within the request timeout.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request that timed out.
        request_id: u64,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Opcode not known to this protocol version.
    #[error("unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    /// The endpoint description is unusable.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// Why the endpoint was rejected.
        reason: String,
    },

    /// The transport type string is not recognised.
    #[error("unknown transport type: {0}")]
    UnknownTransport(String),

    /// RDMA was requested but this build has no RDMA support.
    #[error("RDMA not available: {reason}")]
    RdmaNotAvailable {
        /// Why RDMA cannot be used.
        reason: String,
    },

    /// The management daemon answered with an error frame.
    #[error("remote error: {message}")]
    Remote {
        /// Error text sent by the daemon.
        message: String,
    },

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Underlying socket error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::SerializationError(e.to_string())
    }
}

impl TransportError {
    /// Whether the error happened before any byte reached the peer.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionRefused { .. }
                | TransportError::ConnectionTimeout { .. }
                | TransportError::InvalidEndpoint { .. }
                | TransportError::UnknownTransport(_)
                | TransportError::RdmaNotAvailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_addr() {
        let err = TransportError::ConnectionTimeout {
            addr: "mgmt01:24007".to_string(),
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("mgmt01:24007"));
        assert!(msg.contains("5000"));
    }

    #[test]
    fn test_magic_formatted_as_hex() {
        let err = TransportError::InvalidMagic {
            expected: 0x47465331,
            got: 0xDEADBEEF,
        };
        assert!(err.to_string().contains("0x47465331"));
        assert!(err.to_string().contains("0xDEADBEEF"));
    }

    #[test]
    fn test_connect_failure_classification() {
        assert!(TransportError::ConnectionRefused {
            addr: "x".into()
        }
        .is_connect_failure());
        assert!(TransportError::UnknownTransport("ib".into()).is_connect_failure());
        assert!(!TransportError::ConnectionReset.is_connect_failure());
        assert!(!TransportError::Remote {
            message: "no such volume".into()
        }
        .is_connect_failure());
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let err: TransportError = io_err.into();
        assert!(matches!(err, TransportError::IoError(_)));
    }
}
