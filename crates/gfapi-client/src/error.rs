//! Client error type and its errno mapping.

use gfapi_transport::TransportError;
use thiserror::Error;

/// Errors returned by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A caller supplied value is malformed or out of range.
    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    /// Connection settings are missing or conflict.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The operation needs a connected volume.
    #[error("Volume {volume} is not connected")]
    NotConnected { volume: String },

    /// Resolving or mounting the volume failed.
    #[error("Connection to volume {volume} failed: {reason}")]
    Connection { volume: String, reason: String },

    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    /// The handle was closed or its connection torn down.
    #[error("Invalid or closed file handle: {fh}")]
    InvalidHandle { fh: u64 },

    /// Read on a write-only handle or write on a read-only one.
    #[error("Handle {fh} not opened for {op}")]
    AccessMode { fh: u64, op: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("File exists: {path}")]
    AlreadyExists { path: String },

    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    #[error("Not a directory: {path}")]
    NotDirectory { path: String },

    /// The volume failed an I/O call.
    #[error("I/O error during {op}: {reason}")]
    Io { op: String, reason: String },

    /// Management-plane failure while fetching a volfile.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub(crate) fn io(op: &str, reason: impl std::fmt::Display) -> Self {
        ClientError::Io {
            op: op.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ClientError::InvalidArgument { msg: msg.into() }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ClientError::Configuration {
            reason: reason.into(),
        }
    }

    /// The `errno` a C caller would see for this error.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            ClientError::InvalidArgument { .. } => EINVAL,
            ClientError::Configuration { .. } => EINVAL,
            ClientError::NotConnected { .. } => ENOTCONN,
            ClientError::Connection { .. } => ENOTCONN,
            ClientError::NotFound { .. } => ENOENT,
            ClientError::InvalidHandle { .. } => EBADF,
            ClientError::AccessMode { .. } => EBADF,
            ClientError::PermissionDenied { .. } => EACCES,
            ClientError::AlreadyExists { .. } => EEXIST,
            ClientError::IsDirectory { .. } => EISDIR,
            ClientError::NotDirectory { .. } => ENOTDIR,
            ClientError::Io { .. } => EIO,
            ClientError::Transport(TransportError::IoError(e)) => e.raw_os_error().unwrap_or(EIO),
            ClientError::Transport(e) if e.is_connect_failure() => ENOTCONN,
            ClientError::Transport(_) => EIO,
        }
    }
}

impl From<ClientError> for std::io::Error {
    fn from(e: ClientError) -> Self {
        use std::io::ErrorKind;
        let kind = match &e {
            ClientError::NotFound { .. } => ErrorKind::NotFound,
            ClientError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            ClientError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ClientError::InvalidArgument { .. } => ErrorKind::InvalidInput,
            ClientError::NotConnected { .. } | ClientError::Connection { .. } => {
                ErrorKind::NotConnected
            }
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}
