#![warn(missing_docs)]

//! gfapi-rs client access engine.
//!
//! Connect to a named volume, resolve its translator graph from a local
//! volfile or a management daemon, then open file handles and move bytes
//! through [`StreamReader`] and [`StreamWriter`] views.

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod logging;
pub mod memory;
pub mod path;
pub mod stream;
pub mod volfile;

pub use backend::{Access, FileAttr, FileKind, MountOptions, VolumeBackend, VolumeSession};
pub use client::ClientFacade;
pub use config::{ClientConfig, VolfileServerConfig};
pub use connection::{
    ConnectOptions, ConnectionSettings, ConnectionState, VolumeConnection, VolumeSource,
};
pub use error::{ClientError, Result};
pub use handle::{FileHandle, FileHandleTable, HandleId, OpenMode};
pub use memory::{FaultPlan, MemoryBackend, MAX_FILE_SIZE};
pub use stream::{StreamReader, StreamWriter};
pub use volfile::{Volfile, VolumeTopology};
