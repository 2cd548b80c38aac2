#![warn(missing_docs)]

//! gfapi-rs transport subsystem: the management-plane wire protocol used to
//! fetch volume specification files (volfiles) from a management daemon.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod mgmt;
pub mod protocol;

pub use endpoint::{Endpoint, TransportKind, DEFAULT_MGMT_PORT};
pub use error::{Result, TransportError};
pub use mgmt::{fetch_volfile, MgmtClient, MgmtClientConfig, VolfileDir, VolfileServer, VolfileSource};
