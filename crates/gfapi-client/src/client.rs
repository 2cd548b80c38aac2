//! Entry point for applications.
//!
//! [`ClientFacade`] owns the backend chosen at process start and hands out
//! connections, handles and stream views. It keeps no other state.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::backend::VolumeBackend;
use crate::config::ClientConfig;
use crate::connection::{ConnectOptions, ConnectionSettings, VolumeConnection, VolumeSource};
use crate::error::{ClientError, Result};
use crate::handle::{FileHandle, OpenMode};
use crate::logging::{self, DEFAULT_LOG_FILE};
use crate::stream::{StreamReader, StreamWriter};

/// Hands out connections, handles and stream views over one backend.
pub struct ClientFacade {
    backend: Arc<dyn VolumeBackend>,
    defaults: ClientConfig,
}

impl ClientFacade {
    /// A facade with default settings.
    pub fn new(backend: Arc<dyn VolumeBackend>) -> Self {
        Self::with_config(backend, ClientConfig::default())
    }

    /// Uses `defaults` for timeouts and logging when `configure` is given a
    /// config that leaves them unset.
    pub fn with_config(backend: Arc<dyn VolumeBackend>, defaults: ClientConfig) -> Self {
        Self { backend, defaults }
    }

    /// Settings used when a config leaves logging unset.
    pub fn defaults(&self) -> &ClientConfig {
        &self.defaults
    }

    /// A new unconnected connection to `name`.
    pub fn open_volume(&self, name: &str) -> Result<VolumeConnection> {
        VolumeConnection::new(name, self.backend.clone())
    }

    /// Applies the source, logging and timeouts of `config` to `conn`.
    /// Every field is checked before any is applied, so a rejected config
    /// leaves `conn` untouched.
    pub fn configure(&self, conn: &VolumeConnection, config: &ClientConfig) -> Result<()> {
        let settings = self.settings(config)?;
        conn.apply(settings)?;
        debug!(volume = conn.volume(), "applied client config");
        Ok(())
    }

    fn settings(&self, config: &ClientConfig) -> Result<ConnectionSettings> {
        let source = match (&config.volfile, &config.volfile_server) {
            (Some(_), Some(_)) => {
                return Err(ClientError::config(
                    "volfile and volfile_server are mutually exclusive",
                ))
            }
            (Some(path), None) => Some(VolumeSource::volfile(path)?),
            (None, Some(server)) => Some(VolumeSource::server(
                server.transport.as_deref(),
                &server.host,
                server.port,
            )?),
            (None, None) => None,
        };

        let level = i32::try_from(config.log_level)
            .map_err(|_| ClientError::invalid(format!("log level {} too large", config.log_level)))?;
        let log_file = config
            .log_file
            .as_deref()
            .or(self.defaults.log_file.as_deref());
        let log = match log_file {
            Some(path) => Some(logging::validate(path, level)?),
            None if config.log_level != self.defaults.log_level => {
                Some(logging::validate(Path::new(DEFAULT_LOG_FILE), level)?)
            }
            None => None,
        };

        let options = ConnectOptions::new(config.connect_timeout_ms, config.request_timeout_ms)?;
        Ok(ConnectionSettings {
            source,
            log,
            options: Some(options),
        })
    }

    /// Opens, configures and connects the volume named in `config`.
    pub fn connect_volume(&self, config: &ClientConfig) -> Result<VolumeConnection> {
        let conn = self.open_volume(&config.volume)?;
        self.configure(&conn, config)?;
        conn.connect()?;
        Ok(conn)
    }

    /// Opens `path` on a connected volume.
    pub fn open_file(&self, conn: &VolumeConnection, path: &str, mode: OpenMode) -> Result<FileHandle> {
        conn.open(path, mode)
    }

    /// Sequential reader over `handle`.
    pub fn reader<'a>(&self, handle: &'a mut FileHandle) -> StreamReader<'a> {
        StreamReader::new(handle)
    }

    /// Sequential writer over `handle`.
    pub fn writer<'a>(&self, handle: &'a mut FileHandle) -> StreamWriter<'a> {
        StreamWriter::new(handle)
    }
}
