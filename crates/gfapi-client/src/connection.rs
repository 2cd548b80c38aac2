//! Volume connections.
//!
//! A [`VolumeConnection`] names one volume, records where its volfile comes
//! from and how to log, then resolves the topology and mounts it through the
//! injected [`VolumeBackend`]. Handles opened from it share its core and are
//! invalidated when it closes.
//!
//! The state lock is never held across the volfile fetch or the mount, so
//! `state`, `close` and friends stay responsive while a connect is running.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gfapi_transport::{Endpoint, MgmtClientConfig, TransportKind};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{FileAttr, InodeId, LogTarget, MountOptions, VolumeBackend, VolumeSession};
use crate::error::{ClientError, Result};
use crate::handle::{self, FileHandle, FileHandleTable, HandleId, OpenMode};
use crate::logging;
use crate::path::{self, Resolved, VolumePath};
use crate::volfile::{Volfile, VolumeTopology};

/// Lifecycle of a [`VolumeConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created; not yet connected.
    Unconnected,
    /// A `connect` call is resolving or mounting the volume.
    Connecting,
    /// Mounted and usable.
    Connected,
    /// The last connect failed. Connecting again is allowed.
    Failed,
    /// Closed for good.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where the volume specification is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// A volfile on the local filesystem.
    Volfile(PathBuf),
    /// A management daemon that serves the volfile.
    Server(Endpoint),
}

impl VolumeSource {
    /// A local volfile source. The path must not be empty.
    pub fn volfile(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(ClientError::invalid("volfile path cannot be empty"));
        }
        Ok(VolumeSource::Volfile(path.to_path_buf()))
    }

    /// A management server source. `None` or an empty transport means
    /// `socket`; port 0 means the default management port.
    pub fn server(transport: Option<&str>, host: &str, port: u16) -> Result<Self> {
        let kind = TransportKind::parse_optional(transport)
            .map_err(|e| ClientError::invalid(e.to_string()))?;
        let endpoint =
            Endpoint::new(kind, host, port).map_err(|e| ClientError::invalid(e.to_string()))?;
        Ok(VolumeSource::Server(endpoint))
    }
}

/// Timeouts applied while resolving and mounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on dialing the management daemon.
    pub connect_timeout_ms: u64,
    /// Bound on each request, and on backend calls after mount.
    pub request_timeout_ms: u64,
}

impl ConnectOptions {
    /// Both timeouts must be greater than zero.
    pub fn new(connect_timeout_ms: u64, request_timeout_ms: u64) -> Result<Self> {
        if connect_timeout_ms == 0 || request_timeout_ms == 0 {
            return Err(ClientError::invalid("timeouts must be greater than zero"));
        }
        Ok(Self {
            connect_timeout_ms,
            request_timeout_ms,
        })
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            request_timeout_ms: 30000,
        }
    }
}

/// Validated settings applied together by [`VolumeConnection::apply`].
/// `None` fields leave the current value alone.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    /// Volume source.
    pub source: Option<VolumeSource>,
    /// Log target, already checked with [`logging::validate`].
    pub log: Option<LogTarget>,
    /// Timeouts.
    pub options: Option<ConnectOptions>,
}

struct ConnState {
    state: ConnectionState,
    source: Option<VolumeSource>,
    log: Option<LogTarget>,
    options: ConnectOptions,
    topology: Option<VolumeTopology>,
    session: Option<Arc<dyn VolumeSession>>,
}

/// State shared between a connection and the handles opened from it.
pub(crate) struct ConnectionCore {
    volume: String,
    backend: Arc<dyn VolumeBackend>,
    inner: Mutex<ConnState>,
    /// Flips to `true` once, when the connection closes.
    closing: watch::Sender<bool>,
    pub(crate) table: FileHandleTable,
}

impl ConnectionCore {
    pub(crate) fn volume(&self) -> &str {
        &self.volume
    }

    /// The mounted session, or `NotConnected`.
    pub(crate) fn session(&self) -> Result<Arc<dyn VolumeSession>> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) => Ok(session.clone()),
            _ => Err(ClientError::NotConnected {
                volume: self.volume.clone(),
            }),
        }
    }

    /// Runs `register` only while the connection is still connected, so a
    /// concurrent `close` cannot miss a freshly opened handle.
    pub(crate) fn while_connected<T>(&self, register: impl FnOnce() -> T) -> Result<T> {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected {
                volume: self.volume.clone(),
            });
        }
        Ok(register())
    }
}

/// A connection to one named volume.
///
/// `Send + Sync`: threads may share a connection and open independent
/// handles from it. Dropping the connection closes it.
pub struct VolumeConnection {
    core: Arc<ConnectionCore>,
}

fn validate_volume_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ClientError::invalid("volume name cannot be empty"));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(ClientError::invalid(format!(
            "volume name {:?} contains '/' or whitespace",
            name
        )));
    }
    Ok(())
}

impl VolumeConnection {
    /// An unconnected connection to `volume` with no source set.
    pub fn new(volume: &str, backend: Arc<dyn VolumeBackend>) -> Result<Self> {
        validate_volume_name(volume)?;
        debug!(volume, "created volume connection");
        let (closing, _) = watch::channel(false);
        Ok(Self {
            core: Arc::new(ConnectionCore {
                volume: volume.to_string(),
                backend,
                inner: Mutex::new(ConnState {
                    state: ConnectionState::Unconnected,
                    source: None,
                    log: None,
                    options: ConnectOptions::default(),
                    topology: None,
                    session: None,
                }),
                closing,
                table: FileHandleTable::new(),
            }),
        })
    }

    /// Volume name given at construction.
    pub fn volume(&self) -> &str {
        self.core.volume()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.inner.lock().state
    }

    /// Volume source, once set.
    pub fn source(&self) -> Option<VolumeSource> {
        self.core.inner.lock().source.clone()
    }

    /// Log target, once set.
    pub fn log_target(&self) -> Option<LogTarget> {
        self.core.inner.lock().log.clone()
    }

    /// Timeouts used by the next connect.
    pub fn options(&self) -> ConnectOptions {
        self.core.inner.lock().options
    }

    /// Sets the log file and verbosity. The file is created if missing and
    /// must be writable. Applies immediately when already connected.
    pub fn set_logging(&self, path: &Path, level: i32) -> Result<()> {
        let target = logging::validate(path, level)?;
        self.apply(ConnectionSettings {
            log: Some(target),
            ..Default::default()
        })
    }

    /// Uses a local volfile as the volume source.
    pub fn set_volfile(&self, path: &Path) -> Result<()> {
        self.apply(ConnectionSettings {
            source: Some(VolumeSource::volfile(path)?),
            ..Default::default()
        })
    }

    /// Uses a management server as the volume source. `None` or an empty
    /// transport means `socket`; port 0 means the default management port.
    pub fn set_volfile_server(&self, transport: Option<&str>, host: &str, port: u16) -> Result<()> {
        self.apply(ConnectionSettings {
            source: Some(VolumeSource::server(transport, host, port)?),
            ..Default::default()
        })
    }

    /// Overrides the connect and request timeouts.
    pub fn set_timeouts(&self, connect_timeout_ms: u64, request_timeout_ms: u64) -> Result<()> {
        self.apply(ConnectionSettings {
            options: Some(ConnectOptions::new(connect_timeout_ms, request_timeout_ms)?),
            ..Default::default()
        })
    }

    /// Applies every field of `settings` or none of them.
    ///
    /// A source may be set only while unconnected or failed, and only once;
    /// setting the same source again is accepted. A log target installs
    /// right away when the connection is already up.
    pub fn apply(&self, settings: ConnectionSettings) -> Result<()> {
        let mut inner = self.core.inner.lock();
        if let Some(source) = &settings.source {
            self.check_source(&inner, source)?;
        }
        if let Some(target) = &settings.log {
            if inner.state == ConnectionState::Connected {
                logging::install(target)?;
            }
        }

        if let Some(source) = settings.source {
            if inner.source.is_none() {
                debug!(volume = %self.core.volume, ?source, "volume source set");
                inner.source = Some(source);
            }
        }
        if let Some(target) = settings.log {
            debug!(
                volume = %self.core.volume,
                path = %target.path.display(),
                level = target.level,
                "log target set"
            );
            inner.log = Some(target);
        }
        if let Some(options) = settings.options {
            inner.options = options;
        }
        Ok(())
    }

    fn check_source(&self, inner: &ConnState, source: &VolumeSource) -> Result<()> {
        match inner.state {
            ConnectionState::Unconnected | ConnectionState::Failed => {}
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(ClientError::config(format!(
                    "volume {} is {}",
                    self.core.volume, inner.state
                )))
            }
            ConnectionState::Closed => {
                return Err(ClientError::NotConnected {
                    volume: self.core.volume.clone(),
                })
            }
        }
        match &inner.source {
            Some(existing) if existing != source => Err(ClientError::config(format!(
                "volume {} already has a source ({:?})",
                self.core.volume, existing
            ))),
            _ => Ok(()),
        }
    }

    fn connection_error(&self, reason: impl Into<String>) -> ClientError {
        ClientError::Connection {
            volume: self.core.volume.clone(),
            reason: reason.into(),
        }
    }

    /// Resolves the topology and mounts the volume. No retry on failure.
    ///
    /// The state lock is released while resolving and mounting. A `close`
    /// that lands meanwhile aborts the volfile fetch, and the connect then
    /// fails with `Connection`.
    pub fn connect(&self) -> Result<()> {
        let (source, log, options) = {
            let mut inner = self.core.inner.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => {
                    return Err(ClientError::NotConnected {
                        volume: self.core.volume.clone(),
                    })
                }
                ConnectionState::Connecting => {
                    return Err(self.connection_error("connect already in progress"))
                }
                ConnectionState::Unconnected | ConnectionState::Failed => {}
            }
            let source = inner.source.clone().ok_or_else(|| {
                ClientError::config(format!(
                    "no volfile or volfile server set for {}",
                    self.core.volume
                ))
            })?;
            inner.state = ConnectionState::Connecting;
            (source, inner.log.clone(), inner.options)
        };

        let established = self.establish(&source, log.as_ref(), options);

        let mut inner = self.core.inner.lock();
        if inner.state == ConnectionState::Closed {
            drop(inner);
            if let Ok((_, session)) = established {
                session.unmount();
            }
            warn!(volume = %self.core.volume, "connection closed while connecting");
            return Err(self.connection_error("connection closed while connecting"));
        }
        match established {
            Ok((topology, session)) => {
                info!(
                    volume = %self.core.volume,
                    top = %topology.volfile.top().name,
                    bricks = topology.bricks().len(),
                    "volume connected"
                );
                inner.topology = Some(topology);
                inner.session = Some(session);
                inner.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Failed;
                drop(inner);
                warn!(volume = %self.core.volume, error = %e, "connect failed");
                Err(match e {
                    e @ ClientError::Connection { .. } => e,
                    other => self.connection_error(other.to_string()),
                })
            }
        }
    }

    fn establish(
        &self,
        source: &VolumeSource,
        log: Option<&LogTarget>,
        options: ConnectOptions,
    ) -> Result<(VolumeTopology, Arc<dyn VolumeSession>)> {
        if let Some(target) = log {
            logging::install(target)?;
        }
        let volfile = match source {
            VolumeSource::Volfile(path) => Volfile::load(path)?,
            VolumeSource::Server(endpoint) => {
                let text = self.fetch_volfile(endpoint, options)?;
                Volfile::parse(&text)?
            }
        };
        let topology = VolumeTopology::new(self.core.volume.clone(), volfile);
        let mount = MountOptions {
            request_timeout_ms: options.request_timeout_ms,
            log: log.cloned(),
        };
        let session = self.core.backend.mount(&topology, &mount)?;
        Ok((topology, session))
    }

    fn fetch_volfile(&self, endpoint: &Endpoint, options: ConnectOptions) -> Result<String> {
        debug!(volume = %self.core.volume, %endpoint, "fetching volfile");
        let config = MgmtClientConfig {
            connect_timeout_ms: options.connect_timeout_ms,
            request_timeout_ms: options.request_timeout_ms,
        };
        let closing = self.core.closing.subscribe();
        let volume = self.core.volume.as_str();
        let fetch = move || fetch_until_closed(endpoint, volume, config, closing);

        // block_on panics on a thread that is already driving a runtime
        if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::scope(|scope| scope.spawn(fetch).join())
                .map_err(|_| ClientError::io("connect", "volfile fetch thread panicked"))?
        } else {
            fetch()
        }
    }

    /// Invalidates every handle, unmounts and moves to `Closed`.
    /// Failures are logged; closing twice does nothing.
    pub fn close(&self) {
        let session = {
            let mut inner = self.core.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.session.take()
        };
        self.core.closing.send_replace(true);
        let orphans = self.core.table.drain();
        if let Some(session) = session {
            for (id, entry) in &orphans {
                if let Err(e) = session.release(entry.fd) {
                    warn!(
                        volume = %self.core.volume,
                        handle = %id,
                        path = %entry.path,
                        error = %e,
                        "force-close failed"
                    );
                }
            }
            session.unmount();
        }
        info!(volume = %self.core.volume, closed_handles = orphans.len(), "volume connection closed");
    }

    /// Opens `path` on the volume.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        handle::open(&self.core, path, mode)
    }

    /// Attributes of `path`. Symlinks are not followed.
    pub fn stat(&self, path: &str) -> Result<FileAttr> {
        let session = self.core.session()?;
        let path = VolumePath::parse(path)?;
        path::lookup(session.as_ref(), &path)
    }

    /// Checks `mask` (`R_OK`, `W_OK`, `X_OK` or `F_OK`) against the owner
    /// permission bits of `path`.
    pub fn access(&self, path: &str, mask: i32) -> Result<()> {
        let all = libc::R_OK | libc::W_OK | libc::X_OK;
        if mask & !all != 0 {
            return Err(ClientError::invalid(format!("access mask 0o{:o}", mask)));
        }
        let attr = self.stat(path)?;
        let wanted = (mask as u32) << 6;
        if attr.mode & wanted != wanted {
            return Err(ClientError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Sets the length of the regular file at `path`.
    pub fn truncate(&self, path: &str, len: u64) -> Result<()> {
        let session = self.core.session()?;
        let vpath = VolumePath::parse(path)?;
        let attr = path::lookup(session.as_ref(), &vpath)?;
        if attr.is_dir() {
            return Err(ClientError::IsDirectory {
                path: vpath.to_string(),
            });
        }
        if !attr.is_file() {
            return Err(ClientError::invalid(format!("{} is not a regular file", vpath)));
        }
        session.setsize(attr.ino, len)?;
        debug!(volume = %self.core.volume, path = %vpath, len, "truncate");
        Ok(())
    }

    /// Creates a directory; its parent must exist.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<FileAttr> {
        self.create_leaf(path, "mkdir", |session, parent, name| {
            session.mkdir(parent, name, mode)
        })
    }

    /// Creates a symbolic link at `path` pointing at `target`. The target is
    /// stored as given and need not exist.
    pub fn symlink(&self, target: &str, path: &str) -> Result<FileAttr> {
        self.create_leaf(path, "symlink", |session, parent, name| {
            session.symlink(parent, name, target)
        })
    }

    /// Target of the symbolic link at `path`.
    pub fn readlink(&self, path: &str) -> Result<String> {
        let session = self.core.session()?;
        let vpath = VolumePath::parse(path)?;
        let attr = path::lookup(session.as_ref(), &vpath)?;
        if !attr.is_symlink() {
            return Err(ClientError::invalid(format!("{} is not a symlink", vpath)));
        }
        session.readlink(attr.ino)
    }

    /// Creates a FIFO, socket, device node or empty regular file, chosen
    /// by the type bits of `mode`.
    pub fn mknod(&self, path: &str, mode: u32, dev: u64) -> Result<FileAttr> {
        self.create_leaf(path, "mknod", |session, parent, name| {
            session.mknod(parent, name, mode, dev)
        })
    }

    fn create_leaf(
        &self,
        path: &str,
        op: &str,
        create: impl FnOnce(&dyn VolumeSession, InodeId, &str) -> Result<FileAttr>,
    ) -> Result<FileAttr> {
        let session = self.core.session()?;
        let vpath = VolumePath::parse(path)?;
        match path::resolve(session.as_ref(), &vpath)? {
            Resolved::Found { .. } => Err(ClientError::AlreadyExists {
                path: vpath.to_string(),
            }),
            Resolved::MissingLeaf { parent, name } => {
                let attr = create(session.as_ref(), parent, &name).map_err(|e| match e {
                    ClientError::AlreadyExists { .. } => ClientError::AlreadyExists {
                        path: vpath.to_string(),
                    },
                    other => other,
                })?;
                debug!(volume = %self.core.volume, path = %vpath, ino = attr.ino, op);
                Ok(attr)
            }
        }
    }

    /// Topology resolved at connect time.
    pub fn topology(&self) -> Option<VolumeTopology> {
        self.core.inner.lock().topology.clone()
    }

    /// Number of handles still open.
    pub fn open_handles(&self) -> usize {
        self.core.table.len()
    }

    /// Ids of the handles still open, ascending.
    pub fn handle_ids(&self) -> Vec<HandleId> {
        self.core.table.ids()
    }
}

fn fetch_until_closed(
    endpoint: &Endpoint,
    volume: &str,
    config: MgmtClientConfig,
    mut closing: watch::Receiver<bool>,
) -> Result<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ClientError::io("connect", e))?;
    runtime.block_on(async {
        tokio::select! {
            fetched = gfapi_transport::fetch_volfile(endpoint, volume, config) => {
                fetched.map_err(ClientError::from)
            }
            _ = closing.wait_for(|closed| *closed) => Err(ClientError::Connection {
                volume: volume.to_string(),
                reason: "connection closed while fetching volfile".into(),
            }),
        }
    })
}

impl fmt::Debug for VolumeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeConnection")
            .field("volume", &self.core.volume)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for VolumeConnection {
    fn drop(&mut self) {
        self.close();
    }
}
