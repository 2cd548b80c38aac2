//! Backend integration for the client.
//!
//! The storage cluster is an external collaborator. Everything the client
//! needs from it goes through [`VolumeBackend`] (mount a resolved topology)
//! and [`VolumeSession`] (inode-level operations on a mounted volume). The
//! wire protocol to bricks lives entirely behind these traits.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::Result;
use crate::volfile::VolumeTopology;

/// Inode number inside a mounted volume.
pub type InodeId = u64;

/// Inode number of the volume root.
pub const ROOT_INODE: InodeId = 1;

/// Backend-side open descriptor. Never handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteFd(pub u64);

impl fmt::Display for RemoteFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rfd:{}", self.0)
    }
}

/// Inode type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link; its size is the length of the target.
    Symlink,
    /// FIFO, socket or device node created with `mknod`.
    Other,
}

/// Attributes returned by lookups and stats.
#[derive(Debug, Clone)]
pub struct FileAttr {
    /// Inode number.
    pub ino: InodeId,
    /// Inode type.
    pub kind: FileKind,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits (no type bits).
    pub mode: u32,
    /// Link count.
    pub nlink: u32,
    /// Device number of a device node, 0 otherwise.
    pub rdev: u64,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl FileAttr {
    /// Whether the inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Whether the inode is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Whether the inode is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// Access requested when opening a remote descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `O_RDONLY`.
    ReadOnly,
    /// `O_WRONLY`.
    WriteOnly,
    /// `O_RDWR`.
    ReadWrite,
}

impl Access {
    /// Whether reads are allowed.
    pub fn is_readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    /// Whether writes are allowed.
    pub fn is_writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Logging target handed to the cluster client layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    /// File log lines are appended to.
    pub path: PathBuf,
    /// GlusterFS verbosity (0 to 9).
    pub level: u32,
}

/// Options passed to the backend when mounting.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Request timeout in milliseconds; bounds every blocking call.
    pub request_timeout_ms: u64,
    /// Where the cluster client layer logs, if configured.
    pub log: Option<LogTarget>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30000,
            log: None,
        }
    }
}

/// Mounts resolved volumes. One backend is created explicitly at process
/// start and injected into the client facade.
pub trait VolumeBackend: Send + Sync {
    /// Connects to every brick described by the topology.
    fn mount(
        &self,
        topology: &VolumeTopology,
        options: &MountOptions,
    ) -> Result<Arc<dyn VolumeSession>>;
}

/// Operations on a mounted volume. Reads and writes are positional; offset
/// bookkeeping belongs to the client.
pub trait VolumeSession: Send + Sync {
    /// Looks up `name` in directory `parent`.
    fn lookup(&self, parent: InodeId, name: &str) -> Result<Option<FileAttr>>;
    /// Attributes of an inode.
    fn getattr(&self, ino: InodeId) -> Result<FileAttr>;
    /// Creates a directory.
    fn mkdir(&self, parent: InodeId, name: &str, mode: u32) -> Result<FileAttr>;
    /// Creates an empty regular file.
    fn create(&self, parent: InodeId, name: &str, mode: u32) -> Result<FileAttr>;
    /// Creates a symbolic link pointing at `target`.
    fn symlink(&self, parent: InodeId, name: &str, target: &str) -> Result<FileAttr>;
    /// Target of a symbolic link.
    fn readlink(&self, ino: InodeId) -> Result<String>;
    /// Creates a FIFO, socket or device node. `mode` carries the type bits.
    fn mknod(&self, parent: InodeId, name: &str, mode: u32, rdev: u64) -> Result<FileAttr>;
    /// Sets the length of a file by inode.
    fn setsize(&self, ino: InodeId, len: u64) -> Result<()>;
    /// Opens a regular file.
    fn open(&self, ino: InodeId, access: Access) -> Result<RemoteFd>;
    /// Reads up to `buf.len()` bytes at `offset`; 0 means end of file.
    fn read(&self, fd: RemoteFd, offset: u64, buf: &mut [u8]) -> Result<usize>;
    /// Writes at `offset`; may write fewer bytes than given.
    fn write(&self, fd: RemoteFd, offset: u64, data: &[u8]) -> Result<usize>;
    /// Attributes of an open descriptor.
    fn fstat(&self, fd: RemoteFd) -> Result<FileAttr>;
    /// Sets the file length.
    fn truncate(&self, fd: RemoteFd, len: u64) -> Result<()>;
    /// Flushes the descriptor to stable storage.
    fn fsync(&self, fd: RemoteFd) -> Result<()>;
    /// Flushes file data, skipping metadata not needed to read it back.
    fn fdatasync(&self, fd: RemoteFd) -> Result<()> {
        self.fsync(fd)
    }
    /// Releases the descriptor.
    fn release(&self, fd: RemoteFd) -> Result<()>;
    /// Tears down the mount. In-flight and later calls fail.
    fn unmount(&self);
}
