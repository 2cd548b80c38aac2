//! Open file handles.
//!
//! The [`FileHandleTable`] of a connection records which remote descriptor
//! backs each live [`FileHandle`]. The handle itself owns its byte offset;
//! the table never stores it, so offset updates need only `&mut FileHandle`.

use std::collections::HashMap;
use std::fmt;
use std::io::{IoSlice, IoSliceMut, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::{Access, FileAttr, InodeId, RemoteFd, VolumeSession};
use crate::connection::ConnectionCore;
use crate::error::{ClientError, Result};
use crate::path::{self, Resolved, VolumePath};

/// Identifier of an open handle. Never reused within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh:{}", self.0)
    }
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    /// Read/write permission of the handle.
    pub access: Access,
    /// Create the file when missing (`O_CREAT`).
    pub create: bool,
    /// With `create`, fail if the file exists (`O_EXCL`).
    pub exclusive: bool,
    /// Empty an existing file on open (`O_TRUNC`).
    pub truncate: bool,
    /// Permission bits for newly created files.
    pub perm: u32,
}

impl OpenMode {
    fn with_access(access: Access) -> Self {
        Self {
            access,
            create: false,
            exclusive: false,
            truncate: false,
            perm: 0o644,
        }
    }

    /// `O_RDONLY`.
    pub fn read_only() -> Self {
        Self::with_access(Access::ReadOnly)
    }

    /// `O_WRONLY`.
    pub fn write_only() -> Self {
        Self::with_access(Access::WriteOnly)
    }

    /// `O_RDWR`.
    pub fn read_write() -> Self {
        Self::with_access(Access::ReadWrite)
    }

    /// Sets `create`.
    pub fn create(mut self, on: bool) -> Self {
        self.create = on;
        self
    }

    /// Sets `exclusive`.
    pub fn exclusive(mut self, on: bool) -> Self {
        self.exclusive = on;
        self
    }

    /// Sets `truncate`.
    pub fn truncate(mut self, on: bool) -> Self {
        self.truncate = on;
        self
    }

    /// Sets the permission bits used on create.
    pub fn perm(mut self, perm: u32) -> Self {
        self.perm = perm;
        self
    }

    /// Builds a mode from `open(2)` flags.
    pub fn from_libc(flags: i32, perm: u32) -> Self {
        let access = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => Access::WriteOnly,
            libc::O_RDWR => Access::ReadWrite,
            _ => Access::ReadOnly,
        };
        Self {
            access,
            create: flags & libc::O_CREAT != 0,
            exclusive: flags & libc::O_EXCL != 0,
            truncate: flags & libc::O_TRUNC != 0,
            perm,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OpenEntry {
    pub(crate) fd: RemoteFd,
    pub(crate) ino: InodeId,
    pub(crate) path: VolumePath,
}

/// Live handles of one connection.
pub struct FileHandleTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<HandleId, OpenEntry>>,
}

impl FileHandleTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, entry: OpenEntry) -> HandleId {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handle = %id, ino = entry.ino, fd = %entry.fd, path = %entry.path, "opened handle");
        self.entries.lock().insert(id, entry);
        id
    }

    fn get(&self, id: HandleId) -> Option<OpenEntry> {
        self.entries.lock().get(&id).cloned()
    }

    fn remove(&self, id: HandleId) -> Option<OpenEntry> {
        let entry = self.entries.lock().remove(&id);
        if entry.is_some() {
            debug!(handle = %id, "closed handle");
        }
        entry
    }

    /// Empties the table, returning every entry that was still open.
    pub(crate) fn drain(&self) -> Vec<(HandleId, OpenEntry)> {
        let mut entries: Vec<_> = self.entries.lock().drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no handle is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live handle ids, ascending.
    pub fn ids(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Opens `raw_path` on a connected volume.
pub(crate) fn open(core: &Arc<ConnectionCore>, raw_path: &str, mode: OpenMode) -> Result<FileHandle> {
    let session = core.session()?;
    let path = VolumePath::parse(raw_path)?;
    if path.is_root() {
        return Err(ClientError::IsDirectory {
            path: path.to_string(),
        });
    }
    if mode.truncate && !mode.access.is_writable() {
        return Err(ClientError::invalid(format!(
            "cannot truncate {} opened read-only",
            path
        )));
    }

    let (ino, existed) = match path::resolve(session.as_ref(), &path)? {
        Resolved::Found { attr, .. } => {
            if mode.create && mode.exclusive {
                return Err(ClientError::AlreadyExists {
                    path: path.to_string(),
                });
            }
            if attr.is_dir() {
                return Err(ClientError::IsDirectory {
                    path: path.to_string(),
                });
            }
            if !attr.is_file() {
                return Err(ClientError::invalid(format!(
                    "{} is not a regular file",
                    path
                )));
            }
            (attr.ino, true)
        }
        Resolved::MissingLeaf { parent, name } => {
            if !mode.create {
                return Err(ClientError::NotFound {
                    path: path.to_string(),
                });
            }
            let attr = session
                .create(parent, &name, mode.perm)
                .map_err(|e| match e {
                    ClientError::AlreadyExists { .. } => ClientError::AlreadyExists {
                        path: path.to_string(),
                    },
                    other => other,
                })?;
            (attr.ino, false)
        }
    };

    let fd = session.open(ino, mode.access)?;
    if mode.truncate && existed {
        if let Err(e) = session.truncate(fd, 0) {
            release_quietly(session.as_ref(), fd);
            return Err(e);
        }
    }

    let entry = OpenEntry {
        fd,
        ino,
        path: path.clone(),
    };
    let id = match core.while_connected(|| core.table.insert(entry)) {
        Ok(id) => id,
        Err(e) => {
            release_quietly(session.as_ref(), fd);
            return Err(e);
        }
    };
    Ok(FileHandle {
        core: core.clone(),
        id,
        path,
        mode,
        offset: 0,
        closed: false,
    })
}

fn release_quietly(session: &dyn VolumeSession, fd: RemoteFd) {
    if let Err(e) = session.release(fd) {
        warn!(%fd, error = %e, "release after failed open");
    }
}

/// An open file on a volume.
///
/// Not `Clone`: the offset has exactly one owner. Dropping an open handle
/// closes it.
pub struct FileHandle {
    core: Arc<ConnectionCore>,
    id: HandleId,
    path: VolumePath,
    mode: OpenMode,
    offset: u64,
    closed: bool,
}

impl FileHandle {
    /// Id of this handle within its connection.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Path the handle was opened with.
    pub fn path(&self) -> &VolumePath {
        &self.path
    }

    /// Mode the handle was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// False once closed by the caller or by connection teardown.
    pub fn is_open(&self) -> bool {
        !self.closed && self.core.table.get(self.id).is_some()
    }

    fn invalid(&self) -> ClientError {
        ClientError::InvalidHandle {
            fh: self.id.as_u64(),
        }
    }

    fn target(&self) -> Result<(Arc<dyn VolumeSession>, RemoteFd)> {
        if self.closed {
            return Err(self.invalid());
        }
        let entry = self.core.table.get(self.id).ok_or_else(|| self.invalid())?;
        let session = self.core.session().map_err(|_| self.invalid())?;
        Ok((session, entry.fd))
    }

    fn require(&self, writable: bool, op: &str) -> Result<()> {
        let ok = if writable {
            self.mode.access.is_writable()
        } else {
            self.mode.access.is_readable()
        };
        if ok {
            Ok(())
        } else {
            Err(ClientError::AccessMode {
                fh: self.id.as_u64(),
                op: op.to_string(),
            })
        }
    }

    /// Reads at the current offset and advances it by the count read.
    pub(crate) fn read_next(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.pread(buf, self.offset)?;
        self.offset += n as u64;
        trace!(handle = %self.id, n, offset = self.offset, "read");
        Ok(n)
    }

    /// Writes all of `data` at the current offset. The offset moves only
    /// once every byte has been stored.
    pub(crate) fn write_next(&mut self, data: &[u8]) -> Result<()> {
        let end = self
            .offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| ClientError::invalid("write past maximum offset"))?;
        self.pwrite(data, self.offset)?;
        self.offset = end;
        trace!(handle = %self.id, n = data.len(), offset = self.offset, "write");
        Ok(())
    }

    /// Reads at `offset` without moving the handle offset.
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.require(false, "read")?;
        let (session, fd) = self.target()?;
        if buf.is_empty() {
            return Ok(0);
        }
        session.read(fd, offset, buf)
    }

    /// Writes all of `data` at `offset` without moving the handle offset,
    /// retrying short backend writes.
    pub fn pwrite(&self, data: &[u8], offset: u64) -> Result<usize> {
        self.require(true, "write")?;
        let (session, fd) = self.target()?;
        offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| ClientError::invalid("write past maximum offset"))?;
        let mut done = 0;
        while done < data.len() {
            let n = session.write(fd, offset + done as u64, &data[done..])?;
            if n == 0 {
                return Err(ClientError::io(
                    "write",
                    format!("{} accepted no bytes at offset {}", self.path, offset + done as u64),
                ));
            }
            done += n;
        }
        Ok(done)
    }

    /// Moves the offset. Negative results are rejected, as are positions past
    /// the end of file on write-only handles.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (session, fd) = self.target()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => session.fstat(fd)?.size.checked_add_signed(delta),
        }
        .ok_or_else(|| ClientError::invalid(format!("seek to {:?} out of range", pos)))?;

        if !self.mode.access.is_readable() {
            let size = session.fstat(fd)?.size;
            if target > size {
                return Err(ClientError::invalid(format!(
                    "seek to {} past end of {} ({} bytes) on write-only handle",
                    target, self.path, size
                )));
            }
        }
        self.offset = target;
        Ok(target)
    }

    /// Reads at the current offset into each buffer in turn, advancing the
    /// offset. Stops early on a short read.
    pub fn readv(&mut self, bufs: &mut [IoSliceMut<'_>]) -> Result<usize> {
        self.require(false, "read")?;
        let mut total = 0;
        for buf in bufs.iter_mut() {
            if buf.is_empty() {
                continue;
            }
            let n = self.read_next(buf)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Writes every buffer back to back at the current offset. The offset
    /// moves past all of them only when every byte was stored.
    pub fn writev(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        self.require(true, "write")?;
        let total = bufs.iter().try_fold(0u64, |acc, b| acc.checked_add(b.len() as u64));
        let end = total
            .and_then(|t| self.offset.checked_add(t))
            .ok_or_else(|| ClientError::invalid("write past maximum offset"))?;
        let start = self.offset;
        let mut at = start;
        for buf in bufs.iter().filter(|b| !b.is_empty()) {
            at += self.pwrite(buf, at)? as u64;
        }
        self.offset = end;
        trace!(handle = %self.id, offset = self.offset, "writev");
        Ok((end - start) as usize)
    }

    /// Attributes of the open file.
    pub fn stat(&self) -> Result<FileAttr> {
        let (session, fd) = self.target()?;
        session.fstat(fd)
    }

    /// Sets the file length. Needs a writable handle.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.require(true, "truncate")?;
        let (session, fd) = self.target()?;
        session.truncate(fd, len)
    }

    /// Flushes data and metadata to the bricks.
    pub fn sync(&self) -> Result<()> {
        let (session, fd) = self.target()?;
        session.fsync(fd)
    }

    /// Flushes data only.
    pub fn datasync(&self) -> Result<()> {
        let (session, fd) = self.target()?;
        session.fdatasync(fd)
    }

    /// Flushes and releases the handle. Closing again is a no-op, as is
    /// closing a handle whose connection already tore it down.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let Some(entry) = self.core.table.remove(self.id) else {
            return Ok(());
        };
        let session = match self.core.session() {
            Ok(session) => session,
            Err(_) => return Ok(()),
        };
        let synced = session.fsync(entry.fd);
        let released = session.release(entry.fd);
        synced.and(released)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.id)
            .field("volume", &self.core.volume())
            .field("path", &self.path.to_string())
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(handle = %self.id, path = %self.path, error = %e, "close on drop failed");
        }
    }
}
