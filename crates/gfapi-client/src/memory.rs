//! In-process volume backend.
//!
//! Volumes live in memory and are keyed by volume id, so every mount of the
//! same volume id through one [`MemoryBackend`] sees the same namespace.
//! A shared [`FaultPlan`] injects failures for testing error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{
    Access, FileAttr, FileKind, InodeId, MountOptions, RemoteFd, VolumeBackend, VolumeSession,
    ROOT_INODE,
};
use crate::error::{ClientError, Result};
use crate::path::VolumePath;
use crate::volfile::VolumeTopology;

/// Largest file an in-memory volume stores (1 GiB).
pub const MAX_FILE_SIZE: u64 = 1 << 30;

/// Failure injection knobs shared by every session of a backend.
#[derive(Debug)]
pub struct FaultPlan {
    refuse_mount: AtomicBool,
    fail_reads: AtomicBool,
    fail_fsync: AtomicBool,
    write_budget: AtomicU64,
    max_write_chunk: AtomicUsize,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            refuse_mount: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_fsync: AtomicBool::new(false),
            write_budget: AtomicU64::new(u64::MAX),
            max_write_chunk: AtomicUsize::new(0),
        }
    }
}

impl FaultPlan {
    /// Mount attempts fail as if no brick answered.
    pub fn refuse_mount(&self, on: bool) {
        self.refuse_mount.store(on, Ordering::SeqCst);
    }

    /// Every read fails with an I/O error.
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Every fsync fails with an I/O error.
    pub fn fail_fsync(&self, on: bool) {
        self.fail_fsync.store(on, Ordering::SeqCst);
    }

    /// Accept `bytes` more written bytes, then fail every write.
    pub fn fail_writes_after(&self, bytes: u64) {
        self.write_budget.store(bytes, Ordering::SeqCst);
    }

    /// Cap each write call at `bytes` (short writes). 0 removes the cap.
    pub fn max_write_chunk(&self, bytes: usize) {
        self.max_write_chunk.store(bytes, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.refuse_mount(false);
        self.fail_reads(false);
        self.fail_fsync(false);
        self.write_budget.store(u64::MAX, Ordering::SeqCst);
        self.max_write_chunk(0);
    }

    /// How many bytes of `wanted` the next write may store.
    fn admit_write(&self, wanted: usize) -> Result<usize> {
        let chunk = self.max_write_chunk.load(Ordering::SeqCst);
        let mut allowed = if chunk == 0 { wanted } else { wanted.min(chunk) };
        loop {
            let budget = self.write_budget.load(Ordering::SeqCst);
            if budget == u64::MAX {
                return Ok(allowed);
            }
            if budget == 0 {
                return Err(ClientError::io("write", "injected fault: brick went away"));
            }
            allowed = allowed.min(budget.min(usize::MAX as u64) as usize);
            let next = budget - allowed as u64;
            if self
                .write_budget
                .compare_exchange(budget, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(allowed);
            }
        }
    }
}

#[derive(Debug)]
enum NodeData {
    Dir(BTreeMap<String, InodeId>),
    File(Vec<u8>),
    Symlink(String),
    Special { rdev: u64 },
}

#[derive(Debug)]
struct Node {
    mode: u32,
    mtime: SystemTime,
    nlink: u32,
    data: NodeData,
}

impl Node {
    fn attr(&self, ino: InodeId) -> FileAttr {
        let (kind, size, rdev) = match &self.data {
            NodeData::Dir(_) => (FileKind::Directory, 4096, 0),
            NodeData::File(bytes) => (FileKind::File, bytes.len() as u64, 0),
            NodeData::Symlink(target) => (FileKind::Symlink, target.len() as u64, 0),
            NodeData::Special { rdev } => (FileKind::Other, 0, *rdev),
        };
        FileAttr {
            ino,
            kind,
            size,
            mode: self.mode,
            nlink: self.nlink,
            rdev,
            mtime: self.mtime,
        }
    }
}

#[derive(Debug)]
struct Namespace {
    nodes: HashMap<InodeId, Node>,
    next_ino: InodeId,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node {
                mode: 0o755,
                mtime: SystemTime::now(),
                nlink: 2,
                data: NodeData::Dir(BTreeMap::new()),
            },
        );
        Self {
            nodes,
            next_ino: ROOT_INODE + 1,
        }
    }

    fn node(&self, ino: InodeId) -> Result<&Node> {
        self.nodes.get(&ino).ok_or_else(|| ClientError::NotFound {
            path: format!("<inode {}>", ino),
        })
    }

    fn dir_entries(&self, parent: InodeId) -> Result<&BTreeMap<String, InodeId>> {
        match &self.node(parent)?.data {
            NodeData::Dir(entries) => Ok(entries),
            _ => Err(ClientError::NotDirectory {
                path: format!("<inode {}>", parent),
            }),
        }
    }

    fn insert(&mut self, parent: InodeId, name: &str, node: Node) -> Result<FileAttr> {
        if self.dir_entries(parent)?.contains_key(name) {
            return Err(ClientError::AlreadyExists {
                path: name.to_string(),
            });
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        let attr = node.attr(ino);
        self.nodes.insert(ino, node);
        if let Some(Node {
            data: NodeData::Dir(entries),
            mtime,
            ..
        }) = self.nodes.get_mut(&parent)
        {
            entries.insert(name.to_string(), ino);
            *mtime = SystemTime::now();
        }
        Ok(attr)
    }

    fn file_mut(&mut self, ino: InodeId) -> Result<(&mut Vec<u8>, &mut SystemTime)> {
        match self.nodes.get_mut(&ino) {
            Some(Node {
                data: NodeData::File(bytes),
                mtime,
                ..
            }) => Ok((bytes, mtime)),
            Some(node) => Err(not_a_file(ino, node)),
            None => Err(ClientError::io("file", format!("stale inode {}", ino))),
        }
    }

    fn set_len(&mut self, ino: InodeId, len: u64) -> Result<()> {
        check_size("truncate", len)?;
        let (bytes, mtime) = self.file_mut(ino)?;
        // check_size bounds len well below usize::MAX
        bytes.resize(len as usize, 0);
        *mtime = SystemTime::now();
        Ok(())
    }
}

fn not_a_file(ino: InodeId, node: &Node) -> ClientError {
    match node.data {
        NodeData::Dir(_) => ClientError::IsDirectory {
            path: format!("<inode {}>", ino),
        },
        _ => ClientError::invalid(format!("inode {} is not a regular file", ino)),
    }
}

fn check_size(op: &str, len: u64) -> Result<()> {
    if len > MAX_FILE_SIZE {
        return Err(ClientError::io(
            op,
            format!("file too large: {} bytes exceeds {}", len, MAX_FILE_SIZE),
        ));
    }
    Ok(())
}

/// Shared state of one in-memory volume.
#[derive(Debug)]
pub struct MemoryVolume {
    ns: Mutex<Namespace>,
}

impl MemoryVolume {
    fn new() -> Self {
        Self {
            ns: Mutex::new(Namespace::new()),
        }
    }

    /// Writes `data` at `path`, creating parent directories as needed.
    pub fn seed_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = VolumePath::parse(path)?;
        let Some((leaf, dirs)) = path.components().split_last() else {
            return Err(ClientError::invalid("cannot seed the root directory"));
        };
        let mut ns = self.ns.lock();
        let mut parent = ROOT_INODE;
        for dir in dirs {
            let existing = ns.dir_entries(parent)?.get(dir).copied();
            parent = match existing {
                Some(ino) => ino,
                None => {
                    ns.insert(
                        parent,
                        dir,
                        Node {
                            mode: 0o755,
                            mtime: SystemTime::now(),
                            nlink: 2,
                            data: NodeData::Dir(BTreeMap::new()),
                        },
                    )?
                    .ino
                }
            };
        }
        let existing = ns.dir_entries(parent)?.get(leaf).copied();
        let ino = match existing {
            Some(ino) => ino,
            None => {
                ns.insert(
                    parent,
                    leaf,
                    Node {
                        mode: 0o644,
                        mtime: SystemTime::now(),
                        nlink: 1,
                        data: NodeData::File(Vec::new()),
                    },
                )?
                .ino
            }
        };
        let (bytes, mtime) = ns.file_mut(ino)?;
        *bytes = data.to_vec();
        *mtime = SystemTime::now();
        Ok(())
    }

    /// Full contents of the file at `path`.
    pub fn contents(&self, path: &str) -> Result<Vec<u8>> {
        let path = VolumePath::parse(path)?;
        let ns = self.ns.lock();
        let mut ino = ROOT_INODE;
        for name in path.components() {
            ino = ns
                .dir_entries(ino)?
                .get(name)
                .copied()
                .ok_or_else(|| ClientError::NotFound {
                    path: path.to_string(),
                })?;
        }
        match &ns.node(ino)?.data {
            NodeData::File(bytes) => Ok(bytes.clone()),
            NodeData::Dir(_) => Err(ClientError::IsDirectory {
                path: path.to_string(),
            }),
            _ => Err(ClientError::invalid(format!("{} is not a regular file", path))),
        }
    }
}

/// In-process [`VolumeBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    volumes: DashMap<String, Arc<MemoryVolume>>,
    faults: Arc<FaultPlan>,
}

impl MemoryBackend {
    /// Backend with no volumes and no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Volume state for `volume_id`, created empty on first use.
    pub fn volume(&self, volume_id: &str) -> Arc<MemoryVolume> {
        self.volumes
            .entry(volume_id.to_string())
            .or_insert_with(|| Arc::new(MemoryVolume::new()))
            .clone()
    }

    /// Fault injection shared by every mount of this backend.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }
}

impl VolumeBackend for MemoryBackend {
    fn mount(
        &self,
        topology: &VolumeTopology,
        options: &MountOptions,
    ) -> Result<Arc<dyn VolumeSession>> {
        if self.faults.refuse_mount.load(Ordering::SeqCst) {
            return Err(ClientError::Connection {
                volume: topology.volume_id.clone(),
                reason: "injected fault: no brick reachable".into(),
            });
        }
        let top = topology.volfile.top();
        info!(
            volume = %topology.volume_id,
            top = %top.name,
            bricks = topology.bricks().len(),
            timeout_ms = options.request_timeout_ms,
            "mounted in-memory volume"
        );
        Ok(Arc::new(MemorySession {
            volume_id: topology.volume_id.clone(),
            volume: self.volume(&topology.volume_id),
            faults: self.faults.clone(),
            fds: Mutex::new(HashMap::new()),
            next_fd: AtomicU64::new(1),
            mounted: AtomicBool::new(true),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenFd {
    ino: InodeId,
    access: Access,
}

/// A mount of a [`MemoryVolume`].
pub struct MemorySession {
    volume_id: String,
    volume: Arc<MemoryVolume>,
    faults: Arc<FaultPlan>,
    fds: Mutex<HashMap<RemoteFd, OpenFd>>,
    next_fd: AtomicU64,
    mounted: AtomicBool,
}

impl MemorySession {
    fn check_mounted(&self, op: &str) -> Result<()> {
        if self.mounted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::io(
                op,
                format!("volume {} is unmounted", self.volume_id),
            ))
        }
    }

    fn fd(&self, op: &str, fd: RemoteFd) -> Result<OpenFd> {
        self.check_mounted(op)?;
        self.fds
            .lock()
            .get(&fd)
            .copied()
            .ok_or_else(|| ClientError::io(op, format!("bad descriptor {}", fd)))
    }
}

impl VolumeSession for MemorySession {
    fn lookup(&self, parent: InodeId, name: &str) -> Result<Option<FileAttr>> {
        self.check_mounted("lookup")?;
        let ns = self.volume.ns.lock();
        let Some(ino) = ns.dir_entries(parent)?.get(name).copied() else {
            return Ok(None);
        };
        Ok(Some(ns.node(ino)?.attr(ino)))
    }

    fn getattr(&self, ino: InodeId) -> Result<FileAttr> {
        self.check_mounted("getattr")?;
        let ns = self.volume.ns.lock();
        Ok(ns.node(ino)?.attr(ino))
    }

    fn mkdir(&self, parent: InodeId, name: &str, mode: u32) -> Result<FileAttr> {
        self.check_mounted("mkdir")?;
        self.volume.ns.lock().insert(
            parent,
            name,
            Node {
                mode,
                mtime: SystemTime::now(),
                nlink: 2,
                data: NodeData::Dir(BTreeMap::new()),
            },
        )
    }

    fn create(&self, parent: InodeId, name: &str, mode: u32) -> Result<FileAttr> {
        self.check_mounted("create")?;
        self.volume.ns.lock().insert(
            parent,
            name,
            Node {
                mode,
                mtime: SystemTime::now(),
                nlink: 1,
                data: NodeData::File(Vec::new()),
            },
        )
    }

    fn symlink(&self, parent: InodeId, name: &str, target: &str) -> Result<FileAttr> {
        self.check_mounted("symlink")?;
        if target.is_empty() {
            return Err(ClientError::invalid("symlink target cannot be empty"));
        }
        self.volume.ns.lock().insert(
            parent,
            name,
            Node {
                mode: 0o777,
                mtime: SystemTime::now(),
                nlink: 1,
                data: NodeData::Symlink(target.to_string()),
            },
        )
    }

    fn readlink(&self, ino: InodeId) -> Result<String> {
        self.check_mounted("readlink")?;
        let ns = self.volume.ns.lock();
        match &ns.node(ino)?.data {
            NodeData::Symlink(target) => Ok(target.clone()),
            _ => Err(ClientError::invalid(format!("inode {} is not a symlink", ino))),
        }
    }

    fn mknod(&self, parent: InodeId, name: &str, mode: u32, rdev: u64) -> Result<FileAttr> {
        self.check_mounted("mknod")?;
        let file_type = mode & libc::S_IFMT as u32;
        let data = if file_type == 0 || file_type == libc::S_IFREG as u32 {
            NodeData::File(Vec::new())
        } else if [libc::S_IFIFO, libc::S_IFSOCK, libc::S_IFCHR, libc::S_IFBLK]
            .iter()
            .any(|t| file_type == *t as u32)
        {
            NodeData::Special { rdev }
        } else {
            return Err(ClientError::invalid(format!(
                "mknod cannot create file type 0o{:o}",
                file_type
            )));
        };
        self.volume.ns.lock().insert(
            parent,
            name,
            Node {
                mode: mode & 0o7777,
                mtime: SystemTime::now(),
                nlink: 1,
                data,
            },
        )
    }

    fn setsize(&self, ino: InodeId, len: u64) -> Result<()> {
        self.check_mounted("truncate")?;
        self.volume.ns.lock().set_len(ino, len)
    }

    fn open(&self, ino: InodeId, access: Access) -> Result<RemoteFd> {
        self.check_mounted("open")?;
        {
            let ns = self.volume.ns.lock();
            let node = ns.node(ino)?;
            if !matches!(node.data, NodeData::File(_)) {
                return Err(not_a_file(ino, node));
            }
        }
        let fd = RemoteFd(self.next_fd.fetch_add(1, Ordering::Relaxed));
        self.fds.lock().insert(fd, OpenFd { ino, access });
        debug!(volume = %self.volume_id, ino, %fd, ?access, "opened remote descriptor");
        Ok(fd)
    }

    fn read(&self, fd: RemoteFd, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let open = self.fd("read", fd)?;
        if !open.access.is_readable() {
            return Err(ClientError::io("read", format!("{} not open for reading", fd)));
        }
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(ClientError::io("read", "injected fault: brick went away"));
        }
        let mut ns = self.volume.ns.lock();
        let (bytes, _) = ns.file_mut(open.ino)?;
        let len = bytes.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write(&self, fd: RemoteFd, offset: u64, data: &[u8]) -> Result<usize> {
        let open = self.fd("write", fd)?;
        if !open.access.is_writable() {
            return Err(ClientError::io("write", format!("{} not open for writing", fd)));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let wanted_end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| ClientError::invalid(format!("write at {} overflows", offset)))?;
        check_size("write", wanted_end)?;
        let n = self.faults.admit_write(data.len())?;
        // check_size bounds both ends well below usize::MAX
        let start = offset as usize;
        let end = start + n;
        let mut ns = self.volume.ns.lock();
        let (bytes, mtime) = ns.file_mut(open.ino)?;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&data[..n]);
        *mtime = SystemTime::now();
        Ok(n)
    }

    fn fstat(&self, fd: RemoteFd) -> Result<FileAttr> {
        let open = self.fd("fstat", fd)?;
        let ns = self.volume.ns.lock();
        Ok(ns.node(open.ino)?.attr(open.ino))
    }

    fn truncate(&self, fd: RemoteFd, len: u64) -> Result<()> {
        let open = self.fd("truncate", fd)?;
        if !open.access.is_writable() {
            return Err(ClientError::io("truncate", format!("{} not open for writing", fd)));
        }
        self.volume.ns.lock().set_len(open.ino, len)
    }

    fn fsync(&self, fd: RemoteFd) -> Result<()> {
        self.fd("fsync", fd)?;
        if self.faults.fail_fsync.load(Ordering::SeqCst) {
            return Err(ClientError::io("fsync", "injected fault: brick went away"));
        }
        Ok(())
    }

    fn release(&self, fd: RemoteFd) -> Result<()> {
        self.check_mounted("release")?;
        match self.fds.lock().remove(&fd) {
            Some(_) => Ok(()),
            None => Err(ClientError::io("release", format!("bad descriptor {}", fd))),
        }
    }

    fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            let leaked = {
                let mut fds = self.fds.lock();
                let n = fds.len();
                fds.clear();
                n
            };
            info!(volume = %self.volume_id, leaked, "unmounted in-memory volume");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volfile::Volfile;

    fn topology(id: &str) -> VolumeTopology {
        VolumeTopology::new(
            id,
            Volfile::parse(&format!("volume {id}-posix\n type storage/posix\nend-volume\n"))
                .unwrap(),
        )
    }

    fn mounted(backend: &MemoryBackend) -> Arc<dyn VolumeSession> {
        backend
            .mount(&topology("patchy"), &MountOptions::default())
            .unwrap()
    }

    #[test]
    fn test_mounts_share_volume_state() {
        let backend = MemoryBackend::new();
        let a = mounted(&backend);
        let b = mounted(&backend);
        a.create(ROOT_INODE, "shared", 0o644).unwrap();
        assert!(b.lookup(ROOT_INODE, "shared").unwrap().is_some());
    }

    #[test]
    fn test_distinct_volumes_are_isolated() {
        let backend = MemoryBackend::new();
        let a = mounted(&backend);
        let other = backend
            .mount(&topology("other"), &MountOptions::default())
            .unwrap();
        a.create(ROOT_INODE, "only-in-patchy", 0o644).unwrap();
        assert!(other.lookup(ROOT_INODE, "only-in-patchy").unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let fd = s.open(attr.ino, Access::ReadWrite).unwrap();
        assert_eq!(s.write(fd, 0, b"hello").unwrap(), 5);
        assert_eq!(s.write(fd, 7, b"!").unwrap(), 1);
        let mut buf = [0xAAu8; 16];
        let n = s.read(fd, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\0\0!");
        assert_eq!(s.read(fd, 8, &mut buf).unwrap(), 0);
        assert_eq!(s.fstat(fd).unwrap().size, 8);
    }

    #[test]
    fn test_create_existing_is_already_exists() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        s.create(ROOT_INODE, "f", 0o644).unwrap();
        assert!(matches!(
            s.create(ROOT_INODE, "f", 0o644),
            Err(ClientError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_open_directory_rejected() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let dir = s.mkdir(ROOT_INODE, "d", 0o755).unwrap();
        assert!(matches!(
            s.open(dir.ino, Access::ReadOnly),
            Err(ClientError::IsDirectory { .. })
        ));
    }

    #[test]
    fn test_short_writes_and_budget() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let fd = s.open(attr.ino, Access::WriteOnly).unwrap();

        backend.faults().max_write_chunk(3);
        assert_eq!(s.write(fd, 0, b"abcdef").unwrap(), 3);

        backend.faults().fail_writes_after(2);
        assert_eq!(s.write(fd, 3, b"def").unwrap(), 2);
        assert!(matches!(s.write(fd, 5, b"f"), Err(ClientError::Io { .. })));

        backend.faults().reset();
        assert_eq!(s.write(fd, 5, b"f").unwrap(), 1);
        assert_eq!(backend.volume("patchy").contents("/f").unwrap(), b"abcdef");
    }

    #[test]
    fn test_refused_mount() {
        let backend = MemoryBackend::new();
        backend.faults().refuse_mount(true);
        let result = backend.mount(&topology("patchy"), &MountOptions::default());
        assert!(matches!(result, Err(ClientError::Connection { .. })));
    }

    #[test]
    fn test_unmount_fails_later_calls() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let fd = s.open(attr.ino, Access::ReadOnly).unwrap();
        s.unmount();
        let mut buf = [0u8; 4];
        assert!(matches!(s.read(fd, 0, &mut buf), Err(ClientError::Io { .. })));
        assert!(s.lookup(ROOT_INODE, "f").is_err());
    }

    #[test]
    fn test_access_enforced() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let ro = s.open(attr.ino, Access::ReadOnly).unwrap();
        assert!(s.write(ro, 0, b"x").is_err());
        assert!(s.truncate(ro, 0).is_err());
        let wo = s.open(attr.ino, Access::WriteOnly).unwrap();
        let mut buf = [0u8; 1];
        assert!(s.read(wo, 0, &mut buf).is_err());
    }

    #[test]
    fn test_seed_and_contents() {
        let backend = MemoryBackend::new();
        let vol = backend.volume("patchy");
        vol.seed_file("/subdir/file-input", b"seeded").unwrap();
        assert_eq!(vol.contents("/subdir/file-input").unwrap(), b"seeded");
        assert!(matches!(
            vol.contents("/subdir"),
            Err(ClientError::IsDirectory { .. })
        ));
        let s = mounted(&backend);
        let subdir = s.lookup(ROOT_INODE, "subdir").unwrap().unwrap();
        assert!(subdir.is_dir());
    }

    #[test]
    fn test_write_past_size_cap_is_io_error() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let fd = s.open(attr.ino, Access::ReadWrite).unwrap();
        assert!(matches!(
            s.write(fd, MAX_FILE_SIZE, b"x"),
            Err(ClientError::Io { .. })
        ));
        assert!(matches!(
            s.write(fd, u64::MAX - 1, b"xy"),
            Err(ClientError::InvalidArgument { .. })
        ));
        assert!(matches!(
            s.truncate(fd, MAX_FILE_SIZE + 1),
            Err(ClientError::Io { .. })
        ));
        assert_eq!(s.fstat(fd).unwrap().size, 0);
        assert_eq!(s.write(fd, MAX_FILE_SIZE - 1, b"").unwrap(), 0);
    }

    #[test]
    fn test_symlink_and_readlink() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let link = s.symlink(ROOT_INODE, "current", "/releases/v2").unwrap();
        assert!(link.is_symlink());
        assert_eq!(link.size, 12);
        assert_eq!(s.readlink(link.ino).unwrap(), "/releases/v2");
        assert!(s.open(link.ino, Access::ReadOnly).is_err());
        let file = s.create(ROOT_INODE, "f", 0o644).unwrap();
        assert!(matches!(
            s.readlink(file.ino),
            Err(ClientError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_mknod_kinds() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let fifo = s
            .mknod(ROOT_INODE, "pipe", libc::S_IFIFO as u32 | 0o600, 0)
            .unwrap();
        assert_eq!(fifo.kind, FileKind::Other);
        assert_eq!(fifo.mode, 0o600);
        let dev = s
            .mknod(ROOT_INODE, "null", libc::S_IFCHR as u32 | 0o666, 0x103)
            .unwrap();
        assert_eq!(dev.rdev, 0x103);
        let plain = s.mknod(ROOT_INODE, "plain", 0o644, 0).unwrap();
        assert!(plain.is_file());
        assert!(matches!(
            s.mknod(ROOT_INODE, "d", libc::S_IFDIR as u32 | 0o755, 0),
            Err(ClientError::InvalidArgument { .. })
        ));
        assert!(matches!(
            s.open(fifo.ino, Access::ReadOnly),
            Err(ClientError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_setsize_by_inode() {
        let backend = MemoryBackend::new();
        backend.volume("patchy").seed_file("/f", b"abcdef").unwrap();
        let s = mounted(&backend);
        let attr = s.lookup(ROOT_INODE, "f").unwrap().unwrap();
        s.setsize(attr.ino, 2).unwrap();
        assert_eq!(backend.volume("patchy").contents("/f").unwrap(), b"ab");
        let dir = s.mkdir(ROOT_INODE, "d", 0o755).unwrap();
        assert!(matches!(
            s.setsize(dir.ino, 0),
            Err(ClientError::IsDirectory { .. })
        ));
    }

    #[test]
    fn test_release_twice_is_error() {
        let backend = MemoryBackend::new();
        let s = mounted(&backend);
        let attr = s.create(ROOT_INODE, "f", 0o644).unwrap();
        let fd = s.open(attr.ino, Access::ReadOnly).unwrap();
        s.release(fd).unwrap();
        assert!(s.release(fd).is_err());
    }
}
