//! Path normalization and component-wise resolution against a mounted volume.

use std::fmt;

use tracing::trace;

use crate::backend::{FileAttr, InodeId, VolumeSession, ROOT_INODE};
use crate::error::{ClientError, Result};

/// Deepest path the resolver walks.
pub const MAX_DEPTH: usize = 64;

/// A normalized absolute path inside a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumePath {
    components: Vec<String>,
}

impl VolumePath {
    /// Normalizes `raw`: must be absolute; empty and `.` components are
    /// dropped and `..` pops a component (never above the root).
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(ClientError::invalid(format!(
                "path must be absolute: {:?}",
                raw
            )));
        }
        if raw.contains('\0') {
            return Err(ClientError::invalid("path contains a NUL byte"));
        }
        let mut components: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name => components.push(name.to_string()),
            }
        }
        if components.len() > MAX_DEPTH {
            return Err(ClientError::invalid(format!(
                "path depth {} exceeds limit {}",
                components.len(),
                MAX_DEPTH
            )));
        }
        Ok(Self { components })
    }

    /// True for `/`.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Normalized components below the root.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Last component; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Display form of the first `n` components.
    fn prefix(&self, n: usize) -> String {
        if n == 0 {
            "/".to_string()
        } else {
            format!("/{}", self.components[..n].join("/"))
        }
    }
}

impl fmt::Display for VolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix(self.components.len()))
    }
}

/// Outcome of resolving a path.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Every component exists.
    Found {
        /// Directory holding the entry.
        parent: InodeId,
        /// Attributes of the entry.
        attr: FileAttr,
    },
    /// All parents exist; only the final component is missing.
    MissingLeaf {
        /// Existing parent directory.
        parent: InodeId,
        /// Name that was not found.
        name: String,
    },
}

impl Resolved {
    /// Parent directory in either case.
    pub fn parent(&self) -> InodeId {
        match self {
            Resolved::Found { parent, .. } | Resolved::MissingLeaf { parent, .. } => *parent,
        }
    }
}

/// Walks `path` from the root one component at a time.
///
/// A missing intermediate directory is `NotFound`; a non-directory
/// intermediate is `NotDirectory`. A missing final component is reported as
/// [`Resolved::MissingLeaf`] so callers can create it.
pub fn resolve(session: &dyn VolumeSession, path: &VolumePath) -> Result<Resolved> {
    let mut parent = ROOT_INODE;
    let mut current = session.getattr(ROOT_INODE)?;
    let count = path.components.len();

    for (idx, name) in path.components.iter().enumerate() {
        if !current.is_dir() {
            return Err(ClientError::NotDirectory {
                path: path.prefix(idx),
            });
        }
        parent = current.ino;
        match session.lookup(parent, name)? {
            Some(attr) => {
                trace!(component = %name, ino = attr.ino, "resolved component");
                current = attr;
            }
            None if idx + 1 == count => {
                return Ok(Resolved::MissingLeaf {
                    parent,
                    name: name.clone(),
                });
            }
            None => {
                return Err(ClientError::NotFound {
                    path: path.prefix(idx + 1),
                });
            }
        }
    }

    Ok(Resolved::Found {
        parent,
        attr: current,
    })
}

/// Resolves `path` and requires it to exist.
pub fn lookup(session: &dyn VolumeSession, path: &VolumePath) -> Result<FileAttr> {
    match resolve(session, path)? {
        Resolved::Found { attr, .. } => Ok(attr),
        Resolved::MissingLeaf { .. } => Err(ClientError::NotFound {
            path: path.to_string(),
        }),
    }
}
