//! Inode ↔ path mapping for FUSE.
//!
//! The kernel addresses nodes by inode number while [`FuseFilesystem`]
//! works with paths. Inode numbers are derived with an FNV-1a hash so the
//! same path always maps to the same inode for the lifetime of a mount.
//!
//! [`FuseFilesystem`]: crate::FuseFilesystem

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, error};

/// Inode number of the root directory (always 1 for FUSE).
pub const ROOT_INODE: u64 = 1;

/// FNV-1a offset basis.
const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;

/// FNV-1a prime.
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Kind of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// Regular file.
  File,
  /// Directory.
  Dir
}

/// Two-way inode ↔ path map.
#[derive(Debug)]
pub struct InodeMap {
  inode_to_path: DashMap<u64, PathBuf>,
  path_to_inode: DashMap<PathBuf, u64>
}

impl Default for InodeMap {
  fn default() -> Self {
    Self::new()
  }
}

impl InodeMap {
  /// Create a map containing only the root directory (`/`).
  #[must_use]
  pub fn new() -> Self {
    let map = Self {
      inode_to_path: DashMap::new(),
      path_to_inode: DashMap::new()
    };

    let root = PathBuf::from("/");
    map.inode_to_path.insert(ROOT_INODE, root.clone());
    map.path_to_inode.insert(root, ROOT_INODE);

    map
  }

  /// Compute the inode number for a path.
  ///
  /// The node kind is part of the hash so that a file and a directory with
  /// the same name never share an inode.
  #[must_use]
  pub fn compute_inode(path: &Path, kind: NodeKind) -> u64 {
    let path_str = path.to_string_lossy();

    if path_str.is_empty() || path_str == "/" {
      return ROOT_INODE;
    }

    let kind_prefix = match kind {
      NodeKind::File => b"f:",
      NodeKind::Dir => b"d:"
    };

    let mut h: u64 = FNV_OFFSET;
    for &b in kind_prefix.iter().chain(path_str.as_bytes()) {
      h ^= u64::from(b);
      h = h.wrapping_mul(FNV_PRIME);
    }

    // 0 is not a valid inode, 1 belongs to the root
    match h {
      0 => u64::MAX,
      ROOT_INODE => 2,
      other => other
    }
  }

  /// Get the inode for `path`, registering it on first use.
  pub fn get_or_insert(&self, path: &Path, kind: NodeKind) -> u64 {
    if let Some(inode) = self.path_to_inode.get(path) {
      return *inode;
    }

    let inode = Self::compute_inode(path, kind);

    if let Some(existing) = self.inode_to_path.get(&inode) {
      error!(
        inode,
        new_path = %path.display(),
        existing_path = %existing.display(),
        "inode collision"
      );
    }

    self.inode_to_path.insert(inode, path.to_path_buf());
    self.path_to_inode.insert(path.to_path_buf(), inode);

    debug!(inode, path = %path.display(), ?kind, "inode registered");

    inode
  }

  /// Path registered for `inode`.
  #[must_use]
  pub fn get_path(&self, inode: u64) -> Option<PathBuf> {
    self.inode_to_path.get(&inode).map(|r| r.value().clone())
  }

  /// Inode registered for `path`.
  #[must_use]
  pub fn get_inode(&self, path: &Path) -> Option<u64> {
    self.path_to_inode.get(path).map(|r| *r.value())
  }

  /// Number of registered inodes (root included).
  #[must_use]
  pub fn len(&self) -> usize {
    self.inode_to_path.len()
  }

  /// Whether the map is empty. Never true: the root is always present.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.inode_to_path.is_empty()
  }
}
