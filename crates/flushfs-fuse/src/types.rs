//! Filesystem types shared by the FUSE adapter and filesystem implementations.
//!
//! A small subset of POSIX stat, enough for a flat namespace of regular
//! files under one root directory.

use std::time::SystemTime;

/// File object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
  /// Regular file.
  RegularFile,
  /// Directory.
  Directory
}

/// File attributes.
#[derive(Debug, Clone)]
pub struct FileAttr {
  /// File size in bytes.
  pub size: u64,
  /// Size in 512-byte blocks.
  pub blocks: u64,
  /// Last access time.
  pub atime: SystemTime,
  /// Last modification time.
  pub mtime: SystemTime,
  /// Last metadata change time.
  pub ctime: SystemTime,
  /// File type.
  pub kind: FileType,
  /// Unix permission bits (0o644, 0o777, ...).
  pub perm: u16,
  /// Number of hard links.
  pub nlink: u32,
  /// Owner user ID.
  pub uid: u32,
  /// Owner group ID.
  pub gid: u32
}

impl FileAttr {
  /// Attributes for a regular file of `size` bytes.
  #[must_use]
  pub fn regular(size: u64, perm: u16) -> Self {
    Self::with_kind(FileType::RegularFile, size, perm, 1)
  }

  /// Attributes for a directory.
  #[must_use]
  pub fn directory(perm: u16) -> Self {
    Self::with_kind(FileType::Directory, 0, perm, 2)
  }

  fn with_kind(kind: FileType, size: u64, perm: u16, nlink: u32) -> Self {
    let now = SystemTime::now();
    Self {
      size,
      blocks: size.div_ceil(512),
      atime: now,
      mtime: now,
      ctime: now,
      kind,
      perm,
      nlink,
      uid: 0,
      gid: 0
    }
  }
}

/// Identifier of an open file handle, as handed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub u64);

impl std::fmt::Display for FileHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "fh#{}", self.0)
  }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
  /// File name (without path).
  pub name: String,
  /// File type.
  pub kind: FileType
}

/// Access mode requested by `open(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
  /// `O_RDONLY`.
  ReadOnly,
  /// `O_WRONLY`.
  WriteOnly,
  /// `O_RDWR`.
  ReadWrite
}

impl AccessMode {
  /// Whether reads through the handle are allowed.
  #[must_use]
  pub const fn can_read(self) -> bool {
    matches!(self, Self::ReadOnly | Self::ReadWrite)
  }

  /// Whether writes through the handle are allowed.
  #[must_use]
  pub const fn can_write(self) -> bool {
    matches!(self, Self::WriteOnly | Self::ReadWrite)
  }
}

/// File open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
  /// Access mode.
  pub mode: AccessMode,
  /// `O_APPEND`.
  pub append: bool,
  /// `O_TRUNC`.
  pub truncate: bool
}

impl OpenFlags {
  const fn with_mode(mode: AccessMode) -> Self {
    Self {
      mode,
      append: false,
      truncate: false
    }
  }

  /// Flags for reading.
  #[must_use]
  pub const fn read_only() -> Self {
    Self::with_mode(AccessMode::ReadOnly)
  }

  /// Flags for writing.
  #[must_use]
  pub const fn write_only() -> Self {
    Self::with_mode(AccessMode::WriteOnly)
  }

  /// Flags for reading and writing.
  #[must_use]
  pub const fn read_write() -> Self {
    Self::with_mode(AccessMode::ReadWrite)
  }

  /// The same flags with `O_APPEND` set.
  #[must_use]
  pub const fn appending(mut self) -> Self {
    self.append = true;
    self
  }

  /// Decode raw `open(2)` flags as delivered by the kernel.
  #[cfg(unix)]
  #[must_use]
  #[allow(clippy::cast_sign_loss)]
  pub const fn from_raw(flags: u32) -> Self {
    let mode = match flags & libc::O_ACCMODE as u32 {
      m if m == libc::O_WRONLY as u32 => AccessMode::WriteOnly,
      m if m == libc::O_RDWR as u32 => AccessMode::ReadWrite,
      _ => AccessMode::ReadOnly
    };
    Self {
      mode,
      append: flags & libc::O_APPEND as u32 != 0,
      truncate: flags & libc::O_TRUNC as u32 != 0
    }
  }
}

/// Filesystem statistics.
#[derive(Debug, Clone)]
pub struct StatFs {
  /// Total number of blocks.
  pub blocks: u64,
  /// Free blocks.
  pub bfree: u64,
  /// Blocks available to unprivileged users.
  pub bavail: u64,
  /// Total number of inodes.
  pub files: u64,
  /// Free inodes.
  pub ffree: u64,
  /// Block size in bytes.
  pub bsize: u32,
  /// Maximum file name length.
  pub namelen: u32
}

/// FUSE operation errors.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
  /// File or directory not found.
  #[error("not found")]
  NotFound,
  /// Permission denied.
  #[error("permission denied")]
  PermissionDenied,
  /// Expected a directory, but it is not one.
  #[error("not a directory")]
  NotADirectory,
  /// Path is a directory (when a file was expected).
  #[error("is a directory")]
  IsADirectory,
  /// The file handle is unknown or does not permit the operation.
  #[error("bad file handle")]
  BadHandle,
  /// Operation not supported.
  #[error("not supported")]
  NotSupported,
  /// I/O error, possibly carrying a raw errno.
  #[error(transparent)]
  Io(#[from] std::io::Error),
  /// Other error.
  #[error("{0}")]
  Other(String)
}

impl FsError {
  /// Convert to libc errno for FUSE.
  #[cfg(unix)]
  #[must_use]
  pub fn to_errno(&self) -> i32 {
    match self {
      Self::NotFound => libc::ENOENT,
      Self::PermissionDenied => libc::EACCES,
      Self::NotADirectory => libc::ENOTDIR,
      Self::IsADirectory => libc::EISDIR,
      Self::BadHandle => libc::EBADF,
      Self::NotSupported => libc::ENOSYS,
      Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
      Self::Other(_) => libc::EIO
    }
  }
}
