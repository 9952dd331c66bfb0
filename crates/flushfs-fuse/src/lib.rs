//! flushfs-fuse — path-based async FUSE abstraction.
//!
//! Filesystems implement [`FuseFilesystem`]; [`FuseHost`] mounts them
//! through **rfuse3** (enabled with the `fuse` feature on Linux/macOS).
//! The rfuse3 adapter resolves kernel inode numbers to paths and maps
//! [`FsError`] back to errno values.
//!
//! # Example
//!
//! ```ignore
//! use flushfs_fuse::{FuseHost, MountOptions};
//!
//! let host = FuseHost::new(my_fs);
//! host.mount("/mnt/flushfs".as_ref(), &MountOptions::default()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod inode;
#[cfg(all(unix, feature = "fuse"))]
pub mod rfuse3_adapter;
pub mod types;

use std::{ffi::OsStr, path::Path, sync::Arc, time::SystemTime};

pub use inode::{InodeMap, NodeKind, ROOT_INODE};
pub use types::*;

/// Async path-based filesystem trait.
///
/// Paths are absolute inside the mount (`/`, `/foo`). rfuse3 calls these
/// methods concurrently from tokio worker tasks, so implementations must
/// synchronize their own state.
pub trait FuseFilesystem: Send + Sync + 'static {
  // --- Lifecycle ---

  /// Initialize the filesystem. Called before the first operation.
  fn init(&self) -> impl Future<Output = Result<(), FsError>> + Send {
    async { Ok(()) }
  }

  /// Cleanup on unmount.
  fn destroy(&self) {}

  // --- Metadata ---

  /// Get file or directory attributes.
  fn getattr(&self, path: &Path) -> impl Future<Output = Result<FileAttr, FsError>> + Send;

  /// Set attributes (size, timestamps, permissions).
  ///
  /// `fh` is present when the change comes through an open descriptor, as
  /// with `ftruncate(2)` or the truncation step of `open(O_TRUNC)`.
  fn setattr(
    &self,
    _path: &Path,
    _fh: Option<FileHandle>,
    _size: Option<u64>,
    _atime: Option<SystemTime>,
    _mtime: Option<SystemTime>,
    _mode: Option<u32>
  ) -> impl Future<Output = Result<FileAttr, FsError>> + Send {
    async { Err(FsError::NotSupported) }
  }

  /// Look up a child by name.
  fn lookup(
    &self,
    parent: &Path,
    name: &OsStr
  ) -> impl Future<Output = Result<FileAttr, FsError>> + Send;

  // --- File operations ---

  /// Open a file and return a fresh handle.
  fn open(
    &self,
    path: &Path,
    flags: OpenFlags
  ) -> impl Future<Output = Result<FileHandle, FsError>> + Send;

  /// Read data through a handle.
  fn read(
    &self,
    path: &Path,
    fh: FileHandle,
    offset: u64,
    size: u32
  ) -> impl Future<Output = Result<Vec<u8>, FsError>> + Send;

  /// Write data through a handle.
  fn write(
    &self,
    _path: &Path,
    _fh: FileHandle,
    _offset: u64,
    _data: &[u8]
  ) -> impl Future<Output = Result<u32, FsError>> + Send {
    async { Err(FsError::NotSupported) }
  }

  /// A descriptor referencing `fh` was closed.
  ///
  /// Sent once per `close(2)`, so a handle shared by duplicated descriptors
  /// sees several flushes before its release.
  fn flush(
    &self,
    _path: &Path,
    _fh: FileHandle
  ) -> impl Future<Output = Result<(), FsError>> + Send {
    async { Ok(()) }
  }

  /// Final teardown of a handle after its last descriptor is gone.
  fn release(
    &self,
    path: &Path,
    fh: FileHandle
  ) -> impl Future<Output = Result<(), FsError>> + Send;

  /// Explicit sync request on an open handle.
  fn fsync(
    &self,
    _path: &Path,
    _fh: FileHandle,
    _datasync: bool
  ) -> impl Future<Output = Result<(), FsError>> + Send {
    async { Ok(()) }
  }

  // --- Directories ---

  /// Read directory contents (without `.` and `..`).
  fn readdir(&self, path: &Path) -> impl Future<Output = Result<Vec<DirEntry>, FsError>> + Send;

  // --- Filesystem information ---

  /// Get filesystem statistics.
  fn statfs(&self, path: &Path) -> impl Future<Output = Result<StatFs, FsError>> + Send;
}

/// Mount options.
#[derive(Debug, Clone)]
pub struct MountOptions {
  /// Filesystem name (displayed in mount).
  pub fs_name: String,
  /// Allow access by other users.
  pub allow_other: bool,
  /// Mount as read-only.
  pub read_only: bool
}

impl Default for MountOptions {
  fn default() -> Self {
    Self {
      fs_name: "flushfs".to_string(),
      allow_other: false,
      read_only: false
    }
  }
}

/// Host for mounting a [`FuseFilesystem`].
pub struct FuseHost<F: FuseFilesystem> {
  fs: Arc<F>
}

impl<F: FuseFilesystem> FuseHost<F> {
  /// Create a new host for the given filesystem.
  pub fn new(fs: F) -> Self {
    Self { fs: Arc::new(fs) }
  }

  /// The hosted filesystem.
  #[must_use]
  pub fn filesystem(&self) -> &Arc<F> {
    &self.fs
  }

  /// Mount the filesystem and block until it is unmounted.
  ///
  /// # Errors
  ///
  /// Returns an error if mounting fails or the FUSE session ends abnormally.
  #[cfg(all(unix, feature = "fuse"))]
  pub async fn mount(&self, mountpoint: &Path, options: &MountOptions) -> Result<(), FsError> {
    use rfuse3_adapter::Rfuse3Adapter;

    let adapter = Rfuse3Adapter::new(Arc::clone(&self.fs));

    let mut mount_options = rfuse3::MountOptions::default();
    mount_options
      .fs_name(&options.fs_name)
      .allow_other(options.allow_other)
      .read_only(options.read_only);

    let mount_handle = rfuse3::raw::Session::new(mount_options)
      .mount_with_unprivileged(adapter, mountpoint)
      .await
      .map_err(|e| FsError::Other(format!("mount error: {e}")))?;

    mount_handle
      .await
      .map_err(|e| FsError::Other(format!("FUSE session error: {e}")))?;

    Ok(())
  }

  /// Mounting is unavailable without the `fuse` feature.
  ///
  /// # Errors
  ///
  /// Always returns [`FsError::NotSupported`].
  #[cfg(not(all(unix, feature = "fuse")))]
  #[allow(clippy::unused_async)]
  pub async fn mount(&self, _mountpoint: &Path, _options: &MountOptions) -> Result<(), FsError> {
    Err(FsError::NotSupported)
  }

  /// Check whether the platform FUSE driver is installed.
  #[must_use]
  pub fn is_available() -> bool {
    #[cfg(target_os = "linux")]
    {
      Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
      Path::new("/Library/Filesystems/macfuse.fs").exists()
        || Path::new("/usr/local/lib/libfuse.dylib").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
      false
    }
  }
}
