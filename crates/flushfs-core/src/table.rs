//! Table of open file handles.
//!
//! Identifiers come from a monotonically increasing counter, so a handle id
//! is never reused while the filesystem is mounted. Entries are stored in a
//! sharded `DashMap`; each entry carries its own lock (see
//! [`HandleState`]), so the table itself is only locked long enough to look
//! an entry up.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering}
};

use dashmap::DashMap;
use flushfs_fuse::{AccessMode, FileHandle, OpenFlags};
use tracing::debug;

use crate::{error::FlushFsError, handle::HandleState};

/// Open handles by identifier.
#[derive(Debug)]
pub struct HandleTable {
  handles: DashMap<FileHandle, Arc<HandleState>>,
  next_fh: AtomicU64
}

impl Default for HandleTable {
  fn default() -> Self {
    Self::new()
  }
}

impl HandleTable {
  /// Create an empty table. The first handle gets id 1.
  #[must_use]
  pub fn new() -> Self {
    Self {
      handles: DashMap::new(),
      next_fh: AtomicU64::new(1)
    }
  }

  /// Allocate a handle with an empty buffer.
  pub fn create(&self, mode: AccessMode) -> FileHandle {
    self.create_with_flags(OpenFlags {
      mode,
      append: false,
      truncate: false
    })
  }

  /// Allocate a handle with an empty buffer for the given `open(2)` flags.
  ///
  /// `O_TRUNC` needs no work here: a new buffer is already empty.
  pub fn create_with_flags(&self, flags: OpenFlags) -> FileHandle {
    let fh = FileHandle(self.next_fh.fetch_add(1, Ordering::Relaxed));
    let state = HandleState::new(fh, flags.mode).with_append(flags.append);
    self.handles.insert(fh, Arc::new(state));
    debug!(%fh, ?flags, open = self.handles.len(), "handle created");
    fh
  }

  /// Look up a handle.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open.
  pub fn get(&self, fh: FileHandle) -> Result<Arc<HandleState>, FlushFsError> {
    self
      .handles
      .get(&fh)
      .map(|r| Arc::clone(r.value()))
      .ok_or(FlushFsError::UnknownHandle(fh))
  }

  /// Write `data` at `offset` into the handle's buffer.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open, or the
  /// error of [`HandleState::write`].
  pub async fn write(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FlushFsError> {
    self.get(fh)?.write(offset, data).await
  }

  /// Read up to `size` bytes at `offset` from the handle's buffer.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open.
  pub async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Vec<u8>, FlushFsError> {
    Ok(self.get(fh)?.read(offset, size).await)
  }

  /// Cut or zero-extend the handle's buffer to `len` bytes.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open, or the
  /// error of [`HandleState::truncate`].
  pub async fn truncate(&self, fh: FileHandle, len: u64) -> Result<(), FlushFsError> {
    self.get(fh)?.truncate(len).await
  }

  /// Full buffer of the handle.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open.
  pub async fn snapshot(&self, fh: FileHandle) -> Result<Vec<u8>, FlushFsError> {
    Ok(self.get(fh)?.snapshot().await)
  }

  /// Remove a handle.
  ///
  /// Operations already holding the handle's state finish normally; later
  /// lookups fail.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::UnknownHandle`] if `fh` is not open (for
  /// example on a double release). The table is left unchanged.
  pub fn destroy(&self, fh: FileHandle) -> Result<Arc<HandleState>, FlushFsError> {
    let (_, state) = self
      .handles
      .remove(&fh)
      .ok_or(FlushFsError::UnknownHandle(fh))?;
    debug!(%fh, open = self.handles.len(), "handle destroyed");
    Ok(state)
  }

  /// Size of the largest buffer among open handles, 0 if none is open.
  #[must_use]
  pub fn largest_size(&self) -> u64 {
    self
      .handles
      .iter()
      .map(|r| r.value().size())
      .max()
      .unwrap_or(0)
  }

  /// Number of open handles.
  #[must_use]
  pub fn len(&self) -> usize {
    self.handles.len()
  }

  /// Whether no handle is open.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }
}
