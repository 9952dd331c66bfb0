//! Per-handle state: the bytes written through one `open(2)`.
//!
//! Each handle owns its buffer behind its own `tokio::sync::RwLock`, so
//! operations on different handles never contend with each other while
//! concurrent operations on the same handle are applied in dispatch order.
//!
//! [`HandleState::capture`] keeps the read guard alive while its callback
//! runs, so no write can land between taking a payload and recording it.

use std::sync::atomic::{AtomicU64, Ordering};

use flushfs_fuse::{AccessMode, FileHandle};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::FlushFsError;

/// State of one open file handle.
#[derive(Debug)]
pub struct HandleState {
  id: FileHandle,
  mode: AccessMode,
  /// Opened with `O_APPEND`: writes go to the end of this handle's buffer.
  append: bool,
  /// Bytes written through this handle since open.
  content: RwLock<Vec<u8>>,
  /// Cached buffer length, readable without the lock.
  size: AtomicU64,
  writes: AtomicU64,
  flushes: AtomicU64,
  fsyncs: AtomicU64
}

impl HandleState {
  /// Create a handle with an empty buffer.
  #[must_use]
  pub fn new(id: FileHandle, mode: AccessMode) -> Self {
    Self {
      id,
      mode,
      append: false,
      content: RwLock::new(Vec::new()),
      size: AtomicU64::new(0),
      writes: AtomicU64::new(0),
      flushes: AtomicU64::new(0),
      fsyncs: AtomicU64::new(0)
    }
  }

  /// Handle identifier.
  #[must_use]
  pub const fn id(&self) -> FileHandle {
    self.id
  }

  /// Access mode the handle was opened with.
  #[must_use]
  pub const fn mode(&self) -> AccessMode {
    self.mode
  }

  /// Make every write append to the end of this handle's buffer.
  #[must_use]
  pub fn with_append(mut self, append: bool) -> Self {
    self.append = append;
    self
  }

  /// Whether the handle was opened with `O_APPEND`.
  #[must_use]
  pub const fn is_append(&self) -> bool {
    self.append
  }

  /// Read up to `size` bytes at `offset`, clipped to the buffer.
  ///
  /// Returns an empty vector when `offset` is at or past the end.
  pub async fn read(&self, offset: u64, size: u32) -> Vec<u8> {
    let content = self.content.read().await;

    let Ok(start) = usize::try_from(offset) else {
      return Vec::new();
    };
    if start >= content.len() {
      return Vec::new();
    }

    let end = start.saturating_add(size as usize).min(content.len());
    content[start..end].to_vec()
  }

  /// Write `data` at `offset`.
  ///
  /// Overwrites existing bytes and extends the buffer when needed. A gap
  /// between the current end and `offset` is filled with zeros, like a
  /// sparse write on a POSIX file. Handles opened with `O_APPEND` ignore
  /// `offset` and write at the end of their own buffer.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::FileTooLarge`] if the buffer cannot grow to
  /// `offset + data.len()` bytes.
  pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize, FlushFsError> {
    let too_large = || FlushFsError::FileTooLarge { fh: self.id, offset };

    let mut content = self.content.write().await;
    let start = if self.append {
      content.len()
    } else {
      usize::try_from(offset).map_err(|_| too_large())?
    };
    let end = start.checked_add(data.len()).ok_or_else(too_large)?;

    if end > content.len() {
      let cur_len = content.len();
      content
        .try_reserve(end - cur_len)
        .map_err(|_| too_large())?;
      content.resize(end, 0);
    }
    content[start..end].copy_from_slice(data);

    self.size.store(content.len() as u64, Ordering::SeqCst);
    self.writes.fetch_add(1, Ordering::Relaxed);

    trace!(fh = %self.id, start, len = data.len(), size = content.len(), "handle write");

    Ok(data.len())
  }

  /// Cut or zero-extend the buffer to `len` bytes.
  ///
  /// # Errors
  ///
  /// Returns [`FlushFsError::FileTooLarge`] if the buffer cannot grow to
  /// `len` bytes.
  pub async fn truncate(&self, len: u64) -> Result<(), FlushFsError> {
    let too_large = || FlushFsError::FileTooLarge { fh: self.id, offset: len };
    let new_len = usize::try_from(len).map_err(|_| too_large())?;

    let mut content = self.content.write().await;
    if new_len > content.len() {
      let cur_len = content.len();
      content
        .try_reserve(new_len - cur_len)
        .map_err(|_| too_large())?;
    }
    content.resize(new_len, 0);
    self.size.store(len, Ordering::SeqCst);

    trace!(fh = %self.id, size = len, "handle truncate");
    Ok(())
  }

  /// Run `f` on the buffer while holding the read guard.
  ///
  /// Writes to this handle wait until `f` returns.
  pub async fn capture<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
    let content = self.content.read().await;
    f(&content)
  }

  /// Copy of the full buffer at this instant.
  pub async fn snapshot(&self) -> Vec<u8> {
    self.content.read().await.clone()
  }

  /// Current buffer length in bytes.
  #[must_use]
  pub fn size(&self) -> u64 {
    self.size.load(Ordering::SeqCst)
  }

  /// Number of writes applied so far.
  #[must_use]
  pub fn write_count(&self) -> u64 {
    self.writes.load(Ordering::Relaxed)
  }

  /// Number of flushes reported for this handle (failed ones included).
  #[must_use]
  pub fn flush_count(&self) -> u64 {
    self.flushes.load(Ordering::Relaxed)
  }

  /// Number of fsyncs reported for this handle (failed ones included).
  #[must_use]
  pub fn fsync_count(&self) -> u64 {
    self.fsyncs.load(Ordering::Relaxed)
  }

  pub(crate) fn note_flush(&self) {
    self.flushes.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn note_fsync(&self) {
    self.fsyncs.fetch_add(1, Ordering::Relaxed);
  }
}
