//! `FlushFs` — the [`FuseFilesystem`] implementation.
//!
//! The namespace is a root directory holding one regular file. Every
//! `open` of that file creates an independent handle whose buffer only
//! sees the bytes written through it; `flush` and `fsync` report a
//! snapshot of that buffer to the [`EventRecorder`].
//!
//! Per-handle lifecycle: `open` → any mix of `write`/`read`/`flush`/`fsync`
//! → `release`. The kernel sends one `flush` per `close(2)` of a descriptor
//! and `release` once the last descriptor is gone; `release` itself never
//! reports anything.

use std::{
  ffi::OsStr,
  path::{Path, PathBuf},
  sync::Arc,
  time::SystemTime
};

use flushfs_fuse::{
  DirEntry, FileAttr, FileHandle, FileType, FsError, FuseFilesystem, OpenFlags, StatFs
};
use tracing::{debug, info};

use crate::{
  config::FlushFsConfig,
  error::FlushFsError,
  fault::Reporter,
  recorder::{EventKind, EventRecorder},
  table::HandleTable
};

/// Node addressed by a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
  Root,
  File
}

/// In-memory filesystem recording flush and fsync events per handle.
#[derive(Debug)]
pub struct FlushFs {
  config: FlushFsConfig,
  file_path: PathBuf,
  handles: HandleTable,
  recorder: Arc<EventRecorder>
}

impl FlushFs {
  /// Create a filesystem reporting flushes to `flush_reporter` and fsyncs
  /// to `fsync_reporter`.
  #[must_use]
  pub fn new(
    config: FlushFsConfig,
    flush_reporter: Arc<dyn Reporter>,
    fsync_reporter: Arc<dyn Reporter>
  ) -> Self {
    let file_path = Path::new("/").join(&config.file_name);
    Self {
      config,
      file_path,
      handles: HandleTable::new(),
      recorder: Arc::new(EventRecorder::new(flush_reporter, fsync_reporter))
    }
  }

  /// Path of the single file inside the mount (`/foo` by default).
  #[must_use]
  pub fn file_path(&self) -> &Path {
    &self.file_path
  }

  /// The event log. Stays usable after the filesystem is moved into a host.
  #[must_use]
  pub fn recorder(&self) -> Arc<EventRecorder> {
    Arc::clone(&self.recorder)
  }

  /// Payloads of all flush events so far, in order.
  #[must_use]
  pub fn flush_history(&self) -> Vec<Vec<u8>> {
    self.recorder.flush_history()
  }

  /// Payloads of all fsync events so far, in order.
  #[must_use]
  pub fn fsync_history(&self) -> Vec<Vec<u8>> {
    self.recorder.fsync_history()
  }

  /// The handle table.
  #[must_use]
  pub fn handles(&self) -> &HandleTable {
    &self.handles
  }

  fn node(&self, path: &Path) -> Option<Node> {
    if path == Path::new("/") || path.as_os_str().is_empty() {
      Some(Node::Root)
    } else if path == self.file_path {
      Some(Node::File)
    } else {
      None
    }
  }

  fn file_attr(&self) -> FileAttr {
    FileAttr::regular(self.handles.largest_size(), self.config.file_perm)
  }

  /// Open the file with the access mode in `flags`.
  ///
  /// # Errors
  ///
  /// Fails with [`FsError::IsADirectory`] for the root and
  /// [`FsError::NotFound`] for any other path.
  pub fn open_file(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle, FsError> {
    match self.node(path) {
      Some(Node::File) => {
        let fh = self.handles.create_with_flags(flags);
        debug!(%fh, ?flags, "open");
        Ok(fh)
      }
      Some(Node::Root) => Err(FsError::IsADirectory),
      None => Err(FsError::NotFound)
    }
  }

  /// Write through `fh`.
  ///
  /// On an `O_APPEND` handle `offset` is ignored: the kernel derives it from
  /// the file size, which may belong to another handle.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown or was opened read-only.
  pub async fn write_file(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FlushFsError> {
    let state = self.handles.get(fh)?;
    if !state.mode().can_write() {
      return Err(FlushFsError::AccessDenied {
        fh,
        op: "write",
        mode: state.mode()
      });
    }
    state.write(offset, data).await
  }

  /// Read through `fh` from that handle's own buffer.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown or was opened write-only.
  pub async fn read_file(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Vec<u8>, FlushFsError> {
    let state = self.handles.get(fh)?;
    if !state.mode().can_read() {
      return Err(FlushFsError::AccessDenied {
        fh,
        op: "read",
        mode: state.mode()
      });
    }
    Ok(state.read(offset, size).await)
  }

  /// Cut or zero-extend the buffer of `fh`.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown or the length is unaddressable.
  pub async fn truncate_file(&self, fh: FileHandle, len: u64) -> Result<(), FlushFsError> {
    self.handles.truncate(fh, len).await?;
    debug!(%fh, len, "truncate");
    Ok(())
  }

  async fn report(&self, kind: EventKind, fh: FileHandle) -> Result<(), FlushFsError> {
    let state = self.handles.get(fh)?;
    match kind {
      EventKind::Flush => state.note_flush(),
      EventKind::Fsync => state.note_fsync()
    }

    // Writes to this handle wait until the payload is in the log.
    state
      .capture(|content| self.recorder.report(kind, fh, content.to_vec()))
      .await
      .map_err(|source| FlushFsError::ReportRejected { kind, fh, source })
  }

  /// Report the current buffer of `fh` as a flush.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown or the flush reporter rejects the
  /// payload. The buffer is kept either way.
  pub async fn flush_file(&self, fh: FileHandle) -> Result<(), FlushFsError> {
    self.report(EventKind::Flush, fh).await
  }

  /// Report the current buffer of `fh` as an fsync.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown or the fsync reporter rejects the
  /// payload.
  pub async fn fsync_file(&self, fh: FileHandle) -> Result<(), FlushFsError> {
    self.report(EventKind::Fsync, fh).await
  }

  /// Drop the handle. Reports nothing.
  ///
  /// # Errors
  ///
  /// Fails with [`FlushFsError::UnknownHandle`] if `fh` is not open.
  pub fn release_file(&self, fh: FileHandle) -> Result<(), FlushFsError> {
    let state = self.handles.destroy(fh)?;
    debug!(
      %fh,
      writes = state.write_count(),
      flushes = state.flush_count(),
      fsyncs = state.fsync_count(),
      "release"
    );
    Ok(())
  }
}

impl FuseFilesystem for FlushFs {
  async fn init(&self) -> Result<(), FsError> {
    info!(file = %self.file_path.display(), "flushfs ready");
    Ok(())
  }

  fn destroy(&self) {
    info!(
      open_handles = self.handles.len(),
      events = self.recorder.len(),
      "flushfs shutting down"
    );
  }

  async fn getattr(&self, path: &Path) -> Result<FileAttr, FsError> {
    match self.node(path) {
      Some(Node::Root) => Ok(FileAttr::directory(self.config.dir_perm)),
      Some(Node::File) => Ok(self.file_attr()),
      None => Err(FsError::NotFound)
    }
  }

  async fn setattr(
    &self,
    path: &Path,
    fh: Option<FileHandle>,
    size: Option<u64>,
    _atime: Option<SystemTime>,
    _mtime: Option<SystemTime>,
    _mode: Option<u32>
  ) -> Result<FileAttr, FsError> {
    match self.node(path) {
      Some(Node::File) => {
        // Without a handle (truncate(2) by path) there is no buffer to change.
        if let (Some(len), Some(fh)) = (size, fh) {
          self.truncate_file(fh, len).await?;
        }
        Ok(self.file_attr())
      }
      Some(Node::Root) if size.is_some() => Err(FsError::IsADirectory),
      Some(Node::Root) => Ok(FileAttr::directory(self.config.dir_perm)),
      None => Err(FsError::NotFound)
    }
  }

  async fn lookup(&self, parent: &Path, name: &OsStr) -> Result<FileAttr, FsError> {
    match self.node(parent) {
      Some(Node::Root) if name == OsStr::new(&self.config.file_name) => Ok(self.file_attr()),
      Some(Node::Root) | None => Err(FsError::NotFound),
      Some(Node::File) => Err(FsError::NotADirectory)
    }
  }

  async fn open(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle, FsError> {
    self.open_file(path, flags)
  }

  async fn read(
    &self,
    _path: &Path,
    fh: FileHandle,
    offset: u64,
    size: u32
  ) -> Result<Vec<u8>, FsError> {
    Ok(self.read_file(fh, offset, size).await?)
  }

  async fn write(
    &self,
    _path: &Path,
    fh: FileHandle,
    offset: u64,
    data: &[u8]
  ) -> Result<u32, FsError> {
    let written = self.write_file(fh, offset, data).await?;
    Ok(u32::try_from(written).unwrap_or(u32::MAX))
  }

  async fn flush(&self, _path: &Path, fh: FileHandle) -> Result<(), FsError> {
    Ok(self.flush_file(fh).await?)
  }

  async fn release(&self, _path: &Path, fh: FileHandle) -> Result<(), FsError> {
    Ok(self.release_file(fh)?)
  }

  async fn fsync(&self, _path: &Path, fh: FileHandle, _datasync: bool) -> Result<(), FsError> {
    Ok(self.fsync_file(fh).await?)
  }

  async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
    match self.node(path) {
      Some(Node::Root) => Ok(vec![DirEntry {
        name: self.config.file_name.clone(),
        kind: FileType::RegularFile
      }]),
      Some(Node::File) => Err(FsError::NotADirectory),
      None => Err(FsError::NotFound)
    }
  }

  async fn statfs(&self, _path: &Path) -> Result<StatFs, FsError> {
    Ok(StatFs {
      blocks: 0,
      bfree: 0,
      bavail: 0,
      files: 2,
      ffree: 0,
      bsize: 4096,
      namelen: 255
    })
  }
}
