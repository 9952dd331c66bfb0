//! Errors of the flushfs core and their mapping to FUSE errors.

use flushfs_fuse::{FileHandle, FsError};

use crate::{fault::ReportError, recorder::EventKind};

/// Errors returned by the handle table and the operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum FlushFsError {
  /// A reporting function rejected a flush or fsync payload.
  #[error("{kind} report for {fh} rejected: {source}")]
  ReportRejected {
    /// Event that was being reported.
    kind: EventKind,
    /// Handle the event belongs to.
    fh: FileHandle,
    /// Error returned by the reporter.
    #[source]
    source: ReportError
  },
  /// The handle is not (or no longer) open.
  #[error("unknown file handle {0}")]
  UnknownHandle(FileHandle),
  /// The handle was opened with a mode that forbids the operation.
  #[error("{op} not permitted on {fh} opened {mode:?}")]
  AccessDenied {
    /// Handle the operation targeted.
    fh: FileHandle,
    /// Operation name.
    op: &'static str,
    /// Mode the handle was opened with.
    mode: flushfs_fuse::AccessMode
  },
  /// A write would extend the buffer beyond addressable memory.
  #[error("write at offset {offset} on {fh} exceeds the maximum file size")]
  FileTooLarge {
    /// Handle the write targeted.
    fh: FileHandle,
    /// Requested offset.
    offset: u64
  }
}

impl From<FlushFsError> for FsError {
  fn from(err: FlushFsError) -> Self {
    match err {
      FlushFsError::ReportRejected { source, .. } => {
        Self::Io(std::io::Error::from_raw_os_error(source.errno()))
      }
      FlushFsError::UnknownHandle(_) | FlushFsError::AccessDenied { .. } => Self::BadHandle,
      FlushFsError::FileTooLarge { .. } => {
        Self::Io(std::io::Error::from_raw_os_error(libc::EFBIG))
      }
    }
  }
}
