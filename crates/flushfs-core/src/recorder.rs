//! Ordered log of flush and fsync reports.
//!
//! [`EventRecorder::report`] is the single ordering point for every event
//! the filesystem produces. The log mutex is held while the record is
//! appended *and* while the reporter for its kind runs, so the recorded
//! order is the order reporters observed. This serializes all flush/fsync
//! reporting across the mount; a slow reporter delays every other handle's
//! flush and fsync until it returns.
//!
//! The mutex is not reentrant: a reporter must not call back into the
//! recorder (`history`, `events`, `len`, ...) or it deadlocks. The
//! filesystem also holds the reporting handle's buffer guard during the
//! call, so a reporter must not write through that handle either.

use std::{fmt, sync::Arc};

use flushfs_fuse::FileHandle;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::fault::{ReportError, Reporter};

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  /// A descriptor referencing a handle was closed.
  Flush,
  /// An explicit sync request.
  Fsync
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Flush => "flush",
      Self::Fsync => "fsync"
    })
  }
}

/// One reported event. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
  /// Event kind.
  pub kind: EventKind,
  /// Handle that produced the event.
  pub fh: FileHandle,
  /// Buffer contents of the handle when the event fired.
  pub payload: Vec<u8>,
  /// Whether the reporter accepted the event.
  pub accepted: bool
}

/// Append-only event log with one reporter per event kind.
pub struct EventRecorder {
  log: Mutex<Vec<EventRecord>>,
  flush_reporter: Arc<dyn Reporter>,
  fsync_reporter: Arc<dyn Reporter>
}

impl fmt::Debug for EventRecorder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventRecorder")
      .field("events", &self.log.lock().len())
      .finish_non_exhaustive()
  }
}

impl EventRecorder {
  /// Create a recorder with the given reporters.
  #[must_use]
  pub fn new(flush_reporter: Arc<dyn Reporter>, fsync_reporter: Arc<dyn Reporter>) -> Self {
    Self {
      log: Mutex::new(Vec::new()),
      flush_reporter,
      fsync_reporter
    }
  }

  fn reporter(&self, kind: EventKind) -> &dyn Reporter {
    match kind {
      EventKind::Flush => self.flush_reporter.as_ref(),
      EventKind::Fsync => self.fsync_reporter.as_ref()
    }
  }

  /// Record an event and hand its payload to the reporter for `kind`.
  ///
  /// Runs the reporter with the log locked; the reporter must not call
  /// back into this recorder.
  ///
  /// The record is kept even when the reporter rejects it, so failed
  /// attempts stay visible in the history.
  ///
  /// # Errors
  ///
  /// Returns the reporter's error unchanged.
  pub fn report(&self, kind: EventKind, fh: FileHandle, payload: Vec<u8>) -> Result<(), ReportError> {
    let mut log = self.log.lock();
    let index = log.len();
    log.push(EventRecord {
      kind,
      fh,
      payload,
      accepted: false
    });

    let result = self.reporter(kind).report(&log[index].payload);
    log[index].accepted = result.is_ok();

    match &result {
      Ok(()) => debug!(%kind, %fh, len = log[index].payload.len(), seq = index, "event reported"),
      Err(e) => warn!(%kind, %fh, error = %e, seq = index, "event report rejected")
    }

    result
  }

  /// Payloads of all events of `kind`, in report order.
  #[must_use]
  pub fn history(&self, kind: EventKind) -> Vec<Vec<u8>> {
    self
      .log
      .lock()
      .iter()
      .filter(|r| r.kind == kind)
      .map(|r| r.payload.clone())
      .collect()
  }

  /// Payloads of all flush events, in report order.
  #[must_use]
  pub fn flush_history(&self) -> Vec<Vec<u8>> {
    self.history(EventKind::Flush)
  }

  /// Payloads of all fsync events, in report order.
  #[must_use]
  pub fn fsync_history(&self) -> Vec<Vec<u8>> {
    self.history(EventKind::Fsync)
  }

  /// Copy of the full log, both kinds interleaved.
  #[must_use]
  pub fn events(&self) -> Vec<EventRecord> {
    self.log.lock().clone()
  }

  /// Number of recorded events.
  #[must_use]
  pub fn len(&self) -> usize {
    self.log.lock().len()
  }

  /// Whether nothing has been recorded yet.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.log.lock().is_empty()
  }
}
