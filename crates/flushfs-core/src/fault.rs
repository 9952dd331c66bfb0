//! Reporting functions and error injection.
//!
//! Every flush and fsync payload is handed to a [`Reporter`]. Tests swap in a
//! [`FaultInjector`] to make a chosen report fail and then assert that the
//! failure reaches the caller of `close(2)` or `fsync(2)`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

/// Error returned by a reporting function.
///
/// Carries the errno the triggering FUSE operation fails with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (errno {errno})")]
pub struct ReportError {
  errno: i32,
  message: String
}

impl ReportError {
  /// Create an error with a specific errno.
  ///
  /// A non-positive errno would read as success to the kernel and is
  /// replaced with `EIO`.
  pub fn new(errno: i32, message: impl Into<String>) -> Self {
    Self {
      errno: if errno > 0 { errno } else { libc::EIO },
      message: message.into()
    }
  }

  /// Create an `EIO` error.
  pub fn io(message: impl Into<String>) -> Self {
    Self::new(libc::EIO, message)
  }

  /// Errno to return to the kernel.
  #[must_use]
  pub const fn errno(&self) -> i32 {
    self.errno
  }

  /// Human-readable description.
  #[must_use]
  pub fn message(&self) -> &str {
    &self.message
  }
}

/// Receives the payload of a flush or fsync event.
pub trait Reporter: Send + Sync + 'static {
  /// Report `payload`; an error fails the triggering operation.
  ///
  /// # Errors
  ///
  /// Implementations return [`ReportError`] to reject the event.
  fn report(&self, payload: &[u8]) -> Result<(), ReportError>;
}

impl<F> Reporter for F
where
  F: Fn(&[u8]) -> Result<(), ReportError> + Send + Sync + 'static
{
  fn report(&self, payload: &[u8]) -> Result<(), ReportError> {
    self(payload)
  }
}

/// Reporter that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Reporter for AcceptAll {
  fn report(&self, _payload: &[u8]) -> Result<(), ReportError> {
    Ok(())
  }
}

/// When a [`FaultInjector`] fails a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
  /// Never fail.
  Never,
  /// Fail every call.
  Always(ReportError),
  /// Fail only the `call`-th call (1-based), counted since the trigger was set.
  OnCall {
    /// Call number to fail.
    call: u64,
    /// Error to return.
    error: ReportError
  },
  /// Let the first `calls` calls through, fail every later one.
  AfterCalls {
    /// Number of calls that succeed.
    calls: u64,
    /// Error to return afterwards.
    error: ReportError
  }
}

impl Trigger {
  fn fire(&self, call: u64) -> Option<&ReportError> {
    match self {
      Self::Never => None,
      Self::Always(error) => Some(error),
      Self::OnCall { call: n, error } => (call == *n).then_some(error),
      Self::AfterCalls { calls, error } => (call > *calls).then_some(error)
    }
  }
}

/// Reporter that fails according to a [`Trigger`].
///
/// The trigger can be replaced while the filesystem is mounted; doing so
/// restarts the call numbering used by [`Trigger::OnCall`] and
/// [`Trigger::AfterCalls`].
#[derive(Debug)]
pub struct FaultInjector {
  trigger: Mutex<(Trigger, u64)>,
  total_calls: AtomicU64
}

impl Default for FaultInjector {
  fn default() -> Self {
    Self::new(Trigger::Never)
  }
}

impl FaultInjector {
  /// Create an injector with the given trigger.
  #[must_use]
  pub fn new(trigger: Trigger) -> Self {
    Self {
      trigger: Mutex::new((trigger, 0)),
      total_calls: AtomicU64::new(0)
    }
  }

  /// Replace the trigger and restart the call numbering.
  pub fn set_trigger(&self, trigger: Trigger) {
    debug!(?trigger, "fault trigger replaced");
    *self.trigger.lock() = (trigger, 0);
  }

  /// Stop failing.
  pub fn disarm(&self) {
    self.set_trigger(Trigger::Never);
  }

  /// Total number of reports seen, failed ones included.
  #[must_use]
  pub fn calls(&self) -> u64 {
    self.total_calls.load(Ordering::SeqCst)
  }
}

impl Reporter for FaultInjector {
  fn report(&self, payload: &[u8]) -> Result<(), ReportError> {
    self.total_calls.fetch_add(1, Ordering::SeqCst);

    let mut guard = self.trigger.lock();
    let (trigger, calls) = &mut *guard;
    *calls += 1;

    match trigger.fire(*calls) {
      Some(error) => {
        debug!(call = *calls, len = payload.len(), %error, "injecting report failure");
        Err(error.clone())
      }
      None => Ok(())
    }
  }
}
