//! Test utilities: a flushfs wired to fault injectors, and `with_timeout`.

use std::{sync::Arc, time::Duration};

use flushfs_fuse::{FileHandle, FsError, FuseFilesystem, OpenFlags};

use crate::{
  config::FlushFsConfig,
  fault::{FaultInjector, Reporter},
  fs::FlushFs
};

/// A `FlushFs` whose reporters are controllable from the test.
pub struct TestFs {
  /// The filesystem under test.
  pub fs: Arc<FlushFs>,
  /// Reporter receiving flush payloads.
  pub flush: Arc<FaultInjector>,
  /// Reporter receiving fsync payloads.
  pub fsync: Arc<FaultInjector>
}

impl Default for TestFs {
  fn default() -> Self {
    Self::new()
  }
}

impl TestFs {
  /// Create a filesystem with the default config and disarmed injectors.
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(FlushFsConfig::default())
  }

  /// Create a filesystem with a custom config and disarmed injectors.
  #[must_use]
  pub fn with_config(config: FlushFsConfig) -> Self {
    let flush = Arc::new(FaultInjector::default());
    let fsync = Arc::new(FaultInjector::default());
    let fs = FlushFs::new(
      config,
      Arc::clone(&flush) as Arc<dyn Reporter>,
      Arc::clone(&fsync) as Arc<dyn Reporter>
    );
    Self {
      fs: Arc::new(fs),
      flush,
      fsync
    }
  }

  /// Open the file the way `open(2)` would.
  ///
  /// # Errors
  ///
  /// Propagates the error of [`FuseFilesystem::open`].
  pub async fn open(&self, flags: OpenFlags) -> Result<FileHandle, FsError> {
    self.fs.open(self.fs.file_path(), flags).await
  }

  /// Write a whole string at `offset`.
  ///
  /// # Errors
  ///
  /// Propagates the error of [`FuseFilesystem::write`].
  pub async fn write_str(&self, fh: FileHandle, offset: u64, data: &str) -> Result<u32, FsError> {
    self.fs.write(self.fs.file_path(), fh, offset, data.as_bytes()).await
  }

  /// `close(2)` of the last descriptor: flush, then release.
  ///
  /// The handle is released even if the flush fails, as the kernel does.
  ///
  /// # Errors
  ///
  /// Returns the flush error if there was one, else the release error.
  pub async fn close(&self, fh: FileHandle) -> Result<(), FsError> {
    let path = self.fs.file_path();
    let flushed = self.fs.flush(path, fh).await;
    let released = self.fs.release(path, fh).await;
    flushed.and(released)
  }

  /// `fsync(2)`.
  ///
  /// # Errors
  ///
  /// Propagates the error of [`FuseFilesystem::fsync`].
  pub async fn fsync(&self, fh: FileHandle) -> Result<(), FsError> {
    self.fs.fsync(self.fs.file_path(), fh, false).await
  }

  /// Flush history decoded as UTF-8.
  #[must_use]
  pub fn flushes(&self) -> Vec<String> {
    decode(self.fs.flush_history())
  }

  /// Fsync history decoded as UTF-8.
  #[must_use]
  pub fn fsyncs(&self) -> Vec<String> {
    decode(self.fs.fsync_history())
  }
}

fn decode(history: Vec<Vec<u8>>) -> Vec<String> {
  history
    .into_iter()
    .map(|p| String::from_utf8_lossy(&p).into_owned())
    .collect()
}

/// Default timeout for async tests (10 seconds).
///
/// Prevents tests from hanging indefinitely on a deadlock.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Wrap an async test body with a timeout and status output.
///
/// - Prints `[TEST] Starting: <name>` at the beginning.
/// - Prints `[TEST] Completed: <name>` on success.
/// - Panics with a descriptive message if the timeout expires.
///
/// Usage:
/// ```ignore
/// #[tokio::test]
/// async fn test_foo() {
///     with_timeout("test_foo", async {
///         // test body
///     }).await;
/// }
/// ```
#[allow(clippy::panic)]
pub async fn with_timeout<F, T>(test_name: &str, f: F) -> T
where
  F: std::future::Future<Output = T>
{
  eprintln!("[TEST] Starting: {test_name}");
  let result = tokio::time::timeout(TEST_TIMEOUT, f).await.unwrap_or_else(|_| {
    panic!("[TEST] {test_name} timed out after {TEST_TIMEOUT:?}, possible deadlock")
  });
  eprintln!("[TEST] Completed: {test_name}");
  result
}
