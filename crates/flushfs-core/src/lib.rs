//! flushfs-core — an in-memory FUSE filesystem for testing flush semantics.
//!
//! The mount holds a single regular file. Each `open` of it creates an
//! independent handle with its own buffer, and every `flush` (one per
//! `close(2)`) and `fsync` hands that buffer to a caller-supplied
//! [`Reporter`]. A reporter error becomes the errno of the triggering
//! syscall, which lets tests check that storage failures reach
//! applications.
//!
//! Contains:
//! - `HandleTable` / `HandleState` — per-handle buffers
//! - `EventRecorder` — ordered log of flush and fsync payloads
//! - `FaultInjector` — reporter that fails on demand
//! - `FlushFs` — `FuseFilesystem` implementation tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │    FUSE     │ ──► │   FlushFs    │ ──► │ EventRecorder │ ──► Reporter
//! │(flushfs-fuse│     │  (handlers)  │     │ (ordered log) │
//! └─────────────┘     └──────┬───────┘     └───────────────┘
//!                            │
//!                     ┌──────▼───────┐
//!                     │ HandleTable  │
//!                     │(per-fh bufs) │
//!                     └──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod error;
pub mod fault;
pub mod fs;
pub mod handle;
pub mod recorder;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{FlushFsConfig, FuseMountOptions, LoggingConfig};
pub use error::FlushFsError;
pub use fault::{AcceptAll, FaultInjector, ReportError, Reporter, Trigger};
pub use fs::FlushFs;
pub use handle::HandleState;
pub use recorder::{EventKind, EventRecord, EventRecorder};
pub use table::HandleTable;

use std::{path::Path, sync::Arc};

use flushfs_fuse::FuseHost;
use tracing::info;

/// Mount flushfs at `mountpoint` and block until it is unmounted.
///
/// Returns the event log so the caller can inspect what was reported
/// during the session.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, FUSE is missing, or
/// mounting fails.
pub async fn run_mount(
  config: FlushFsConfig,
  mountpoint: &Path,
  flush_reporter: Arc<dyn Reporter>,
  fsync_reporter: Arc<dyn Reporter>
) -> anyhow::Result<Arc<EventRecorder>> {
  config.validate()?;

  if !is_fuse_available() {
    anyhow::bail!("FUSE is not installed");
  }

  let mount_options = flushfs_fuse::MountOptions::from(&config.mount_options);
  let fs = FlushFs::new(config, flush_reporter, fsync_reporter);
  let recorder = fs.recorder();

  info!(
    mount_point = %mountpoint.display(),
    file = %fs.file_path().display(),
    "mounting"
  );

  let host = FuseHost::new(fs);
  host.mount(mountpoint, &mount_options).await?;

  info!(
    flushes = recorder.flush_history().len(),
    fsyncs = recorder.fsync_history().len(),
    "unmounted"
  );

  Ok(recorder)
}

/// Check FUSE platform availability.
#[must_use]
pub fn is_fuse_available() -> bool {
  FuseHost::<FlushFs>::is_available()
}
