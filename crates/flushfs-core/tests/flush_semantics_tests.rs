//! Flush and fsync reporting through the `FuseFilesystem` surface.
//!
//! Each test drives `FlushFs` with the same call sequences the kernel sends
//! for `open(2)`, `write(2)`, `close(2)` and `fsync(2)`, then checks the
//! payloads the reporters received.
//!
//! Run: `cargo test -p flushfs-core --test flush_semantics_tests`

#![allow(clippy::expect_used)]

use std::{
    ffi::OsStr,
    path::Path,
    sync::{Arc, Mutex},
};

use flushfs_core::{
    AcceptAll, EventKind, FlushFs, FlushFsConfig, FlushFsError, ReportError, Trigger,
    test_utils::{TestFs, with_timeout},
};
use flushfs_fuse::{AccessMode, FsError, FuseFilesystem, OpenFlags};

fn enoent() -> ReportError {
    ReportError::new(libc::ENOENT, "injected ENOENT")
}

// ============================================================================
// close(2) reports
// ============================================================================

#[tokio::test]
async fn test_close_reports_read_write() {
    with_timeout("test_close_reports_read_write", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        assert_eq!(t.write_str(fh, 0, "taco").await.expect("write"), 4);

        // Nothing is reported before close.
        assert!(t.flushes().is_empty());

        t.close(fh).await.expect("close");
        assert_eq!(t.flushes(), vec!["taco"]);
        assert!(t.fsyncs().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_close_reports_read_only() {
    with_timeout("test_close_reports_read_only", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::read_only()).await.expect("open");
        t.close(fh).await.expect("close");

        assert_eq!(t.flushes(), vec![""]);
        assert!(t.fsyncs().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_close_reports_write_only() {
    with_timeout("test_close_reports_write_only", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::write_only()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");
        t.close(fh).await.expect("close");

        assert_eq!(t.flushes(), vec!["taco"]);
        assert!(t.fsyncs().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_close_reports_multiple_times_non_overlapping() {
    with_timeout("test_close_reports_multiple_times_non_overlapping", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::write_only()).await.expect("open 1");
        t.write_str(fh, 0, "taco").await.expect("write 1");
        t.close(fh).await.expect("close 1");
        assert_eq!(t.flushes(), vec!["taco"]);

        // The second handle starts empty: it does not see "taco".
        let fh = t.open(OpenFlags::write_only()).await.expect("open 2");
        t.write_str(fh, 0, "p").await.expect("write 2");
        t.close(fh).await.expect("close 2");

        assert_eq!(t.flushes(), vec!["taco", "p"]);
        assert!(t.fsyncs().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_close_reports_overlapping_handles() {
    with_timeout("test_close_reports_overlapping_handles", async {
        let t = TestFs::new();

        let a = t.open(OpenFlags::write_only()).await.expect("open a");
        let b = t.open(OpenFlags::write_only()).await.expect("open b");
        assert_ne!(a, b);

        t.write_str(a, 0, "taco").await.expect("write a");
        t.write_str(b, 0, "p").await.expect("write b");

        t.close(b).await.expect("close b");
        assert_eq!(t.flushes(), vec!["p"]);

        t.write_str(a, 4, "s").await.expect("write a again");
        t.close(a).await.expect("close a");

        assert_eq!(t.flushes(), vec!["p", "tacos"]);
    })
    .await;
}

#[tokio::test]
async fn test_duplicated_descriptor_flushes_twice() {
    with_timeout("test_duplicated_descriptor_flushes_twice", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        // dup(2): two close(2) calls on one handle, then a single release.
        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");
        t.fs.flush(&path, fh).await.expect("first close");
        t.write_str(fh, 0, "p").await.expect("write through dup");
        t.fs.flush(&path, fh).await.expect("second close");
        t.fs.release(&path, fh).await.expect("release");

        assert_eq!(t.flushes(), vec!["taco", "paco"]);
    })
    .await;
}

#[tokio::test]
async fn test_release_reports_nothing() {
    with_timeout("test_release_reports_nothing", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");
        t.fs.release(&path, fh).await.expect("release");

        assert!(t.fs.recorder().is_empty());
        assert_eq!(t.flush.calls(), 0);
    })
    .await;
}

// ============================================================================
// close(2) errors
// ============================================================================

#[tokio::test]
async fn test_close_error() {
    with_timeout("test_close_error", async {
        let t = TestFs::new();
        t.flush.set_trigger(Trigger::Always(enoent()));

        let fh = t.open(OpenFlags::read_only()).await.expect("open");
        let err = t.close(fh).await.expect_err("close should fail");
        assert_eq!(err.to_errno(), libc::ENOENT);

        // The attempt is recorded and the handle is gone regardless.
        let events = t.fs.recorder().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Flush);
        assert!(!events[0].accepted);
        assert!(t.fs.handles().is_empty());

        t.flush.disarm();
        let fh = t.open(OpenFlags::write_only()).await.expect("reopen");
        t.write_str(fh, 0, "taco").await.expect("write");
        t.close(fh).await.expect("close after disarm");

        assert_eq!(t.flushes(), vec!["", "taco"]);
    })
    .await;
}

#[tokio::test]
async fn test_close_error_keeps_buffer() {
    with_timeout("test_close_error_keeps_buffer", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();
        t.flush.set_trigger(Trigger::OnCall {
            call: 1,
            error: ReportError::io("injected EIO"),
        });

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");

        let err = t.fs.flush(&path, fh).await.expect_err("first flush fails");
        assert_eq!(err.to_errno(), libc::EIO);

        // A later flush of the same handle still carries the data.
        t.close(fh).await.expect("second flush succeeds");
        assert_eq!(t.flushes(), vec!["taco", "taco"]);
    })
    .await;
}

// ============================================================================
// fsync(2)
// ============================================================================

#[tokio::test]
async fn test_fsync_reports() {
    with_timeout("test_fsync_reports", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");
        t.fsync(fh).await.expect("fsync 1");
        assert_eq!(t.fsyncs(), vec!["taco"]);
        assert!(t.flushes().is_empty());

        // Later writes do not change what was already reported.
        t.write_str(fh, 4, "s").await.expect("write");
        t.fsync(fh).await.expect("fsync 2");
        assert_eq!(t.fsyncs(), vec!["taco", "tacos"]);

        t.close(fh).await.expect("close");
        assert_eq!(t.flushes(), vec!["tacos"]);

        let kinds: Vec<_> = t.fs.recorder().events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Fsync, EventKind::Fsync, EventKind::Flush]);
    })
    .await;
}

#[tokio::test]
async fn test_fsync_on_read_only_handle() {
    with_timeout("test_fsync_on_read_only_handle", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::read_only()).await.expect("open");
        t.fsync(fh).await.expect("fsync");
        t.close(fh).await.expect("close");

        assert_eq!(t.fsyncs(), vec![""]);
        assert_eq!(t.flushes(), vec![""]);
    })
    .await;
}

#[tokio::test]
async fn test_fsync_error() {
    with_timeout("test_fsync_error", async {
        let t = TestFs::new();
        t.fsync.set_trigger(Trigger::OnCall {
            call: 1,
            error: ReportError::new(libc::ENOSPC, "injected ENOSPC"),
        });

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");

        let err = t.fsync(fh).await.expect_err("fsync should fail");
        assert_eq!(err.to_errno(), libc::ENOSPC);

        // Flush reporting is independent of the fsync reporter.
        t.fsync(fh).await.expect("second fsync");
        t.close(fh).await.expect("close");

        assert_eq!(t.fsyncs(), vec!["taco", "taco"]);
        assert_eq!(t.flushes(), vec!["taco"]);
        assert_eq!(t.fsync.calls(), 2);
        assert_eq!(t.flush.calls(), 1);
    })
    .await;
}

// ============================================================================
// Handle validity and access modes
// ============================================================================

#[tokio::test]
async fn test_double_release_is_bad_handle() {
    with_timeout("test_double_release_is_bad_handle", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.close(fh).await.expect("close");

        let err = t.fs.release(&path, fh).await.expect_err("double release");
        assert!(matches!(err, FsError::BadHandle));

        // Operations on a released handle report nothing.
        let err = t.fs.flush(&path, fh).await.expect_err("flush after release");
        assert_eq!(err.to_errno(), libc::EBADF);
        assert_eq!(t.flushes(), vec![""]);
    })
    .await;
}

#[tokio::test]
async fn test_typed_errors() {
    with_timeout("test_typed_errors", async {
        let t = TestFs::new();

        let ro = t.open(OpenFlags::read_only()).await.expect("open");
        let err = t.fs.write_file(ro, 0, b"x").await.expect_err("write on ro");
        assert!(matches!(err, FlushFsError::AccessDenied { op: "write", .. }));

        t.flush.set_trigger(Trigger::Always(enoent()));
        let err = t.fs.flush_file(ro).await.expect_err("rejected");
        match err {
            FlushFsError::ReportRejected { kind, fh, source } => {
                assert_eq!(kind, EventKind::Flush);
                assert_eq!(fh, ro);
                assert_eq!(source.errno(), libc::ENOENT);
            }
            other => panic!("unexpected error: {other}"),
        }

        t.fs.release_file(ro).expect("release");
        assert!(matches!(
            t.fs.release_file(ro),
            Err(FlushFsError::UnknownHandle(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_each_handle_reads_its_own_buffer() {
    with_timeout("test_each_handle_reads_its_own_buffer", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        let a = t.open(OpenFlags::read_write()).await.expect("open a");
        let b = t.open(OpenFlags::read_write()).await.expect("open b");
        t.write_str(a, 0, "taco").await.expect("write a");

        assert_eq!(t.fs.read(&path, a, 0, 100).await.expect("read a"), b"taco");
        assert_eq!(t.fs.read(&path, a, 2, 1).await.expect("read a"), b"c");
        assert!(t.fs.read(&path, b, 0, 100).await.expect("read b").is_empty());
        assert!(t.fs.read(&path, a, 10, 100).await.expect("read past end").is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_write_past_end_zero_fills() {
    with_timeout("test_write_past_end_zero_fills", async {
        let t = TestFs::new();

        let fh = t.open(OpenFlags::write_only()).await.expect("open");
        t.write_str(fh, 3, "x").await.expect("write");
        t.close(fh).await.expect("close");

        assert_eq!(t.fs.flush_history(), vec![b"\0\0\0x".to_vec()]);
    })
    .await;
}

// ============================================================================
// O_APPEND and truncation
// ============================================================================

#[tokio::test]
async fn test_append_handle_writes_only_its_own_bytes() {
    with_timeout("test_append_handle_writes_only_its_own_bytes", async {
        let t = TestFs::new();

        let a = t.open(OpenFlags::write_only()).await.expect("open a");
        t.write_str(a, 0, "taco").await.expect("write a");

        // The kernel picks the append offset from getattr, i.e. from `a`.
        let b = t
            .open(OpenFlags::write_only().appending())
            .await
            .expect("open b");
        let size = t.fs.getattr(t.fs.file_path()).await.expect("getattr").size;
        assert_eq!(size, 4);
        t.write_str(b, size, "p").await.expect("append 1");
        t.write_str(b, size + 1, "q").await.expect("append 2");

        t.close(b).await.expect("close b");
        t.close(a).await.expect("close a");

        assert_eq!(t.flushes(), vec!["pq", "taco"]);
    })
    .await;
}

#[tokio::test]
async fn test_open_with_truncate() {
    with_timeout("test_open_with_truncate", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        let other = t.open(OpenFlags::read_write()).await.expect("open other");
        t.write_str(other, 0, "taco").await.expect("write other");

        // open(O_TRUNC): open, then setattr(size = 0) on the new handle.
        let flags = OpenFlags {
            mode: AccessMode::WriteOnly,
            append: false,
            truncate: true,
        };
        let fh = t.open(flags).await.expect("open");
        t.fs.setattr(&path, Some(fh), Some(0), None, None, None)
            .await
            .expect("truncate on open");

        t.write_str(fh, 0, "p").await.expect("write");
        t.close(fh).await.expect("close");
        t.close(other).await.expect("close other");

        assert_eq!(t.flushes(), vec!["p", "taco"]);
    })
    .await;
}

#[tokio::test]
async fn test_ftruncate_changes_the_next_payload() {
    with_timeout("test_ftruncate_changes_the_next_payload", async {
        let t = TestFs::new();
        let path = t.fs.file_path().to_path_buf();

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "tacos").await.expect("write");
        t.fsync(fh).await.expect("fsync");

        t.fs.setattr(&path, Some(fh), Some(4), None, None, None)
            .await
            .expect("ftruncate");
        t.close(fh).await.expect("close");

        assert_eq!(t.fsyncs(), vec!["tacos"]);
        assert_eq!(t.flushes(), vec!["taco"]);
    })
    .await;
}

// ============================================================================
// Namespace
// ============================================================================

#[tokio::test]
async fn test_custom_file_name() {
    with_timeout("test_custom_file_name", async {
        let config = FlushFsConfig {
            file_name: "bar".to_string(),
            ..FlushFsConfig::default()
        };
        let t = TestFs::with_config(config);

        let attr = t
            .fs
            .lookup(Path::new("/"), OsStr::new("bar"))
            .await
            .expect("lookup");
        assert_eq!(attr.perm, 0o777);

        let fh = t.open(OpenFlags::read_write()).await.expect("open");
        t.write_str(fh, 0, "taco").await.expect("write");
        assert_eq!(
            t.fs.getattr(Path::new("/bar")).await.expect("getattr").size,
            4
        );
        t.close(fh).await.expect("close");

        assert_eq!(t.flushes(), vec!["taco"]);
    })
    .await;
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_handles_report_their_own_content() {
    with_timeout("test_concurrent_handles_report_their_own_content", async {
        let t = Arc::new(TestFs::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let t = Arc::clone(&t);
                tokio::spawn(async move {
                    let fh = t.open(OpenFlags::write_only()).await.expect("open");
                    let content = format!("writer-{i}");
                    for (off, chunk) in content.as_bytes().chunks(3).enumerate() {
                        let off = u64::try_from(off * 3).expect("offset");
                        t.fs
                            .write(t.fs.file_path(), fh, off, chunk)
                            .await
                            .expect("write");
                        tokio::task::yield_now().await;
                    }
                    t.fsync(fh).await.expect("fsync");
                    t.close(fh).await.expect("close");
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join");
        }

        let mut expected: Vec<String> = (0..16).map(|i| format!("writer-{i}")).collect();
        expected.sort();

        let mut flushes = t.flushes();
        flushes.sort();
        assert_eq!(flushes, expected);

        let mut fsyncs = t.fsyncs();
        fsyncs.sort();
        assert_eq!(fsyncs, expected);

        assert!(t.fs.handles().is_empty());
        eprintln!("  recorded {} events", t.fs.recorder().len());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_history_follows_close_order() {
    with_timeout("test_flush_history_follows_close_order", async {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = move |payload: &[u8]| {
            sink.lock().expect("lock").push(payload.to_vec());
            Ok::<(), ReportError>(())
        };
        let fs = Arc::new(FlushFs::new(
            FlushFsConfig::default(),
            Arc::new(reporter),
            Arc::new(AcceptAll),
        ));

        // Closes are serialized through `order`, so its contents are the
        // real close order.
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let fs = Arc::clone(&fs);
                let order = Arc::clone(&order);
                tokio::spawn(async move {
                    let path = fs.file_path().to_path_buf();
                    let fh = fs.open(&path, OpenFlags::write_only()).await.expect("open");
                    let content = format!("closer-{i}");
                    fs.write(&path, fh, 0, content.as_bytes())
                        .await
                        .expect("write");
                    tokio::task::yield_now().await;

                    let mut order = order.lock().await;
                    fs.flush(&path, fh).await.expect("flush");
                    fs.release(&path, fh).await.expect("release");
                    order.push(content.into_bytes());
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join");
        }

        let order = order.lock().await.clone();
        assert_eq!(order.len(), 16);
        assert_eq!(fs.flush_history(), order);
        assert_eq!(*seen.lock().expect("lock"), order);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_payload_capture_and_log_append_are_atomic() {
    with_timeout("test_payload_capture_and_log_append_are_atomic", async {
        let t = Arc::new(TestFs::new());
        let fh = t.open(OpenFlags::read_write()).await.expect("open");

        // One task grows the buffer and fsyncs, the other flushes the same
        // handle. Every payload must be at least as long as the one logged
        // before it.
        let writer = {
            let t = Arc::clone(&t);
            tokio::spawn(async move {
                for i in 0..200u64 {
                    t.write_str(fh, i, "x").await.expect("write");
                    t.fsync(fh).await.expect("fsync");
                }
            })
        };
        let flusher = {
            let t = Arc::clone(&t);
            tokio::spawn(async move {
                for _ in 0..200 {
                    t.fs.flush(t.fs.file_path(), fh).await.expect("flush");
                    tokio::task::yield_now().await;
                }
            })
        };
        writer.await.expect("join writer");
        flusher.await.expect("join flusher");

        let lens: Vec<usize> = t
            .fs
            .recorder()
            .events()
            .iter()
            .map(|e| e.payload.len())
            .collect();
        assert_eq!(lens.len(), 400);
        assert!(
            lens.windows(2).all(|w| w[0] <= w[1]),
            "payload shrank in log order: {lens:?}"
        );
        assert_eq!(lens.last().copied(), Some(200));

        t.close(fh).await.expect("close");
    })
    .await;
}
