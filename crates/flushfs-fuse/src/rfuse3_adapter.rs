//! rfuse3 → async [`FuseFilesystem`] adapter.
//!
//! Converts inode-based rfuse3 requests into path-based calls:
//! - `rfuse3::Inode` (u64) → `Path` (through [`InodeMap`])
//! - [`crate::FileAttr`] → `rfuse3::raw::reply::FileAttr`
//! - [`FsError`] → `rfuse3::Errno`

use std::{
  ffi::{OsStr, OsString},
  path::PathBuf,
  sync::Arc,
  time::{Duration, SystemTime, UNIX_EPOCH}
};

use futures_util::stream;
use rfuse3::{Errno, Timestamp, raw::prelude::*};
use tracing::{debug, trace};

use crate::{
  FileType, FsError, FuseFilesystem, InodeMap, NodeKind, OpenFlags, ROOT_INODE,
  types::{self, FileHandle as FsFileHandle}
};

type Result<T> = std::result::Result<T, Errno>;

/// Attribute cache TTL.
///
/// Zero: sizes derive from live handles and change with every write.
const TTL: Duration = Duration::ZERO;

/// Maximum write size (1 MiB).
const MAX_WRITE: std::num::NonZeroU32 = match std::num::NonZeroU32::new(1024 * 1024) {
  Some(v) => v,
  None => panic!("MAX_WRITE must be non-zero")
};

/// Adapter from inode-based rfuse3 requests to a path-based [`FuseFilesystem`].
pub struct Rfuse3Adapter<F: FuseFilesystem> {
  inner: Arc<F>,
  inode_map: InodeMap
}

impl<F: FuseFilesystem> Rfuse3Adapter<F> {
  /// Create an adapter for `fs`.
  pub fn new(fs: Arc<F>) -> Self {
    Self {
      inner: fs,
      inode_map: InodeMap::new()
    }
  }

  /// Resolve an inode to its path, or fail with `ENOENT`.
  fn resolve_path(&self, inode: u64) -> Result<PathBuf> {
    self
      .inode_map
      .get_path(inode)
      .ok_or_else(|| Errno::from(libc::ENOENT))
  }
}

fn to_rfuse3_attr(attr: &types::FileAttr, ino: u64) -> FileAttr {
  FileAttr {
    ino,
    size: attr.size,
    blocks: attr.blocks,
    atime: system_time_to_timestamp(attr.atime),
    mtime: system_time_to_timestamp(attr.mtime),
    ctime: system_time_to_timestamp(attr.ctime),
    #[cfg(target_os = "macos")]
    crtime: system_time_to_timestamp(attr.ctime),
    kind: to_rfuse3_filetype(attr.kind),
    perm: attr.perm,
    nlink: attr.nlink,
    uid: attr.uid,
    gid: attr.gid,
    rdev: 0,
    #[cfg(target_os = "macos")]
    flags: 0,
    blksize: 512
  }
}

const fn to_rfuse3_filetype(kind: FileType) -> rfuse3::FileType {
  match kind {
    FileType::RegularFile => rfuse3::FileType::RegularFile,
    FileType::Directory => rfuse3::FileType::Directory
  }
}

const fn to_node_kind(kind: FileType) -> NodeKind {
  match kind {
    FileType::Directory => NodeKind::Dir,
    FileType::RegularFile => NodeKind::File
  }
}

fn system_time_to_timestamp(time: SystemTime) -> Timestamp {
  let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
  Timestamp::new(
    i64::try_from(duration.as_secs()).unwrap_or(0),
    duration.subsec_nanos()
  )
}

fn timestamp_to_system_time(ts: Timestamp) -> SystemTime {
  let secs = u64::try_from(ts.sec).unwrap_or(0);
  UNIX_EPOCH + Duration::new(secs, ts.nsec)
}

fn fs_error_to_errno(err: &FsError) -> Errno {
  Errno::from(err.to_errno())
}

impl<F: FuseFilesystem> rfuse3::raw::Filesystem for Rfuse3Adapter<F> {
  async fn init(&self, _req: Request) -> Result<ReplyInit> {
    debug!("FUSE init");
    self.inner.init().await.map_err(|e| fs_error_to_errno(&e))?;
    Ok(ReplyInit {
      max_write: MAX_WRITE
    })
  }

  async fn destroy(&self, _req: Request) {
    debug!("FUSE destroy");
    self.inner.destroy();
  }

  async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> Result<ReplyEntry> {
    let parent_path = self.resolve_path(parent)?;
    let child_path = parent_path.join(name);

    match self.inner.lookup(&parent_path, name).await {
      Ok(attr) => {
        let ino = self
          .inode_map
          .get_or_insert(&child_path, to_node_kind(attr.kind));
        Ok(ReplyEntry {
          ttl: TTL,
          attr: to_rfuse3_attr(&attr, ino),
          generation: 0
        })
      }
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn forget(&self, _req: Request, inode: u64, _nlookup: u64) {
    trace!(inode, "forget (noop)");
  }

  async fn getattr(
    &self,
    _req: Request,
    inode: u64,
    _fh: Option<u64>,
    _flags: u32
  ) -> Result<ReplyAttr> {
    let path = self.resolve_path(inode)?;

    match self.inner.getattr(&path).await {
      Ok(attr) => Ok(ReplyAttr {
        ttl: TTL,
        attr: to_rfuse3_attr(&attr, inode)
      }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn setattr(
    &self,
    _req: Request,
    inode: u64,
    fh: Option<u64>,
    set_attr: SetAttr
  ) -> Result<ReplyAttr> {
    let path = self.resolve_path(inode)?;

    let size = set_attr.size;
    let atime = set_attr.atime.map(timestamp_to_system_time);
    let mtime = set_attr.mtime.map(timestamp_to_system_time);
    let mode = set_attr.mode.map(u32::from);

    match self
      .inner
      .setattr(&path, fh.map(FsFileHandle), size, atime, mtime, mode)
      .await
    {
      Ok(attr) => Ok(ReplyAttr {
        ttl: TTL,
        attr: to_rfuse3_attr(&attr, inode)
      }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn open(&self, _req: Request, inode: u64, flags: u32) -> Result<ReplyOpen> {
    let path = self.resolve_path(inode)?;

    match self.inner.open(&path, OpenFlags::from_raw(flags)).await {
      Ok(fh) => Ok(ReplyOpen { fh: fh.0, flags: 0 }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn read(
    &self,
    _req: Request,
    inode: u64,
    fh: u64,
    offset: u64,
    size: u32
  ) -> Result<ReplyData> {
    let path = self.resolve_path(inode)?;

    match self.inner.read(&path, FsFileHandle(fh), offset, size).await {
      Ok(data) => Ok(ReplyData { data: data.into() }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn write(
    &self,
    _req: Request,
    inode: u64,
    fh: u64,
    offset: u64,
    data: &[u8],
    _write_flags: u32,
    _flags: u32
  ) -> Result<ReplyWrite> {
    let path = self.resolve_path(inode)?;

    match self.inner.write(&path, FsFileHandle(fh), offset, data).await {
      Ok(written) => Ok(ReplyWrite { written }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn release(
    &self,
    _req: Request,
    inode: u64,
    fh: u64,
    _flags: u32,
    _lock_owner: u64,
    _flush: bool
  ) -> Result<()> {
    let path = self.resolve_path(inode)?;
    self
      .inner
      .release(&path, FsFileHandle(fh))
      .await
      .map_err(|e| fs_error_to_errno(&e))
  }

  async fn flush(&self, _req: Request, inode: u64, fh: u64, _lock_owner: u64) -> Result<()> {
    let path = self.resolve_path(inode)?;
    self
      .inner
      .flush(&path, FsFileHandle(fh))
      .await
      .map_err(|e| fs_error_to_errno(&e))
  }

  async fn fsync(&self, _req: Request, inode: u64, fh: u64, datasync: bool) -> Result<()> {
    let path = self.resolve_path(inode)?;
    self
      .inner
      .fsync(&path, FsFileHandle(fh), datasync)
      .await
      .map_err(|e| fs_error_to_errno(&e))
  }

  async fn readdir(
    &self,
    _req: Request,
    inode: u64,
    _fh: u64,
    offset: i64
  ) -> Result<ReplyDirectory<impl futures_util::Stream<Item = Result<DirectoryEntry>> + Send>> {
    let path = self.resolve_path(inode)?;
    let entries = self
      .inner
      .readdir(&path)
      .await
      .map_err(|e| fs_error_to_errno(&e))?;

    let dots = [
      (OsString::from("."), inode),
      (OsString::from(".."), ROOT_INODE)
    ];

    let mut dir_entries = Vec::with_capacity(entries.len() + dots.len());
    let mut index: i64 = 0;

    for (name, ino) in dots {
      index += 1;
      if offset < index {
        dir_entries.push(DirectoryEntry {
          inode: ino,
          kind: rfuse3::FileType::Directory,
          name,
          offset: index
        });
      }
    }

    for entry in entries {
      index += 1;
      if offset < index {
        let child_ino = self
          .inode_map
          .get_or_insert(&path.join(&entry.name), to_node_kind(entry.kind));
        dir_entries.push(DirectoryEntry {
          inode: child_ino,
          kind: to_rfuse3_filetype(entry.kind),
          name: OsString::from(&entry.name),
          offset: index
        });
      }
    }

    Ok(ReplyDirectory {
      entries: stream::iter(dir_entries.into_iter().map(Ok))
    })
  }

  async fn statfs(&self, _req: Request, inode: u64) -> Result<ReplyStatFs> {
    let path = self.resolve_path(inode)?;

    match self.inner.statfs(&path).await {
      Ok(stat) => Ok(ReplyStatFs {
        blocks: stat.blocks,
        bfree: stat.bfree,
        bavail: stat.bavail,
        files: stat.files,
        ffree: stat.ffree,
        bsize: stat.bsize,
        namelen: stat.namelen,
        frsize: stat.bsize
      }),
      Err(e) => Err(fs_error_to_errno(&e))
    }
  }

  async fn access(&self, _req: Request, _inode: u64, _mask: u32) -> Result<()> {
    Ok(())
  }

  async fn opendir(&self, _req: Request, inode: u64, _flags: u32) -> Result<ReplyOpen> {
    let _ = self.resolve_path(inode)?;
    Ok(ReplyOpen { fh: 0, flags: 0 })
  }

  async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> Result<()> {
    Ok(())
  }

  async fn interrupt(&self, _req: Request, unique: u64) -> Result<()> {
    debug!(unique, "FUSE interrupt ignored");
    Ok(())
  }
}
