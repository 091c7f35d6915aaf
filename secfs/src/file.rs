//! File objects: the layer between a bare inode and a numbered file
//! descriptor.
//!
//! A `File` wraps an `Inode` plus the open-mode and cursor state that
//! are properties of one *open*, not of the underlying file -- two
//! descriptors opened separately on the same path get independent
//! cursors, while two descriptors produced by `dup` of the same open
//! share one. Device files are recognized but unimplemented per the
//! non-goals: `fileread`/`filewrite` on one return `FsError::Unsupported`.

use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::fs::Inode;
use crate::lock::SpinLock;
use crate::log::Log;
use crate::param::{MAXOPBLOCKS, NFILE};
use crate::stat::{Stat, T_DEVICE};

/// Bounds the number of simultaneously open files system-wide. Each
/// `File::new` call consumes one slot of headroom; it is
/// released when the last handle (the final `Arc` clone, i.e. after
/// every `dup`ed descriptor referencing it has closed) is dropped.
pub struct FTable {
    open: SpinLock<usize>,
}

impl FTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: SpinLock::new("ftable", 0),
        })
    }

    fn reserve(&self) -> FsResult<()> {
        let mut open = self.open.lock();
        if *open >= NFILE {
            return Err(FsError::TooManyOpenFiles);
        }
        *open += 1;
        Ok(())
    }

    fn release(&self) {
        let mut open = self.open.lock();
        *open -= 1;
    }
}

enum Kind {
    Inode {
        ip: Inode,
        readable: bool,
        writable: bool,
        off: SpinLock<u64>,
    },
    Device {
        #[allow(dead_code)]
        ip: Inode,
        major: u16,
    },
}

struct Inner {
    kind: Kind,
    table: Arc<FTable>,
    log: Arc<Log>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.table.release();
    }
}

/// A reference-counted open file. Cloning via [`File::dup`] shares the
/// same cursor and mode; closing is just dropping the handle.
#[derive(Clone)]
pub struct File(Arc<Inner>);

impl File {
    pub fn open_inode(table: Arc<FTable>, log: Arc<Log>, ip: Inode, readable: bool, writable: bool) -> FsResult<Self> {
        table.reserve()?;
        let typ = ip.lock().typ();
        let kind = if typ == T_DEVICE {
            let major = ip.lock().device_numbers().0;
            Kind::Device { ip, major }
        } else {
            Kind::Inode {
                ip,
                readable,
                writable,
                off: SpinLock::new("file offset", 0),
            }
        };
        Ok(Self(Arc::new(Inner { kind, table, log })))
    }

    pub fn dup(&self) -> Self {
        Self(self.0.clone())
    }

    pub fn readable(&self) -> bool {
        match &self.0.kind {
            Kind::Inode { readable, .. } => *readable,
            Kind::Device { .. } => true,
        }
    }

    pub fn writable(&self) -> bool {
        match &self.0.kind {
            Kind::Inode { writable, .. } => *writable,
            Kind::Device { .. } => true,
        }
    }

    pub fn read(&self, dst: &mut [u8]) -> FsResult<usize> {
        match &self.0.kind {
            Kind::Inode { ip, readable, off, .. } => {
                if !readable {
                    return Err(FsError::WriteOnly);
                }
                let mut cursor = off.lock();
                let mut guard = ip.lock();
                let n = guard.readi(dst, *cursor)?;
                *cursor += n as u64;
                Ok(n)
            }
            Kind::Device { .. } => Err(FsError::Unsupported),
        }
    }

    /// Writes `src`, one transaction per chunk so that no single
    /// `begin_op`/`end_op` bracket can dirty more blocks than the log
    /// reserves room for. The chunk size matches the budget a single
    /// `writei` call can need: one bitmap block, one indirect block,
    /// and content blocks, with half the remaining budget held back for
    /// any inode blocks `iupdate` touches. Returns the full byte count
    /// on success; a chunk that writes short (full story in
    /// `InodeGuard::writei`'s own short-write case) is reported as
    /// `FsError::ShortWrite` rather than a silently truncated `Ok(n)`,
    /// even though the bytes that did land before the short chunk stay
    /// committed and the cursor advances past them.
    pub fn write(&self, src: &[u8]) -> FsResult<usize> {
        match &self.0.kind {
            Kind::Inode { ip, writable, off, .. } => {
                if !writable {
                    return Err(FsError::ReadOnly);
                }
                let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * crate::param::BSIZE;
                let mut n = 0;
                while n < src.len() {
                    let chunk = (src.len() - n).min(max.max(1));
                    let mut cursor = off.lock();
                    self.0.log.begin_op();
                    let mut guard = ip.lock();
                    let wrote = guard.writei(&src[n..n + chunk], *cursor);
                    drop(guard);
                    self.0.log.end_op();
                    let wrote = wrote?;
                    *cursor += wrote as u64;
                    n += wrote;
                    if wrote < chunk {
                        return Err(FsError::ShortWrite {
                            wrote: n,
                            requested: src.len(),
                        });
                    }
                }
                Ok(n)
            }
            Kind::Device { .. } => Err(FsError::Unsupported),
        }
    }

    pub fn stat(&self) -> FsResult<Stat> {
        match &self.0.kind {
            Kind::Inode { ip, .. } => Ok(ip.lock().stat()),
            Kind::Device { ip, .. } => Ok(ip.lock().stat()),
        }
    }

    pub fn seek(&self, pos: u64) -> FsResult<u64> {
        match &self.0.kind {
            Kind::Inode { ip, off, .. } => {
                let size = ip.lock().size();
                if pos > size {
                    return Err(FsError::BadSeek);
                }
                *off.lock() = pos;
                Ok(pos)
            }
            Kind::Device { .. } => Err(FsError::Unsupported),
        }
    }

    pub fn device_major(&self) -> Option<u16> {
        match &self.0.kind {
            Kind::Device { major, .. } => Some(*major),
            Kind::Inode { .. } => None,
        }
    }

    pub fn inode(&self) -> Option<&Inode> {
        match &self.0.kind {
            Kind::Inode { ip, .. } => Some(ip),
            Kind::Device { ip, .. } => Some(ip),
        }
    }
}
