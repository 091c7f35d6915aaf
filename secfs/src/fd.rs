//! The file descriptor table and the directory-mutating operations that
//! sit above path resolution: `create`, `link`, `unlink`.
//!
//! `create` backs both `open(..., O_CREATE)` and `mkdir`: the only
//! difference is the inode type and whether an existing entry of a
//! compatible type is accepted instead of an error.

use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::fs::inode::InodeTable;
use crate::fs::{path, Inode};
use crate::lock::SpinLock;
use crate::param::NOFILE;
use crate::stat::{T_DEVICE, T_DIR, T_FILE};

/// Resolves `path`'s parent, creating `path`'s final component as a
/// fresh inode of type `typ` (unless `typ == T_FILE` and an entry of a
/// compatible type already exists there, in which case it is reused --
/// this is what lets `open(..., O_CREATE)` succeed on a file that's
/// already there).
///
/// Must be called inside a `begin_op`/`end_op` bracket: it allocates an
/// inode and writes at least one directory entry.
pub fn create(itable: &InodeTable, cwd: &Inode, path: &[u8], typ: u16, major: u16, minor: u16) -> FsResult<Inode> {
    let (parent, name) = path::nameiparent(itable, cwd.dev(), cwd, path)?;
    let name = name.as_slice();
    let mut dp = parent.lock();

    if let Some((inum, _off)) = dp.dirlookup(name) {
        dp.unlock();
        let ip = itable.get(cwd.dev(), inum);
        let locked = ip.lock();
        let existing = locked.typ();
        locked.unlock();
        return if typ == T_FILE && (existing == T_FILE || existing == T_DEVICE) {
            Ok(ip)
        } else {
            Err(FsError::AlreadyExists)
        };
    }

    let ip = itable.ialloc(cwd.dev(), typ);
    // Guards the freshly allocated inode: if anything below fails, free
    // it back to a zero-nlink, zero-size slot rather than leaving a
    // half-initialized inode with no directory entry pointing at it.
    let rollback = scopeguard::guard(ip.dup(), |ip| {
        let mut locked = ip.lock();
        locked.set_nlink(0);
        locked.itrunc();
    });

    {
        let mut locked = ip.lock();
        if typ == T_DEVICE {
            locked.set_device_numbers(major, minor);
        }
        if typ == T_DIR {
            locked.dirlink(b".", ip.inum())?;
            locked.dirlink(b"..", dp.inum())?;
        }
    }

    dp.dirlink(name, ip.inum())?;

    if typ == T_DIR {
        dp.set_nlink(dp.nlink() + 1);
    }

    scopeguard::ScopeGuard::into_inner(rollback);
    Ok(ip)
}

/// Adds `newpath` as another name for the inode at `oldpath`. Both must
/// resolve on the same device; directories may not be hard-linked.
pub fn link(itable: &InodeTable, cwd: &Inode, oldpath: &[u8], newpath: &[u8]) -> FsResult<()> {
    let ip = path::namei(itable, cwd.dev(), cwd, oldpath)?;
    {
        let locked = ip.lock();
        let is_dir = locked.typ() == T_DIR;
        locked.unlock();
        if is_dir {
            return Err(FsError::LinkIsDirectory);
        }
    }

    let (parent, name) = path::nameiparent(itable, cwd.dev(), cwd, newpath)?;
    if parent.dev() != ip.dev() {
        return Err(FsError::CrossDevice);
    }

    {
        let mut locked = ip.lock();
        let nlink = locked.nlink() + 1;
        locked.set_nlink(nlink);
    }
    // If the directory entry never gets written, undo the bump above
    // rather than leaving an inode with nlink counting a link that
    // doesn't exist.
    let rollback = scopeguard::guard(ip.dup(), |ip| {
        let mut locked = ip.lock();
        let nlink = locked.nlink() - 1;
        locked.set_nlink(nlink);
    });

    let mut dp = parent.lock();
    dp.dirlink(name.as_slice(), ip.inum())?;

    scopeguard::ScopeGuard::into_inner(rollback);
    Ok(())
}

/// Removes `path`'s directory entry. Frees the underlying inode once
/// its link count reaches zero and its last in-memory reference is
/// dropped (handled by `Inode`'s own `Drop`, not here).
pub fn unlink(itable: &InodeTable, cwd: &Inode, path: &[u8]) -> FsResult<()> {
    let (parent, name) = path::nameiparent(itable, cwd.dev(), cwd, path)?;
    let name = name.as_slice();
    if name == b"." || name == b".." {
        return Err(FsError::Unsupported);
    }

    let mut dp = parent.lock();
    let Some((inum, off)) = dp.dirlookup(name) else {
        dp.unlock();
        return Err(FsError::NotFound);
    };

    let ip = itable.get(parent.dev(), inum);
    let mut locked = ip.lock();

    if locked.typ() == T_DIR && !locked.dir_is_empty() {
        locked.unlock();
        dp.unlock();
        return Err(FsError::DirectoryNotEmpty);
    }

    dp.dirunlink(off)?;
    if locked.typ() == T_DIR {
        let parent_nlink = dp.nlink() - 1;
        dp.set_nlink(parent_nlink);
    }
    let nlink = locked.nlink() - 1;
    locked.set_nlink(nlink);
    Ok(())
}

/// A process's open file descriptors: `NOFILE` slots, indexed densely
/// from zero.
pub struct FdTable {
    slots: SpinLock<Vec<Option<File>>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: SpinLock::new("fdtable", (0..NOFILE).map(|_| None).collect()),
        }
    }

    /// Installs `file` in the lowest-numbered free slot.
    pub fn alloc(&self, file: File) -> FsResult<i32> {
        let mut slots = self.slots.lock();
        match slots.iter().position(Option::is_none) {
            Some(idx) => {
                slots[idx] = Some(file);
                Ok(idx as i32)
            }
            None => Err(FsError::TooManyOpenFiles),
        }
    }

    fn index(fd: i32) -> FsResult<usize> {
        usize::try_from(fd).map_err(|_| FsError::BadFileDescriptor)
    }

    /// Returns a handle sharing the descriptor's underlying `File`
    /// (cursor included). Callers operate on the returned clone; the
    /// table keeps its own.
    pub fn get(&self, fd: i32) -> FsResult<File> {
        let idx = Self::index(fd)?;
        self.slots
            .lock()
            .get(idx)
            .and_then(|s| s.as_ref().map(File::dup))
            .ok_or(FsError::BadFileDescriptor)
    }

    pub fn close(&self, fd: i32) -> FsResult<()> {
        let idx = Self::index(fd)?;
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(idx).ok_or(FsError::BadFileDescriptor)?;
        if slot.is_none() {
            return Err(FsError::BadFileDescriptor);
        }
        *slot = None;
        Ok(())
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
