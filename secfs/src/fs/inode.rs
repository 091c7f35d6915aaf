//! The in-memory inode table and per-inode operations.
//!
//! Mirrors the split the source material draws between `icache` (the
//! fixed-size table of in-memory inodes, reference-counted and looked
//! up by `(dev, inum)`) and the locked, on-disk-backed contents of a
//! single inode once `ilock`ed.

use std::sync::Arc;

use ::log::trace;

use crate::bio::Bcache;
use crate::error::{FsError, FsResult};
use crate::lock::{SleepLock, SleepLockGuard, SpinLock};
use crate::log::Log;
use crate::param::{BSIZE, NADDRS, NDIRECT, NINDIRECT, NINODE};
use crate::stat::{Stat, T_DIR, T_FREE};

use super::dinode::Dinode;
use super::dirent::Dirent;
use super::superblock::{Superblock, BPB, IPB};

fn dinode_offset(inum: u32) -> usize {
    (inum as usize % IPB) * std::mem::size_of::<Dinode>()
}

/// In-memory mirror of one inode's on-disk fields, valid once faulted
/// in by [`Inode::lock`].
struct InodeData {
    valid: bool,
    typ: u16,
    major: u16,
    minor: u16,
    nlink: i16,
    size: u32,
    addrs: [u32; NADDRS],
}

impl InodeData {
    fn empty() -> Self {
        Self {
            valid: false,
            typ: T_FREE,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NADDRS],
        }
    }
}

struct Slot {
    dev: u32,
    inum: u32,
    refcnt: u32,
    data: Arc<SleepLock<InodeData>>,
}

struct Inner {
    bcache: Arc<Bcache>,
    log: Arc<Log>,
    sb: Superblock,
    slots: SpinLock<[Slot; NINODE]>,
}

/// The fixed-size table of in-memory inodes, shared by every `Inode`
/// handle this filesystem hands out (`NINODE` slots).
#[derive(Clone)]
pub struct InodeTable(Arc<Inner>);

impl InodeTable {
    pub fn new(bcache: Arc<Bcache>, log: Arc<Log>, sb: Superblock) -> Self {
        let slots = array_macro::array![_i => Slot {
            dev: 0,
            inum: 0,
            refcnt: 0,
            data: Arc::new(SleepLock::new("inode", InodeData::empty())),
        }; NINODE];
        Self(Arc::new(Inner {
            bcache,
            log,
            sb,
            slots: SpinLock::new("itable", slots),
        }))
    }

    /// Finds or allocates an in-memory slot for `(dev, inum)` and
    /// returns a handle to it, unlocked. Does not touch the disk.
    pub fn get(&self, dev: u32, inum: u32) -> Inode {
        let mut slots = self.0.slots.lock();
        if let Some(idx) = slots
            .iter()
            .position(|s| s.refcnt > 0 && s.dev == dev && s.inum == inum)
        {
            slots[idx].refcnt += 1;
            return Inode {
                table: self.0.clone(),
                dev,
                inum,
                data: slots[idx].data.clone(),
            };
        }
        let idx = slots
            .iter()
            .position(|s| s.refcnt == 0)
            .expect("inode table: out of in-memory inodes (increase NINODE)");
        slots[idx] = Slot {
            dev,
            inum,
            refcnt: 1,
            data: Arc::new(SleepLock::new("inode", InodeData::empty())),
        };
        Inode {
            table: self.0.clone(),
            dev,
            inum,
            data: slots[idx].data.clone(),
        }
    }

    /// Allocates a free inode of type `typ` on disk and returns an
    /// (unlocked) in-memory handle to it.
    pub fn ialloc(&self, dev: u32, typ: u16) -> Inode {
        for inum in 1..self.0.sb.ninodes {
            let blk = self.0.sb.iblock(inum);
            let mut buf = self.0.bcache.read(dev, blk);
            let off = dinode_offset(inum);
            let dinode = Dinode::decode(&buf.data().bytes()[off..off + std::mem::size_of::<Dinode>()]);
            if dinode.is_free() {
                let fresh = Dinode {
                    typ,
                    major: 0,
                    minor: 0,
                    nlink: 1,
                    size: 0,
                    addrs: [0; NADDRS],
                };
                fresh.encode(&mut buf.data_mut().bytes_mut()[off..off + std::mem::size_of::<Dinode>()]);
                self.0.log.log_write(&buf);
                trace!("inode: allocated inum {inum} (type {typ})");
                return self.get(dev, inum);
            }
        }
        panic!("inode table: no free inodes on disk (reformat with more inodes)");
    }

    /// Allocates a free data block, zeroes it, and returns its number.
    ///
    /// Scans the bitmap against the image's total block count, not just
    /// its data-block count: the bitmap is indexed by absolute block
    /// number, and every block below `datastart` (boot, super, log,
    /// inode, bitmap) is pre-marked allocated by the formatter, so
    /// scanning only `ndata` bits would silently exclude the bitmap's
    /// true range and miss free blocks near the top of the image.
    fn balloc(&self, dev: u32) -> u32 {
        let size = self.0.sb.size;
        let mut b = 0;
        while b < size {
            let bblk = self.0.sb.bblock(b);
            let mut buf = self.0.bcache.read(dev, bblk);
            let remaining = (size - b).min(BPB);
            for bi in 0..remaining {
                let byte = (bi / 8) as usize;
                let mask = 1u8 << (bi % 8);
                if buf.data().bytes()[byte] & mask == 0 {
                    buf.data_mut().bytes_mut()[byte] |= mask;
                    self.0.log.log_write(&buf);
                    let blockno = b + bi;
                    let zbuf = self.0.bcache.get_zeroed(dev, blockno);
                    self.0.log.log_write(&zbuf);
                    return blockno;
                }
            }
            b += BPB;
        }
        panic!("inode table: disk out of space (no free data blocks)");
    }

    fn bfree(&self, dev: u32, b: u32) {
        let bblk = self.0.sb.bblock(b);
        let mut buf = self.0.bcache.read(dev, bblk);
        let bi = b % BPB;
        let byte = (bi / 8) as usize;
        let mask = 1u8 << (bi % 8);
        assert!(
            buf.data().bytes()[byte] & mask != 0,
            "bfree: block {b} was already free"
        );
        buf.data_mut().bytes_mut()[byte] &= !mask;
        self.0.log.log_write(&buf);
    }
}

/// A reference-counted handle to an in-memory inode. Lock it with
/// [`Inode::lock`] to read or modify its contents.
pub struct Inode {
    table: Arc<Inner>,
    dev: u32,
    inum: u32,
    data: Arc<SleepLock<InodeData>>,
}

impl Inode {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// A new handle to the same inode, with its own refcount (`idup`).
    pub fn dup(&self) -> Inode {
        let mut slots = self.table.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.dev == self.dev && s.inum == self.inum)
            .expect("inode: dup of an untracked inode");
        slots[idx].refcnt += 1;
        Inode {
            table: self.table.clone(),
            dev: self.dev,
            inum: self.inum,
            data: self.data.clone(),
        }
    }

    /// Locks the inode, faulting its fields in from disk on first use.
    pub fn lock(&self) -> InodeGuard<'_> {
        let mut data = self.data.lock();
        if !data.valid {
            let blk = self.table.sb.iblock(self.inum);
            let buf = self.table.bcache.read(self.dev, blk);
            let off = dinode_offset(self.inum);
            let dinode = Dinode::decode(&buf.data().bytes()[off..off + std::mem::size_of::<Dinode>()]);
            assert!(!dinode.is_free(), "inode: inum {} has no on-disk contents", self.inum);
            data.typ = dinode.typ;
            data.major = dinode.major;
            data.minor = dinode.minor;
            data.nlink = dinode.nlink;
            data.size = dinode.size;
            data.addrs = dinode.addrs;
            data.valid = true;
        }
        InodeGuard { inode: self, data }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        let mut slots = self.table.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.dev == self.dev && s.inum == self.inum)
            .expect("inode: drop of an untracked inode");

        if slots[idx].refcnt == 1 {
            // We are about to drop the only reference: no other handle
            // can be holding (or waiting for) this inode's sleep lock,
            // so it is safe to take it here without risking contention.
            let data_arc = slots[idx].data.clone();
            drop(slots);
            let mut data = data_arc.lock();
            if data.valid && data.nlink == 0 {
                trace!("inode: freeing inum {} (nlink reached zero)", self.inum);
                self.table.log.begin_op();
                free_on_disk(&self.table, self.dev, self.inum, &mut data);
                self.table.log.end_op();
                data.valid = false;
            }
            drop(data);
            slots = self.table.slots.lock();
        }

        slots[idx].refcnt -= 1;
    }
}

fn free_on_disk(table: &Arc<Inner>, dev: u32, inum: u32, data: &mut InodeData) {
    free_data_blocks(table, dev, data);
    data.typ = T_FREE;
    data.size = 0;
    write_dinode(table, dev, inum, data);
}

fn free_data_blocks(table: &Arc<Inner>, dev: u32, data: &mut InodeData) {
    for addr in data.addrs.iter_mut().take(NDIRECT) {
        if *addr != 0 {
            table.bfree(dev, *addr);
            *addr = 0;
        }
    }
    if data.addrs[NDIRECT] != 0 {
        let ibuf = table.bcache.read(dev, data.addrs[NDIRECT]);
        for bi in 0..NINDIRECT {
            let off = bi * 4;
            let addr = u32::from_le_bytes(ibuf.data().bytes()[off..off + 4].try_into().unwrap());
            if addr != 0 {
                table.bfree(dev, addr);
            }
        }
        drop(ibuf);
        table.bfree(dev, data.addrs[NDIRECT]);
        data.addrs[NDIRECT] = 0;
    }
}

fn write_dinode(table: &Arc<Inner>, dev: u32, inum: u32, data: &InodeData) {
    let blk = table.sb.iblock(inum);
    let mut buf = table.bcache.read(dev, blk);
    let off = dinode_offset(inum);
    let dinode = Dinode {
        typ: data.typ,
        major: data.major,
        minor: data.minor,
        nlink: data.nlink,
        size: data.size,
        addrs: data.addrs,
    };
    dinode.encode(&mut buf.data_mut().bytes_mut()[off..off + std::mem::size_of::<Dinode>()]);
    table.log.log_write(&buf);
}

/// A locked view of one inode, with access to its contents.
pub struct InodeGuard<'a> {
    inode: &'a Inode,
    data: SleepLockGuard<'a, InodeData>,
}

impl InodeGuard<'_> {
    pub fn dev(&self) -> u32 {
        self.inode.dev
    }

    pub fn inum(&self) -> u32 {
        self.inode.inum
    }

    pub fn typ(&self) -> u16 {
        self.data.typ
    }

    pub fn nlink(&self) -> i16 {
        self.data.nlink
    }

    pub fn size(&self) -> u64 {
        self.data.size as u64
    }

    pub fn set_nlink(&mut self, nlink: i16) {
        self.data.nlink = nlink;
        self.iupdate();
    }

    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.inode.dev,
            ino: self.inode.inum,
            typ: self.data.typ,
            nlink: self.data.nlink,
            size: self.data.size as u64,
        }
    }

    /// Writes the in-memory fields back to their on-disk dinode. Called
    /// automatically by `writei`/`itrunc`/`set_nlink`; exposed for
    /// callers (like `ialloc`'s caller setting major/minor on a device
    /// inode) that mutate fields directly.
    pub fn iupdate(&self) {
        write_dinode(&self.inode.table, self.inode.dev, self.inode.inum, &self.data);
    }

    pub fn set_device_numbers(&mut self, major: u16, minor: u16) {
        self.data.major = major;
        self.data.minor = minor;
        self.iupdate();
    }

    pub fn device_numbers(&self) -> (u16, u16) {
        (self.data.major, self.data.minor)
    }

    /// Maps a logical block index to its on-disk block number,
    /// allocating direct or (single) indirect blocks on demand.
    fn bmap(&mut self, bn: usize) -> u32 {
        let table = &self.inode.table;
        if bn < NDIRECT {
            if self.data.addrs[bn] == 0 {
                self.data.addrs[bn] = table.balloc(self.inode.dev);
            }
            return self.data.addrs[bn];
        }

        let bn = bn - NDIRECT;
        assert!(bn < NINDIRECT, "bmap: block index beyond MAXFILE");

        if self.data.addrs[NDIRECT] == 0 {
            self.data.addrs[NDIRECT] = table.balloc(self.inode.dev);
        }
        let indirect = self.data.addrs[NDIRECT];
        let mut ibuf = table.bcache.read(self.inode.dev, indirect);
        let off = bn * 4;
        let mut addr = u32::from_le_bytes(ibuf.data().bytes()[off..off + 4].try_into().unwrap());
        if addr == 0 {
            addr = table.balloc(self.inode.dev);
            ibuf.data_mut().bytes_mut()[off..off + 4].copy_from_slice(&addr.to_le_bytes());
            table.log.log_write(&ibuf);
        }
        addr
    }

    /// Reads up to `dst.len()` bytes starting at `off`. Reading at or
    /// past the current size yields zero bytes; it is not an error.
    pub fn readi(&mut self, dst: &mut [u8], off: u64) -> FsResult<usize> {
        let size = self.data.size as u64;
        if off >= size || dst.is_empty() {
            return Ok(0);
        }
        let end = (off + dst.len() as u64).min(size);
        let mut cur = off;
        let mut n = 0usize;
        while cur < end {
            let bn = (cur / BSIZE as u64) as usize;
            let boff = (cur % BSIZE as u64) as usize;
            let blockno = self.bmap(bn);
            let buf = self.inode.table.bcache.read(self.inode.dev, blockno);
            let chunk = ((end - cur) as usize).min(BSIZE - boff);
            dst[n..n + chunk].copy_from_slice(&buf.data().bytes()[boff..boff + chunk]);
            n += chunk;
            cur += chunk as u64;
        }
        Ok(n)
    }

    /// Writes `src` starting at `off`, allocating blocks as needed.
    /// Rejects `off` past the current end of the file -- a write must
    /// start inside the file or exactly at its end, never beyond it.
    /// Grows the inode's recorded size if the write extends past it;
    /// per the resolved EOF-growth question this is judged against the
    /// *post-write* end offset, not the offset the write started at, so
    /// a write beginning inside the file but extending past its old end
    /// is not silently dropped from the recorded size.
    pub fn writei(&mut self, src: &[u8], off: u64) -> FsResult<usize> {
        if off > self.data.size as u64 {
            return Err(FsError::BadSeek);
        }
        let maxfile = (NDIRECT + NINDIRECT) as u64;
        if off > maxfile * BSIZE as u64 {
            return Err(FsError::BadSeek);
        }

        let mut cur = off;
        let mut n = 0usize;
        while n < src.len() {
            let bn = (cur / BSIZE as u64) as usize;
            if bn >= NDIRECT + NINDIRECT {
                break;
            }
            let boff = (cur % BSIZE as u64) as usize;
            let blockno = self.bmap(bn);
            let mut buf = self.inode.table.bcache.read(self.inode.dev, blockno);
            let chunk = (src.len() - n).min(BSIZE - boff);
            buf.data_mut().bytes_mut()[boff..boff + chunk].copy_from_slice(&src[n..n + chunk]);
            self.inode.table.log.log_write(&buf);
            n += chunk;
            cur += chunk as u64;
        }

        if cur > self.data.size as u64 {
            self.data.size = cur as u32;
        }
        self.iupdate();

        if n < src.len() {
            return Err(FsError::ShortWrite {
                wrote: n,
                requested: src.len(),
            });
        }
        Ok(n)
    }

    /// Frees every data block and resets size to zero. Used by
    /// `unlink`/truncating opens and by the last `iput` of an unlinked
    /// inode.
    pub fn itrunc(&mut self) {
        free_data_blocks(&self.inode.table, self.inode.dev, &mut self.data);
        self.data.size = 0;
        self.iupdate();
    }

    /// Looks up `name` in this directory's contents. Returns the entry's
    /// inode number and its byte offset within the directory (so a
    /// caller replacing the entry can target it directly).
    pub fn dirlookup(&mut self, name: &[u8]) -> Option<(u32, u64)> {
        debug_assert_eq!(self.typ(), T_DIR);
        let mut raw = [0u8; Dirent::SIZE];
        let mut off = 0u64;
        while off < self.size() {
            let n = self
                .readi(&mut raw, off)
                .expect("dirlookup: readi of a directory failed");
            assert_eq!(n, Dirent::SIZE, "directory entry truncated");
            let de = Dirent::decode(&raw);
            if !de.is_free() && de.name_matches(name) {
                return Some((de.inum as u32, off));
            }
            off += Dirent::SIZE as u64;
        }
        None
    }

    /// Adds a `name -> inum` entry, reusing the first free slot if one
    /// exists or appending otherwise. Fails if `name` is already
    /// present.
    pub fn dirlink(&mut self, name: &[u8], inum: u32) -> FsResult<()> {
        debug_assert_eq!(self.typ(), T_DIR);
        if self.dirlookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut raw = [0u8; Dirent::SIZE];
        let mut off = 0u64;
        let mut target = None;
        while off < self.size() {
            let n = self.readi(&mut raw, off)?;
            assert_eq!(n, Dirent::SIZE, "directory entry truncated");
            if Dirent::decode(&raw).is_free() {
                target = Some(off);
                break;
            }
            off += Dirent::SIZE as u64;
        }
        let target = target.unwrap_or_else(|| self.size());

        let mut de = Dirent::empty();
        de.inum = inum as u16;
        de.set_name(name);
        let mut raw = [0u8; Dirent::SIZE];
        de.encode(&mut raw);
        let wrote = self.writei(&raw, target)?;
        if wrote != Dirent::SIZE {
            return Err(FsError::ShortWrite {
                wrote,
                requested: Dirent::SIZE,
            });
        }
        Ok(())
    }

    /// Removes the entry at byte offset `off` (as returned by
    /// `dirlookup`), leaving a free slot behind rather than compacting
    /// the directory.
    pub fn dirunlink(&mut self, off: u64) -> FsResult<()> {
        let empty = Dirent::empty();
        let mut raw = [0u8; Dirent::SIZE];
        empty.encode(&mut raw);
        let wrote = self.writei(&raw, off)?;
        if wrote != Dirent::SIZE {
            return Err(FsError::ShortWrite {
                wrote,
                requested: Dirent::SIZE,
            });
        }
        Ok(())
    }

    /// `true` once every directory entry but `.` and `..` is free.
    pub fn dir_is_empty(&mut self) -> bool {
        let mut raw = [0u8; Dirent::SIZE];
        let mut off = (2 * Dirent::SIZE) as u64; // skip "." and ".."
        while off < self.size() {
            let n = self.readi(&mut raw, off).expect("dir_is_empty: readi failed");
            assert_eq!(n, Dirent::SIZE);
            if !Dirent::decode(&raw).is_free() {
                return false;
            }
            off += Dirent::SIZE as u64;
        }
        true
    }

    pub fn unlock(self) {
        drop(self);
    }
}
