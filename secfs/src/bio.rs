//! Buffer cache.
//!
//! A cache of `NBUF` block buffers keyed by `(dev, blockno)`, reused in
//! least-recently-used order once unreferenced. Caching
//! disk blocks in memory reduces the number of disk reads and gives
//! every concurrent filesystem operation a single synchronization point
//! per block.
//!
//! Identity and refcount bookkeeping live behind a cache-wide
//! [`SpinLock`]; the bytes of a given slot live behind that slot's own
//! [`SleepLock`], so a disk fault on one block never blocks lookups of
//! another. Represented as an array plus LRU-ordered indices rather
//! than an intrusive pointer list.

use std::sync::Arc;

use ::log::trace;

use crate::device::BlockDevice;
use crate::lock::{SleepLock, SleepLockGuard, SpinLock};
use crate::param::{BSIZE, NBUF};

/// The cached bytes of one block, plus whether they have been faulted
/// in from disk yet.
pub struct BufData {
    valid: bool,
    bytes: [u8; BSIZE],
}

impl BufData {
    fn empty() -> Self {
        Self {
            valid: false,
            bytes: [0; BSIZE],
        }
    }

    pub fn bytes(&self) -> &[u8; BSIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.bytes
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the block valid (its bytes reflect either disk or an
    /// intentional zero-fill) or invalid (must be faulted in before
    /// use). Used by the log when it writes a block's home location or
    /// log slot directly, bypassing [`Bcache::read`].
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

#[derive(Clone, Copy)]
struct Header {
    dev: u32,
    blockno: u32,
    refcnt: u32,
}

impl Header {
    const fn empty() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            refcnt: 0,
        }
    }
}

struct CacheTable {
    headers: [Header; NBUF],
    /// Slot indices ordered from least- to most-recently released.
    order: Vec<usize>,
}

/// The buffer cache. One instance per `Filesystem`.
pub struct Bcache {
    table: SpinLock<CacheTable>,
    slots: [SleepLock<BufData>; NBUF],
    device: Arc<dyn BlockDevice>,
}

impl Bcache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            table: SpinLock::new(
                "bcache",
                CacheTable {
                    headers: [Header::empty(); NBUF],
                    order: (0..NBUF).collect(),
                },
            ),
            slots: array_macro::array![_i => SleepLock::new("buffer", BufData::empty()); NBUF],
            device,
        }
    }

    /// Returns a locked buffer for `(dev, blockno)`. Its `valid` bit
    /// reflects whatever the cache already knows; a fresh eviction
    /// starts out invalid and must be faulted in by the caller (or via
    /// [`Bcache::read`]).
    pub fn get(&self, dev: u32, blockno: u32) -> BufGuard<'_> {
        let (idx, fresh) = {
            let mut table = self.table.lock();

            // A block stays identifiable in the cache even once its
            // refcount drops to zero (released, but not yet reused for
            // a different block) -- that persistence is the entire
            // point of caching. Only the eviction scan below cares
            // about refcnt.
            if let Some(&idx) = table
                .order
                .iter()
                .rev()
                .find(|&&i| table.headers[i].dev == dev && table.headers[i].blockno == blockno)
            {
                table.headers[idx].refcnt += 1;
                (idx, false)
            } else if let Some(pos) = table.order.iter().position(|&i| table.headers[i].refcnt == 0) {
                let idx = table.order[pos];
                table.headers[idx] = Header { dev, blockno, refcnt: 1 };
                (idx, true)
            } else {
                panic!("bcache: no free buffers (increase NBUF or release buffers promptly)");
            }
        };

        let mut guard = self.slots[idx].lock();
        if fresh {
            trace!("bcache: evict slot {idx} for ({dev}, {blockno})");
            guard.valid = false;
        } else {
            trace!("bcache: hit slot {idx} for ({dev}, {blockno})");
        }

        BufGuard {
            cache: self,
            idx,
            dev,
            blockno,
            data: Some(guard),
        }
    }

    /// Like [`Bcache::get`], but faults the block in from disk if it
    /// was not already cached.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_> {
        let mut buf = self.get(dev, blockno);
        if !buf.data().valid {
            self.device.read_block(blockno, &mut buf.data_mut().bytes);
            buf.data_mut().valid = true;
        }
        buf
    }

    /// Returns a locked buffer for `(dev, blockno)` with its contents
    /// zeroed, without touching the device. Used when allocating a
    /// fresh data block.
    pub fn get_zeroed(&self, dev: u32, blockno: u32) -> BufGuard<'_> {
        let mut buf = self.get(dev, blockno);
        buf.data_mut().bytes = [0; BSIZE];
        buf.data_mut().valid = true;
        buf
    }

    /// Writes a locked buffer's contents to disk. Outside the log this
    /// is used only by the log itself (header and home-location
    /// installation); every other mutation must flow through
    /// `Log::log_write`.
    pub fn write(&self, buf: &BufGuard<'_>) {
        self.device.write_block(buf.blockno, &buf.data().bytes);
    }

    /// Increments a buffer's refcount without requiring the caller to
    /// hold its sleep lock afterward. Used by the log to keep a block
    /// resident in the cache across the release/commit gap.
    pub fn pin(&self, buf: &BufGuard<'_>) {
        let mut table = self.table.lock();
        table.headers[buf.idx].refcnt += 1;
    }

    /// The inverse of [`Bcache::pin`], looked up by identity since the
    /// caller (the log, mid-commit) no longer holds a locked guard.
    pub fn unpin(&self, dev: u32, blockno: u32) {
        let mut table = self.table.lock();
        let idx = table
            .headers
            .iter()
            .position(|h| h.dev == dev && h.blockno == blockno && h.refcnt > 0)
            .expect("bcache: unpin of a block that isn't pinned");
        table.headers[idx].refcnt -= 1;
        if table.headers[idx].refcnt == 0 {
            table.order.retain(|&i| i != idx);
            table.order.push(idx);
        }
    }
}

/// A locked view of one buffer-cache slot.
///
/// Dropping (or calling [`BufGuard::release`]) releases the sleep lock
/// and decrements the refcount; if the refcount reaches zero the slot
/// moves to the most-recently-used end of the eviction order
/// (invariant checked by `bio` unit tests).
pub struct BufGuard<'a> {
    cache: &'a Bcache,
    idx: usize,
    dev: u32,
    blockno: u32,
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> BufGuard<'a> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &BufData {
        self.data.as_ref().expect("buffer guard used after release")
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        self.data.as_mut().expect("buffer guard used after release")
    }

    /// Releases the buffer. Equivalent to dropping it; spelled out so
    /// call sites read like `release(buffer)`.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        // Release the sleep lock before touching cache-wide metadata,
        // so the spin lock is never held while a sleep lock is.
        self.data.take();

        let mut table = self.cache.table.lock();
        let header = &mut table.headers[self.idx];
        debug_assert!(header.refcnt > 0);
        header.refcnt -= 1;
        if header.refcnt == 0 {
            table.order.retain(|&i| i != self.idx);
            table.order.push(self.idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlockDevice;
    use std::sync::Mutex;

    struct MemDevice {
        blocks: Mutex<Vec<[u8; BSIZE]>>,
    }

    impl MemDevice {
        fn new(n: usize) -> Self {
            Self {
                blocks: Mutex::new(vec![[0; BSIZE]; n]),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn read_block(&self, blkno: u32, buf: &mut [u8; BSIZE]) {
            buf.copy_from_slice(&self.blocks.lock().unwrap()[blkno as usize]);
        }

        fn write_block(&self, blkno: u32, buf: &[u8; BSIZE]) {
            self.blocks.lock().unwrap()[blkno as usize] = *buf;
        }
    }

    #[test]
    fn read_then_write_round_trips() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(8));
        let cache = Bcache::new(dev);

        {
            let mut buf = cache.read(1, 3);
            buf.data_mut().bytes_mut()[0] = 0xAB;
            cache.write(&buf);
        }

        let buf = cache.read(1, 3);
        assert_eq!(buf.data().bytes()[0], 0xAB);
    }

    #[test]
    fn release_to_zero_moves_to_mru_end() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(8));
        let cache = Bcache::new(dev);

        let a = cache.read(1, 0);
        let idx_a = a.idx;
        drop(a);

        let table = cache.table.lock();
        assert_eq!(*table.order.last().unwrap(), idx_a);
    }

    #[test]
    fn same_identity_never_double_resident() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(8));
        let cache = Bcache::new(dev);

        let a = cache.read(1, 5);
        let idx_a = a.idx;
        drop(a);
        let b = cache.read(1, 5);
        assert_eq!(b.idx, idx_a, "re-reading the same block should hit the same slot");
    }

    #[test]
    #[should_panic(expected = "no free buffers")]
    fn exhausting_the_cache_panics() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(NBUF + 2));
        let cache = Bcache::new(dev);
        let mut held = Vec::new();
        for i in 0..NBUF as u32 {
            held.push(cache.read(1, i));
        }
        let _ = cache.read(1, NBUF as u32);
    }

    #[test]
    fn pin_keeps_slot_resident_across_release() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(NBUF + 2));
        let cache = Bcache::new(dev);

        let buf = cache.read(1, 0);
        cache.pin(&buf);
        let idx = buf.idx;
        drop(buf);

        // Fill every other slot; the pinned one must survive.
        let mut held = Vec::new();
        for i in 1..NBUF as u32 {
            held.push(cache.read(1, i));
        }
        let still_there = cache.read(1, 0);
        assert_eq!(still_there.idx, idx);
        drop(still_there);
        cache.unpin(1, 0);
    }
}
