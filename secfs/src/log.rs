//! Write-ahead log: atomic multi-block transactions and crash recovery.
//!
//! Every filesystem mutation that touches more than one block runs
//! between [`Log::begin_op`] and [`Log::end_op`]. Blocks written with
//! [`Log::log_write`] during that bracket are not installed at their
//! home location until the *last* concurrently active transaction ends,
//! at which point they commit as a unit: logged first, then installed,
//! so a crash at any point leaves the filesystem either fully before or
//! fully after the transaction, never in between.

use std::sync::Arc;

use ::log::{debug, trace};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::bio::Bcache;
use crate::param::{BSIZE, NLOG};

#[derive(Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; NLOG],
}

impl LogHeader {
    fn decode(bytes: &[u8; BSIZE]) -> Self {
        Self::read_from_prefix(bytes).expect("log header: buffer too small")
    }

    fn encode(&self, bytes: &mut [u8; BSIZE]) {
        bytes[..std::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }
}

struct LogState {
    /// Number of `begin_op`/`end_op` brackets currently in flight.
    outstanding: u32,
    /// Set while a commit is draining outstanding ops down to zero and
    /// writing to disk; new transactions must wait it out.
    committing: bool,
    /// Logical block numbers absorbed into the in-progress transaction,
    /// in commit order. Index into this list doubles as the index into
    /// the log's data region.
    blocks: Vec<u32>,
}

/// The write-ahead log. One instance per `Filesystem`.
pub struct Log {
    dev: u32,
    /// Block number of the log header; the log's data blocks follow it.
    start: u32,
    /// Total log region size in blocks, header included.
    size: u32,
    bcache: Arc<Bcache>,
    state: std::sync::Mutex<LogState>,
    cond: std::sync::Condvar,
}

impl Log {
    /// Opens the log region starting at `start` (`size` blocks, header
    /// included) and replays any committed-but-not-installed
    /// transaction left over from an unclean shutdown.
    pub fn new(dev: u32, start: u32, size: u32, bcache: Arc<Bcache>) -> Self {
        let log = Self {
            dev,
            start,
            size,
            bcache,
            state: std::sync::Mutex::new(LogState {
                outstanding: 0,
                committing: false,
                blocks: Vec::new(),
            }),
            cond: std::sync::Condvar::new(),
        };
        log.recover();
        log
    }

    fn read_head(&self) -> LogHeader {
        let buf = self.bcache.read(self.dev, self.start);
        LogHeader::decode(buf.data().bytes())
    }

    /// Writes the in-memory transaction's block list to the header
    /// block. This single block write is the commit point: once it
    /// lands, recovery will replay the transaction even if the crash
    /// happens one instruction later.
    fn write_head(&self, blocks: &[u32]) {
        let mut buf = self.bcache.get(self.dev, self.start);
        let mut header = LogHeader {
            n: blocks.len() as u32,
            block: [0; NLOG],
        };
        header.block[..blocks.len()].copy_from_slice(blocks);
        header.encode(buf.data_mut().bytes_mut());
        buf.data_mut().set_valid(true);
        self.bcache.write(&buf);
    }

    /// Replays a committed transaction from the log's data blocks to
    /// their home locations, then clears the header so it is not
    /// replayed again.
    fn install_trans(&self, blocks: &[u32], recovering: bool) {
        for (i, &home) in blocks.iter().enumerate() {
            let log_block = self.start + 1 + i as u32;
            let src = self.bcache.read(self.dev, log_block);
            let mut dst = self.bcache.get(self.dev, home);
            *dst.data_mut().bytes_mut() = *src.data().bytes();
            dst.data_mut().set_valid(true);
            self.bcache.write(&dst);
            if recovering {
                debug!("log: recovery installed block {home}");
            }
        }
    }

    /// Runs once at startup: replays any transaction a previous process
    /// committed but never finished installing, then clears the header
    /// (boot-time recovery).
    fn recover(&self) {
        let header = self.read_head();
        if header.n > 0 {
            let blocks = header.block[..header.n as usize].to_vec();
            debug!("log: recovering {} block(s) from a prior crash", blocks.len());
            self.install_trans(&blocks, true);
            self.write_head(&[]);
        } else {
            trace!("log: nothing to recover");
        }
    }

    /// Marks the start of a filesystem operation that may write
    /// multiple blocks. Blocks until there is guaranteed room left in
    /// the log for this operation to complete even if every other
    /// currently-outstanding operation also writes its maximum.
    pub fn begin_op(&self) {
        use crate::param::MAXOPBLOCKS;

        let mut state = self.state.lock().expect("log mutex poisoned");
        loop {
            let would_overflow =
                (state.blocks.len() as u32) + (state.outstanding + 1) * MAXOPBLOCKS as u32 > self.size - 1;
            if state.committing || would_overflow {
                state = self.cond.wait(state).expect("log mutex poisoned");
            } else {
                state.outstanding += 1;
                break;
            }
        }
    }

    /// Marks the end of a filesystem operation. The last operation to
    /// leave a transaction (`outstanding` reaches zero) performs the
    /// actual commit; everyone else's writes are absorbed into it.
    pub fn end_op(&self) {
        let do_commit = {
            let mut state = self.state.lock().expect("log mutex poisoned");
            assert!(!state.committing, "log: end_op during a commit");
            state.outstanding -= 1;
            if state.outstanding == 0 {
                state.committing = true;
                true
            } else {
                // Other operations may now have room to start.
                self.cond.notify_all();
                false
            }
        };

        if do_commit {
            self.commit();
            let mut state = self.state.lock().expect("log mutex poisoned");
            state.committing = false;
            self.cond.notify_all();
        }
    }

    fn commit(&self) {
        let blocks = {
            let state = self.state.lock().expect("log mutex poisoned");
            state.blocks.clone()
        };
        if blocks.is_empty() {
            return;
        }

        trace!("log: committing {} block(s)", blocks.len());
        self.write_log(&blocks);
        self.write_head(&blocks); // commit point
        self.install_trans(&blocks, false);
        self.write_head(&[]); // clears the log, must happen after install

        let mut state = self.state.lock().expect("log mutex poisoned");
        for &b in &blocks {
            self.bcache.unpin(self.dev, b);
        }
        state.blocks.clear();
    }

    /// Copies the current cache contents of each absorbed block into
    /// the log's data region.
    fn write_log(&self, blocks: &[u32]) {
        for (i, &home) in blocks.iter().enumerate() {
            let log_block = self.start + 1 + i as u32;
            let src = self.bcache.read(self.dev, home);
            let mut dst = self.bcache.get(self.dev, log_block);
            *dst.data_mut().bytes_mut() = *src.data().bytes();
            dst.data_mut().set_valid(true);
            self.bcache.write(&dst);
        }
    }

    /// Records that `buf` was modified under the current transaction.
    /// Absorbs repeated writes to the same block into a single log
    /// slot, and pins the block in the cache so it cannot be evicted
    /// before the transaction commits.
    pub fn log_write(&self, buf: &crate::bio::BufGuard<'_>) {
        let mut state = self.state.lock().expect("log mutex poisoned");
        assert!(
            state.outstanding > 0,
            "log_write outside a begin_op/end_op bracket"
        );
        let max = self.size - 1;
        if !state.blocks.contains(&buf.blockno()) {
            assert!((state.blocks.len() as u32) < max, "log: transaction too big");
            self.bcache.pin(buf);
            state.blocks.push(buf.blockno());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlockDevice;
    use std::sync::Mutex;

    const LOG_START: u32 = 1;
    // size - 1 must be >= MAXOPBLOCKS for begin_op to ever grant a
    // single outstanding transaction room to run.
    const LOG_SIZE: u32 = crate::param::MAXOPBLOCKS as u32 + 2;
    const HOME_BASE: u32 = LOG_START + LOG_SIZE + 1;

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

    fn new_device() -> Arc<dyn BlockDevice> {
        Arc::new(MemDevice::new((HOME_BASE + 4) as usize))
    }

    /// A fresh `Bcache` over `device`, simulating what a process restart
    /// after a crash would see: nothing cached, only what is actually on
    /// the (shared, persistent) device.
    fn reboot(device: &Arc<dyn BlockDevice>) -> Arc<Bcache> {
        Arc::new(Bcache::new(device.clone()))
    }

    #[test]
    fn commit_with_no_writes_is_a_noop() {
        let device = new_device();
        let bcache = reboot(&device);
        let log = Log::new(1, LOG_START, LOG_SIZE, bcache);
        log.begin_op();
        log.end_op();
        // No panic, no header written; a fresh Log over the same cache
        // should find nothing to recover.
        let header = log.read_head();
        assert_eq!(header.n, 0);
    }

    #[test]
    fn committed_write_is_visible_at_home_location() {
        let device = new_device();
        let bcache = reboot(&device);
        let log = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());

        log.begin_op();
        {
            let mut buf = bcache.read(1, HOME_BASE);
            buf.data_mut().bytes_mut()[0] = 0x42;
            log.log_write(&buf);
        }
        log.end_op();

        let home = bcache.read(1, HOME_BASE);
        assert_eq!(home.data().bytes()[0], 0x42);

        // The header must be clear after a completed commit.
        let header = log.read_head();
        assert_eq!(header.n, 0);
    }

    /// Simulates a crash between the commit point (`write_head` with a
    /// nonzero count) and the final install, by driving the same steps
    /// `commit()` would but stopping short of `install_trans`. A fresh
    /// `Log` constructed over the same cache must replay the write on
    /// `new()`.
    #[test]
    fn recovery_replays_a_committed_but_uninstalled_transaction() {
        let device = new_device();

        // "Boot 1": run the first four steps of commit() by hand,
        // stopping short of install_trans -- this is exactly the state a
        // crash between the commit point and the final install leaves
        // on disk.
        {
            let bcache = reboot(&device);
            let log = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());
            {
                let mut buf = bcache.get(1, HOME_BASE);
                buf.data_mut().bytes_mut()[0] = 0x99;
                buf.data_mut().set_valid(true);
            }
            log.write_log(&[HOME_BASE]);
            log.write_head(&[HOME_BASE]); // commit point; no install yet
        } // both bcache and log dropped here: nothing further flushed

        // The home location was never written to the actual device.
        {
            let bcache = reboot(&device);
            let home = bcache.read(1, HOME_BASE);
            assert_ne!(home.data().bytes()[0], 0x99);
        }

        // "Boot 2": a fresh Log over a fresh Bcache on the same device
        // must replay the logged write during its own construction.
        let bcache = reboot(&device);
        let recovered = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());
        let home = bcache.read(1, HOME_BASE);
        assert_eq!(home.data().bytes()[0], 0x99);
        let header = recovered.read_head();
        assert_eq!(header.n, 0, "recovery must clear the header after replay");
    }

    #[test]
    fn crash_before_commit_point_leaves_pre_transaction_state() {
        let device = new_device();

        {
            let bcache = reboot(&device);
            let log = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());
            {
                let mut buf = bcache.get(1, HOME_BASE);
                buf.data_mut().bytes_mut()[0] = 0x11;
                buf.data_mut().set_valid(true);
            }
            log.write_log(&[HOME_BASE]);
            // Crash before write_head: the header never recorded this
            // transaction, so recovery must not replay it.
        }

        let bcache = reboot(&device);
        let recovered = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());
        let header = recovered.read_head();
        assert_eq!(header.n, 0);
        let home = bcache.read(1, HOME_BASE);
        assert_ne!(home.data().bytes()[0], 0x11);
    }

    #[test]
    fn log_write_absorbs_repeated_writes_to_the_same_block() {
        let device = new_device();
        let bcache = reboot(&device);
        let log = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());

        log.begin_op();
        {
            let mut buf = bcache.read(1, HOME_BASE);
            buf.data_mut().bytes_mut()[0] = 1;
            log.log_write(&buf);
        }
        {
            let mut buf = bcache.read(1, HOME_BASE);
            buf.data_mut().bytes_mut()[0] = 2;
            log.log_write(&buf);
        }
        assert_eq!(log.state.lock().unwrap().blocks.len(), 1, "absorption must not grow the header");
        log.end_op();

        let home = bcache.read(1, HOME_BASE);
        assert_eq!(home.data().bytes()[0], 2);
    }

    #[test]
    #[should_panic(expected = "outside a begin_op/end_op bracket")]
    fn log_write_outside_a_transaction_is_fatal() {
        let device = new_device();
        let bcache = reboot(&device);
        let log = Log::new(1, LOG_START, LOG_SIZE, bcache.clone());
        let buf = bcache.read(1, HOME_BASE);
        log.log_write(&buf);
    }
}
