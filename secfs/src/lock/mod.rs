//! Two lock flavors, generalized from the source material's
//! `Spinlock<T>` / `Sleeplock<T>` wrapper-with-a-debug-name pattern onto
//! real OS threads.
//!
//! - [`SpinLock`] protects short critical sections of table metadata:
//!   buffer-cache identity/refcounts, the inode table, log state, the
//!   file table, the device handle. Holders must never block on disk
//!   I/O or on a [`SleepLock`] while holding one.
//! - [`SleepLock`] protects per-buffer and per-inode data that may
//!   require a disk operation to populate; acquirers suspend instead of
//!   busy-waiting.

mod sleep;
mod spin;

pub use sleep::{SleepLock, SleepLockGuard};
pub use spin::{SpinLock, SpinLockGuard};
