//! SecFs: a crash-recoverable block filesystem over a single image
//! file, with a buffered block cache and a write-ahead log bracketing
//! every multi-block mutation.
//!
//! Layering, bottom to top:
//! - [`device`]: raw block I/O against the image file.
//! - [`bio`]: the LRU-and-refcounted buffer cache.
//! - [`log`]: atomic transactions and crash recovery.
//! - [`fs`]: on-disk inode/directory format, the in-memory inode table,
//!   and path resolution.
//! - [`file`] / [`fd`]: open files and the descriptor table.
//! - [`filesystem`]: the façade tying all of the above together.

pub mod bio;
pub mod device;
pub mod error;
pub mod fd;
pub mod file;
pub mod filesystem;
pub mod format;
pub mod fs;
pub mod lock;
pub mod log;
pub mod param;
pub mod stat;

pub use error::{FsError, FsResult};
pub use filesystem::{Filesystem, OpenOptions};
pub use stat::Stat;
