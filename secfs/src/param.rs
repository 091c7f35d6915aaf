//! Fixed dimensions of the on-disk and in-memory layout.
//!
//! These mirror the source material's own `param.rs` almost field for
//! field.

/// Block size, in bytes.
pub const BSIZE: usize = 1024;

/// Maximum length of a single path element (not counting a NUL byte).
pub const DIRSIZ: usize = 14;

/// Number of direct block addresses stored in a dinode.
pub const NDIRECT: usize = 11;

/// Number of block addresses that fit in one indirect block.
pub const NINDIRECT: usize = BSIZE / 4;

/// Largest logical block index a file may address.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// Number of address slots in a dinode: `NDIRECT` direct, one single
/// indirect, and one reserved (unused) slot for a future doubly
/// indirect pointer.
pub const NADDRS: usize = NDIRECT + 2;

/// Upper bound on the number of distinct blocks any single filesystem
/// operation may write within one transaction.
pub const MAXOPBLOCKS: usize = 10;

/// Number of blocks reserved for the on-disk log (1 header + data).
pub const NLOG: usize = MAXOPBLOCKS * 3;

/// Number of buffer-cache slots. Sized so a single transaction can never
/// exhaust the cache, provided buffers are released promptly.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Maximum number of simultaneously resident in-memory inodes.
pub const NINODE: usize = 50;

/// Maximum number of open files per fd table.
pub const NOFILE: usize = 16;

/// Maximum number of open files system-wide.
pub const NFILE: usize = 100;

/// Device number of the filesystem's root disk.
pub const ROOTDEV: u32 = 1;

/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

/// Maximum length of a path passed to the shell/fd-table layer.
pub const MAXPATH: usize = 128;

/// Magic number identifying a SecFs superblock.
pub const FSMAGIC: u32 = 0x10203040;
