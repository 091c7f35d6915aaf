//! File type tags and the `stat` result, shared by the dinode codec and
//! the public `Filesystem::stat` call.

/// Free / unallocated inode.
pub const T_FREE: u16 = 0;
/// Directory.
pub const T_DIR: u16 = 1;
/// Regular file.
pub const T_FILE: u16 = 2;
/// Device special file (major/minor recorded, I/O unimplemented).
pub const T_DEVICE: u16 = 3;

/// Metadata returned by `fstat`/`stat`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    /// Device holding the file.
    pub dev: u32,
    /// Inode number.
    pub ino: u32,
    /// File type (`T_DIR`, `T_FILE`, `T_DEVICE`).
    pub typ: u16,
    /// Number of hard links.
    pub nlink: i16,
    /// Size in bytes.
    pub size: u64,
}
