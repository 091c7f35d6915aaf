//! The inode and directory layer: on-disk format, in-memory table, and
//! path resolution, layered on the buffer cache and log.

pub mod dinode;
pub mod dirent;
pub mod inode;
pub mod path;
pub mod superblock;

pub use dinode::Dinode;
pub use dirent::Dirent;
pub use inode::{Inode, InodeGuard, InodeTable};
pub use superblock::Superblock;
