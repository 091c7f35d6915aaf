//! The on-disk superblock.
//!
//! Written once by the image formatter and read-only thereafter. All
//! integers are little-endian on disk regardless of host, via a single
//! `zerocopy` codec shared with `mkfs`.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::param::{BSIZE, FSMAGIC};

use super::dinode::Dinode;

/// Bitmap bits per block.
pub const BPB: u32 = (BSIZE * 8) as u32;

/// Inodes per block; chosen so `Dinode` divides `BSIZE` evenly.
pub const IPB: usize = BSIZE / std::mem::size_of::<Dinode>();

/// Disk layout:
/// `[boot | super | log (1 header + N data) | inode blocks | bitmap blocks | data blocks]`
#[derive(Copy, Clone, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct Superblock {
    magic: u32,
    /// Total size of the image, in blocks.
    pub size: u32,
    /// Number of data blocks.
    pub ndata: u32,
    /// Number of inodes the image has room for.
    pub ninodes: u32,
    /// Number of log blocks (1 header + `nlog - 1` data blocks).
    pub nlog: u32,
    /// Block number of the first log block.
    pub logstart: u32,
    /// Block number of the first inode block.
    pub inodestart: u32,
    /// Block number of the first bitmap block.
    pub bmapstart: u32,
}

static_assertions::const_assert!(std::mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    pub fn new(
        size: u32,
        ndata: u32,
        ninodes: u32,
        nlog: u32,
        logstart: u32,
        inodestart: u32,
        bmapstart: u32,
    ) -> Self {
        Self {
            magic: FSMAGIC,
            size,
            ndata,
            ninodes,
            nlog,
            logstart,
            inodestart,
            bmapstart,
        }
    }

    /// Decodes a superblock from a raw block, validating the magic
    /// number. A bad magic is a fatal corruption, not a recoverable
    /// error: there is no sensible fallback for an unformatted or
    /// foreign image.
    pub fn decode(block: &[u8; BSIZE]) -> Self {
        let sb = Self::read_from_prefix(block).expect("superblock: buffer too small");
        assert_eq!(sb.magic, FSMAGIC, "superblock: bad magic, not a SecFs image");
        sb
    }

    pub fn encode(&self, block: &mut [u8; BSIZE]) {
        block[..std::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }

    /// Block containing inode `inum`.
    pub fn iblock(&self, inum: u32) -> u32 {
        inum / IPB as u32 + self.inodestart
    }

    /// Block of the free bitmap containing the bit for data block `b`.
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}
