//! Directory entries.
//!
//! A directory's data blocks are simply an array of `Dirent`, read and
//! written through `Inode::readi`/`writei` like any other file content.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::param::DIRSIZ;

/// One slot of a directory's contents. `inum == 0` marks a free slot
/// (inode 0 is never allocated to a file, matching `ROOTINO == 1`).
#[derive(Copy, Clone, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct Dirent {
    pub inum: u16,
    name: [u8; DIRSIZ],
}

impl Dirent {
    pub const SIZE: usize = std::mem::size_of::<Dirent>();

    pub fn empty() -> Self {
        Self {
            inum: 0,
            name: [0; DIRSIZ],
        }
    }

    pub fn is_free(&self) -> bool {
        self.inum == 0
    }

    /// Sets the name, truncated at the first NUL and zero-padded.
    /// Callers must have already rejected names of `DIRSIZ` bytes or
    /// longer (see `fs::path::skipelem`); this never truncates silently.
    pub fn set_name(&mut self, name: &[u8]) {
        debug_assert!(name.len() < DIRSIZ, "name must fit with room for a terminator");
        self.name = [0; DIRSIZ];
        self.name[..name.len()].copy_from_slice(name);
    }

    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.name[..end]
    }

    pub fn name_matches(&self, other: &[u8]) -> bool {
        self.name() == other
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self::read_from(bytes).expect("dirent: buffer wrong size")
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        self.write_to(bytes).expect("dirent: buffer wrong size");
    }
}
