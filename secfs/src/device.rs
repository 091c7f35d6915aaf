//! The block device: a thin file-image I/O surface.
//!
//! Out of the core's scope in spirit — callers never see a raw byte
//! offset, only `(blkno)` — but the interface is specified precisely
//! enough that any image file honoring it is usable, so it is
//! implemented here rather than assumed away.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use ::log::trace;

use crate::param::BSIZE;

/// A device that can read and write fixed-size blocks by index.
///
/// Implementations must serialize concurrent calls themselves; a short
/// read or write is a fatal, unrecoverable condition.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, blkno: u32, buf: &mut [u8; BSIZE]);
    fn write_block(&self, blkno: u32, buf: &[u8; BSIZE]);
}

/// A `BlockDevice` backed by a single image file, opened read+write.
///
/// One mutex serializes every call against the single image-file
/// descriptor.
pub struct FileBlockDevice {
    file: Mutex<File>,
}

impl FileBlockDevice {
    /// Opens an existing image file read+write.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Creates a fresh image file of exactly `nblocks` blocks, all
    /// zeroed. Used by `mkfs` before laying out the superblock, log,
    /// inode, and bitmap regions.
    pub fn create(path: impl AsRef<Path>, nblocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(nblocks as u64 * BSIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, blkno: u32, buf: &mut [u8; BSIZE]) {
        trace!("device: read block {blkno}");
        let mut file = self.file.lock().expect("device mutex poisoned");
        file.seek(SeekFrom::Start(blkno as u64 * BSIZE as u64))
            .expect("device: seek failed");
        file.read_exact(buf)
            .expect("device: short read is a fatal I/O error");
    }

    fn write_block(&self, blkno: u32, buf: &[u8; BSIZE]) {
        trace!("device: write block {blkno}");
        let mut file = self.file.lock().expect("device mutex poisoned");
        file.seek(SeekFrom::Start(blkno as u64 * BSIZE as u64))
            .expect("device: seek failed");
        file.write_all(buf)
            .expect("device: short write is a fatal I/O error");
    }
}
