//! Formats a fresh SecFs image: lays out the superblock, log, inode,
//! and bitmap regions, then allocates the root directory.
//!
//! Shared by `mkfs` and `secfs-shell` (which formats a fresh image on
//! first run) so both produce byte-identical layouts through the same
//! codec as the rest of the library. Writes go straight to the device,
//! bypassing the buffer cache and log entirely -- there is no
//! concurrent access and nothing to recover from during a format.

use std::path::Path;

use crate::device::{BlockDevice, FileBlockDevice};
use crate::fs::superblock::IPB;
use crate::fs::{Dinode, Dirent, Superblock};
use crate::param::{BSIZE, NADDRS, NLOG, ROOTINO};
use crate::stat::T_DIR;

fn bpb() -> u32 {
    (BSIZE * 8) as u32
}

fn dinode_offset(inum: u32) -> usize {
    (inum as usize % IPB) * std::mem::size_of::<Dinode>()
}

/// Formats `path` as a fresh SecFs image of `total_blocks` blocks with
/// room for `ninodes` inodes, overwriting anything already there.
pub fn format(path: impl AsRef<Path>, total_blocks: u32, ninodes: u32) -> std::io::Result<()> {
    let dev = FileBlockDevice::create(path, total_blocks)?;

    let nlog = NLOG as u32;
    let logstart = 2; // block 0: boot sector (unused), block 1: superblock
    let dinode_size = std::mem::size_of::<Dinode>() as u32;
    let ipb = (BSIZE as u32) / dinode_size;
    let ninodeblocks = ninodes.div_ceil(ipb);
    let inodestart = logstart + nlog;
    let nbitmapblocks = total_blocks.div_ceil(bpb());
    let bmapstart = inodestart + ninodeblocks;
    let datastart = bmapstart + nbitmapblocks;

    assert!(
        datastart < total_blocks,
        "format: {total_blocks} blocks is too small for {ninodes} inodes"
    );
    let ndata = total_blocks - datastart;

    let sb = Superblock::new(total_blocks, ndata, ninodes, nlog, logstart, inodestart, bmapstart);
    log::info!(
        "format: {total_blocks} blocks total, {ninodes} inodes ({ninodeblocks} block(s)), \
         log at {logstart}..{inodestart} ({nlog} block(s)), data starts at {datastart}"
    );

    let zero = [0u8; BSIZE];
    for blk in 0..datastart {
        dev.write_block(blk, &zero);
    }

    let mut sbblock = [0u8; BSIZE];
    sb.encode(&mut sbblock);
    dev.write_block(1, &sbblock);

    // Mark every block up to and including the root directory's one
    // data block as allocated.
    for b in 0..datastart {
        set_bitmap_bit(&dev, &sb, b, true);
    }
    set_bitmap_bit(&dev, &sb, datastart, true);

    write_root_dirents(&dev, datastart);

    let mut root = Dinode {
        typ: T_DIR,
        major: 0,
        minor: 0,
        nlink: 1,
        size: BSIZE as u32,
        addrs: [0; NADDRS],
    };
    root.addrs[0] = datastart;
    write_dinode(&dev, &sb, ROOTINO, &root);

    Ok(())
}

fn set_bitmap_bit(dev: &FileBlockDevice, sb: &Superblock, b: u32, used: bool) {
    let bblk = sb.bblock(b);
    let mut buf = [0u8; BSIZE];
    dev.read_block(bblk, &mut buf);
    let bi = b % bpb();
    let byte = (bi / 8) as usize;
    let mask = 1u8 << (bi % 8);
    if used {
        buf[byte] |= mask;
    } else {
        buf[byte] &= !mask;
    }
    dev.write_block(bblk, &buf);
}

fn write_root_dirents(dev: &FileBlockDevice, blk: u32) {
    let mut buf = [0u8; BSIZE];

    let mut dot = Dirent::empty();
    dot.inum = ROOTINO as u16;
    dot.set_name(b".");
    dot.encode(&mut buf[0..Dirent::SIZE]);

    let mut dotdot = Dirent::empty();
    dotdot.inum = ROOTINO as u16;
    dotdot.set_name(b"..");
    dotdot.encode(&mut buf[Dirent::SIZE..2 * Dirent::SIZE]);

    dev.write_block(blk, &buf);
}

fn write_dinode(dev: &FileBlockDevice, sb: &Superblock, inum: u32, dinode: &Dinode) {
    let blk = sb.iblock(inum);
    let mut buf = [0u8; BSIZE];
    dev.read_block(blk, &mut buf);
    let off = dinode_offset(inum);
    dinode.encode(&mut buf[off..off + std::mem::size_of::<Dinode>()]);
    dev.write_block(blk, &buf);
}

/// Default total image size, in blocks, used when a caller does not
/// specify one (the shell surface auto-formats with this).
pub const DEFAULT_BLOCKS: u32 = 4096;

/// Default number of inodes, used alongside [`DEFAULT_BLOCKS`].
pub const DEFAULT_NINODES: u32 = 200;
