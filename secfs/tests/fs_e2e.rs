//! Black-box end-to-end scenarios against the public `Filesystem` API,
//! each starting from a freshly formatted image.

use secfs::param::{BSIZE, NDIRECT, NINDIRECT};
use secfs::{Filesystem, FsError, OpenOptions};

fn fresh_image() -> tempfile::TempPath {
    let file = tempfile::NamedTempFile::new().expect("tempfile");
    let path = file.into_temp_path();
    secfs::format::format(&path, 4096, 200).expect("format");
    path
}

fn names(fs: &Filesystem, dir: &str) -> Vec<String> {
    let mut entries = fs.list_dir(dir).expect("list_dir").into_iter().map(|(n, _)| n).collect::<Vec<_>>();
    entries.sort();
    entries
}

#[test]
fn scenario_create_write_reopen_read() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let fd = fs
        .open("/a.txt", OpenOptions::new().read(true).write(true).create(true))
        .expect("open for write");
    let payload = b"hello secfs";
    let n = fs.write(fd, payload).expect("write");
    assert_eq!(n, payload.len());
    fs.close(fd).expect("close");

    let fd = fs.open("/a.txt", OpenOptions::new().read(true)).expect("reopen read-only");
    let mut buf = [0u8; 64];
    let n = fs.read(fd, &mut buf).expect("read");
    assert_eq!(&buf[..n], payload);

    let stat = fs.fstat(fd).expect("fstat");
    assert_eq!(stat.size, payload.len() as u64);
    fs.close(fd).expect("close");
}

#[test]
fn scenario_mkdir_create_and_list() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    fs.mkdir("/d").expect("mkdir");
    let fd = fs
        .open("/d/f", OpenOptions::new().read(true).write(true).create(true))
        .expect("create /d/f");
    fs.close(fd).expect("close");

    assert_eq!(names(&fs, "/d"), vec![".".to_string(), "..".to_string(), "f".to_string()]);
    assert_eq!(
        names(&fs, "/"),
        vec![".".to_string(), "..".to_string(), "d".to_string()]
    );
}

#[test]
fn scenario_large_write_forces_indirect_block() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let len = 12 * BSIZE;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

    let fd = fs
        .open("/big", OpenOptions::new().read(true).write(true).create(true))
        .expect("create /big");
    let mut written = 0;
    while written < data.len() {
        written += fs.write(fd, &data[written..]).expect("write chunk");
    }
    fs.close(fd).expect("close");

    let fd = fs.open("/big", OpenOptions::new().read(true)).expect("reopen");
    let mut readback = vec![0u8; len];
    let mut off = 0;
    loop {
        let n = fs.read(fd, &mut readback[off..]).expect("read");
        if n == 0 {
            break;
        }
        off += n;
    }
    assert_eq!(off, len);
    assert_eq!(readback, data);
    fs.close(fd).expect("close");
}

#[test]
fn scenario_remount_after_close_preserves_contents() {
    let image = fresh_image();
    let data: Vec<u8> = (0..100 * 1024).map(|i| (i % 256) as u8).collect();

    {
        let fs = Filesystem::mount(&image).expect("mount");
        let fd = fs
            .open("/imported", OpenOptions::new().read(true).write(true).create(true))
            .expect("create");
        let mut written = 0;
        while written < data.len() {
            written += fs.write(fd, &data[written..]).expect("write");
        }
        fs.close(fd).expect("close");
    }

    let fs = Filesystem::mount(&image).expect("remount");
    let fd = fs.open("/imported", OpenOptions::new().read(true)).expect("reopen");
    let mut readback = vec![0u8; data.len()];
    let mut off = 0;
    loop {
        let n = fs.read(fd, &mut readback[off..]).expect("read");
        if n == 0 {
            break;
        }
        off += n;
    }
    assert_eq!(readback, data);
}

#[test]
fn scenario_link_then_unlink_original_preserves_data_and_nlink() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let fd = fs
        .open("/a", OpenOptions::new().read(true).write(true).create(true))
        .expect("create /a");
    fs.write(fd, b"shared contents").expect("write");
    fs.close(fd).expect("close");

    fs.link("/a", "/b").expect("link");
    fs.unlink("/a").expect("unlink /a");

    let stat = fs.stat_path("/b").expect("stat /b");
    assert_eq!(stat.nlink, 1);

    let fd = fs.open("/b", OpenOptions::new().read(true)).expect("open /b");
    let mut buf = [0u8; 32];
    let n = fs.read(fd, &mut buf).expect("read");
    assert_eq!(&buf[..n], b"shared contents");
    fs.close(fd).expect("close");

    assert!(matches!(fs.stat_path("/a"), Err(FsError::NotFound)));
}

#[test]
fn boundary_seek_to_size_then_read_returns_zero() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let fd = fs
        .open("/f", OpenOptions::new().read(true).write(true).create(true))
        .expect("create");
    fs.write(fd, b"0123456789").expect("write");

    fs.seek(fd, 10).expect("seek to size");
    let mut buf = [0u8; 8];
    let n = fs.read(fd, &mut buf).expect("read at eof");
    assert_eq!(n, 0);
    fs.close(fd).expect("close");
}

#[test]
fn boundary_seek_past_size_errors_without_moving_offset() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let fd = fs
        .open("/f", OpenOptions::new().read(true).write(true).create(true))
        .expect("create");
    fs.write(fd, b"abc").expect("write");

    assert!(matches!(fs.seek(fd, 100), Err(FsError::BadSeek)));

    // The offset must still be wherever the successful write left it.
    let mut buf = [0u8; 8];
    let n = fs.read(fd, &mut buf).expect("read");
    assert_eq!(n, 0, "offset should remain at 3 (end of file) after the rejected seek");
    fs.close(fd).expect("close");
}

#[test]
fn boundary_write_at_eof_extends_by_exactly_written_bytes() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let fd = fs
        .open("/f", OpenOptions::new().read(true).write(true).create(true))
        .expect("create");
    fs.write(fd, b"hello").expect("write");
    let before = fs.fstat(fd).expect("stat").size;
    fs.write(fd, b" world").expect("write more");
    let after = fs.fstat(fd).expect("stat").size;
    assert_eq!(after, before + 6);
    fs.close(fd).expect("close");
}

#[test]
fn boundary_largest_block_index_is_writeable_one_past_is_not() {
    let image = fresh_image();
    let fs = Filesystem::mount(&image).expect("mount");

    let maxfile_bytes = (NDIRECT + NINDIRECT) * BSIZE;
    let data = vec![0xAAu8; maxfile_bytes];

    let fd = fs
        .open("/f", OpenOptions::new().read(true).write(true).create(true))
        .expect("create");
    let mut written = 0;
    while written < data.len() {
        written += fs.write(fd, &data[written..]).expect("fill file to MAXFILE");
    }
    assert_eq!(fs.fstat(fd).expect("stat").size, maxfile_bytes as u64);

    // Writing one more byte at exactly MAXFILE*BSIZE (the first offset
    // beyond the largest writeable logical block) must fail rather than
    // silently succeed or panic.
    fs.seek(fd, maxfile_bytes as u64).expect("seek to exactly size");
    let result = fs.write(fd, b"x");
    assert!(result.is_err(), "writing past the last addressable block must fail");

    fs.close(fd).expect("close");
}
