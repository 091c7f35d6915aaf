//! The `Filesystem` façade: owns the device, buffer cache, log, inode
//! table, file table, descriptor table, and current working directory,
//! and exposes the operations a shell or test harness actually calls.

use std::path::Path;
use std::sync::Arc;

use ::log::info;
use itertools::Itertools;

use crate::bio::Bcache;
use crate::device::{BlockDevice, FileBlockDevice};
use crate::error::{FsError, FsResult};
use crate::fd::{self, FdTable};
use crate::file::{FTable, File};
use crate::fs::{path, Dirent, Inode, InodeTable, Superblock};
use crate::lock::SpinLock;
use crate::log::Log;
use crate::param::ROOTINO;
use crate::stat::{Stat, T_DIR, T_FILE};

/// RAII bracket around a multi-block filesystem mutation. Logged writes
/// made by anything reached while a `Transaction` is alive commit
/// atomically when the last overlapping one drops.
struct Transaction<'a> {
    log: &'a Log,
}

impl<'a> Transaction<'a> {
    fn begin(log: &'a Log) -> Self {
        log.begin_op();
        Self { log }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.log.end_op();
    }
}

bitflags::bitflags! {
    /// The O_RDONLY/O_WRONLY/O_CREAT/O_TRUNC-shaped bits behind
    /// [`OpenOptions`], kept as a real bitset rather than four separate
    /// bools since that's what they are everywhere else in this corpus.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct OpenFlags: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const CREATE   = 1 << 2;
        const TRUNCATE = 1 << 3;
    }
}

/// How [`Filesystem::open`] should treat the path: which access modes
/// to grant, and whether (and how) to create it. Mirrors
/// `std::fs::OpenOptions`'s builder shape, which `device::FileBlockDevice`
/// already leans on for the underlying image file.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenOptions {
    flags: OpenFlags,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, yes: bool) -> Self {
        self.flags.set(OpenFlags::READ, yes);
        self
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.flags.set(OpenFlags::WRITE, yes);
        self
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.flags.set(OpenFlags::CREATE, yes);
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.flags.set(OpenFlags::TRUNCATE, yes);
        self
    }
}

/// A mounted SecFs image, the entry point into every other module.
pub struct Filesystem {
    dev: u32,
    #[allow(dead_code)]
    device: Arc<dyn BlockDevice>,
    #[allow(dead_code)]
    bcache: Arc<Bcache>,
    log: Arc<Log>,
    itable: InodeTable,
    ftable: Arc<FTable>,
    fdtable: FdTable,
    cwd: SpinLock<Inode>,
}

impl Filesystem {
    /// Mounts the image at `path`: opens the device, reads the
    /// superblock, and replays the log (boot-time recovery) before
    /// anything else touches the disk.
    pub fn mount(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let dev = crate::param::ROOTDEV;
        let device: Arc<dyn BlockDevice> = Arc::new(FileBlockDevice::open(path)?);
        let bcache = Arc::new(Bcache::new(device.clone()));

        let sb = {
            let buf = bcache.read(dev, 1);
            Superblock::decode(buf.data().bytes())
        };
        info!(
            "filesystem: mounted {} data block(s), {} inode(s)",
            sb.ndata, sb.ninodes
        );

        let log = Arc::new(Log::new(dev, sb.logstart, sb.nlog, bcache.clone()));
        let itable = InodeTable::new(bcache.clone(), log.clone(), sb);
        let ftable = FTable::new();
        let fdtable = FdTable::new();
        let cwd = SpinLock::new("cwd", itable.get(dev, ROOTINO));

        Ok(Self {
            dev,
            device,
            bcache,
            log,
            itable,
            ftable,
            fdtable,
            cwd,
        })
    }

    fn cwd_dup(&self) -> Inode {
        self.cwd.lock().dup()
    }

    /// Opens (optionally creating) `path`, returning a descriptor.
    pub fn open(&self, raw_path: &str, opts: OpenOptions) -> FsResult<i32> {
        let cwd = self.cwd_dup();
        let path_bytes = raw_path.as_bytes();

        let ip = if opts.flags.contains(OpenFlags::CREATE) {
            let _txn = Transaction::begin(&self.log);
            fd::create(&self.itable, &cwd, path_bytes, T_FILE, 0, 0)?
        } else {
            path::namei(&self.itable, self.dev, &cwd, path_bytes)?
        };

        {
            let mut locked = ip.lock();
            if locked.typ() == T_DIR && opts.flags.intersects(OpenFlags::WRITE | OpenFlags::TRUNCATE) {
                locked.unlock();
                return Err(FsError::IsADirectory);
            }
            if opts.flags.contains(OpenFlags::TRUNCATE) && locked.typ() == T_FILE {
                let _txn = Transaction::begin(&self.log);
                locked.itrunc();
            }
        }

        let file = File::open_inode(
            self.ftable.clone(),
            self.log.clone(),
            ip,
            opts.flags.contains(OpenFlags::READ),
            opts.flags.contains(OpenFlags::WRITE),
        )?;
        self.fdtable.alloc(file)
    }

    pub fn read(&self, fd: i32, dst: &mut [u8]) -> FsResult<usize> {
        self.fdtable.get(fd)?.read(dst)
    }

    pub fn write(&self, fd: i32, src: &[u8]) -> FsResult<usize> {
        self.fdtable.get(fd)?.write(src)
    }

    pub fn seek(&self, fd: i32, pos: u64) -> FsResult<u64> {
        self.fdtable.get(fd)?.seek(pos)
    }

    pub fn fstat(&self, fd: i32) -> FsResult<Stat> {
        self.fdtable.get(fd)?.stat()
    }

    pub fn close(&self, fd: i32) -> FsResult<()> {
        self.fdtable.close(fd)
    }

    pub fn dup(&self, fd: i32) -> FsResult<i32> {
        let file = self.fdtable.get(fd)?;
        self.fdtable.alloc(file)
    }

    pub fn mkdir(&self, raw_path: &str) -> FsResult<()> {
        let cwd = self.cwd_dup();
        let _txn = Transaction::begin(&self.log);
        fd::create(&self.itable, &cwd, raw_path.as_bytes(), T_DIR, 0, 0)?;
        Ok(())
    }

    pub fn unlink(&self, raw_path: &str) -> FsResult<()> {
        let cwd = self.cwd_dup();
        let _txn = Transaction::begin(&self.log);
        fd::unlink(&self.itable, &cwd, raw_path.as_bytes())
    }

    pub fn link(&self, old: &str, new: &str) -> FsResult<()> {
        let cwd = self.cwd_dup();
        let _txn = Transaction::begin(&self.log);
        fd::link(&self.itable, &cwd, old.as_bytes(), new.as_bytes())
    }

    pub fn stat_path(&self, raw_path: &str) -> FsResult<Stat> {
        let cwd = self.cwd_dup();
        let ip = path::namei(&self.itable, self.dev, &cwd, raw_path.as_bytes())?;
        Ok(ip.lock().stat())
    }

    /// Changes the current working directory, used to resolve every
    /// subsequent relative path.
    pub fn chdir(&self, raw_path: &str) -> FsResult<()> {
        let cwd = self.cwd_dup();
        let ip = path::namei(&self.itable, self.dev, &cwd, raw_path.as_bytes())?;
        {
            let locked = ip.lock();
            let is_dir = locked.typ() == T_DIR;
            locked.unlock();
            if !is_dir {
                return Err(FsError::NotADirectory);
            }
        }
        *self.cwd.lock() = ip;
        Ok(())
    }

    /// Lists a directory's entries (skipping free slots) as `(name,
    /// stat)` pairs, sorted by name. `.` and `..` are included, in
    /// whatever position their names sort to.
    pub fn list_dir(&self, raw_path: &str) -> FsResult<Vec<(String, Stat)>> {
        let cwd = self.cwd_dup();
        let ip = path::namei(&self.itable, self.dev, &cwd, raw_path.as_bytes())?;
        let mut locked = ip.lock();
        if locked.typ() != T_DIR {
            locked.unlock();
            return Err(FsError::NotADirectory);
        }

        let mut entries = Vec::new();
        let mut raw = [0u8; Dirent::SIZE];
        let mut off = 0u64;
        while off < locked.size() {
            let n = locked.readi(&mut raw, off)?;
            assert_eq!(n, raw.len(), "directory entry truncated");
            let de = Dirent::decode(&raw);
            if !de.is_free() {
                let child = self.itable.get(self.dev, de.inum as u32);
                let stat = child.lock().stat();
                entries.push((String::from_utf8_lossy(de.name()).into_owned(), stat));
            }
            off += raw.len() as u64;
        }
        Ok(entries.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)).collect())
    }
}
