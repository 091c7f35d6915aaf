//! Path parsing and resolution.
//!
//! Paths are `/`-separated byte strings; each element is looked up in
//! turn via `dirlookup`, following the usual "." / ".." conventions
//! implicit in directory contents (both are ordinary entries written by
//! `ialloc`/`mkdir`, not special-cased here).

use arrayvec::ArrayVec;

use crate::error::{FsError, FsResult};
use crate::param::{DIRSIZ, ROOTINO};

use super::inode::{Inode, InodeTable};

/// Splits the next `/`-delimited element off the front of `path`.
///
/// Returns `(element, rest)` where `rest` starts at the following
/// element (leading slashes skipped). Returns `None` once `path` is
/// exhausted. An element of `DIRSIZ` bytes or longer is rejected rather
/// than silently truncated, since silent truncation could resolve a
/// path to the wrong file.
fn skipelem(path: &[u8]) -> FsResult<Option<(&[u8], &[u8])>> {
    let mut p = path;
    while p.first() == Some(&b'/') {
        p = &p[1..];
    }
    if p.is_empty() {
        return Ok(None);
    }
    let end = p.iter().position(|&b| b == b'/').unwrap_or(p.len());
    let (elem, mut rest) = p.split_at(end);
    if elem.len() >= DIRSIZ {
        return Err(FsError::NameTooLong(DIRSIZ - 1));
    }
    while rest.first() == Some(&b'/') {
        rest = &rest[1..];
    }
    Ok(Some((elem, rest)))
}

/// Resolves `path` to an inode, starting from `root` (an absolute path)
/// or `cwd` (a relative one). If `nameiparent` is true, resolution stops
/// one element short and returns the parent directory, writing the
/// final element's bytes into `last_out`.
fn namex(
    itable: &InodeTable,
    dev: u32,
    cwd: &Inode,
    path: &[u8],
    nameiparent: bool,
    last_out: &mut ArrayVec<u8, DIRSIZ>,
) -> FsResult<Inode> {
    let mut ip = if path.first() == Some(&b'/') {
        itable.get(dev, ROOTINO)
    } else {
        cwd.dup()
    };

    let mut rest = path;
    loop {
        let Some((elem, next_rest)) = skipelem(rest)? else {
            break;
        };
        rest = next_rest;

        let locked = ip.lock();
        if locked.typ() != crate::stat::T_DIR {
            locked.unlock();
            return Err(FsError::NotADirectory);
        }

        if nameiparent && rest.is_empty() {
            // `elem` is the final component; stop here and hand back
            // the parent, still locked by the caller's convention of
            // locking on demand.
            locked.unlock();
            last_out.clear();
            last_out.try_extend_from_slice(elem).expect("elem already bounds-checked by skipelem");
            return Ok(ip);
        }

        let next = match locked.dirlookup(elem) {
            Some((inum, _off)) => itable.get(dev, inum),
            None => {
                locked.unlock();
                return Err(FsError::NotFound);
            }
        };
        locked.unlock();
        ip = next;
    }

    if nameiparent {
        // Path had no components at all (e.g. "/" or "").
        return Err(FsError::EmptyPath);
    }
    Ok(ip)
}

/// Resolves `path` to its inode.
pub fn namei(itable: &InodeTable, dev: u32, cwd: &Inode, path: &[u8]) -> FsResult<Inode> {
    let mut unused = ArrayVec::new();
    namex(itable, dev, cwd, path, false, &mut unused)
}

/// Resolves `path`'s parent directory, returning it along with the
/// final path element's bytes (for the caller to `dirlookup`/`dirlink`
/// directly).
pub fn nameiparent(
    itable: &InodeTable,
    dev: u32,
    cwd: &Inode,
    path: &[u8],
) -> FsResult<(Inode, ArrayVec<u8, DIRSIZ>)> {
    let mut last = ArrayVec::new();
    let parent = namex(itable, dev, cwd, path, true, &mut last)?;
    Ok((parent, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipelem_splits_on_slash() {
        let (elem, rest) = skipelem(b"a/bb/ccc").unwrap().unwrap();
        assert_eq!(elem, b"a");
        assert_eq!(rest, b"bb/ccc");
    }

    #[test]
    fn skipelem_skips_leading_and_repeated_slashes() {
        let (elem, rest) = skipelem(b"//a//b").unwrap().unwrap();
        assert_eq!(elem, b"a");
        assert_eq!(rest, b"b");
    }

    #[test]
    fn skipelem_empty_path_is_none() {
        assert!(skipelem(b"").unwrap().is_none());
        assert!(skipelem(b"/").unwrap().is_none());
    }

    #[test]
    fn skipelem_rejects_overlong_element() {
        let long = [b'a'; DIRSIZ];
        assert!(matches!(skipelem(&long), Err(FsError::NameTooLong(_))));
    }
}
