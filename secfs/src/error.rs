//! User-recoverable error surface.
//!
//! Failures split into fatal invariant violations (kept as
//! `panic!`/`assert!` throughout this crate — they are programming
//! errors, not something a caller can meaningfully recover from) and
//! user-recoverable errors, which this enum covers. The fd-table layer
//! (`crate::fd`) is the one place that still collapses these down to
//! the historical `-1` sentinel, since that is the literal contract the
//! shell and other collaborators are written against.

use thiserror::Error;

/// Errors a filesystem caller can recover from.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("path element longer than {0} bytes")]
    NameTooLong(usize),

    #[error("file already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    DirectoryNotEmpty,

    #[error("file is not writable")]
    ReadOnly,

    #[error("file is not readable")]
    WriteOnly,

    #[error("bad file descriptor")]
    BadFileDescriptor,

    #[error("too many open files")]
    TooManyOpenFiles,

    #[error("invalid seek offset")]
    BadSeek,

    #[error("cannot link a directory")]
    LinkIsDirectory,

    #[error("new name's parent is on a different device")]
    CrossDevice,

    #[error("empty path")]
    EmptyPath,

    #[error("device file I/O is not implemented")]
    Unsupported,

    #[error("short write: wrote {wrote} of {requested} bytes")]
    ShortWrite { wrote: usize, requested: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;
