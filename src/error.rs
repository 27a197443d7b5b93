//! The error taxonomy surfaced by every fallible operation in this crate.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong when formatting, mounting, or operating on
/// a volume.
///
/// Every call site that produces one of these also emits a `log` record at
/// the same time (`error!` for [`Error::Consistency`] and [`Error::Io`],
/// `warn!` for the rest) — the `Display` text below is the same text that
/// ends up in the log line.
#[derive(Debug)]
pub enum Error {
    /// A fixed-capacity table (directory, FAT, open-file table) is full.
    Capacity(Capacity),
    /// No directory entry matches the requested name.
    NotFound,
    /// `create` was called with a name already present, or `open` with a
    /// name that is already open.
    Duplicate,
    /// `read` was called on a handle opened in append mode, or `append` on
    /// one opened in read mode.
    Mode,
    /// A read would run past end-of-file, or an append length was not
    /// positive.
    Range,
    /// The operation targets a handle, or a volume, that is not currently
    /// open/mounted.
    State,
    /// The host container returned a short read/write, or could not be
    /// opened.
    Io(std::io::Error),
    /// The on-disk structures disagree with each other in a way that
    /// cannot arise from correct use of this library (e.g. a FAT chain
    /// ends before the recorded file size is reached). Indicates
    /// corruption.
    Consistency(&'static str),
}

/// Which fixed-capacity table was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// The root directory has no free slot.
    Directory,
    /// The FAT has no free block.
    Fat,
    /// The open-file table has no free slot.
    OpenFiles,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Capacity(Capacity::Directory) => write!(f, "root directory is full"),
            Error::Capacity(Capacity::Fat) => write!(f, "no free block left on volume"),
            Error::Capacity(Capacity::OpenFiles) => write!(f, "open-file table is full"),
            Error::NotFound => write!(f, "no such file"),
            Error::Duplicate => write!(f, "file already exists or is already open"),
            Error::Mode => write!(f, "operation not permitted in this access mode"),
            Error::Range => write!(f, "read/append range out of bounds"),
            Error::State => write!(f, "handle or volume is not open"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Consistency(msg) => write!(f, "on-disk inconsistency: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
