//! A small single-volume file system over a host byte container.
//!
//! Files are flat (no subdirectories), named, and stored as chains of
//! fixed-size blocks tracked by a File Allocation Table. [`format`][Volume::format]
//! lays out a fresh volume on a host file, [`mount`][Volume::mount] brings
//! it up into a [`Volume`], and every file operation is a method on it.
//!
//! [`compat`] offers the same operations behind a single global handle, for
//! callers porting code written against a C-shaped `fd`/`-1` interface.

pub mod compat;
mod device;
mod directory;
mod error;
mod fat;
mod openfile;
mod param;
mod superblock;
mod volume;

pub use device::{Block, BlockDevice, FileBlockDevice, MemBlockDevice};
pub use error::{Capacity, Error, Result};
pub use openfile::AccessMode;
pub use param::{
    BLOCKSIZE, DIR_ENTRY_COUNT, FAT_ENTRY_COUNT, MAX_FILENAME_LENGTH, MAX_OPEN_FILES,
    MAX_VOLUME_SHIFT, MIN_VOLUME_SHIFT,
};
pub use volume::{MountOptions, Volume};
