//! Block device: a thin façade over a host byte container offering
//! fixed-size block read/write at a block index.
//!
//! No caching happens here; every call goes straight to the backing
//! storage. Caching is the concern of the layers above ([`crate::fat`],
//! [`crate::directory`], [`crate::superblock`]).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::param::BLOCKSIZE;

/// One block's worth of bytes.
pub type Block = [u8; BLOCKSIZE];

/// A host byte container addressable in fixed-size blocks.
///
/// Indices are 0-based absolute block numbers. A short read or write is
/// always reported as [`Error::Io`]; there is no partial-block result.
pub trait BlockDevice {
    /// Reads the block at `index` into `block`.
    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<()>;

    /// Writes `block` to the block at `index`.
    fn write_block(&mut self, index: u32, block: &Block) -> Result<()>;

    /// Flushes any buffering and ensures prior writes are durable.
    fn sync(&mut self) -> Result<()>;

    /// Total size of the container, in blocks, if known up front.
    fn block_count(&self) -> u32;
}

/// A [`BlockDevice`] backed by a regular host file.
#[derive(Debug)]
pub struct FileBlockDevice {
    file: File,
    block_count: u32,
}

impl FileBlockDevice {
    /// Creates a fresh, zero-filled container of `block_count` blocks at
    /// `path`, truncating anything already there.
    pub fn create(path: impl AsRef<Path>, block_count: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_count as u64 * BLOCKSIZE as u64)?;
        Ok(Self { file, block_count })
    }

    /// Opens an existing container at `path`. `block_count` is derived from
    /// the file's length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_count = (len / BLOCKSIZE as u64) as u32;
        Ok(Self { file, block_count })
    }

    fn seek_to(&mut self, index: u32) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(index as u64 * BLOCKSIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<()> {
        self.seek_to(index)?;
        self.file.read_exact(block).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read of block {index}"),
                ))
            } else {
                Error::Io(e)
            }
        })
    }

    fn write_block(&mut self, index: u32, block: &Block) -> Result<()> {
        self.seek_to(index)?;
        self.file.write_all(block)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

/// An in-memory [`BlockDevice`], used by unit tests that do not need a real
/// host container.
#[derive(Debug, Clone)]
pub struct MemBlockDevice {
    blocks: Vec<Block>,
}

impl MemBlockDevice {
    /// Creates a zero-filled in-memory device of `block_count` blocks.
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![[0u8; BLOCKSIZE]; block_count as usize],
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<()> {
        let src = self.blocks.get(index as usize).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("block {index} out of range"),
            ))
        })?;
        block.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&mut self, index: u32, block: &Block) -> Result<()> {
        let dst = self.blocks.get_mut(index as usize).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("block {index} out of range"),
            ))
        })?;
        dst.copy_from_slice(block);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_round_trips_blocks() {
        let mut dev = MemBlockDevice::new(4);
        let mut block = [0u8; BLOCKSIZE];
        block[0] = 0xAB;
        dev.write_block(2, &block).unwrap();

        let mut read_back = [0u8; BLOCKSIZE];
        dev.read_block(2, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xAB);

        let mut untouched = [0u8; BLOCKSIZE];
        dev.read_block(1, &mut untouched).unwrap();
        assert_eq!(untouched, [0u8; BLOCKSIZE]);
    }

    #[test]
    fn mem_device_rejects_out_of_range() {
        let mut dev = MemBlockDevice::new(1);
        let block = [0u8; BLOCKSIZE];
        assert!(dev.write_block(5, &block).is_err());
    }

    #[test]
    fn file_device_create_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let mut dev = FileBlockDevice::create(&path, 8).unwrap();
            let mut block = [0u8; BLOCKSIZE];
            block[10] = 0x42;
            dev.write_block(3, &block).unwrap();
            dev.sync().unwrap();
        }
        let mut dev = FileBlockDevice::open(&path).unwrap();
        assert_eq!(dev.block_count(), 8);
        let mut block = [0u8; BLOCKSIZE];
        dev.read_block(3, &mut block).unwrap();
        assert_eq!(block[10], 0x42);
    }
}
