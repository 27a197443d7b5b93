//! Root-directory cache: the flat table of every file on the volume.
//!
//! There are no subdirectories. Each of the `DIR_ENTRY_COUNT` slots is
//! either free or holds one file's name, size, and the index of the first
//! block of its FAT chain.

use std::ffi::CStr;

use zerocopy::byteorder::{LittleEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::param::{
    BLOCKSIZE, DIR_ENTRIES_PER_BLOCK, DIR_ENTRY_COUNT, DIR_ENTRY_SIZE, MAX_FILENAME_LENGTH,
    ROOT_DIR_START,
};

type LeI32 = I32<LittleEndian>;

/// Bit-exact on-disk layout of one directory entry.
#[derive(FromZeroes, FromBytes, AsBytes, Debug, Clone, Copy)]
#[repr(C)]
struct RawDirEntry {
    filename: [u8; MAX_FILENAME_LENGTH],
    size: LeI32,
    start_block: LeI32,
    allocated: LeI32,
    _unused: [u8; DIR_ENTRY_SIZE - MAX_FILENAME_LENGTH - 4 * 3],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawDirEntry>(), DIR_ENTRY_SIZE);

/// One in-memory directory slot.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub allocated: bool,
    pub filename: [u8; MAX_FILENAME_LENGTH],
    pub size: u32,
    pub start_block: u32,
}

impl DirEntry {
    const FREE: Self = Self {
        allocated: false,
        filename: [0u8; MAX_FILENAME_LENGTH],
        size: 0,
        start_block: 0,
    };

    /// The name as a `&str`, stopping at the NUL terminator.
    pub fn name(&self) -> Result<&str> {
        CStr::from_bytes_until_nul(&self.filename)
            .map_err(|_| Error::Consistency("directory entry filename is not NUL-terminated"))?
            .to_str()
            .map_err(|_| Error::Consistency("directory entry filename is not valid UTF-8"))
    }
}

/// Encodes `name` into a fixed `MAX_FILENAME_LENGTH`-byte, NUL-terminated
/// buffer. `name` must fit including its terminator and must not itself
/// contain a NUL byte.
fn encode_name(name: &str) -> Result<[u8; MAX_FILENAME_LENGTH]> {
    let bytes = name.as_bytes();
    if bytes.contains(&0) || bytes.len() >= MAX_FILENAME_LENGTH {
        return Err(Error::Range);
    }
    let mut buf = [0u8; MAX_FILENAME_LENGTH];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// The in-memory root-directory cache.
pub struct Directory {
    entries: Box<[DirEntry; DIR_ENTRY_COUNT]>,
}

impl Directory {
    /// Builds a fresh, empty directory.
    pub fn initialize() -> Self {
        Self {
            entries: Box::new([DirEntry::FREE; DIR_ENTRY_COUNT]),
        }
    }

    /// Loads the directory from its blocks on `device`.
    pub fn load(device: &mut impl BlockDevice) -> Result<Self> {
        let mut entries = Box::new([DirEntry::FREE; DIR_ENTRY_COUNT]);
        let mut block = [0u8; BLOCKSIZE];
        for (b, chunk) in entries.chunks_mut(DIR_ENTRIES_PER_BLOCK).enumerate() {
            device.read_block(ROOT_DIR_START + b as u32, &mut block)?;
            for (slot, raw_bytes) in chunk.iter_mut().zip(block.chunks(DIR_ENTRY_SIZE)) {
                let raw = RawDirEntry::read_from(raw_bytes)
                    .ok_or(Error::Consistency("directory entry has unexpected length"))?;
                *slot = DirEntry {
                    allocated: raw.allocated.get() != 0,
                    filename: raw.filename,
                    size: raw.size.get() as u32,
                    start_block: raw.start_block.get() as u32,
                };
            }
        }
        Ok(Self { entries })
    }

    /// Writes the whole directory back, one block at a time.
    pub fn flush(&self, device: &mut impl BlockDevice) -> Result<()> {
        for (b, chunk) in self.entries.chunks(DIR_ENTRIES_PER_BLOCK).enumerate() {
            let mut block = [0u8; BLOCKSIZE];
            for (slot, dst_bytes) in chunk.iter().zip(block.chunks_mut(DIR_ENTRY_SIZE)) {
                let raw = RawDirEntry {
                    filename: slot.filename,
                    size: LeI32::new(slot.size as i32),
                    start_block: LeI32::new(slot.start_block as i32),
                    allocated: LeI32::new(slot.allocated as i32),
                    _unused: [0u8; DIR_ENTRY_SIZE - MAX_FILENAME_LENGTH - 4 * 3],
                };
                raw.write_to(dst_bytes)
                    .expect("RawDirEntry is exactly one directory entry");
            }
            device.write_block(ROOT_DIR_START + b as u32, &block)?;
        }
        Ok(())
    }

    /// Entry at `index`, if any.
    pub fn get(&self, index: usize) -> &DirEntry {
        &self.entries[index]
    }

    /// Finds the allocated entry named `name`.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.allocated && e.name().ok() == Some(name))
    }

    /// Lowest-index free slot, or `None` if the directory is full.
    pub fn find_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.allocated)
    }

    /// Write-through allocation of slot `index` as `name` starting at
    /// `start_block`, initially empty.
    pub fn allocate(
        &mut self,
        device: &mut impl BlockDevice,
        index: usize,
        name: &str,
        start_block: u32,
    ) -> Result<()> {
        let filename = encode_name(name)?;
        self.entries[index] = DirEntry {
            allocated: true,
            filename,
            size: 0,
            start_block,
        };
        self.write_slot(device, index)
    }

    /// Write-through update of the size recorded for slot `index`.
    pub fn set_size(&mut self, device: &mut impl BlockDevice, index: usize, size: u32) -> Result<()> {
        self.entries[index].size = size;
        self.write_slot(device, index)
    }

    /// Write-through free of slot `index`.
    pub fn clear_slot(&mut self, device: &mut impl BlockDevice, index: usize) -> Result<()> {
        self.entries[index] = DirEntry::FREE;
        self.write_slot(device, index)
    }

    /// Rewrites the single directory block that owns slot `index`.
    fn write_slot(&self, device: &mut impl BlockDevice, index: usize) -> Result<()> {
        let owning_block = ROOT_DIR_START + (index / DIR_ENTRIES_PER_BLOCK) as u32;
        let mut block = [0u8; BLOCKSIZE];
        device.read_block(owning_block, &mut block)?;
        let offset = (index % DIR_ENTRIES_PER_BLOCK) * DIR_ENTRY_SIZE;
        let entry = &self.entries[index];
        let raw = RawDirEntry {
            filename: entry.filename,
            size: LeI32::new(entry.size as i32),
            start_block: LeI32::new(entry.start_block as i32),
            allocated: LeI32::new(entry.allocated as i32),
            _unused: [0u8; DIR_ENTRY_SIZE - MAX_FILENAME_LENGTH - 4 * 3],
        };
        raw.write_to(&mut block[offset..offset + DIR_ENTRY_SIZE])
            .expect("RawDirEntry is exactly one directory entry");
        device.write_block(owning_block, &block)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use itertools::Itertools;

    fn dev() -> MemBlockDevice {
        MemBlockDevice::new(64)
    }

    #[test]
    fn allocate_find_and_clear_round_trip() {
        let mut dev = dev();
        let mut dir = Directory::initialize();
        dir.allocate(&mut dev, 0, "hello.txt", 41).unwrap();

        let idx = dir.find_by_name("hello.txt").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(dir.get(0).start_block, 41);
        assert_eq!(dir.get(0).size, 0);

        dir.set_size(&mut dev, 0, 1234).unwrap();
        assert_eq!(dir.get(0).size, 1234);

        dir.clear_slot(&mut dev, 0).unwrap();
        assert!(dir.find_by_name("hello.txt").is_none());
    }

    #[test]
    fn flush_and_load_round_trip_whole_directory() {
        let mut dev = dev();
        let mut dir = Directory::initialize();
        dir.allocate(&mut dev, 0, "a", 41).unwrap();
        dir.allocate(&mut dev, 17, "b", 42).unwrap();
        dir.flush(&mut dev).unwrap();

        let reloaded = Directory::load(&mut dev).unwrap();
        assert_eq!(reloaded.get(0).name().unwrap(), "a");
        assert_eq!(reloaded.get(17).name().unwrap(), "b");
        assert!(!reloaded.get(1).allocated);
    }

    #[test]
    fn rejects_name_too_long_or_containing_nul() {
        let mut dev = dev();
        let mut dir = Directory::initialize();
        let too_long = "x".repeat(MAX_FILENAME_LENGTH);
        assert!(dir.allocate(&mut dev, 0, &too_long, 41).is_err());
        assert!(dir.allocate(&mut dev, 0, "a\0b", 41).is_err());
    }

    #[test]
    fn allocated_names_are_pairwise_distinct() {
        let mut dev = dev();
        let mut dir = Directory::initialize();
        dir.allocate(&mut dev, 0, "a", 41).unwrap();
        dir.allocate(&mut dev, 1, "b", 42).unwrap();
        dir.allocate(&mut dev, 2, "c", 43).unwrap();

        let names: Vec<&str> = (0..3).map(|i| dir.get(i).name().unwrap()).collect();
        assert_eq!(names.iter().duplicates().count(), 0);
    }
}
