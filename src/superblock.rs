//! Superblock: four counters describing the volume, persisted in block 0.

use zerocopy::byteorder::{LittleEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::param::{BLOCKSIZE, METADATA_BLOCKS, SUPERBLOCK_BLOCK};

type LeI32 = I32<LittleEndian>;

/// Bit-exact on-disk layout of block 0.
///
/// `data_block_count` and `total_block_count` at offsets 0 and 4 are
/// immutable after `format`; `free_block_count` and `file_count` at
/// offsets 8 and 12 are the only fields [`Superblock::flush`] rewrites.
#[derive(FromZeroes, FromBytes, AsBytes, Debug, Clone, Copy)]
#[repr(C)]
struct RawSuperblock {
    data_block_count: LeI32,
    total_block_count: LeI32,
    free_block_count: LeI32,
    file_count: LeI32,
    _unused: [u8; BLOCKSIZE - 4 * 4],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawSuperblock>(), BLOCKSIZE);

/// The in-memory superblock cache.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    /// Number of blocks available for file data (`total - METADATA_BLOCKS`).
    pub data_block_count: u32,
    /// Total number of blocks in the volume.
    pub total_block_count: u32,
    /// Number of data blocks currently unallocated.
    pub free_block_count: u32,
    /// Number of allocated directory entries.
    pub file_count: u32,
}

impl Superblock {
    /// Builds a fresh superblock for a volume of `total_blocks` blocks.
    pub fn initialize(total_blocks: u32) -> Self {
        let data_block_count = total_blocks - METADATA_BLOCKS;
        Self {
            data_block_count,
            total_block_count: total_blocks,
            free_block_count: data_block_count,
            file_count: 0,
        }
    }

    /// Loads the superblock from block 0 of `device`.
    pub fn load(device: &mut impl BlockDevice) -> Result<Self> {
        let mut block = [0u8; BLOCKSIZE];
        device.read_block(SUPERBLOCK_BLOCK, &mut block)?;
        let raw = RawSuperblock::read_from(&block[..]).ok_or(Error::Consistency(
            "superblock block has unexpected length",
        ))?;
        Ok(Self {
            data_block_count: raw.data_block_count.get() as u32,
            total_block_count: raw.total_block_count.get() as u32,
            free_block_count: raw.free_block_count.get() as u32,
            file_count: raw.file_count.get() as u32,
        })
    }

    /// Writes the superblock back to block 0 of `device`.
    ///
    /// `data_block_count` and `total_block_count` are rewritten too (they
    /// never change after `format`, so this is idempotent), keeping the
    /// write path a single whole-block write like every other write-through
    /// path in this crate.
    pub fn flush(&self, device: &mut impl BlockDevice) -> Result<()> {
        let raw = RawSuperblock {
            data_block_count: LeI32::new(self.data_block_count as i32),
            total_block_count: LeI32::new(self.total_block_count as i32),
            free_block_count: LeI32::new(self.free_block_count as i32),
            file_count: LeI32::new(self.file_count as i32),
            _unused: [0u8; BLOCKSIZE - 4 * 4],
        };
        let mut block = [0u8; BLOCKSIZE];
        raw.write_to(&mut block[..])
            .expect("RawSuperblock is exactly one block");
        device.write_block(SUPERBLOCK_BLOCK, &block)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    #[test]
    fn initialize_derives_counters_from_total_blocks() {
        let sb = Superblock::initialize(512);
        assert_eq!(sb.total_block_count, 512);
        assert_eq!(sb.data_block_count, 512 - METADATA_BLOCKS);
        assert_eq!(sb.free_block_count, 512 - METADATA_BLOCKS);
        assert_eq!(sb.file_count, 0);
    }

    #[test]
    fn flush_then_load_round_trips() {
        let mut dev = MemBlockDevice::new(512);
        let mut sb = Superblock::initialize(512);
        sb.free_block_count -= 3;
        sb.file_count = 2;
        sb.flush(&mut dev).unwrap();

        let loaded = Superblock::load(&mut dev).unwrap();
        assert_eq!(loaded.free_block_count, sb.free_block_count);
        assert_eq!(loaded.file_count, sb.file_count);
        assert_eq!(loaded.total_block_count, 512);
        assert_eq!(loaded.data_block_count, 512 - METADATA_BLOCKS);
    }
}
