//! FAT cache: the in-memory mirror of the volume's File Allocation Table.
//!
//! The FAT is an array of `FAT_ENTRY_COUNT` signed 32-bit next-pointers,
//! one per block in the volume (metadata blocks included). Every mutation
//! here is write-through: the in-memory entry and the one on-disk FAT
//! block that owns it are updated in the same call.

use array_macro::array;
use arrayvec::ArrayVec;
use zerocopy::byteorder::{LittleEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::param::{
    BLOCKSIZE, FAT_ENTRIES_PER_BLOCK, FAT_ENTRY_COUNT, FAT_EOF, FAT_FREE, FAT_START,
    METADATA_BLOCKS,
};

type LeI32 = I32<LittleEndian>;

/// One FAT block's worth of raw entries, used only as a read/write-through
/// staging buffer.
#[derive(FromZeroes, FromBytes, AsBytes, Debug, Clone, Copy)]
#[repr(C)]
struct RawFatBlock {
    entries: [LeI32; FAT_ENTRIES_PER_BLOCK],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawFatBlock>(), BLOCKSIZE);

/// The in-memory FAT.
///
/// Boxed because `FAT_ENTRY_COUNT` entries (64 KiB) are too large to keep
/// comfortably on the stack and this cache is long-lived for the whole
/// mount.
pub struct Fat {
    entries: Box<[i32; FAT_ENTRY_COUNT]>,
}

impl Fat {
    /// Block that owns FAT entry `index`.
    fn owning_block(index: u32) -> u32 {
        FAT_START + index / FAT_ENTRIES_PER_BLOCK as u32
    }

    /// Offset of FAT entry `index` within its owning block.
    fn offset_in_block(index: u32) -> usize {
        index as usize % FAT_ENTRIES_PER_BLOCK
    }

    /// Builds a fresh FAT for a volume of `total_blocks` blocks: metadata
    /// blocks and out-of-range indices are `EOF`, everything else is
    /// `FREE`.
    pub fn initialize(total_blocks: u32) -> Self {
        let entries = array![i => {
            let i = i as u32;
            if i < METADATA_BLOCKS || i >= total_blocks {
                FAT_EOF
            } else {
                FAT_FREE
            }
        }; FAT_ENTRY_COUNT];
        Self {
            entries: Box::new(entries),
        }
    }

    /// Loads the FAT from its 32 blocks on `device`.
    pub fn load(device: &mut impl BlockDevice) -> Result<Self> {
        let mut entries = Box::new([0i32; FAT_ENTRY_COUNT]);
        let mut block = [0u8; BLOCKSIZE];
        for (b, chunk) in entries.chunks_mut(FAT_ENTRIES_PER_BLOCK).enumerate() {
            device.read_block(FAT_START + b as u32, &mut block)?;
            let raw = RawFatBlock::read_from(&block[..])
                .ok_or(Error::Consistency("FAT block has unexpected length"))?;
            for (dst, src) in chunk.iter_mut().zip(raw.entries.iter()) {
                *dst = src.get();
            }
        }
        Ok(Self { entries })
    }

    /// Writes the whole FAT back, one block at a time.
    pub fn flush(&self, device: &mut impl BlockDevice) -> Result<()> {
        for (b, chunk) in self.entries.chunks(FAT_ENTRIES_PER_BLOCK).enumerate() {
            let mut raw = RawFatBlock::new_zeroed();
            for (dst, src) in raw.entries.iter_mut().zip(chunk.iter()) {
                *dst = LeI32::new(*src);
            }
            let mut block = [0u8; BLOCKSIZE];
            raw.write_to(&mut block[..])
                .expect("RawFatBlock is exactly one block");
            device.write_block(FAT_START + b as u32, &block)?;
        }
        Ok(())
    }

    /// Returns the entry for `index`.
    pub fn get(&self, index: u32) -> i32 {
        self.entries[index as usize]
    }

    /// Lowest-index entry currently `FREE`, or `None` if the volume is full.
    pub fn find_free(&self) -> Option<u32> {
        self.entries
            .iter()
            .position(|&e| e == FAT_FREE)
            .map(|i| i as u32)
    }

    /// Write-through update of entry `index` to `value`: updates the cache
    /// and rewrites the single FAT block that owns `index`.
    pub fn set(&mut self, device: &mut impl BlockDevice, index: u32, value: i32) -> Result<()> {
        self.entries[index as usize] = value;
        let owning_block = Self::owning_block(index);
        let mut block = [0u8; BLOCKSIZE];
        device.read_block(owning_block, &mut block)?;
        let mut raw = RawFatBlock::read_from(&block[..])
            .ok_or(Error::Consistency("FAT block has unexpected length"))?;
        raw.entries[Self::offset_in_block(index)] = LeI32::new(value);
        raw.write_to(&mut block[..])
            .expect("RawFatBlock is exactly one block");
        device.write_block(owning_block, &block)?;
        Ok(())
    }

    /// Follows next-pointers from `start` until `EOF`, returning the
    /// terminal block index.
    ///
    /// Caller must ensure `start`'s chain is well-formed (non-cyclic,
    /// reaches `EOF`); this is an invariant of every directory entry this
    /// crate itself writes.
    pub fn last_of_chain(&self, start: u32) -> u32 {
        let mut cur = start;
        loop {
            match self.get(cur) {
                FAT_EOF => return cur,
                next => cur = next as u32,
            }
        }
    }

    /// Frees every block in the chain starting at `start`, write-through.
    /// Returns the number of blocks freed, for the caller to add back to
    /// `free_block_count`.
    pub fn free_chain(&mut self, device: &mut impl BlockDevice, start: u32) -> Result<u32> {
        let mut cur = start;
        let mut freed = 0u32;
        loop {
            let next = self.get(cur);
            self.set(device, cur, FAT_FREE)?;
            freed += 1;
            match next {
                FAT_EOF => return Ok(freed),
                next => cur = next as u32,
            }
        }
    }

    /// Collects the full chain starting at `start`, up to `EOF`, used by
    /// [`crate::volume::Volume::read`] and by the consistency checks in
    /// this crate's tests. Bounded by `FAT_ENTRY_COUNT` so a corrupt,
    /// cyclic chain cannot loop forever: exceeding that bound is reported
    /// as [`Error::Consistency`].
    pub fn collect_chain(&self, start: u32) -> Result<ArrayVec<u32, FAT_ENTRY_COUNT>> {
        let mut chain = ArrayVec::new();
        let mut cur = start;
        loop {
            if chain.try_push(cur).is_err() {
                return Err(Error::Consistency("FAT chain longer than the volume"));
            }
            match self.get(cur) {
                FAT_EOF => return Ok(chain),
                next => cur = next as u32,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::param::FAT_START;

    #[test]
    fn initialize_marks_metadata_and_out_of_range_as_eof() {
        let fat = Fat::initialize(512);
        for i in 0..METADATA_BLOCKS {
            assert_eq!(fat.get(i), FAT_EOF);
        }
        assert_eq!(fat.get(METADATA_BLOCKS), FAT_FREE);
        assert_eq!(fat.get(511), FAT_FREE);
        assert_eq!(fat.get(512), FAT_EOF);
    }

    #[test]
    fn set_is_write_through() {
        let mut dev = MemBlockDevice::new(512);
        let mut fat = Fat::initialize(512);
        fat.set(&mut dev, METADATA_BLOCKS, FAT_EOF).unwrap();

        let reloaded = Fat::load(&mut dev).unwrap();
        assert_eq!(reloaded.get(METADATA_BLOCKS), FAT_EOF);
    }

    #[test]
    fn chain_traversal_and_free() {
        let mut dev = MemBlockDevice::new(512);
        let mut fat = Fat::initialize(512);
        let a = METADATA_BLOCKS;
        let b = METADATA_BLOCKS + 1;
        fat.set(&mut dev, a, b as i32).unwrap();
        fat.set(&mut dev, b, FAT_EOF).unwrap();

        assert_eq!(fat.last_of_chain(a), b);
        let chain = fat.collect_chain(a).unwrap();
        assert_eq!(&chain[..], &[a, b]);

        let freed = fat.free_chain(&mut dev, a).unwrap();
        assert_eq!(freed, 2);
        assert_eq!(fat.get(a), FAT_FREE);
        assert_eq!(fat.get(b), FAT_FREE);
    }

    #[test]
    fn flush_and_load_round_trip_whole_fat() {
        let mut dev = MemBlockDevice::new(4096);
        let mut fat = Fat::initialize(4096);
        fat.set(&mut dev, 100, 200).unwrap();
        fat.set(&mut dev, 200, FAT_EOF).unwrap();
        fat.flush(&mut dev).unwrap();

        let reloaded = Fat::load(&mut dev).unwrap();
        assert_eq!(reloaded.get(100), 200);
        assert_eq!(reloaded.get(200), FAT_EOF);

        // Sanity: the FAT itself occupies blocks starting at FAT_START.
        assert_eq!(FAT_START, 1);
    }
}
