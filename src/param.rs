//! On-disk layout constants.
//!
//! These are part of the format's on-disk contract: changing any of them
//! changes the bytes a volume is made of, not just this implementation.

use static_assertions::const_assert_eq;

/// Size of one block, in bytes.
pub const BLOCKSIZE: usize = 2048;

/// Block index of the superblock.
pub const SUPERBLOCK_BLOCK: u32 = 0;

/// First block of the FAT.
pub const FAT_START: u32 = 1;

/// Number of blocks occupied by the FAT.
pub const FAT_BLOCK_COUNT: u32 = 32;

/// Size of one FAT entry, in bytes.
pub const FAT_ENTRY_SIZE: usize = 4;

/// Number of FAT entries that fit in one block.
pub const FAT_ENTRIES_PER_BLOCK: usize = BLOCKSIZE / FAT_ENTRY_SIZE;

/// Total number of FAT entries, i.e. the number of blocks a volume can ever
/// address (metadata and data blocks alike).
pub const FAT_ENTRY_COUNT: usize = FAT_ENTRIES_PER_BLOCK * FAT_BLOCK_COUNT as usize;

/// First block of the root directory.
pub const ROOT_DIR_START: u32 = FAT_START + FAT_BLOCK_COUNT;

/// Number of blocks occupied by the root directory.
pub const ROOT_DIR_BLOCK_COUNT: u32 = 8;

/// Size of one directory entry, in bytes.
pub const DIR_ENTRY_SIZE: usize = 128;

/// Number of directory entries that fit in one block.
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCKSIZE / DIR_ENTRY_SIZE;

/// Total number of directory entries the root directory can hold.
pub const DIR_ENTRY_COUNT: usize = DIR_ENTRIES_PER_BLOCK * ROOT_DIR_BLOCK_COUNT as usize;

/// Number of blocks reserved for metadata (superblock + FAT + root directory).
/// Blocks `0..METADATA_BLOCKS` are never data blocks.
pub const METADATA_BLOCKS: u32 = 1 + FAT_BLOCK_COUNT + ROOT_DIR_BLOCK_COUNT;

/// Maximum length of a filename, including the NUL terminator.
pub const MAX_FILENAME_LENGTH: usize = 30;

/// Maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = 16;

/// Smallest allowed volume size shift (`2^MIN_VOLUME_SHIFT` bytes).
pub const MIN_VOLUME_SHIFT: u32 = 18;

/// Largest allowed volume size shift (`2^MAX_VOLUME_SHIFT` bytes).
pub const MAX_VOLUME_SHIFT: u32 = 23;

/// FAT sentinel meaning "this block is not part of any chain".
pub const FAT_FREE: i32 = 0;

/// FAT sentinel meaning "this block is the last block of its chain".
pub const FAT_EOF: i32 = -1;

const_assert_eq!(FAT_ENTRIES_PER_BLOCK, 512);
const_assert_eq!(FAT_ENTRY_COUNT, 16_384);
const_assert_eq!(DIR_ENTRIES_PER_BLOCK, 16);
const_assert_eq!(DIR_ENTRY_COUNT, 128);
const_assert_eq!(METADATA_BLOCKS, 41);
const_assert_eq!(FAT_ENTRY_SIZE * FAT_ENTRIES_PER_BLOCK, BLOCKSIZE);
const_assert_eq!(DIR_ENTRY_SIZE * DIR_ENTRIES_PER_BLOCK, BLOCKSIZE);
