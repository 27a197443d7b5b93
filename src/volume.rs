//! File operations: the public API orchestrating the block device and the
//! three caches.

use std::path::Path;

use log::{debug, warn};
use scopeguard::ScopeGuard;

use crate::device::{BlockDevice, FileBlockDevice};
use crate::directory::Directory;
use crate::error::{Capacity, Error, Result};
use crate::fat::Fat;
use crate::openfile::{AccessMode, OpenFileTable};
use crate::param::{BLOCKSIZE, DIR_ENTRY_COUNT, FAT_EOF, MAX_OPEN_FILES, MAX_VOLUME_SHIFT, MIN_VOLUME_SHIFT};
use crate::superblock::Superblock;

/// Options controlling how [`Volume::mount`] brings a volume up.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    /// Recompute `free_block_count` and `file_count` from the loaded FAT
    /// and directory caches instead of trusting the on-disk superblock
    /// counters. Off by default.
    pub scrub: bool,
}

/// A mounted volume: the block device plus the three caches and the
/// open-file table that live for the duration of the mount.
///
/// Every operation is a method on `&mut Volume`; there is no process-global
/// state here (see [`crate::compat`] for callers that want that shape).
pub struct Volume<D: BlockDevice> {
    device: D,
    superblock: Superblock,
    fat: Fat,
    directory: Directory,
    open_files: OpenFileTable,
    closed: bool,
}

impl Volume<FileBlockDevice> {
    /// Creates (or overwrites) the host container at `path` with `2^m`
    /// bytes and initializes an empty volume on it. Does not mount it.
    pub fn format(path: impl AsRef<Path>, m: u32) -> Result<()> {
        if !(MIN_VOLUME_SHIFT..=MAX_VOLUME_SHIFT).contains(&m) {
            warn!("format: volume shift {m} out of range");
            return Err(Error::Range);
        }
        let size = 1u64 << m;
        if size % BLOCKSIZE as u64 != 0 {
            warn!("format: 2^{m} is not a multiple of the block size");
            return Err(Error::Range);
        }
        let total_blocks = (size / BLOCKSIZE as u64) as u32;
        let device = FileBlockDevice::create(path.as_ref(), total_blocks)?;

        // If initialization fails partway, don't leave a file that looks
        // formatted but isn't; remove it on any early return.
        let cleanup = scopeguard::guard(path.as_ref().to_path_buf(), |p| {
            if let Err(e) = std::fs::remove_file(&p) {
                warn!(
                    "format: failed to remove partially-initialized container at {}: {e}",
                    p.display()
                );
            }
        });
        Self::format_device(device, total_blocks)?;
        ScopeGuard::into_inner(cleanup);

        debug!(
            "format: {} initialized with {total_blocks} blocks",
            path.as_ref().display()
        );
        Ok(())
    }

    /// Opens the host container at `path` and mounts it.
    pub fn mount(path: impl AsRef<Path>, options: MountOptions) -> Result<Self> {
        let device = FileBlockDevice::open(path.as_ref())?;
        let volume = Self::mount_device(device, options)?;
        debug!("mount: {} mounted", path.as_ref().display());
        Ok(volume)
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Initializes an empty volume of `total_blocks` blocks directly on
    /// `device`, without requiring a file-backed container. Used by
    /// [`Volume::format`] and by tests that exercise the core against an
    /// in-memory device.
    pub fn format_device(mut device: D, total_blocks: u32) -> Result<()> {
        let superblock = Superblock::initialize(total_blocks);
        let fat = Fat::initialize(total_blocks);
        let directory = Directory::initialize();
        superblock.flush(&mut device)?;
        fat.flush(&mut device)?;
        directory.flush(&mut device)?;
        device.sync()?;
        Ok(())
    }

    /// Loads the three caches from an already-formatted `device` and
    /// mounts it.
    pub fn mount_device(mut device: D, options: MountOptions) -> Result<Self> {
        let mut superblock = Superblock::load(&mut device)?;
        let fat = Fat::load(&mut device)?;
        let directory = Directory::load(&mut device)?;

        if options.scrub {
            let free = (crate::param::METADATA_BLOCKS..superblock.total_block_count)
                .filter(|&i| fat.get(i) == crate::param::FAT_FREE)
                .count() as u32;
            let files = (0..DIR_ENTRY_COUNT)
                .filter(|&i| directory.get(i).allocated)
                .count() as u32;
            if free != superblock.free_block_count || files != superblock.file_count {
                warn!(
                    "mount: scrub corrected free_block_count {} -> {free}, file_count {} -> {files}",
                    superblock.free_block_count, superblock.file_count
                );
            }
            superblock.free_block_count = free;
            superblock.file_count = files;
        }

        Ok(Self {
            device,
            superblock,
            fat,
            directory,
            open_files: OpenFileTable::new(),
            closed: false,
        })
    }

    /// Flushes the superblock, FAT, and directory, closes all handles, and
    /// ensures durability before releasing the container.
    pub fn unmount(mut self) -> Result<()> {
        self.superblock.flush(&mut self.device)?;
        self.fat.flush(&mut self.device)?;
        self.directory.flush(&mut self.device)?;
        self.device.sync()?;
        self.closed = true;
        debug!("unmount: volume flushed and closed");
        Ok(())
    }

    /// Creates a new, empty file named `name`.
    pub fn create(&mut self, name: &str) -> Result<()> {
        if self.superblock.file_count as usize >= DIR_ENTRY_COUNT {
            warn!("create({name}): directory full");
            return Err(Error::Capacity(Capacity::Directory));
        }
        if self.directory.find_by_name(name).is_some() {
            warn!("create({name}): name already exists");
            return Err(Error::Duplicate);
        }
        let block = self.fat.find_free().ok_or_else(|| {
            warn!("create({name}): no free block");
            Error::Capacity(Capacity::Fat)
        })?;
        let slot = self.directory.find_free_slot().ok_or_else(|| {
            log::error!("create({name}): no free directory slot despite file_count check");
            Error::Consistency("directory full despite file_count check")
        })?;

        self.fat.set(&mut self.device, block, FAT_EOF)?;
        self.superblock.free_block_count -= 1;
        self.directory.allocate(&mut self.device, slot, name, block)?;
        self.superblock.file_count += 1;
        debug!("create({name}): slot {slot}, block {block}");
        Ok(())
    }

    /// Opens `name` in `mode`, returning a handle.
    pub fn open(&mut self, name: &str, mode: AccessMode) -> Result<usize> {
        if self.open_files.count() == MAX_OPEN_FILES {
            warn!("open({name}): open-file table full");
            return Err(Error::Capacity(Capacity::OpenFiles));
        }
        let dir_index = self.directory.find_by_name(name).ok_or_else(|| {
            warn!("open({name}): no such file");
            Error::NotFound
        })?;
        if self.open_files.is_open(dir_index) {
            warn!("open({name}): already open");
            return Err(Error::Duplicate);
        }
        let position = match mode {
            AccessMode::Read => 0,
            AccessMode::Append => self.directory.get(dir_index).size,
        };
        let handle = self.open_files.open(dir_index, mode, position)?;
        debug!("open({name}): handle {handle}");
        Ok(handle)
    }

    /// Closes `handle`.
    pub fn close(&mut self, handle: usize) -> Result<()> {
        self.open_files.close(handle)?;
        debug!("close: handle {handle}");
        Ok(())
    }

    /// The current size, in bytes, of the file behind `handle`.
    pub fn size(&self, handle: usize) -> Result<u32> {
        let file = self.open_files.get(handle)?;
        Ok(self.directory.get(file.dir_index).size)
    }

    /// Reads `buf.len()` bytes from `handle`'s current position, advancing
    /// it. Requires the handle was opened in [`AccessMode::Read`].
    pub fn read(&mut self, handle: usize, buf: &mut [u8]) -> Result<usize> {
        let file = *self.open_files.get(handle)?;
        if file.mode != AccessMode::Read {
            warn!("read: handle {handle} not opened for reading");
            return Err(Error::Mode);
        }
        let entry = *self.directory.get(file.dir_index);
        let start = file.position as usize;
        let end = start + buf.len();
        if end > entry.size as usize {
            warn!("read: handle {handle} requested past end of file");
            return Err(Error::Range);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let chain = self.fat.collect_chain(entry.start_block)?;
        let mut block_buf = [0u8; BLOCKSIZE];
        let mut pos = start;
        let mut copied = 0usize;
        while pos < end {
            let logical = pos / BLOCKSIZE;
            let block_index = *chain.get(logical).ok_or_else(|| {
                log::error!("read: FAT chain shorter than recorded file size");
                Error::Consistency("FAT chain shorter than recorded file size")
            })?;
            self.device.read_block(block_index, &mut block_buf)?;
            let offset = pos % BLOCKSIZE;
            let take = (end - pos).min(BLOCKSIZE - offset);
            buf[copied..copied + take].copy_from_slice(&block_buf[offset..offset + take]);
            copied += take;
            pos += take;
        }
        self.open_files.set_position(handle, end as u32)?;
        Ok(copied)
    }

    /// Appends `buf` to the file behind `handle`. Requires the handle was
    /// opened in [`AccessMode::Append`] and `buf` is non-empty.
    pub fn append(&mut self, handle: usize, buf: &[u8]) -> Result<usize> {
        let n = buf.len();
        if n == 0 {
            warn!("append: handle {handle} called with empty buffer");
            return Err(Error::Range);
        }
        let file = *self.open_files.get(handle)?;
        if file.mode != AccessMode::Append {
            warn!("append: handle {handle} not opened for appending");
            return Err(Error::Mode);
        }
        let entry = *self.directory.get(file.dir_index);
        let size = entry.size as usize;
        let initial_cursor = if size > 0 && size % BLOCKSIZE == 0 {
            BLOCKSIZE
        } else {
            size % BLOCKSIZE
        };
        let needed_blocks = if n <= BLOCKSIZE - initial_cursor {
            0
        } else {
            let extra = n - (BLOCKSIZE - initial_cursor);
            (extra + BLOCKSIZE - 1) / BLOCKSIZE
        };
        if needed_blocks as u32 > self.superblock.free_block_count {
            warn!("append: handle {handle} needs {needed_blocks} blocks, only {} free", self.superblock.free_block_count);
            return Err(Error::Capacity(Capacity::Fat));
        }

        let mut last_block = self.fat.last_of_chain(entry.start_block);
        let mut cursor = initial_cursor;
        let mut written = 0usize;
        let mut block_buf = [0u8; BLOCKSIZE];
        while written < n {
            if cursor == BLOCKSIZE {
                let new_block = self.fat.find_free().ok_or(Error::Capacity(Capacity::Fat))?;
                self.fat.set(&mut self.device, new_block, FAT_EOF)?;
                self.fat.set(&mut self.device, last_block, new_block as i32)?;
                self.superblock.free_block_count -= 1;
                last_block = new_block;
                cursor = 0;
                block_buf = [0u8; BLOCKSIZE];
            } else {
                self.device.read_block(last_block, &mut block_buf)?;
            }
            let take = (n - written).min(BLOCKSIZE - cursor);
            block_buf[cursor..cursor + take].copy_from_slice(&buf[written..written + take]);
            self.device.write_block(last_block, &block_buf)?;
            cursor += take;
            written += take;
        }

        let new_size = (size + n) as u32;
        self.directory
            .set_size(&mut self.device, file.dir_index, new_size)?;
        self.open_files.set_position(handle, new_size)?;
        debug!("append: handle {handle} wrote {written} bytes, new size {new_size}");
        Ok(written)
    }

    /// Deletes `name`: silently closes any handle open on it, frees its
    /// block chain, and clears its directory entry.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let dir_index = self.directory.find_by_name(name).ok_or_else(|| {
            warn!("delete({name}): no such file");
            Error::NotFound
        })?;
        if let Some(handle) = self.open_files.find_handle(dir_index) {
            self.open_files.close(handle)?;
        }
        let entry = *self.directory.get(dir_index);
        self.directory.clear_slot(&mut self.device, dir_index)?;
        let freed = self.fat.free_chain(&mut self.device, entry.start_block)?;
        self.superblock.free_block_count += freed;
        self.superblock.file_count -= 1;
        debug!("delete({name}): slot {dir_index}, freed {freed} blocks");
        Ok(())
    }

    /// Current superblock counters, for diagnostics and tests.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }
}

impl<D: BlockDevice> Drop for Volume<D> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.superblock.flush(&mut self.device) {
                warn!("volume dropped without unmount, best-effort flush failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn format_and_mount(total_blocks: u32) -> Volume<MemBlockDevice> {
        let _ = env_logger::try_init();
        let mut device = MemBlockDevice::new(total_blocks);
        let superblock = Superblock::initialize(total_blocks);
        let fat = Fat::initialize(total_blocks);
        let directory = Directory::initialize();
        superblock.flush(&mut device).unwrap();
        fat.flush(&mut device).unwrap();
        directory.flush(&mut device).unwrap();
        Volume::mount_device(device, MountOptions::default()).unwrap()
    }

    #[test]
    fn scenario_format_yields_expected_free_blocks() {
        // 2^20 bytes / 2048 = 512 blocks, 512 - 41 = 471 free.
        let volume = format_and_mount(512);
        assert_eq!(volume.superblock().free_block_count, 471);
        assert_eq!(volume.superblock().file_count, 0);
    }

    #[test]
    fn create_duplicate_name_fails() {
        let mut volume = format_and_mount(512);
        volume.create("a").unwrap();
        assert!(matches!(volume.create("a"), Err(Error::Duplicate)));
        assert_eq!(volume.superblock().file_count, 1);
    }

    #[test]
    fn append_then_read_round_trips() {
        let mut volume = format_and_mount(512);
        volume.create("x").unwrap();
        let data = vec![0xABu8; 5000];

        let wh = volume.open("x", AccessMode::Append).unwrap();
        let written = volume.append(wh, &data).unwrap();
        assert_eq!(written, 5000);
        volume.close(wh).unwrap();

        let rh = volume.open("x", AccessMode::Read).unwrap();
        assert_eq!(volume.size(rh).unwrap(), 5000);
        let mut readback = vec![0u8; 5000];
        let read = volume.read(rh, &mut readback).unwrap();
        assert_eq!(read, 5000);
        assert_eq!(readback, data);
        volume.close(rh).unwrap();

        // create's block + two more for the remaining 4096 bytes = 3 blocks used.
        assert_eq!(volume.superblock().free_block_count, 471 - 3);
    }

    #[test]
    fn append_exactly_one_block_does_not_allocate_extra() {
        let mut volume = format_and_mount(512);
        volume.create("y").unwrap();
        let before = volume.superblock().free_block_count;
        let wh = volume.open("y", AccessMode::Append).unwrap();
        volume.append(wh, &vec![b'A'; BLOCKSIZE]).unwrap();
        assert_eq!(volume.superblock().free_block_count, before - 1);

        volume.append(wh, &[b'B']).unwrap();
        assert_eq!(volume.superblock().free_block_count, before - 2);
        volume.close(wh).unwrap();
    }

    #[test]
    fn read_past_eof_fails_and_leaves_position_unchanged() {
        let mut volume = format_and_mount(512);
        volume.create("z").unwrap();
        let wh = volume.open("z", AccessMode::Append).unwrap();
        volume.append(wh, b"hello").unwrap();
        volume.close(wh).unwrap();

        let rh = volume.open("z", AccessMode::Read).unwrap();
        let mut buf = [0u8; 10];
        assert!(matches!(volume.read(rh, &mut buf), Err(Error::Range)));
        assert_eq!(volume.open_files_position_for_test(rh), 0);
    }

    #[test]
    fn delete_restores_free_block_count_and_forgets_name() {
        let mut volume = format_and_mount(512);
        let before = volume.superblock().free_block_count;
        volume.create("z").unwrap();
        let wh = volume.open("z", AccessMode::Append).unwrap();
        volume.append(wh, &vec![b'A'; BLOCKSIZE]).unwrap();
        volume.close(wh).unwrap();

        volume.delete("z").unwrap();
        assert_eq!(volume.superblock().free_block_count, before);
        assert!(volume.directory.find_by_name("z").is_none());
    }

    impl<D: BlockDevice> Volume<D> {
        fn open_files_position_for_test(&self, handle: usize) -> u32 {
            self.open_files.get(handle).unwrap().position
        }
    }
}
