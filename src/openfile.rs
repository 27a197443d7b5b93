//! Open-file table: up to `MAX_OPEN_FILES` handles live at once, each
//! tracking which directory entry it refers to, the mode it was opened
//! in, and its current read/append position.

use crate::error::{Capacity, Error, Result};
use crate::param::MAX_OPEN_FILES;

/// The access mode a file was opened with.
///
/// Mirrors the two-mode split of the format this table serves: a handle
/// opened for `Read` may only read, one opened for `Append` may only
/// append, and a file can be open in at most one mode at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Append,
}

/// One open-file handle's state.
#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    /// Index of this file's entry in the root directory.
    pub dir_index: usize,
    pub mode: AccessMode,
    /// Current byte offset: read cursor in `Read` mode, always the
    /// file's size in `Append` mode.
    pub position: u32,
}

/// Fixed-capacity table of open handles.
///
/// A handle is the slot's index and stays stable for the lifetime of the
/// open file; `close` simply frees the slot rather than compacting the
/// table, so handles never get silently reassigned out from under a
/// caller still holding one.
pub struct OpenFileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_OPEN_FILES],
        }
    }

    /// True if some open handle already refers to `dir_index`.
    pub fn is_open(&self, dir_index: usize) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s, Some(f) if f.dir_index == dir_index))
    }

    /// The handle referring to `dir_index`, if any is open.
    pub fn find_handle(&self, dir_index: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(f) if f.dir_index == dir_index))
    }

    /// Number of currently open handles.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Allocates a new handle for `dir_index` in `mode`, starting at
    /// `position`.
    pub fn open(&mut self, dir_index: usize, mode: AccessMode, position: u32) -> Result<usize> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::Capacity(Capacity::OpenFiles))?;
        self.slots[slot] = Some(OpenFile {
            dir_index,
            mode,
            position,
        });
        Ok(slot)
    }

    /// The handle at `handle`, if open.
    pub fn get(&self, handle: usize) -> Result<&OpenFile> {
        self.slots
            .get(handle)
            .and_then(|s| s.as_ref())
            .ok_or(Error::State)
    }

    /// Updates the position recorded for `handle`.
    pub fn set_position(&mut self, handle: usize, position: u32) -> Result<()> {
        let slot = self.slots.get_mut(handle).ok_or(Error::State)?;
        let file = slot.as_mut().ok_or(Error::State)?;
        file.position = position;
        Ok(())
    }

    /// Frees `handle`.
    pub fn close(&mut self, handle: usize) -> Result<()> {
        let slot = self.slots.get_mut(handle).ok_or(Error::State)?;
        if slot.take().is_none() {
            return Err(Error::State);
        }
        Ok(())
    }

    /// Every open handle's `dir_index`, used by [`crate::volume::Volume`]
    /// to refuse deleting a file that is still open.
    pub fn open_dir_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().filter_map(|s| s.as_ref().map(|f| f.dir_index))
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_and_capacity() {
        let mut table = OpenFileTable::new();
        let mut handles = Vec::new();
        for i in 0..MAX_OPEN_FILES {
            handles.push(table.open(i, AccessMode::Read, 0).unwrap());
        }
        assert!(matches!(
            table.open(MAX_OPEN_FILES, AccessMode::Read, 0),
            Err(Error::Capacity(Capacity::OpenFiles))
        ));

        table.close(handles[0]).unwrap();
        let reopened = table.open(99, AccessMode::Append, 5).unwrap();
        assert_eq!(reopened, handles[0]);
    }

    #[test]
    fn is_open_tracks_dir_index() {
        let mut table = OpenFileTable::new();
        assert!(!table.is_open(3));
        let handle = table.open(3, AccessMode::Read, 0).unwrap();
        assert!(table.is_open(3));
        table.close(handle).unwrap();
        assert!(!table.is_open(3));
    }

    #[test]
    fn set_position_updates_existing_handle() {
        let mut table = OpenFileTable::new();
        let handle = table.open(0, AccessMode::Append, 0).unwrap();
        table.set_position(handle, 2048).unwrap();
        assert_eq!(table.get(handle).unwrap().position, 2048);
    }

    #[test]
    fn operations_on_closed_handle_fail() {
        let mut table = OpenFileTable::new();
        let handle = table.open(0, AccessMode::Read, 0).unwrap();
        table.close(handle).unwrap();
        assert!(matches!(table.get(handle), Err(Error::State)));
        assert!(matches!(table.close(handle), Err(Error::State)));
    }
}
