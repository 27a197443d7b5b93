//! Single-global-volume compatibility layer, for callers porting code
//! written against the original C-shaped interface (§6): every function
//! here returns `0`/a non-negative count on success and `-1` on failure,
//! operating on one implicitly mounted volume behind a process-global
//! mutex.
//!
//! This is a thin wrapper around [`crate::volume::Volume`]; the
//! `Result`-returning methods there are the primary API.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use log::warn;

use crate::device::FileBlockDevice;
use crate::error::Result;
use crate::openfile::AccessMode;
use crate::volume::{MountOptions, Volume};

static VOLUME: OnceLock<Mutex<Option<Volume<FileBlockDevice>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Volume<FileBlockDevice>>> {
    VOLUME.get_or_init(|| Mutex::new(None))
}

/// Runs `f` against the currently mounted volume. Returns `None` (and logs
/// a warning) if no volume is mounted or `f` itself fails.
fn with_volume<T>(f: impl FnOnce(&mut Volume<FileBlockDevice>) -> Result<T>) -> Option<T> {
    let mut guard = slot().lock().unwrap();
    let volume = guard.as_mut()?;
    match f(volume) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("compat: operation failed: {e}");
            None
        }
    }
}

/// `format(path, m)`.
pub fn format(path: impl AsRef<Path>, m: u32) -> i32 {
    match Volume::format(path, m) {
        Ok(()) => 0,
        Err(e) => {
            warn!("compat: format failed: {e}");
            -1
        }
    }
}

/// `mount(path)`.
pub fn mount(path: impl AsRef<Path>) -> i32 {
    let mut guard = slot().lock().unwrap();
    if guard.is_some() {
        warn!("compat: mount called while a volume is already mounted");
        return -1;
    }
    match Volume::mount(path, MountOptions::default()) {
        Ok(volume) => {
            *guard = Some(volume);
            0
        }
        Err(e) => {
            warn!("compat: mount failed: {e}");
            -1
        }
    }
}

/// `unmount()`.
pub fn unmount() -> i32 {
    let mut guard = slot().lock().unwrap();
    match guard.take() {
        Some(volume) => match volume.unmount() {
            Ok(()) => 0,
            Err(e) => {
                warn!("compat: unmount failed: {e}");
                -1
            }
        },
        None => {
            warn!("compat: unmount called with nothing mounted");
            -1
        }
    }
}

/// `create(name)`.
pub fn create(name: &str) -> i32 {
    with_volume(|v| v.create(name)).map_or(-1, |()| 0)
}

/// `delete(name)`.
pub fn delete(name: &str) -> i32 {
    with_volume(|v| v.delete(name)).map_or(-1, |()| 0)
}

/// `open(name, mode)`, `mode` is `0` for read, `1` for append.
pub fn open(name: &str, mode: i32) -> i32 {
    let mode = match mode {
        0 => AccessMode::Read,
        1 => AccessMode::Append,
        other => {
            warn!("compat: open called with unknown mode {other}");
            return -1;
        }
    };
    with_volume(|v| v.open(name, mode)).map_or(-1, |fd| fd as i32)
}

/// `close(fd)`.
pub fn close(fd: i32) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    with_volume(|v| v.close(fd)).map_or(-1, |()| 0)
}

/// `size(fd)`.
pub fn size(fd: i32) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    with_volume(|v| v.size(fd)).map_or(-1, |size| size as i32)
}

/// `read(fd, buf, n)`.
pub fn read(fd: i32, buf: &mut [u8]) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    with_volume(|v| v.read(fd, buf)).map_or(-1, |n| n as i32)
}

/// `append(fd, buf, n)`.
pub fn append(fd: i32, buf: &[u8]) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    with_volume(|v| v.append(fd, buf)).map_or(-1, |n| n as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // The compat layer is one process-global volume, so its tests must not
    // run concurrently with each other.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn round_trip_through_compat_functions() {
        let _ = env_logger::try_init();
        let _guard = TEST_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.img");

        assert_eq!(format(&path, 18), 0);
        assert_eq!(mount(&path), 0);
        assert_eq!(create("a"), 0);
        assert_eq!(create("a"), -1);

        let fd = open("a", 1);
        assert!(fd >= 0);
        assert_eq!(append(fd, b"hello"), 5);
        assert_eq!(close(fd), 0);

        let fd = open("a", 0);
        assert!(fd >= 0);
        assert_eq!(size(fd), 5);
        let mut buf = [0u8; 5];
        assert_eq!(read(fd, &mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(close(fd), 0);

        assert_eq!(delete("a"), 0);
        assert_eq!(unmount(), 0);
    }

    #[test]
    fn mount_without_format_fails() {
        let _guard = TEST_LOCK.lock().unwrap();
        assert_eq!(unmount(), -1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.img");
        assert_eq!(mount(&path), -1);
    }
}
