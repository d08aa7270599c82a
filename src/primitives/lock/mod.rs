#![allow(unsafe_code)]

//! Exclusive ownership of a table file.
//!
//! Ownership is tracked twice: a process-wide registry keyed by the resolved
//! table path, and an OS advisory lock on a sidecar `<table>.lock` file. The
//! registry catches a second owner inside this process (POSIX record locks are
//! per-process), the OS lock catches owners in other processes.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, TableError};

fn registry() -> &'static Mutex<HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Guard proving exclusive ownership of a table; released on drop.
#[derive(Debug)]
pub struct TableLock {
    table_path: PathBuf,
    lock_path: PathBuf,
    file: File,
}

impl TableLock {
    /// Attempts to take ownership of `table_path` without blocking.
    ///
    /// Fails with [`TableError::TableLocked`] when another owner holds it.
    pub fn acquire(table_path: &Path) -> Result<Self> {
        let table_path = table_path.to_path_buf();
        {
            let mut held = registry().lock();
            if !held.insert(table_path.clone()) {
                return Err(TableError::TableLocked(table_path));
            }
        }
        match Self::lock_sidecar(&table_path) {
            Ok(lock) => Ok(lock),
            Err(err) => {
                registry().lock().remove(&table_path);
                Err(err)
            }
        }
    }

    fn lock_sidecar(table_path: &Path) -> Result<Self> {
        let lock_path = sidecar_path(table_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if file.metadata()?.len() < 1 {
            file.set_len(1)?;
        }
        if !try_lock_exclusive(&file)? {
            return Err(TableError::TableLocked(table_path.to_path_buf()));
        }
        debug!(path = %table_path.display(), "lock.acquired");
        Ok(Self {
            table_path: table_path.to_path_buf(),
            lock_path,
            file,
        })
    }

}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(err) = unlock(&self.file) {
            warn!(path = %self.lock_path.display(), error = %err, "lock.unlock_failed");
        }
        registry().lock().remove(&self.table_path);
        debug!(path = %self.table_path.display(), "lock.released");
    }
}

/// Sidecar lock path for a table file.
pub fn sidecar_path(table_path: &Path) -> PathBuf {
    let mut name = table_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    table_path.with_file_name(name)
}

fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, 0, 1)
    }
    #[cfg(windows)]
    {
        windows::lock_region(file, 0, 1)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = file;
        Ok(true)
    }
}

fn unlock(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, 0, 1)
    }
    #[cfg(windows)]
    {
        windows::unlock_region(file, 0, 1)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = file;
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    pub fn lock_region(file: &File, start: u64, len: u64) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_WRLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        loop {
            let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_UNLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock_region(file: &File, start: u64, len: u64) -> io::Result<bool> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Offset = start as u32;
            overlapped.OffsetHigh = (start >> 32) as u32;
            let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
            let res = LockFileEx(
                handle as isize,
                flags,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(true)
            } else {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(code) if code == ERROR_LOCK_VIOLATION as i32) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Offset = start as u32;
            overlapped.OffsetHigh = (start >> 32) as u32;
            let res = UnlockFileEx(handle as isize, 0, len as u32, (len >> 32) as u32, &mut overlapped);
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}
