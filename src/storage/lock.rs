//! Advisory writer lock
//!
//! Writers take a non-blocking exclusive `flock` on the database file. The
//! lock belongs to the open file description and is released when the file
//! is closed, so no explicit unlock path is needed.

use std::fs::File;

use crate::error::{DbmError, Result};

/// Take the exclusive writer lock or fail with `LockHeld`
pub fn try_lock_exclusive(file: &File) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock operates on a descriptor borrowed from a live File.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(DbmError::LockHeld)
        } else {
            Err(DbmError::Io(err))
        }
    }

    #[cfg(not(unix))]
    {
        // No advisory locking primitive; single-writer discipline is the
        // caller's responsibility on this platform.
        let _ = file;
        Ok(())
    }
}
