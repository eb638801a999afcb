//! Advisory lock files for processes sharing output files.
//!
//! A lock is held by the existence of the lock file, created exclusively. Acquisition polls until
//! the file can be created or the retry budget is exhausted.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{AssimilationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub poll_interval: Duration,
    /// Number of waits before giving up.
    pub max_attempts: usize,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            poll_interval: Duration::from_secs(1),
            max_attempts: 1_000_000,
        }
    }
}

/// A held lock. The lock file is removed by [`LockFile::release`] or on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    pub fn acquire(path: impl Into<PathBuf>, options: LockOptions) -> Result<LockFile> {
        let path = path.into();
        let mut waits = 0;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(LockFile { path, released: false });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if waits >= options.max_attempts {
                        return Err(AssimilationError::LockTimeout {
                            path,
                            attempts: waits,
                        });
                    }
                    waits += 1;
                    thread::sleep(options.poll_interval);
                }
                Err(e) => return Err(AssimilationError::io(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|e| AssimilationError::io(&self.path, e))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Unable to remove lock {}: {}", self.path.display(), e);
            }
        }
    }
}
