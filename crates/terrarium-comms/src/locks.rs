//! Advisory file locks guarding the region areas.
//!
//! Three locks exist per channel: A guards the server put-area, B the
//! simulation put-area, C the sync area. They rotate between the two
//! processes in a fixed order (see [`crate::server`]); neither side ever
//! blocks on a lock while the peer needs one it holds, which is the whole
//! deadlock-freedom argument.
//!
//! Acquisition has no timeout. If the peer dies while holding a lock the
//! OS releases it with the process; if the peer merely wedges, the caller
//! blocks until external supervision intervenes. That risk is part of the
//! protocol contract rather than something to paper over with timeouts.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::fs_std::FileExt;

use crate::ChannelError;

/// One advisory lock backed by its own lock file.
#[derive(Debug)]
pub struct AreaLock {
    file: File,
    label: &'static str,
}

impl AreaLock {
    /// Create (or reuse) the lock file at `path`.
    pub fn create(path: &Path, label: &'static str) -> Result<Self, ChannelError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, label })
    }

    /// Open an existing lock file created by the peer.
    pub fn open(path: &Path, label: &'static str) -> Result<Self, ChannelError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, label })
    }

    /// Short name of the guarded area, for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Block until the lock is held by this handle.
    pub fn acquire(&self) -> Result<(), ChannelError> {
        self.file.lock_exclusive()?;
        Ok(())
    }

    /// Release the lock.
    pub fn release(&self) -> Result<(), ChannelError> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}
