//! Shared region file and its fixed layout.
//!
//! The region is a single file, memory-mapped by both processes. Every
//! field is a 4-byte native-endian integer. The layout is the wire
//! contract both endpoints agree on:
//!
//! ```text
//! offset 0                       4 bytes   sync area: protocol epoch
//! offset 4 .. SIM_AREA_OFFSET    server put-area (commands + acks)
//! offset SIM_AREA_OFFSET ..      simulation put-area (published state)
//! ```
//!
//! Server put-area words: `last_seen_frame, command_count, commands...`.
//! Simulation put-area words: `frame_seq, acked_command_seq,
//! world_counter, speed, error_count, status_flags, sim_step_micros,
//! ask_id, prompt_len, prompt..., image_width, image_height, pixels...`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::ChannelError;

/// Default size of the shared region file.
pub const DEFAULT_REGION_BYTES: usize = 20_000_000;

/// Byte offset where the server put-area starts (after the sync word).
pub const SERVER_AREA_OFFSET: usize = 4;

/// Byte offset where the simulation put-area starts.
pub const SIM_AREA_OFFSET: usize = 16 * 1024;

/// Smallest region that leaves the simulation a useful put-area.
pub const MIN_REGION_BYTES: usize = SIM_AREA_OFFSET + 256;

/// Word index of the simulation's frame sequence number.
pub const SIM_WORD_FRAME_SEQ: usize = 0;
/// Word index of the simulation's command acknowledgement.
pub const SIM_WORD_ACKED_SEQ: usize = 1;
/// Word index of the world lifecycle counter.
pub const SIM_WORD_WORLD_COUNTER: usize = 2;
/// Word index of the current simulation speed.
pub const SIM_WORD_SPEED: usize = 3;
/// Word index of the cumulative error count.
pub const SIM_WORD_ERROR_COUNT: usize = 4;
/// Word index of the status flag bits.
pub const SIM_WORD_STATUS: usize = 5;
/// Word index of the last simulated step duration in microseconds.
pub const SIM_WORD_STEP_MICROS: usize = 6;
/// Word index of the ask prompt identifier (0 = no prompt).
pub const SIM_WORD_ASK_ID: usize = 7;
/// Word index where the prompt length (then prompt, then image) begins.
pub const SIM_WORD_PROMPT_LEN: usize = 8;

/// Status bit: the simulation is ready for new invocations.
pub const STATUS_READY: i32 = 1;
/// Status bit: the simulation is paused.
pub const STATUS_PAUSED: i32 = 1 << 1;

/// File names of one channel's region and lock files inside a directory.
#[derive(Debug, Clone)]
pub struct ChannelPaths {
    dir: PathBuf,
}

impl ChannelPaths {
    /// Address a channel living in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the shared region file.
    #[must_use]
    pub fn region(&self) -> PathBuf {
        self.dir.join("terrarium.region")
    }

    /// Path of the lock file guarding the server put-area.
    #[must_use]
    pub fn lock_a(&self) -> PathBuf {
        self.dir.join("area-a.lock")
    }

    /// Path of the lock file guarding the simulation put-area.
    #[must_use]
    pub fn lock_b(&self) -> PathBuf {
        self.dir.join("area-b.lock")
    }

    /// Path of the lock file guarding the sync area.
    #[must_use]
    pub fn lock_c(&self) -> PathBuf {
        self.dir.join("area-c.lock")
    }
}

/// Memory-mapped view of the region file.
///
/// Mutual exclusion is entirely the caller's business: reads and writes
/// are only valid while holding the lock for the touched area.
#[derive(Debug)]
pub struct SharedRegion {
    map: MmapMut,
}

impl SharedRegion {
    /// Create (or truncate) the region file at `path` with `bytes` total
    /// size and map it.
    pub fn create(path: &Path, bytes: usize) -> Result<Self, ChannelError> {
        if bytes < MIN_REGION_BYTES {
            return Err(ChannelError::RegionTooSmall {
                bytes,
                minimum: MIN_REGION_BYTES,
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(bytes as u64)?;
        // SAFETY: the file was just created with the requested length and
        // is never resized afterwards; concurrent access to the mapping is
        // serialized by the area locks.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    /// Map an existing region file created by the peer.
    pub fn open(path: &Path) -> Result<Self, ChannelError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let bytes = file.metadata()?.len() as usize;
        if bytes < MIN_REGION_BYTES {
            return Err(ChannelError::RegionTooSmall {
                bytes,
                minimum: MIN_REGION_BYTES,
            });
        }
        // SAFETY: the creating side sized the file before publishing its
        // path and never resizes it; access is serialized by the area
        // locks.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    /// Total size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Regions are never empty; present for completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of whole words available in the server put-area.
    #[must_use]
    pub fn server_words(&self) -> usize {
        (SIM_AREA_OFFSET - SERVER_AREA_OFFSET) / 4
    }

    /// Number of whole words available in the simulation put-area.
    #[must_use]
    pub fn sim_words(&self) -> usize {
        (self.len() - SIM_AREA_OFFSET) / 4
    }

    /// The protocol epoch stored in the sync area.
    #[must_use]
    pub fn epoch(&self) -> i32 {
        self.read_at(0)
    }

    /// Overwrite the protocol epoch.
    pub fn set_epoch(&mut self, epoch: i32) {
        self.write_at(0, epoch);
    }

    /// Read a word from the server put-area.
    #[must_use]
    pub fn read_server(&self, word: usize) -> i32 {
        debug_assert!(word < self.server_words());
        self.read_at(SERVER_AREA_OFFSET + word * 4)
    }

    /// Write a word into the server put-area.
    pub fn write_server(&mut self, word: usize, value: i32) {
        debug_assert!(word < self.server_words());
        self.write_at(SERVER_AREA_OFFSET + word * 4, value);
    }

    /// Read a word from the simulation put-area.
    #[must_use]
    pub fn read_sim(&self, word: usize) -> i32 {
        debug_assert!(word < self.sim_words());
        self.read_at(SIM_AREA_OFFSET + word * 4)
    }

    /// Write a word into the simulation put-area.
    pub fn write_sim(&mut self, word: usize, value: i32) {
        debug_assert!(word < self.sim_words());
        self.write_at(SIM_AREA_OFFSET + word * 4, value);
    }

    /// Zero the entire region, sync word included.
    pub fn zero(&mut self) {
        self.map.fill(0);
    }

    /// Flush the mapping to the backing file.
    pub fn flush(&self) -> Result<(), ChannelError> {
        self.map.flush()?;
        Ok(())
    }

    fn read_at(&self, offset: usize) -> i32 {
        let b = &self.map[offset..offset + 4];
        i32::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    fn write_at(&mut self, offset: usize, value: i32) {
        self.map[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }
}
