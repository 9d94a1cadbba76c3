//! Simulation-side channel endpoint.
//!
//! The simulation drives its half of the lock rotation from its own main
//! loop: one [`SimChannel::exchange`] per rendered simulation frame reads
//! whatever commands the server published and overwrites the published
//! state in place. The call blocks while the server is between cycles
//! (it holds A then), which paces the simulation to the supervisor's
//! consumption rate — that back-pressure is intended, not incidental.

use std::path::Path;

use tracing::{debug, warn};

use crate::command::Command;
use crate::frame::{frame_words, write_frame, FrameUpdate};
use crate::locks::AreaLock;
use crate::region::{ChannelPaths, SharedRegion};
use crate::ChannelError;

/// Word index of the server's frame acknowledgement (see
/// [`crate::server`]).
const SERVER_WORD_LAST_SEEN_FRAME: usize = 0;
/// Word index of the command count.
const SERVER_WORD_COMMAND_COUNT: usize = 1;
/// First command word.
const SERVER_HEADER_WORDS: usize = 2;

/// Simulation endpoint of the channel.
pub struct SimChannel {
    region: SharedRegion,
    lock_a: AreaLock,
    lock_b: AreaLock,
    lock_c: AreaLock,
    epoch: i32,
    frame_seq: i32,
    last_command_seq: i32,
    last_seen_by_server: i32,
}

impl SimChannel {
    /// Attach to a channel the server created in `dir` and take the
    /// initial lock (B).
    pub fn attach(dir: &Path) -> Result<Self, ChannelError> {
        let paths = ChannelPaths::new(dir);
        let region = SharedRegion::open(&paths.region())?;
        let lock_a = AreaLock::open(&paths.lock_a(), "A")?;
        let lock_b = AreaLock::open(&paths.lock_b(), "B")?;
        let lock_c = AreaLock::open(&paths.lock_c(), "C")?;
        lock_b.acquire()?;
        let epoch = region.epoch();
        Ok(Self {
            region,
            lock_a,
            lock_b,
            lock_c,
            epoch,
            frame_seq: 0,
            last_command_seq: 0,
            last_seen_by_server: 0,
        })
    }

    /// Frame sequence the server reported having consumed, as of the
    /// last exchange.
    #[must_use]
    pub fn last_seen_by_server(&self) -> i32 {
        self.last_seen_by_server
    }

    /// Run one simulation-side rotation: read new commands, publish
    /// `update`, and hand the areas back.
    ///
    /// Returns the commands that arrived since the previous exchange, in
    /// issue order. Blocks until the server runs its half of the
    /// rotation.
    pub fn exchange(&mut self, update: &FrameUpdate) -> Result<Vec<Command>, ChannelError> {
        // Size misconfigurations must surface before any lock moves; an
        // error later would leave the rotation in a half-stepped state.
        let needed = frame_words(update);
        if needed > self.region.sim_words() {
            return Err(ChannelError::FrameTooLarge {
                words: needed,
                capacity: self.region.sim_words(),
            });
        }

        self.lock_a.acquire()?;

        // A bumped epoch means the server reset the region underneath a
        // restarted peer; drop every stale counter before trusting it.
        let epoch = self.region.epoch();
        if epoch != self.epoch {
            debug!(epoch, "protocol epoch changed; resetting counters");
            self.epoch = epoch;
            self.last_command_seq = 0;
            self.last_seen_by_server = 0;
        }

        let commands = match self.read_commands() {
            Ok(commands) => commands,
            Err(err) => {
                warn!(error = %err, "discarding malformed command block");
                Vec::new()
            }
        };

        self.frame_seq += 1;
        write_frame(
            &mut self.region,
            self.frame_seq,
            self.last_command_seq,
            update,
        )?;

        self.lock_b.release()?;
        self.lock_c.acquire()?;
        self.lock_a.release()?;
        self.lock_b.acquire()?;
        self.lock_c.release()?;
        Ok(commands)
    }

    /// Decode the server area, skipping commands already seen. The
    /// server republishes unacknowledged commands every cycle, so the
    /// sequence filter is what makes delivery exactly-once.
    fn read_commands(&mut self) -> Result<Vec<Command>, ChannelError> {
        self.last_seen_by_server = self.region.read_server(SERVER_WORD_LAST_SEEN_FRAME);
        let count = self.region.read_server(SERVER_WORD_COMMAND_COUNT);
        if count < 0 || count as usize > self.region.server_words() {
            return Err(ChannelError::Malformed("command count out of range"));
        }

        let capacity = self.region.server_words() - SERVER_HEADER_WORDS;
        let mut fresh = Vec::new();
        let mut cursor = 0_usize;
        for _ in 0..count {
            if cursor + 3 > capacity {
                return Err(ChannelError::Malformed("command block overruns the area"));
            }
            let remaining = capacity - cursor;
            let window: Vec<i32> = (0..remaining.min(3 + self.payload_len_at(cursor)?))
                .map(|offset| self.region.read_server(SERVER_HEADER_WORDS + cursor + offset))
                .collect();
            let (command, consumed) = Command::read(&window)?;
            cursor += consumed;
            if command.seq > self.last_command_seq {
                self.last_command_seq = command.seq;
                fresh.push(command);
            }
        }
        Ok(fresh)
    }

    fn payload_len_at(&self, cursor: usize) -> Result<usize, ChannelError> {
        let len = self
            .region
            .read_server(SERVER_HEADER_WORDS + cursor + 2);
        if len < 0 {
            return Err(ChannelError::Malformed("negative payload length"));
        }
        Ok(len as usize)
    }
}
