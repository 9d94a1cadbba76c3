//! Supervisor-side channel endpoint.
//!
//! The server owns the region file and the background worker thread that
//! runs the lock rotation. Three parties touch the shared state:
//!
//! - any thread may [`ServerChannel::issue`] commands; they go on a
//!   pending list and stay there until the simulation acknowledges their
//!   sequence numbers,
//! - the worker performs one full rotation per cycle, then parks until
//!   the consumer signals it, so it runs at most once per consumed frame
//!   instead of spinning,
//! - the consumer thread calls [`ServerChannel::poll`] once per rendered
//!   frame to drain what the last cycle produced.
//!
//! The rotation order is load-bearing. Steady state: server holds A and
//! C, simulation holds B. Server cycle: write commands into A, release A,
//! acquire B, read the published frame, release C, re-acquire A, release
//! B, re-acquire C. The simulation runs the mirror image. Every wait is
//! B after A, A after C, or C after B, so the two sides chase each other
//! around a ring and neither can close a cycle of waits.
//!
//! Lock acquisition has no timeout by design; a dead peer releases its
//! locks with its process, a wedged peer blocks the worker (and only the
//! worker) until supervision kills it.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::command::{Command, CommandDraft, SequenceGenerator};
use crate::frame::{read_frame, AskRequest, FrameImage, FrameSnapshot};
use crate::locks::AreaLock;
use crate::region::{ChannelPaths, SharedRegion, DEFAULT_REGION_BYTES};
use crate::ChannelError;

/// Sink for state the simulation published since the last poll.
///
/// Each callback fires at most once per poll, only when the underlying
/// value changed; the pending flag is cleared by delivery.
pub trait FrameConsumer {
    /// A new rendered frame arrived.
    fn frame(&mut self, image: &FrameImage);
    /// A new ask prompt wants an answer.
    fn ask(&mut self, request: &AskRequest);
    /// The simulation speed changed.
    fn speed_changed(&mut self, speed: i32);
    /// The cumulative error count changed.
    fn error_count_changed(&mut self, count: i32);
    /// A world was created or discarded.
    fn world_changed(&mut self, counter: i32);
}

/// Tunables for one server endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Total size of the shared region file.
    pub region_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            region_bytes: DEFAULT_REGION_BYTES,
        }
    }
}

/// Mutable channel state shared between issuers, worker, and consumer.
#[derive(Debug, Default)]
struct ServerState {
    pending: VecDeque<Command>,
    seq: SequenceGenerator,
    last_frame_seq: i32,
    acked_seq: i32,
    ready: bool,
    paused: bool,
    // Overwrite-latest slots drained by poll().
    new_image: Option<FrameImage>,
    new_ask: Option<AskRequest>,
    new_speed: Option<i32>,
    new_error_count: Option<i32>,
    new_world_counter: Option<i32>,
    // Change detection against the previous cycle.
    seen_speed: Option<i32>,
    seen_error_count: Option<i32>,
    seen_world_counter: Option<i32>,
    seen_ask_id: i32,
    // Worker handshake.
    cycle_requested: bool,
    worker_idle: bool,
    resetting: bool,
    shutdown: bool,
}

struct ServerShared {
    state: Mutex<ServerState>,
    /// Signals the worker that a cycle was requested or shutdown began.
    wake_worker: Condvar,
    /// Signals waiters that the worker reached its idle state.
    idle_changed: Condvar,
}

/// Region plus locks, owned by the worker during a cycle and by
/// [`ServerChannel::vm_terminated`] during a reset.
struct RegionIo {
    region: SharedRegion,
    lock_a: AreaLock,
    lock_b: AreaLock,
    lock_c: AreaLock,
}

/// Supervisor endpoint of the channel.
pub struct ServerChannel {
    shared: Arc<ServerShared>,
    io: Arc<Mutex<RegionIo>>,
    worker: Option<JoinHandle<()>>,
    command_capacity: usize,
}

impl ServerChannel {
    /// Create the region and lock files in `dir`, take the initial locks
    /// (A and C), and start the worker.
    pub fn create(dir: &Path, config: &ServerConfig) -> Result<Self, ChannelError> {
        let paths = ChannelPaths::new(dir);
        let region = SharedRegion::create(&paths.region(), config.region_bytes)?;
        let lock_a = AreaLock::create(&paths.lock_a(), "A")?;
        let lock_b = AreaLock::create(&paths.lock_b(), "B")?;
        let lock_c = AreaLock::create(&paths.lock_c(), "C")?;
        lock_a.acquire()?;
        lock_c.acquire()?;

        let command_capacity = region.server_words() - SERVER_HEADER_WORDS;
        let shared = Arc::new(ServerShared {
            state: Mutex::new(ServerState::default()),
            wake_worker: Condvar::new(),
            idle_changed: Condvar::new(),
        });
        let io = Arc::new(Mutex::new(RegionIo {
            region,
            lock_a,
            lock_b,
            lock_c,
        }));

        let worker_shared = Arc::clone(&shared);
        let worker_io = Arc::clone(&io);
        let worker = std::thread::Builder::new()
            .name("terrarium-comms-worker".into())
            .spawn(move || worker_loop(&worker_shared, &worker_io))?;

        Ok(Self {
            shared,
            io,
            worker: Some(worker),
            command_capacity,
        })
    }

    /// Queue a command for delivery, returning its sequence number.
    ///
    /// Thread-safe and non-blocking: the command is encoded here and
    /// shipped by the worker's next cycle. A command that can never fit
    /// the server area fails immediately.
    pub fn issue(&self, draft: CommandDraft) -> Result<i32, ChannelError> {
        if draft.encoded_words() > self.command_capacity {
            return Err(ChannelError::CommandTooLarge {
                words: draft.encoded_words(),
                capacity: self.command_capacity,
            });
        }
        let mut state = self.shared.state.lock().unwrap();
        let seq = state.seq.take();
        state.pending.push_back(Command {
            seq,
            kind: draft.kind,
            payload: draft.payload,
        });
        Ok(seq)
    }

    /// Sequence numbers of commands not yet acknowledged, in issue order.
    #[must_use]
    pub fn pending_seqs(&self) -> Vec<i32> {
        let state = self.shared.state.lock().unwrap();
        state.pending.iter().map(|command| command.seq).collect()
    }

    /// Whether the simulation reported its run loop paused, as of the
    /// last completed cycle.
    #[must_use]
    pub fn sim_paused(&self) -> bool {
        self.shared.state.lock().unwrap().paused
    }

    /// Drain everything the last cycle produced into `consumer` and
    /// request the next cycle. Returns whether the simulation side is
    /// ready to accept new invocations.
    ///
    /// Call once per rendered frame from the consumer thread. Each
    /// changed value is delivered exactly once.
    pub fn poll<C: FrameConsumer>(&self, consumer: &mut C) -> bool {
        let (image, ask, speed, errors, world, ready) = {
            let mut state = self.shared.state.lock().unwrap();
            state.cycle_requested = true;
            self.shared.wake_worker.notify_all();
            (
                state.new_image.take(),
                state.new_ask.take(),
                state.new_speed.take(),
                state.new_error_count.take(),
                state.new_world_counter.take(),
                state.ready,
            )
        };
        if let Some(image) = image {
            consumer.frame(&image);
        }
        if let Some(ask) = ask {
            consumer.ask(&ask);
        }
        if let Some(speed) = speed {
            consumer.speed_changed(speed);
        }
        if let Some(count) = errors {
            consumer.error_count_changed(count);
        }
        if let Some(counter) = world {
            consumer.world_changed(counter);
        }
        ready
    }

    /// Reset the channel after the simulation process terminated.
    ///
    /// Waits for the worker to reach its quiescent state, jumps the
    /// sequence counter so stale acknowledgements from the old process
    /// can never cover new commands, clears the pending list, zeroes the
    /// region, and bumps the protocol epoch for the next process to see.
    pub fn vm_terminated(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.resetting = true;
            while !state.worker_idle {
                state = self.shared.idle_changed.wait(state).unwrap();
            }
            state.seq.jump();
            state.pending.clear();
            state.last_frame_seq = 0;
            state.acked_seq = 0;
            state.ready = false;
            state.paused = false;
            state.new_image = None;
            state.new_ask = None;
            state.new_speed = None;
            state.new_error_count = None;
            state.new_world_counter = None;
            state.seen_speed = None;
            state.seen_error_count = None;
            state.seen_world_counter = None;
            state.seen_ask_id = 0;
        }

        // The worker is parked, so the region is safe to touch.
        let result = {
            let mut io = self.io.lock().unwrap();
            let epoch = io.region.epoch();
            io.region.zero();
            io.region.set_epoch(epoch.wrapping_add(1));
            io.region.flush()
        };

        let mut state = self.shared.state.lock().unwrap();
        state.resetting = false;
        self.shared.wake_worker.notify_all();
        drop(state);
        result
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.wake_worker.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Words reserved at the front of the server area: the frame
/// acknowledgement and the command count.
const SERVER_HEADER_WORDS: usize = 2;

/// Word index of the server's frame acknowledgement.
const SERVER_WORD_LAST_SEEN_FRAME: usize = 0;
/// Word index of the command count.
const SERVER_WORD_COMMAND_COUNT: usize = 1;

fn worker_loop(shared: &ServerShared, io: &Mutex<RegionIo>) {
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            state.worker_idle = true;
            shared.idle_changed.notify_all();
            while !state.shutdown && (!state.cycle_requested || state.resetting) {
                state = shared.wake_worker.wait(state).unwrap();
            }
            if state.shutdown {
                return;
            }
            state.cycle_requested = false;
            state.worker_idle = false;
        }
        if let Err(err) = run_cycle(shared, io) {
            // Abandon this cycle and retry on the next request; errors
            // here must never reach the consumer thread synchronously.
            warn!(error = %err, "channel cycle failed");
        }
    }
}

/// One full lock rotation: publish pending commands, collect the peer's
/// frame. The acquire/release order must not be reordered.
fn run_cycle(shared: &ServerShared, io: &Mutex<RegionIo>) -> Result<(), ChannelError> {
    let mut io = io.lock().unwrap();

    // Holding A: publish acks and as many whole pending commands as fit.
    let outgoing = {
        let state = shared.state.lock().unwrap();
        let mut words: Vec<i32> = Vec::new();
        let mut count = 0;
        let capacity = io.region.server_words() - SERVER_HEADER_WORDS;
        for command in &state.pending {
            if words.len() + command.encoded_words() > capacity {
                // Never split a command; the remainder stays pending and
                // keeps its order for the next cycle.
                break;
            }
            command.write(&mut words);
            count += 1;
        }
        debug!(commands = count, frame_ack = state.last_frame_seq, "publishing cycle");
        (state.last_frame_seq, count, words)
    };
    io.region
        .write_server(SERVER_WORD_LAST_SEEN_FRAME, outgoing.0);
    io.region.write_server(SERVER_WORD_COMMAND_COUNT, outgoing.1);
    for (offset, word) in outgoing.2.iter().enumerate() {
        io.region.write_server(SERVER_HEADER_WORDS + offset, *word);
    }

    io.lock_a.release()?;
    io.lock_b.acquire()?;
    let snapshot = read_frame(&io.region);
    io.lock_c.release()?;
    io.lock_a.acquire()?;
    io.lock_b.release()?;
    io.lock_c.acquire()?;
    drop(io);

    match snapshot {
        Ok(snapshot) => apply_snapshot(shared, snapshot),
        Err(err) => warn!(error = %err, "discarding malformed frame"),
    }
    Ok(())
}

fn apply_snapshot(shared: &ServerShared, snapshot: FrameSnapshot) {
    let mut state = shared.state.lock().unwrap();

    // Acknowledged commands leave the pending list for good.
    state.acked_seq = state.acked_seq.max(snapshot.acked_command_seq);
    let acked = state.acked_seq;
    state.pending.retain(|command| command.seq > acked);

    if snapshot.frame_seq == 0 {
        // Nothing published yet (or a zeroed region after a reset);
        // change detection would otherwise fire on the zero values.
        state.ready = false;
        state.paused = false;
        return;
    }

    let update = snapshot.update;
    state.ready = update.ready;
    state.paused = update.paused;

    if snapshot.frame_seq > state.last_frame_seq {
        state.last_frame_seq = snapshot.frame_seq;
        if let Some(image) = update.image {
            state.new_image = Some(image);
        }
    }
    if state.seen_speed != Some(update.speed) {
        state.seen_speed = Some(update.speed);
        state.new_speed = Some(update.speed);
    }
    if state.seen_error_count != Some(update.error_count) {
        state.seen_error_count = Some(update.error_count);
        state.new_error_count = Some(update.error_count);
    }
    if state.seen_world_counter != Some(update.world_counter) {
        state.seen_world_counter = Some(update.world_counter);
        state.new_world_counter = Some(update.world_counter);
    }
    if let Some(ask) = update.ask {
        if ask.id != state.seen_ask_id {
            state.seen_ask_id = ask.id;
            state.new_ask = Some(ask);
        }
    }
}
