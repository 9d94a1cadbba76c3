//! Demo shell: a supervisor and a simulation sharing one channel.
//!
//! The real deployment runs the two endpoints in separate processes; the
//! shell runs them in two threads of one process to show the full loop:
//! the supervisor scripts a short session (instantiate, run, tweak the
//! speed, pause, discard) while the simulation drains commands, steps a
//! small world of wandering critters, and publishes rendered frames back.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use terrarium_comms::{
    AskRequest, CommandDraft, CommandKind, FrameConsumer, FrameImage, FrameUpdate, ServerChannel,
    ServerConfig, SimChannel,
};
use terrarium_core::{ActorData, Cell, Extent, TerrariumConfig, WorldState};

fn main() -> Result<()> {
    init_tracing();

    let region_bytes = env_usize("TERRARIUM_REGION_BYTES", ServerConfig::default().region_bytes);
    let frames = env_usize("TERRARIUM_FRAMES", 120);

    let dir = tempfile::tempdir().context("creating channel directory")?;
    info!(path = %dir.path().display(), region_bytes, "starting channel");
    let server = ServerChannel::create(dir.path(), &ServerConfig { region_bytes })
        .context("creating server channel")?;

    let sim_dir = dir.path().to_path_buf();
    let (done_tx, done_rx) = mpsc::channel();
    let sim = thread::Builder::new()
        .name("terrarium-sim".into())
        .spawn(move || {
            if let Err(err) = run_simulation(&sim_dir) {
                warn!(error = %err, "simulation loop failed");
            }
            let _ = done_tx.send(());
        })
        .context("spawning simulation thread")?;

    drive_session(&server, frames, &done_rx)?;

    sim.join().ok();
    info!("session complete");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Console-side consumer: log what the simulation publishes.
#[derive(Default)]
struct ConsoleConsumer {
    frames_seen: usize,
}

impl FrameConsumer for ConsoleConsumer {
    fn frame(&mut self, image: &FrameImage) {
        self.frames_seen += 1;
        debug!(
            width = image.width,
            height = image.height,
            frame = self.frames_seen,
            "frame received"
        );
    }

    fn ask(&mut self, request: &AskRequest) {
        info!(id = request.id, prompt = %request.prompt, "simulation asks");
    }

    fn speed_changed(&mut self, speed: i32) {
        info!(speed, "simulation speed changed");
    }

    fn error_count_changed(&mut self, count: i32) {
        info!(count, "simulation error count changed");
    }

    fn world_changed(&mut self, counter: i32) {
        info!(counter, "world lifecycle changed");
    }
}

/// Script the supervisor side of a short session.
fn drive_session(
    server: &ServerChannel,
    frames: usize,
    done: &mpsc::Receiver<()>,
) -> Result<()> {
    let mut consumer = ConsoleConsumer::default();

    server.issue(CommandDraft::instantiate_world("meadow"))?;
    server.issue(CommandDraft::bare(CommandKind::Run))?;

    for frame in 0..frames {
        match frame {
            f if f == frames / 3 => {
                server.issue(CommandDraft::set_speed(80))?;
            }
            f if f == frames / 2 => {
                server.issue(CommandDraft::bare(CommandKind::Pause))?;
                server.issue(CommandDraft::bare(CommandKind::Act))?;
            }
            _ => {}
        }
        let ready = server.poll(&mut consumer);
        debug!(
            frame,
            ready,
            paused = server.sim_paused(),
            pending = server.pending_seqs().len(),
            "supervisor frame"
        );
        thread::sleep(Duration::from_millis(8));
    }

    server.issue(CommandDraft::bare(CommandKind::DiscardWorld))?;
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        server.poll(&mut consumer);
        match done.recv_timeout(Duration::from_millis(5)) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if Instant::now() > deadline {
                    warn!("simulation did not shut down in time");
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!(frames = consumer.frames_seen, "supervisor done");
    Ok(())
}

/// The simulation process: drain commands, step the world, publish state.
fn run_simulation(dir: &std::path::Path) -> Result<()> {
    let mut channel = SimChannel::attach(dir).context("attaching to channel")?;

    let mut world: Option<WorldState> = None;
    let mut running = false;
    let mut speed = 50;
    let mut world_counter = 0;
    let mut step_once = false;

    loop {
        let image = world.as_ref().map(render);
        let update = FrameUpdate {
            world_counter,
            speed,
            error_count: 0,
            ready: true,
            paused: !running,
            sim_step_micros: 0,
            ask: None,
            image,
        };

        let commands = channel.exchange(&update).context("channel exchange")?;
        let mut discard = false;
        for command in commands {
            debug!(seq = command.seq, kind = ?command.kind, "command received");
            match command.kind {
                CommandKind::InstantiateWorld => {
                    world = Some(build_world().context("building world")?);
                    world_counter += 1;
                }
                CommandKind::DiscardWorld => {
                    world = None;
                    world_counter += 1;
                    discard = true;
                }
                CommandKind::Run => running = true,
                CommandKind::Pause => running = false,
                CommandKind::Act => step_once = true,
                CommandKind::SetSpeed => {
                    speed = command.payload.first().copied().unwrap_or(speed);
                }
                _ => {}
            }
        }

        if let Some(world) = world.as_mut() {
            if running || step_once {
                step_once = false;
                let summary = world.step(act_critter);
                debug!(tick = summary.tick.0, actors = summary.actor_count, "stepped");
            }
        }
        if discard {
            return Ok(());
        }
    }
}

/// Build the demo world: a wrapped meadow of wandering critters.
fn build_world() -> Result<WorldState> {
    let mut world = WorldState::new(TerrariumConfig {
        world_width: 32,
        world_height: 24,
        cell_size: 8,
        wrap: true,
        history_capacity: 64,
    })?;
    let critter = world.register_kind("critter", None);
    let mut rng = SmallRng::seed_from_u64(0x7E44);
    for _ in 0..24 {
        world.spawn_actor(ActorData::new(
            Cell::new(rng.random_range(0..32), rng.random_range(0..24)),
            90 * rng.random_range(0..4),
            Extent::new(8, 8),
            critter,
        ));
    }
    Ok(world)
}

/// One critter act: walk forward, turn when bumping into someone.
fn act_critter(world: &mut WorldState, id: terrarium_core::ActorId) {
    let Some(actor) = world.snapshot_actor(id) else {
        return;
    };
    if world.one_intersecting(id, None).is_some() {
        world.turn_actor(id, actor.rotation + 90);
        return;
    }
    let (sin, cos) = f64::from(actor.rotation).to_radians().sin_cos();
    let target = Cell::new(
        actor.location.x + cos.round() as i32,
        actor.location.y + sin.round() as i32,
    );
    world.move_actor(id, target);
}

/// Render one pixel per cell: occupied cells get the critter color.
fn render(world: &WorldState) -> FrameImage {
    let geometry = world.geometry();
    let width = geometry.width();
    let height = geometry.height();
    let mut pixels = vec![0x0020_3010; (width as usize) * (height as usize)];
    for id in world.actors().iter_handles() {
        if let Some(actor) = world.snapshot_actor(id) {
            let offset = actor.location.y as usize * width as usize + actor.location.x as usize;
            pixels[offset] = 0x00FF_D040;
        }
    }
    FrameImage {
        width,
        height,
        pixels,
    }
}
