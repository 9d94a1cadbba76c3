//! Shared-memory command channel between the Terrarium supervisor and the
//! simulation process.
//!
//! The two processes share nothing but a single memory-mapped file and
//! three advisory file locks; there is no socket and no message queue. The
//! supervisor ("server") writes commands into its area of the file and the
//! simulation writes its published state (frame image, acknowledgements,
//! errors, speed) into the rest, with a fixed lock rotation handing the
//! areas back and forth. See [`server::ServerChannel`] and
//! [`sim::SimChannel`] for the two endpoints and [`region`] for the
//! layout.
//!
//! Commands are acknowledged by sequence number and retained until the
//! peer's acknowledgement covers them. Published state is
//! overwrite-in-place: only the latest frame matters, so nothing is
//! queued.

pub mod command;
pub mod frame;
pub mod locks;
pub mod region;
pub mod server;
pub mod sim;

use thiserror::Error;

pub use command::{Command, CommandDraft, CommandKind, SequenceGenerator};
pub use frame::{AskRequest, FrameImage, FrameUpdate};
pub use region::{ChannelPaths, SharedRegion, DEFAULT_REGION_BYTES};
pub use server::{FrameConsumer, ServerChannel, ServerConfig};
pub use sim::SimChannel;

/// Errors produced by the channel endpoints.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying file or mapping failure.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The region file is too small to hold the fixed layout.
    #[error("shared region of {bytes} bytes is below the minimum of {minimum}")]
    RegionTooSmall { bytes: usize, minimum: usize },
    /// A single command can never fit the server put-area. This is a
    /// sizing misconfiguration, reported at issue time rather than
    /// deferred forever.
    #[error("command of {words} words exceeds the server area capacity of {capacity}")]
    CommandTooLarge { words: usize, capacity: usize },
    /// A published frame can never fit the simulation put-area.
    #[error("frame of {words} words exceeds the simulation area capacity of {capacity}")]
    FrameTooLarge { words: usize, capacity: usize },
    /// The peer wrote lengths or values outside the agreed layout.
    #[error("malformed peer data: {0}")]
    Malformed(&'static str),
}
