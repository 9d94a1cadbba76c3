//! Published simulation state.
//!
//! The simulation overwrites one frame slot in the region on every
//! exchange; the server reads whatever is current. Only the newest value
//! of each field matters, so there is no queue and no backlog: a slow
//! server simply skips intermediate frames.

use crate::region::{
    SharedRegion, SIM_WORD_ACKED_SEQ, SIM_WORD_ASK_ID, SIM_WORD_ERROR_COUNT, SIM_WORD_FRAME_SEQ,
    SIM_WORD_PROMPT_LEN, SIM_WORD_SPEED, SIM_WORD_STATUS, SIM_WORD_STEP_MICROS,
    SIM_WORD_WORLD_COUNTER, STATUS_PAUSED, STATUS_READY,
};
use crate::{command, ChannelError};

/// A rendered world frame, one word per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<i32>,
}

impl FrameImage {
    /// A solid-color image, mostly useful for tests and placeholders.
    #[must_use]
    pub fn solid(width: i32, height: i32, pixel: i32) -> Self {
        Self {
            width,
            height,
            pixels: vec![pixel; (width.max(0) as usize) * (height.max(0) as usize)],
        }
    }
}

/// An outstanding ask prompt shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    /// Non-zero identifier; a new id marks a new prompt.
    pub id: i32,
    pub prompt: String,
}

/// Everything the simulation publishes in one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUpdate {
    /// Bumped whenever a world is created or discarded.
    pub world_counter: i32,
    /// Current simulation speed.
    pub speed: i32,
    /// Cumulative count of user-code errors.
    pub error_count: i32,
    /// Whether the simulation accepts new invocations.
    pub ready: bool,
    /// Whether the run loop is paused.
    pub paused: bool,
    /// Duration of the last simulated step in microseconds.
    pub sim_step_micros: i32,
    /// Outstanding ask prompt, if any.
    pub ask: Option<AskRequest>,
    /// Latest rendered frame, if a world exists.
    pub image: Option<FrameImage>,
}

impl Default for FrameUpdate {
    fn default() -> Self {
        Self {
            world_counter: 0,
            speed: 50,
            error_count: 0,
            ready: true,
            paused: false,
            sim_step_micros: 0,
            ask: None,
            image: None,
        }
    }
}

/// A frame as read back by the server, with its protocol counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub frame_seq: i32,
    pub acked_command_seq: i32,
    pub update: FrameUpdate,
}

/// Write `update` into the simulation put-area. The caller must hold
/// lock B.
/// Words `update` occupies in the simulation put-area.
#[must_use]
pub fn frame_words(update: &FrameUpdate) -> usize {
    let prompt_words = update
        .ask
        .as_ref()
        .map_or(1, |ask| 1 + ask.prompt.chars().count());
    let image_words = update
        .image
        .as_ref()
        .map_or(2, |image| 2 + image.pixels.len());
    SIM_WORD_PROMPT_LEN + prompt_words + image_words
}

pub fn write_frame(
    region: &mut SharedRegion,
    frame_seq: i32,
    acked_command_seq: i32,
    update: &FrameUpdate,
) -> Result<(), ChannelError> {
    let needed = frame_words(update);
    if needed > region.sim_words() {
        return Err(ChannelError::FrameTooLarge {
            words: needed,
            capacity: region.sim_words(),
        });
    }

    region.write_sim(SIM_WORD_ACKED_SEQ, acked_command_seq);
    region.write_sim(SIM_WORD_WORLD_COUNTER, update.world_counter);
    region.write_sim(SIM_WORD_SPEED, update.speed);
    region.write_sim(SIM_WORD_ERROR_COUNT, update.error_count);
    let mut status = 0;
    if update.ready {
        status |= STATUS_READY;
    }
    if update.paused {
        status |= STATUS_PAUSED;
    }
    region.write_sim(SIM_WORD_STATUS, status);
    region.write_sim(SIM_WORD_STEP_MICROS, update.sim_step_micros);
    region.write_sim(
        SIM_WORD_ASK_ID,
        update.ask.as_ref().map_or(0, |ask| ask.id),
    );

    let mut cursor = SIM_WORD_PROMPT_LEN;
    match &update.ask {
        Some(ask) => {
            let mut words = Vec::with_capacity(1 + ask.prompt.chars().count());
            command::push_string(&mut words, &ask.prompt);
            for word in words {
                region.write_sim(cursor, word);
                cursor += 1;
            }
        }
        None => {
            region.write_sim(cursor, 0);
            cursor += 1;
        }
    }
    match &update.image {
        Some(image) => {
            region.write_sim(cursor, image.width);
            region.write_sim(cursor + 1, image.height);
            cursor += 2;
            for &pixel in &image.pixels {
                region.write_sim(cursor, pixel);
                cursor += 1;
            }
        }
        None => {
            region.write_sim(cursor, 0);
            region.write_sim(cursor + 1, 0);
        }
    }

    // The frame sequence goes last: a peer reading an in-progress write
    // under a racing lock misuse would at worst see the old sequence.
    region.write_sim(SIM_WORD_FRAME_SEQ, frame_seq);
    Ok(())
}

/// Read the simulation put-area. The caller must hold lock B.
pub fn read_frame(region: &SharedRegion) -> Result<FrameSnapshot, ChannelError> {
    let frame_seq = region.read_sim(SIM_WORD_FRAME_SEQ);
    let acked_command_seq = region.read_sim(SIM_WORD_ACKED_SEQ);
    let status = region.read_sim(SIM_WORD_STATUS);

    let ask_id = region.read_sim(SIM_WORD_ASK_ID);
    let prompt_len = region.read_sim(SIM_WORD_PROMPT_LEN);
    if prompt_len < 0 {
        return Err(ChannelError::Malformed("negative prompt length"));
    }
    let prompt_len = prompt_len as usize;
    if SIM_WORD_PROMPT_LEN + 1 + prompt_len + 2 > region.sim_words() {
        return Err(ChannelError::Malformed("prompt overruns the area"));
    }
    let ask = if ask_id != 0 {
        let mut words = Vec::with_capacity(prompt_len + 1);
        for offset in 0..=prompt_len {
            words.push(region.read_sim(SIM_WORD_PROMPT_LEN + offset));
        }
        let (prompt, _) = command::read_string(&words, 0)?;
        Some(AskRequest { id: ask_id, prompt })
    } else {
        None
    };

    let mut cursor = SIM_WORD_PROMPT_LEN + 1 + prompt_len;
    let width = region.read_sim(cursor);
    let height = region.read_sim(cursor + 1);
    cursor += 2;
    if width < 0 || height < 0 {
        return Err(ChannelError::Malformed("negative image dimensions"));
    }
    let pixel_count = (width as usize).saturating_mul(height as usize);
    let image = if pixel_count > 0 {
        if cursor + pixel_count > region.sim_words() {
            return Err(ChannelError::Malformed("image overruns the area"));
        }
        let mut pixels = Vec::with_capacity(pixel_count);
        for offset in 0..pixel_count {
            pixels.push(region.read_sim(cursor + offset));
        }
        Some(FrameImage {
            width,
            height,
            pixels,
        })
    } else {
        None
    };

    Ok(FrameSnapshot {
        frame_seq,
        acked_command_seq,
        update: FrameUpdate {
            world_counter: region.read_sim(SIM_WORD_WORLD_COUNTER),
            speed: region.read_sim(SIM_WORD_SPEED),
            error_count: region.read_sim(SIM_WORD_ERROR_COUNT),
            ready: status & STATUS_READY != 0,
            paused: status & STATUS_PAUSED != 0,
            sim_step_micros: region.read_sim(SIM_WORD_STEP_MICROS),
            ask,
            image,
        },
    })
}
