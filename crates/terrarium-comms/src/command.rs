//! Command model and wire encoding.
//!
//! Every field crossing the process boundary is a 4-byte integer. A
//! command is encoded as `seq, kind, payload_len, payload...`; strings
//! inside payloads are a codepoint count followed by that many Unicode
//! codepoints (chars, not UTF-16 units — a single emoji is one word).

use crate::ChannelError;

/// Sequence jump applied when the simulation process is restarted, so
/// acknowledgements from the old process can never cover new commands.
pub const RESET_SEQUENCE_JUMP: i32 = 1_000_000;

/// Discriminant of a command crossing the channel.
///
/// Wire values start at 1 so a zeroed region decodes as "no command".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandKind {
    KeyDown = 1,
    KeyUp = 2,
    KeyTyped = 3,
    MouseClicked = 4,
    MousePressed = 5,
    MouseDragged = 6,
    MouseReleased = 7,
    MouseMoved = 8,
    MouseExited = 9,
    Run = 10,
    ContinueDrag = 11,
    EndDrag = 12,
    Pause = 13,
    Act = 14,
    InstantiateWorld = 15,
    Answered = 16,
    PropertyChanged = 17,
    DiscardWorld = 18,
    SetSpeed = 19,
    WorldFocusGained = 20,
    WorldFocusLost = 21,
}

impl CommandKind {
    /// Decode a wire discriminant.
    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        Some(match value {
            1 => Self::KeyDown,
            2 => Self::KeyUp,
            3 => Self::KeyTyped,
            4 => Self::MouseClicked,
            5 => Self::MousePressed,
            6 => Self::MouseDragged,
            7 => Self::MouseReleased,
            8 => Self::MouseMoved,
            9 => Self::MouseExited,
            10 => Self::Run,
            11 => Self::ContinueDrag,
            12 => Self::EndDrag,
            13 => Self::Pause,
            14 => Self::Act,
            15 => Self::InstantiateWorld,
            16 => Self::Answered,
            17 => Self::PropertyChanged,
            18 => Self::DiscardWorld,
            19 => Self::SetSpeed,
            20 => Self::WorldFocusGained,
            21 => Self::WorldFocusLost,
            _ => return None,
        })
    }
}

/// An unsequenced command request, built by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDraft {
    pub kind: CommandKind,
    pub payload: Vec<i32>,
}

impl CommandDraft {
    /// A command with no payload.
    #[must_use]
    pub fn bare(kind: CommandKind) -> Self {
        Self {
            kind,
            payload: Vec::new(),
        }
    }

    /// Key event carrying a key code.
    #[must_use]
    pub fn key(kind: CommandKind, code: i32) -> Self {
        Self {
            kind,
            payload: vec![code],
        }
    }

    /// Key-typed event carrying a key code and the typed text.
    #[must_use]
    pub fn key_typed(code: i32, text: &str) -> Self {
        let mut payload = vec![code];
        push_string(&mut payload, text);
        Self {
            kind: CommandKind::KeyTyped,
            payload,
        }
    }

    /// Mouse event carrying position, button, and click count.
    #[must_use]
    pub fn mouse(kind: CommandKind, x: i32, y: i32, button: i32, clicks: i32) -> Self {
        Self {
            kind,
            payload: vec![x, y, button, clicks],
        }
    }

    /// Instantiate the named world.
    #[must_use]
    pub fn instantiate_world(name: &str) -> Self {
        let mut payload = Vec::new();
        push_string(&mut payload, name);
        Self {
            kind: CommandKind::InstantiateWorld,
            payload,
        }
    }

    /// Answer to the current ask prompt.
    #[must_use]
    pub fn answered(answer: &str) -> Self {
        let mut payload = Vec::new();
        push_string(&mut payload, answer);
        Self {
            kind: CommandKind::Answered,
            payload,
        }
    }

    /// Project property update; `None` deletes the key.
    #[must_use]
    pub fn property_changed(key: &str, value: Option<&str>) -> Self {
        let mut payload = Vec::new();
        push_string(&mut payload, key);
        match value {
            Some(value) => {
                payload.push(1);
                push_string(&mut payload, value);
            }
            None => payload.push(0),
        }
        Self {
            kind: CommandKind::PropertyChanged,
            payload,
        }
    }

    /// Change the simulation speed.
    #[must_use]
    pub fn set_speed(speed: i32) -> Self {
        Self {
            kind: CommandKind::SetSpeed,
            payload: vec![speed],
        }
    }

    /// Words this draft occupies on the wire once sequenced.
    #[must_use]
    pub fn encoded_words(&self) -> usize {
        3 + self.payload.len()
    }
}

/// A sequenced command as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: i32,
    pub kind: CommandKind,
    pub payload: Vec<i32>,
}

impl Command {
    /// Words this command occupies on the wire.
    #[must_use]
    pub fn encoded_words(&self) -> usize {
        3 + self.payload.len()
    }

    /// Append the wire form to a word buffer.
    pub fn write(&self, out: &mut Vec<i32>) {
        out.push(self.seq);
        out.push(self.kind as i32);
        out.push(self.payload.len() as i32);
        out.extend_from_slice(&self.payload);
    }

    /// Decode one command starting at `words[0]`, returning it and the
    /// number of words consumed.
    pub fn read(words: &[i32]) -> Result<(Self, usize), ChannelError> {
        if words.len() < 3 {
            return Err(ChannelError::Malformed("truncated command header"));
        }
        let seq = words[0];
        let kind = CommandKind::from_wire(words[1])
            .ok_or(ChannelError::Malformed("unknown command discriminant"))?;
        let len = words[2];
        if len < 0 || (len as usize) > words.len() - 3 {
            return Err(ChannelError::Malformed("command payload length out of range"));
        }
        let payload = words[3..3 + len as usize].to_vec();
        Ok((Self { seq, kind, payload }, 3 + len as usize))
    }

    /// Decode a string from the payload starting at `cursor`, returning
    /// the string and the next cursor position.
    pub fn read_string(&self, cursor: usize) -> Result<(String, usize), ChannelError> {
        read_string(&self.payload, cursor)
    }
}

/// Append a codepoint-encoded string to a word buffer.
pub fn push_string(out: &mut Vec<i32>, text: &str) {
    let start = out.len();
    out.push(0);
    let mut count = 0_i32;
    for ch in text.chars() {
        out.push(ch as i32);
        count += 1;
    }
    out[start] = count;
}

/// Decode a codepoint-encoded string from a word buffer.
pub fn read_string(words: &[i32], cursor: usize) -> Result<(String, usize), ChannelError> {
    let Some(&count) = words.get(cursor) else {
        return Err(ChannelError::Malformed("truncated string length"));
    };
    if count < 0 || cursor + 1 + count as usize > words.len() {
        return Err(ChannelError::Malformed("string length out of range"));
    }
    let mut text = String::with_capacity(count as usize);
    for &word in &words[cursor + 1..cursor + 1 + count as usize] {
        let ch = u32::try_from(word)
            .ok()
            .and_then(char::from_u32)
            .ok_or(ChannelError::Malformed("invalid codepoint in string"))?;
        text.push(ch);
    }
    Ok((text, cursor + 1 + count as usize))
}

/// Monotonically increasing command sequence source.
///
/// One generator lives inside each channel instance; independent channels
/// (and tests) never share a counter.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: i32,
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceGenerator {
    /// Start a fresh sequence at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next sequence number.
    pub fn take(&mut self) -> i32 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Jump the sequence forward after a peer restart.
    pub fn jump(&mut self) {
        self.next += RESET_SEQUENCE_JUMP;
    }

    /// The next sequence number that would be issued.
    #[must_use]
    pub const fn peek(&self) -> i32 {
        self.next
    }
}
