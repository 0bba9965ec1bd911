use std::fmt;

use serde::{Deserialize, Serialize};

pub mod input;
pub mod message;

pub use input::MidiInputs;
pub use message::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live MIDI input registered with a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiSession {
    pub id: SessionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEventKind {
    /// Packed as `status | data1 << 8 | data2 << 16`.
    Short(u32),
    /// Complete message, `F0` and `F7` included.
    Sysex(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    pub session: SessionId,
    pub kind: MidiEventKind,
    /// Render-frame position the event is due at.
    pub timestamp: u64,
}

/// Number of bytes of a short message with the given status, status included.
pub fn short_message_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(3),
        0xC0..=0xDF => Some(2),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        0xF6 | 0xF8..=0xFF => Some(1),
        _ => None,
    }
}

pub fn pack_short_message(bytes: &[u8]) -> Option<u32> {
    let status = *bytes.first()?;
    let len = short_message_len(status)?;
    let bytes = bytes.get(..len)?;
    Some(
        bytes
            .iter()
            .enumerate()
            .fold(0u32, |msg, (i, b)| msg | (*b as u32) << (8 * i)),
    )
}

pub fn unpack_short_message(msg: u32) -> (u8, u8, u8) {
    (
        msg as u8,
        (msg >> 8) as u8 & 0x7F,
        (msg >> 16) as u8 & 0x7F,
    )
}
