use midly::live::{LiveEvent, SystemCommon};

use super::{pack_short_message, MidiEventKind};

/// Classifies one raw message from an input port.
///
/// Channel messages and system common messages become short messages,
/// sysex is kept whole. Realtime messages (clock, active sensing) carry
/// nothing for the synthesizer and are dropped, as is anything malformed.
pub fn classify(raw: &[u8]) -> Option<MidiEventKind> {
    match LiveEvent::parse(raw).ok()? {
        LiveEvent::Midi { .. } => pack_short_message(raw).map(MidiEventKind::Short),
        LiveEvent::Common(SystemCommon::SysEx(_)) => Some(MidiEventKind::Sysex(raw.to_vec())),
        LiveEvent::Common(_) => pack_short_message(raw).map(MidiEventKind::Short),
        LiveEvent::Realtime(_) => None,
    }
}
