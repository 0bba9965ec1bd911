//! Monotonic master clock shared by MIDI sessions and stream timing.

use std::{sync::OnceLock, time::Instant};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
pub fn clock_nanos() -> u64 {
    let origin = ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as u64
}

/// Converts a nanosecond span into a whole number of frames at `sample_rate`.
pub fn nanos_to_frames(nanos: i64, sample_rate: u32) -> i64 {
    (nanos as i128 * sample_rate as i128 / NANOS_PER_SECOND as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = clock_nanos();
        let b = clock_nanos();
        assert!(b >= a);
    }

    #[test]
    fn converts_nanos_to_frames() {
        assert_eq!(nanos_to_frames(1_000_000_000, 48000), 48000);
        assert_eq!(nanos_to_frames(500_000_000, 44100), 22050);
        assert_eq!(nanos_to_frames(-1_000_000_000, 48000), -48000);
    }
}
