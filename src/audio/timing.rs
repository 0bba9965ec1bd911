//! Maps master clock nanoseconds onto the stream's frame positions.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Mutex,
};

use crate::clock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TimeInfo {
    last_played_nanos: u64,
    last_played_frames: u64,
}

/// Timing state of the current stream, shared between the hardware
/// callback (writer) and MIDI sessions (readers).
#[derive(Debug, Default)]
pub struct StreamTiming {
    sample_rate: AtomicU32,
    midi_latency_frames: AtomicU32,
    rendered_frames: AtomicU64,
    underruns: AtomicU64,
    info: Mutex<TimeInfo>,
}

impl StreamTiming {
    pub fn new(sample_rate: u32) -> Self {
        let timing = Self::default();
        timing.reset(sample_rate, 0, clock::clock_nanos());
        timing
    }

    pub fn reset(&self, sample_rate: u32, midi_latency_frames: u32, now_nanos: u64) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.midi_latency_frames
            .store(midi_latency_frames, Ordering::Relaxed);
        self.rendered_frames.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        if let Ok(mut info) = self.info.lock() {
            *info = TimeInfo {
                last_played_nanos: now_nanos,
                last_played_frames: 0,
            };
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn midi_latency_frames(&self) -> u32 {
        self.midi_latency_frames.load(Ordering::Relaxed)
    }

    /// Frames handed to the driver so far, silence included.
    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Relaxed)
    }

    pub fn add_rendered_frames(&self, frames: u64) {
        self.rendered_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that, at `measured_nanos`, `frames_in_audio_buffer` of the
    /// frames rendered so far had not been played yet. Never blocks; the
    /// update is skipped if a reader holds the lock.
    pub fn update_time_info(&self, measured_nanos: u64, frames_in_audio_buffer: u32) {
        if let Ok(mut info) = self.info.try_lock() {
            info.last_played_nanos = measured_nanos;
            info.last_played_frames = self
                .rendered_frames()
                .saturating_sub(frames_in_audio_buffer as u64);
        }
    }

    /// Render-frame position at which an event stamped `nanos` should sound.
    pub fn estimate_midi_timestamp(&self, nanos: u64) -> u64 {
        let info = match self.info.lock() {
            Ok(info) => *info,
            Err(_) => return 0,
        };
        let delta_nanos = nanos as i64 - info.last_played_nanos as i64;
        let delta_frames = clock::nanos_to_frames(delta_nanos, self.sample_rate());
        let timestamp =
            info.last_played_frames as i64 + delta_frames + self.midi_latency_frames() as i64;
        timestamp.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_relative_to_last_update() {
        let timing = StreamTiming::new(1000);
        timing.reset(1000, 100, 5_000_000_000);
        assert_eq!(timing.estimate_midi_timestamp(5_000_000_000), 100);
        assert_eq!(timing.estimate_midi_timestamp(5_500_000_000), 600);

        timing.add_rendered_frames(2000);
        timing.update_time_info(7_000_000_000, 500);
        assert_eq!(timing.estimate_midi_timestamp(7_000_000_000), 1600);
        assert_eq!(timing.estimate_midi_timestamp(7_010_000_000), 1610);
    }

    #[test]
    fn clamps_events_before_stream_start() {
        let timing = StreamTiming::new(1000);
        timing.reset(1000, 0, 5_000_000_000);
        assert_eq!(timing.estimate_midi_timestamp(1_000_000_000), 0);
    }

    #[test]
    fn reset_clears_counters() {
        let timing = StreamTiming::new(48000);
        timing.add_rendered_frames(10);
        timing.record_underrun();
        timing.reset(44100, 0, 0);
        assert_eq!(timing.rendered_frames(), 0);
        assert_eq!(timing.underruns(), 0);
        assert_eq!(timing.sample_rate(), 44100);
    }
}
