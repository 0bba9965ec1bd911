use crate::{audio::Frame, error::SynthError};

pub mod rusty;

pub use rusty::RustySynth;

/// Frames a synthesizer renders per call unless it says otherwise.
pub const DEFAULT_MAX_FRAMES_PER_RUN: usize = 4096;

/// A software synthesizer the route drives.
///
/// Every call comes from whichever thread is rendering at the time: the
/// producer thread, or the hardware callback thread in synchronous mode.
/// Implementations must not block or allocate in `render` or in message
/// handling.
pub trait Synth: Send {
    fn name(&self) -> &str;

    fn open(&mut self, sample_rate: u32) -> Result<(), SynthError>;

    fn close(&mut self);

    /// `msg` is packed as `status | data1 << 8 | data2 << 16`.
    fn play_short_message(&mut self, msg: u32);

    fn play_sysex(&mut self, data: &[u8]);

    /// Fills `frames`, at most [`Synth::max_frames_per_run`] of them.
    fn render(&mut self, frames: &mut [Frame]);

    fn reset(&mut self);

    fn max_frames_per_run(&self) -> usize {
        DEFAULT_MAX_FRAMES_PER_RUN
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    /// Left channel carries the running frame count, right its negation.
    pub struct RampSynth {
        position: u64,
        max_frames: usize,
    }

    impl RampSynth {
        pub fn with_max_frames(max_frames: usize) -> Self {
            Self {
                position: 0,
                max_frames,
            }
        }
    }

    impl Default for RampSynth {
        fn default() -> Self {
            Self::with_max_frames(DEFAULT_MAX_FRAMES_PER_RUN)
        }
    }

    impl Synth for RampSynth {
        fn name(&self) -> &str {
            "ramp"
        }

        fn open(&mut self, _sample_rate: u32) -> Result<(), SynthError> {
            self.position = 0;
            Ok(())
        }

        fn close(&mut self) {}

        fn play_short_message(&mut self, _msg: u32) {}

        fn play_sysex(&mut self, _data: &[u8]) {}

        fn render(&mut self, frames: &mut [Frame]) {
            assert!(frames.len() <= self.max_frames, "render call too large");
            for frame in frames {
                let value = self.position as f32;
                *frame = [value, -value];
                self.position += 1;
            }
        }

        fn reset(&mut self) {}

        fn max_frames_per_run(&self) -> usize {
            self.max_frames
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        Short(u32),
        Sysex(Vec<u8>),
        Reset,
    }

    pub type RecordLog = Arc<Mutex<Vec<(u64, Recorded)>>>;

    /// Records every call together with the frame position it arrived at.
    pub struct RecordingSynth {
        position: u64,
        fail_open: bool,
        log: RecordLog,
    }

    impl RecordingSynth {
        pub fn new() -> (Self, RecordLog) {
            let log = RecordLog::default();
            let synth = Self {
                position: 0,
                fail_open: false,
                log: Arc::clone(&log),
            };
            (synth, log)
        }

        pub fn failing() -> Self {
            let (mut synth, _) = Self::new();
            synth.fail_open = true;
            synth
        }

        fn record(&self, entry: Recorded) {
            self.log.lock().unwrap().push((self.position, entry));
        }
    }

    impl Synth for RecordingSynth {
        fn name(&self) -> &str {
            "recording"
        }

        fn open(&mut self, _sample_rate: u32) -> Result<(), SynthError> {
            if self.fail_open {
                return Err(SynthError::Init("no sound bank".into()));
            }
            self.position = 0;
            Ok(())
        }

        fn close(&mut self) {}

        fn play_short_message(&mut self, msg: u32) {
            self.record(Recorded::Short(msg));
        }

        fn play_sysex(&mut self, data: &[u8]) {
            self.record(Recorded::Sysex(data.to_vec()));
        }

        fn render(&mut self, frames: &mut [Frame]) {
            frames.fill([0.5, 0.25]);
            self.position += frames.len() as u64;
        }

        fn reset(&mut self) {
            self.record(Recorded::Reset);
        }
    }
}
