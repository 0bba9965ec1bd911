use std::sync::Arc;

use cpal::{FromSample, Sample};

use super::{
    producer::Pipeline, timing::StreamTiming, write_interleaved, write_interleaved_silence, Frame,
    SILENCE,
};
use crate::{clock, route::RenderCore};

/// Timing of the driver cycle a callback belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleInfo {
    pub buffer_size: u32,
    pub frames_since_cycle_start: u32,
}

impl CycleInfo {
    /// Frames of the current cycle still waiting in the driver buffer.
    pub fn frames_in_audio_buffer(&self) -> u32 {
        self.buffer_size.saturating_sub(self.frames_since_cycle_start)
    }
}

enum Source {
    Prerendered(Arc<Pipeline>),
    Synchronous(Vec<Frame>),
}

/// Fills driver output buffers. Lives on the hardware callback thread and
/// never blocks or allocates there.
pub struct HardwareCallbackConsumer {
    source: Source,
    core: Arc<RenderCore>,
    timing: Arc<StreamTiming>,
    advanced_timing: bool,
}

impl HardwareCallbackConsumer {
    pub(crate) fn prerendered(
        pipeline: Arc<Pipeline>,
        core: Arc<RenderCore>,
        timing: Arc<StreamTiming>,
        advanced_timing: bool,
    ) -> Self {
        Self {
            source: Source::Prerendered(pipeline),
            core,
            timing,
            advanced_timing,
        }
    }

    /// Renders on the callback thread with no added latency.
    pub fn synchronous(core: Arc<RenderCore>, timing: Arc<StreamTiming>) -> Self {
        let scratch = vec![SILENCE; core.max_frames_per_run()];
        Self {
            source: Source::Synchronous(scratch),
            core,
            timing,
            advanced_timing: false,
        }
    }

    pub fn is_prerendered(&self) -> bool {
        matches!(self.source, Source::Prerendered(_))
    }

    /// Fills an interleaved buffer of `channels` channels.
    pub fn process<T>(&mut self, out: &mut [T], channels: usize, cycle: CycleInfo)
    where
        T: Sample + FromSample<f32>,
    {
        if channels == 0 {
            return;
        }
        let total_frames = out.len() / channels;
        // Only bother with timing while MIDI processing is asynchronous.
        if self.timing.midi_latency_frames() != 0 {
            let frames_in_audio_buffer = if self.advanced_timing {
                cycle.frames_in_audio_buffer()
            } else {
                0
            };
            self.timing
                .update_time_info(clock::clock_nanos(), frames_in_audio_buffer);
        }
        let out = &mut out[..total_frames * channels];
        match &mut self.source {
            Source::Prerendered(pipeline) => drain_ring(pipeline, out, channels, &self.timing),
            Source::Synchronous(scratch) => {
                render_synchronously(&self.core, scratch, out, channels)
            }
        }
        self.timing.add_rendered_frames(total_frames as u64);
    }
}

fn drain_ring<T>(pipeline: &Pipeline, out: &mut [T], channels: usize, timing: &StreamTiming)
where
    T: Sample + FromSample<f32>,
{
    // Only contended while the coordinator swaps buffers.
    let Ok(mut reader) = pipeline.reader.try_lock() else {
        timing.record_underrun();
        write_interleaved_silence(out);
        return;
    };
    let mut out = out;
    while !out.is_empty() {
        let frames_left = out.len() / channels;
        let chunk = reader.read_region();
        let count = chunk.len().min(frames_left);
        if count == 0 {
            timing.record_underrun();
            write_interleaved_silence(out);
            return;
        }
        let (head, tail) = std::mem::take(&mut out).split_at_mut(count * channels);
        write_interleaved(head, channels, &chunk[..count]);
        reader.advance_read(count);
        pipeline.data_retrievals.release(1);
        out = tail;
    }
}

fn render_synchronously<T>(core: &RenderCore, scratch: &mut [Frame], out: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    for chunk in out.chunks_mut(scratch.len().max(1) * channels) {
        let frames = &mut scratch[..chunk.len() / channels];
        core.render(frames);
        write_interleaved(chunk, channels, frames);
    }
}
