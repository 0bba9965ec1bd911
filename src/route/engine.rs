use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Mutex, MutexGuard,
};

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::merge::{MidiMerger, MERGE_QUEUE_CAPACITY};
use crate::{
    audio::{
        amplify_frames, clear_frames, frames_to_i16, swap_channels, Frame, I16Frame, SILENCE,
    },
    error::SynthError,
    midi::{MidiEvent, MidiEventKind},
    synth::Synth,
};

/// Frames converted per step of an `i16` render.
const I16_RENDER_CHUNK: usize = 256;

/// Played sysex buffers waiting to be reused by the ingress side.
const SPENT_SYSEX_CAPACITY: usize = 256;

struct Engine {
    synth: Box<dyn Synth>,
    synth_open: bool,
    ingress: mpsc::UnboundedReceiver<MidiEvent>,
    merger: MidiMerger,
    spent_sysex: HeapProd<Vec<u8>>,
    render_position: u64,
}

impl Engine {
    /// Moves queued events into the merger, leaving the rest in the channel
    /// once the merger is at capacity.
    fn absorb_ingress(&mut self, multi_mode: bool) {
        while self.merger.len() < MERGE_QUEUE_CAPACITY {
            let Ok(event) = self.ingress.try_recv() else {
                break;
            };
            self.merger.push(event, multi_mode);
        }
    }

    fn dispatch(&mut self, event: MidiEvent) {
        match event.kind {
            MidiEventKind::Short(msg) => self.synth.play_short_message(msg),
            MidiEventKind::Sysex(data) => {
                self.synth.play_sysex(&data);
                // Freed by the ingress side, unless its pool is full.
                _ = self.spent_sysex.try_push(data);
            }
        }
    }

    fn render_synth(&mut self, frames: &mut [Frame], max_frames: usize) {
        for chunk in frames.chunks_mut(max_frames) {
            self.synth.render(chunk);
        }
    }
}

/// The synthesizer together with its merged MIDI queue.
///
/// Shared between the route and whichever side renders: the producer
/// thread, or the hardware callback in synchronous mode. Queued events
/// arrive over a channel so sessions never wait on a render pass.
pub struct RenderCore {
    ingress: mpsc::UnboundedSender<MidiEvent>,
    sysex_pool: Mutex<HeapCons<Vec<u8>>>,
    engine: Mutex<Engine>,
    max_frames_per_run: usize,
    render_position: AtomicU64,
    output_gain: AtomicU32,
    reversed_stereo: AtomicBool,
    multi_mode: AtomicBool,
}

impl RenderCore {
    pub fn new(synth: Box<dyn Synth>) -> Self {
        let (ingress, rx) = mpsc::unbounded_channel();
        let (spent_sysex, sysex_pool) = HeapRb::new(SPENT_SYSEX_CAPACITY).split();
        let max_frames_per_run = synth.max_frames_per_run().max(1);
        Self {
            ingress,
            sysex_pool: Mutex::new(sysex_pool),
            engine: Mutex::new(Engine {
                synth,
                synth_open: false,
                ingress: rx,
                merger: MidiMerger::default(),
                spent_sysex,
                render_position: 0,
            }),
            max_frames_per_run,
            render_position: AtomicU64::new(0),
            output_gain: AtomicU32::new(1.0f32.to_bits()),
            reversed_stereo: AtomicBool::new(false),
            multi_mode: AtomicBool::new(false),
        }
    }

    fn engine(&self) -> Result<MutexGuard<'_, Engine>, SynthError> {
        self.engine.lock().map_err(|_| SynthError::NotOpen)
    }

    /// Opens the synthesizer and restarts the render position at zero.
    pub fn open_synth(&self, sample_rate: u32) -> Result<(), SynthError> {
        let mut engine = self.engine()?;
        engine.synth.open(sample_rate)?;
        engine.synth_open = true;
        engine.render_position = 0;
        engine.merger.clear();
        while engine.ingress.try_recv().is_ok() {}
        self.render_position.store(0, Ordering::Release);
        debug!("Synth {} opened at {sample_rate} Hz", engine.synth.name());
        Ok(())
    }

    pub fn close_synth(&self) {
        if let Ok(mut engine) = self.engine.lock() {
            if engine.synth_open {
                engine.synth.close();
                engine.synth_open = false;
                debug!("Synth {} closed", engine.synth.name());
            }
            engine.merger.clear();
            while engine.ingress.try_recv().is_ok() {}
        }
    }

    pub fn max_frames_per_run(&self) -> usize {
        self.max_frames_per_run
    }

    /// Frames rendered since the synthesizer was opened.
    pub fn render_position(&self) -> u64 {
        self.render_position.load(Ordering::Acquire)
    }

    pub(crate) fn set_multi_mode(&self, enabled: bool) {
        self.multi_mode.store(enabled, Ordering::Release);
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.output_gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn output_gain(&self) -> f32 {
        f32::from_bits(self.output_gain.load(Ordering::Relaxed))
    }

    pub fn set_reversed_stereo_enabled(&self, enabled: bool) {
        self.reversed_stereo.store(enabled, Ordering::Relaxed);
    }

    /// Queues an event for the render pass covering its timestamp.
    pub fn enqueue(&self, event: MidiEvent) -> bool {
        self.ingress.send(event).is_ok()
    }

    /// Copies `data` into a buffer for a queued sysex event, reusing one the
    /// render side has already played when there is one.
    pub fn sysex_buffer(&self, data: &[u8]) -> Vec<u8> {
        let recycled = self.sysex_pool.lock().ok().and_then(|mut pool| pool.try_pop());
        match recycled {
            Some(mut buf) => {
                buf.clear();
                buf.extend_from_slice(data);
                buf
            }
            None => data.to_vec(),
        }
    }

    pub fn play_short_message_now(&self, msg: u32) -> Result<(), SynthError> {
        let mut engine = self.engine()?;
        if !engine.synth_open {
            return Err(SynthError::NotOpen);
        }
        engine.synth.play_short_message(msg);
        Ok(())
    }

    pub fn play_sysex_now(&self, data: &[u8]) -> Result<(), SynthError> {
        let mut engine = self.engine()?;
        if !engine.synth_open {
            return Err(SynthError::NotOpen);
        }
        engine.synth.play_sysex(data);
        Ok(())
    }

    /// Plays every queued event right away, in merged order.
    pub fn flush_midi_queue(&self) {
        let multi_mode = self.multi_mode.load(Ordering::Acquire);
        if let Ok(mut engine) = self.engine.lock() {
            loop {
                engine.absorb_ingress(multi_mode);
                if engine.merger.is_empty() {
                    break;
                }
                while let Some(event) = engine.merger.pop() {
                    if engine.synth_open {
                        engine.dispatch(event);
                    }
                }
            }
        }
    }

    pub fn discard_queued_midi(&self) {
        if let Ok(mut engine) = self.engine.lock() {
            while engine.ingress.try_recv().is_ok() {}
            engine.merger.clear();
        }
    }

    pub fn reset(&self) -> Result<(), SynthError> {
        let mut engine = self.engine()?;
        if !engine.synth_open {
            return Err(SynthError::NotOpen);
        }
        engine.synth.reset();
        Ok(())
    }

    /// Renders `frames.len()` frames, dispatching every queued event due
    /// by the end of the pass at its frame offset. Late events play at
    /// the start of the pass.
    pub fn render(&self, frames: &mut [Frame]) {
        let multi_mode = self.multi_mode.load(Ordering::Acquire);
        let Ok(mut engine) = self.engine.lock() else {
            clear_frames(frames);
            return;
        };
        if !engine.synth_open {
            clear_frames(frames);
            return;
        }
        engine.absorb_ingress(multi_mode);

        let start = engine.render_position;
        let len = frames.len();
        let end = start + len as u64;
        let mut offset = 0;
        while let Some(event) = engine.merger.pop_due(end) {
            let at = (event.timestamp.saturating_sub(start) as usize).min(len);
            if at > offset {
                engine.render_synth(&mut frames[offset..at], self.max_frames_per_run);
                offset = at;
            }
            engine.dispatch(event);
        }
        engine.render_synth(&mut frames[offset..], self.max_frames_per_run);
        engine.render_position = end;
        drop(engine);
        self.render_position.store(end, Ordering::Release);

        amplify_frames(frames, self.output_gain());
        if self.reversed_stereo.load(Ordering::Relaxed) {
            swap_channels(frames);
        }
    }

    pub fn render_i16(&self, frames: &mut [I16Frame]) {
        let mut buf = [SILENCE; I16_RENDER_CHUNK];
        for chunk in frames.chunks_mut(I16_RENDER_CHUNK) {
            let tmp = &mut buf[..chunk.len()];
            self.render(tmp);
            frames_to_i16(tmp, chunk);
        }
    }
}
