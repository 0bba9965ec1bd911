use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, error};

use super::{
    resize::BufferResizeCoordinator,
    ring::{RingBuffer, RingReader, RingWriter},
    signal::SignalCounter,
};
use crate::route::RenderCore;

/// State shared by the producer thread, the hardware callback and the
/// resize coordinator.
///
/// The writer is only touched by the producer thread, the reader only by the
/// callback thread. The coordinator takes both locks, and only while the
/// producer is parked, so neither lock is ever contended in steady state.
pub(crate) struct Pipeline {
    pub(crate) stop: AtomicBool,
    /// Released once per chunk drained by the consumer.
    pub(crate) data_retrievals: SignalCounter,
    /// One available resource means no resize is pending.
    pub(crate) resize_latch: SignalCounter,
    pub(crate) writer: Mutex<RingWriter>,
    pub(crate) reader: Mutex<RingReader>,
}

impl Pipeline {
    pub(crate) fn new(latency_frames: u32) -> Self {
        let (writer, reader) = RingBuffer::for_latency(latency_frames);
        Self {
            stop: AtomicBool::new(false),
            data_retrievals: SignalCounter::new(0),
            resize_latch: SignalCounter::new(1),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        match self.reader.lock() {
            Ok(reader) => reader.capacity(),
            Err(_) => 0,
        }
    }

    pub(crate) fn reallocate(&self, latency_frames: u32) {
        let (writer, reader) = RingBuffer::for_latency(latency_frames);
        match (self.writer.lock(), self.reader.lock()) {
            (Ok(mut w), Ok(mut r)) => {
                *w = writer;
                *r = reader;
            }
            _ => error!("Ring buffer lock poisoned, reallocation skipped"),
        }
    }
}

/// Thread that keeps the ring buffer filled ahead of the hardware callback.
pub struct RenderProducer {
    pipeline: Arc<Pipeline>,
    handle: Option<JoinHandle<()>>,
}

impl RenderProducer {
    /// Allocates a ring deep enough for `latency_frames` and starts rendering.
    pub fn start(core: Arc<RenderCore>, latency_frames: u32) -> io::Result<Self> {
        let pipeline = Arc::new(Pipeline::new(latency_frames));
        let handle = thread::Builder::new()
            .name("render-producer".into())
            .spawn({
                let pipeline = Arc::clone(&pipeline);
                move || run(&pipeline, &core)
            })?;
        debug!("Render producer started, buffer depth {latency_frames} frames");
        Ok(Self {
            pipeline,
            handle: Some(handle),
        })
    }

    pub fn coordinator(&self) -> BufferResizeCoordinator {
        BufferResizeCoordinator::new(Arc::clone(&self.pipeline))
    }

    pub(crate) fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn buffer_capacity(&self) -> usize {
        self.pipeline.capacity()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pipeline.stop.store(true, Ordering::Release);
            self.pipeline.data_retrievals.release(1);
            if handle.join().is_err() {
                error!("Render producer thread panicked");
            }
            debug!("Render producer stopped");
        }
    }
}

impl Drop for RenderProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the pipeline stopped however the producer loop ends, and wakes a
/// coordinator that may be waiting for the producer to park.
struct ExitGuard<'a>(&'a Pipeline);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.stop.store(true, Ordering::Release);
        self.0.resize_latch.release(1);
    }
}

fn run(pipeline: &Pipeline, core: &RenderCore) {
    let _guard = ExitGuard(pipeline);
    loop {
        // Snapshot before looking at free space, so a retrieval racing with
        // the full-buffer check still satisfies the wait below.
        let retrievals = pipeline.data_retrievals.available();
        if pipeline.stop.load(Ordering::Acquire) {
            return;
        }
        if pipeline.resize_latch.available() == 0 {
            // Acknowledge the pending resize, then park until it completes.
            pipeline.resize_latch.release(1);
            pipeline.resize_latch.acquire(1);
            continue;
        }
        let Ok(mut writer) = pipeline.writer.lock() else {
            error!("Ring buffer lock poisoned, render producer exits");
            return;
        };
        let region = writer.write_region();
        let count = region.frames.len();
        if count == 0 {
            drop(writer);
            pipeline.data_retrievals.acquire(retrievals + 1);
        } else {
            core.render(region.frames);
            writer.advance_write(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::testing::{wait_until, RampSynth};
    use std::time::Duration;

    fn open_core() -> Arc<RenderCore> {
        let core = Arc::new(RenderCore::new(Box::new(RampSynth::default())));
        core.open_synth(44100).unwrap();
        core
    }

    #[test]
    fn fills_buffer_then_waits_for_retrievals() {
        let core = open_core();
        let mut producer = RenderProducer::start(Arc::clone(&core), 64).unwrap();
        let pipeline = producer.pipeline();

        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.reader.lock().unwrap().readable() == 64
        }));
        let position = core.render_position();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(core.render_position(), position, "producer must not spin");

        {
            let mut reader = pipeline.reader.lock().unwrap();
            reader.advance_read(16);
        }
        pipeline.data_retrievals.release(1);
        assert!(wait_until(Duration::from_secs(2), || {
            core.render_position() == position + 16
        }));
        assert!(producer.is_running());
        producer.stop();
        assert!(!producer.is_running());
    }

    #[test]
    fn rendered_frames_arrive_in_order() {
        let core = open_core();
        let mut producer = RenderProducer::start(core, 32).unwrap();
        let pipeline = producer.pipeline();

        let mut expected = 0.0f32;
        let mut seen = 0;
        while seen < 500 {
            let mut reader = pipeline.reader.lock().unwrap();
            let region = reader.read_region();
            let n = region.len();
            for frame in region {
                assert_eq!(frame[0], expected);
                expected += 1.0;
            }
            reader.advance_read(n);
            drop(reader);
            if n > 0 {
                pipeline.data_retrievals.release(1);
            }
            seen += n;
        }
        producer.stop();
    }

    #[test]
    fn stop_unblocks_a_waiting_producer() {
        let core = open_core();
        let mut producer = RenderProducer::start(core, 8).unwrap();
        let pipeline = producer.pipeline();
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.reader.lock().unwrap().readable() == 8
        }));
        producer.stop();
        assert!(!producer.is_running());
    }
}
