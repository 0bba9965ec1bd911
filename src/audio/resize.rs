use std::sync::{atomic::Ordering, Arc};

use tracing::{debug, warn};

use super::producer::Pipeline;

/// Reallocates the ring buffer of a running [`super::producer::RenderProducer`].
///
/// Runs the two-phase latch handshake: the producer is parked at a known
/// point before the old buffer is dropped, and the callback thread never
/// takes part in the pause. Must not be called from the hardware callback
/// thread.
#[derive(Clone)]
pub struct BufferResizeCoordinator {
    pipeline: Arc<Pipeline>,
}

impl BufferResizeCoordinator {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn set_buffer_size(&self, latency_frames: u32) {
        let pipeline = &self.pipeline;
        if pipeline.stop.load(Ordering::Acquire) {
            warn!("Render producer is stopped, buffer resize ignored");
            return;
        }
        // Flag the pending update.
        pipeline.resize_latch.acquire(1);
        // Wake the producer should it be waiting for free space.
        pipeline.data_retrievals.release(1);
        // Wait for the producer to acknowledge and park.
        pipeline.resize_latch.acquire(1);

        pipeline.reallocate(latency_frames);
        debug!("Ring buffer reallocated for {latency_frames} frames");

        // Back to "no update pending", and the producer resumes.
        pipeline.resize_latch.release(2);
    }

    pub fn buffer_capacity(&self) -> usize {
        self.pipeline.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::producer::RenderProducer,
        route::RenderCore,
        synth::testing::{wait_until, RampSynth},
    };
    use std::{sync::atomic::AtomicBool, thread, time::Duration};

    fn start_producer(latency: u32) -> (Arc<RenderCore>, RenderProducer) {
        let core = Arc::new(RenderCore::new(Box::new(RampSynth::default())));
        core.open_synth(44100).unwrap();
        let producer = RenderProducer::start(Arc::clone(&core), latency).unwrap();
        (core, producer)
    }

    #[test]
    fn resize_while_producer_waits_for_space() {
        let (_core, mut producer) = start_producer(16);
        let pipeline = producer.pipeline();
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.reader.lock().unwrap().readable() == 16
        }));

        let coordinator = producer.coordinator();
        coordinator.set_buffer_size(64);
        assert_eq!(coordinator.buffer_capacity(), 65);
        // The producer takes back its resource once it resumes.
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.resize_latch.available() == 1
        }));

        // The producer resumes and fills the new buffer.
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.reader.lock().unwrap().readable() == 64
        }));
        producer.stop();
    }

    #[test]
    fn resize_during_streaming_keeps_frames_ordered() {
        let (_core, mut producer) = start_producer(32);
        let pipeline = producer.pipeline();
        let done = Arc::new(AtomicBool::new(false));

        let consumer = {
            let pipeline = producer.pipeline();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = -1.0f32;
                let mut total = 0usize;
                while !done.load(Ordering::Acquire) {
                    let Ok(mut reader) = pipeline.reader.try_lock() else {
                        continue;
                    };
                    let region = reader.read_region();
                    let n = region.len();
                    for frame in region {
                        assert!(frame[0] > last, "frames went backwards");
                        last = frame[0];
                    }
                    reader.advance_read(n);
                    drop(reader);
                    if n > 0 {
                        pipeline.data_retrievals.release(1);
                    }
                    total += n;
                }
                total
            })
        };

        let coordinator = producer.coordinator();
        for size in [128, 8, 256, 32] {
            thread::sleep(Duration::from_millis(5));
            coordinator.set_buffer_size(size);
            assert_eq!(coordinator.buffer_capacity(), size as usize + 1);
        }
        thread::sleep(Duration::from_millis(5));
        done.store(true, Ordering::Release);
        let total = consumer.join().unwrap();
        assert!(total > 0);
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.resize_latch.available() == 1
        }));
        producer.stop();
    }

    #[test]
    fn stopped_producer_is_left_alone() {
        let (_core, mut producer) = start_producer(16);
        let coordinator = producer.coordinator();
        producer.stop();
        coordinator.set_buffer_size(64);
        assert_eq!(coordinator.buffer_capacity(), 17);
    }

    #[test]
    fn failed_producer_does_not_hang_a_resize() {
        let (_core, mut producer) = start_producer(16);
        let pipeline = producer.pipeline();
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.reader.lock().unwrap().readable() == 16
        }));

        let poisoner = {
            let pipeline = producer.pipeline();
            thread::spawn(move || {
                let _writer = pipeline.writer.lock().unwrap();
                panic!("writer poisoned");
            })
        };
        assert!(poisoner.join().is_err());
        pipeline.data_retrievals.release(1);
        assert!(wait_until(Duration::from_secs(2), || !producer.is_running()));
        assert!(pipeline.stop.load(Ordering::Acquire));

        let coordinator = producer.coordinator();
        let resize = thread::spawn(move || coordinator.set_buffer_size(64));
        assert!(wait_until(Duration::from_secs(2), || resize.is_finished()));
        resize.join().unwrap();
        producer.stop();
    }
}
