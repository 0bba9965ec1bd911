use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use tracing::{debug, info, warn};

use super::{
    consumer::HardwareCallbackConsumer,
    driver::{AudioDriver, DriverEvents},
    producer::RenderProducer,
    resize::BufferResizeCoordinator,
    timing::StreamTiming,
    MINIMUM_DRIVER_BUFFER_COUNT,
};
use crate::{
    clock,
    config::{AudioLatencyConfig, AudioSettings},
    error::DriverError,
    midi::SessionId,
    route::RenderCore,
};

/// Invoked when the driver reports the device is gone.
pub type FailureHook = Arc<dyn Fn() + Send + Sync>;

/// Receives driver notifications on behalf of a running stream.
struct StreamControl {
    coordinator: Option<BufferResizeCoordinator>,
    configured_audio_latency: u32,
    native_buffer_size: AtomicU32,
    audio_latency: AtomicU32,
    sample_rate: u32,
    on_failure: FailureHook,
}

impl StreamControl {
    fn on_buffer_size_changed(&self, new_size: u32) {
        let previous = self.native_buffer_size.swap(new_size, Ordering::AcqRel);
        let Some(coordinator) = &self.coordinator else {
            debug!("Driver reported new buffer size {new_size}, ignored");
            return;
        };
        if previous == new_size {
            return;
        }
        let latency = new_size.max(self.configured_audio_latency);
        if latency == self.audio_latency.load(Ordering::Acquire) {
            debug!("Driver reported new buffer size {new_size}, latency unchanged");
            return;
        }
        debug!("Driver reported new buffer size {new_size}, reallocating buffer...");
        coordinator.set_buffer_size(latency);
        self.audio_latency.store(latency, Ordering::Release);
        debug!(
            "Reconfigured prerendering buffer size (frames / s): {latency} / {:.4}",
            latency as f64 / self.sample_rate as f64
        );
    }

    fn on_device_shutdown(&self) {
        warn!("Audio device is shutting down, closing synth");
        (self.on_failure)();
    }
}

impl DriverEvents for StreamControl {
    fn buffer_size_changed(&self, new_size: u32) {
        self.on_buffer_size_changed(new_size);
    }

    fn device_shutdown(&self) {
        self.on_device_shutdown();
    }
}

/// An audio output stream running against one driver.
///
/// When the driver calls back on a realtime thread and no MIDI session is
/// bound to the stream, frames are prerendered by a [`RenderProducer`].
/// Otherwise the callback renders synchronously with no added latency.
pub struct AudioStream {
    control: Arc<StreamControl>,
    producer: Option<RenderProducer>,
    timing: Arc<StreamTiming>,
    latency: AudioLatencyConfig,
}

impl AudioStream {
    pub fn start(
        driver: &mut dyn AudioDriver,
        core: Arc<RenderCore>,
        timing: Arc<StreamTiming>,
        settings: &AudioSettings,
        binding: Option<SessionId>,
        on_failure: FailureHook,
    ) -> Result<Self, DriverError> {
        let mut latency = settings.latency;
        driver.validate_latency(&mut latency);
        let configured_audio_latency = latency.audio_latency_frames;
        let sample_rate = settings.sample_rate;

        let info = driver.open(settings)?;
        let native = info.native_buffer_size;
        debug!(
            "{} reported initial audio buffer size (frames / s): {native} / {:.4}",
            driver.name(),
            native as f64 / sample_rate as f64
        );

        let mut producer = None;
        if binding.is_none() && info.realtime {
            latency.audio_latency_frames = configured_audio_latency.max(native);
            match RenderProducer::start(Arc::clone(&core), latency.audio_latency_frames) {
                Ok(p) => producer = Some(p),
                Err(e) => {
                    driver.close();
                    return Err(e.into());
                }
            }
            debug!(
                "Configured prerendering buffer size (frames / s): {} / {:.4}",
                latency.audio_latency_frames,
                latency.audio_latency_frames as f64 / sample_rate as f64
            );
        } else {
            latency.audio_latency_frames = 0;
        }

        if binding.is_none() {
            if latency.auto_latency_mode {
                latency.midi_latency_frames =
                    latency.audio_latency_frames + MINIMUM_DRIVER_BUFFER_COUNT * native;
            }
            debug!(
                "Configured MIDI latency (frames / s): {} / {:.4}",
                latency.midi_latency_frames,
                latency.midi_latency_frames as f64 / sample_rate as f64
            );
        } else {
            latency.midi_latency_frames = 0;
            debug!("Configured synchronous MIDI processing");
        }

        timing.reset(sample_rate, latency.midi_latency_frames, clock::clock_nanos());

        let consumer = match &producer {
            Some(p) => HardwareCallbackConsumer::prerendered(
                p.pipeline(),
                Arc::clone(&core),
                Arc::clone(&timing),
                settings.advanced_timing,
            ),
            None => HardwareCallbackConsumer::synchronous(Arc::clone(&core), Arc::clone(&timing)),
        };
        let control = Arc::new(StreamControl {
            coordinator: producer.as_ref().map(RenderProducer::coordinator),
            configured_audio_latency,
            native_buffer_size: AtomicU32::new(native),
            audio_latency: AtomicU32::new(latency.audio_latency_frames),
            sample_rate,
            on_failure,
        });

        if let Err(e) = driver.start(consumer, Arc::clone(&control) as Arc<dyn DriverEvents>) {
            if let Some(mut p) = producer {
                p.stop();
            }
            driver.close();
            return Err(e);
        }
        info!("Audio stream started on {} driver", driver.name());
        Ok(Self {
            control,
            producer,
            timing,
            latency,
        })
    }

    /// Closes the driver connection, then stops the producer.
    pub fn stop(mut self, driver: &mut dyn AudioDriver) {
        debug!("Stopping {} driver", driver.name());
        driver.close();
        debug!("{} driver stopped", driver.name());
        if let Some(producer) = self.producer.as_mut() {
            producer.stop();
        }
        let underruns = self.timing.underruns();
        if underruns > 0 {
            warn!(
                "Audio stream stopped after {underruns} underruns in {} frames",
                self.timing.rendered_frames()
            );
        } else {
            info!("Audio stream stopped");
        }
    }

    pub fn on_buffer_size_changed(&self, new_size: u32) {
        self.control.on_buffer_size_changed(new_size);
    }

    pub fn on_device_shutdown(&self) {
        self.control.on_device_shutdown();
    }

    /// Effective latency. The audio latency follows buffer-size changes.
    pub fn latency(&self) -> AudioLatencyConfig {
        AudioLatencyConfig {
            audio_latency_frames: self.control.audio_latency.load(Ordering::Acquire),
            ..self.latency
        }
    }

    pub fn is_prerendering(&self) -> bool {
        self.producer.is_some()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.producer
            .as_ref()
            .map_or(0, RenderProducer::buffer_capacity)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, time::Duration};

    use super::*;
    use crate::{
        audio::driver::manual::ManualDriver,
        synth::testing::{wait_until, RampSynth},
    };

    fn open_core() -> Arc<RenderCore> {
        let core = Arc::new(RenderCore::new(Box::new(RampSynth::default())));
        core.open_synth(44100).unwrap();
        core
    }

    fn settings(audio_latency_frames: u32, auto_latency_mode: bool) -> AudioSettings {
        AudioSettings {
            latency: AudioLatencyConfig {
                audio_latency_frames,
                midi_latency_frames: 100,
                chunk_len: 64,
                auto_latency_mode,
            },
            ..Default::default()
        }
    }

    fn no_failure() -> FailureHook {
        Arc::new(|| {})
    }

    #[test]
    fn prerendering_latency_follows_native_size() {
        let mut driver = ManualDriver::new(256, true);
        let timing = Arc::new(StreamTiming::new(44100));
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::clone(&timing),
            &settings(512, true),
            None,
            no_failure(),
        )
        .unwrap();
        let latency = stream.latency();
        assert_eq!(latency.audio_latency_frames, 512);
        assert_eq!(latency.midi_latency_frames, 512 + 2 * 256);
        assert_eq!(latency.chunk_len, 0);
        assert_eq!(timing.midi_latency_frames(), 1024);
        assert!(stream.is_prerendering());
        assert_eq!(stream.buffer_capacity(), 513);
        stream.stop(&mut driver);
        assert!(!driver.is_open());
    }

    #[test]
    fn small_configured_latency_is_raised_to_native() {
        let mut driver = ManualDriver::new(1024, true);
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(256, false),
            None,
            no_failure(),
        )
        .unwrap();
        assert_eq!(stream.latency().audio_latency_frames, 1024);
        assert_eq!(stream.latency().midi_latency_frames, 100);
        stream.stop(&mut driver);
    }

    #[test]
    fn bound_session_renders_synchronously() {
        let mut driver = ManualDriver::new(256, true);
        let timing = Arc::new(StreamTiming::new(44100));
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::clone(&timing),
            &settings(512, true),
            Some(SessionId(7)),
            no_failure(),
        )
        .unwrap();
        assert!(!stream.is_prerendering());
        assert_eq!(stream.latency().audio_latency_frames, 0);
        assert_eq!(stream.latency().midi_latency_frames, 0);

        let mut out = vec![0.0f32; 2 * 256];
        assert!(driver.process_f32(&mut out));
        assert_eq!(out[2 * 255], 255.0);
        assert_eq!(timing.rendered_frames(), 256);
        stream.stop(&mut driver);
    }

    #[test]
    fn non_realtime_driver_renders_synchronously() {
        let mut driver = ManualDriver::new(128, false);
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(512, true),
            None,
            no_failure(),
        )
        .unwrap();
        assert!(!stream.is_prerendering());
        assert_eq!(stream.latency().audio_latency_frames, 0);
        assert_eq!(stream.latency().midi_latency_frames, 2 * 128);
        stream.stop(&mut driver);
    }

    #[test]
    fn buffer_size_change_resizes_ring() {
        let mut driver = ManualDriver::new(256, true);
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(512, true),
            None,
            no_failure(),
        )
        .unwrap();

        driver.change_buffer_size(1024);
        assert_eq!(stream.latency().audio_latency_frames, 1024);
        assert_eq!(stream.buffer_capacity(), 1025);

        // Below the configured latency the configured value wins.
        stream.on_buffer_size_changed(128);
        assert_eq!(stream.latency().audio_latency_frames, 512);
        assert_eq!(stream.buffer_capacity(), 513);

        // Same size again, nothing to do.
        stream.on_buffer_size_changed(128);
        assert_eq!(stream.buffer_capacity(), 513);
        stream.stop(&mut driver);
    }

    #[test]
    fn unchanged_latency_keeps_prerendered_frames() {
        let mut driver = ManualDriver::new(256, true);
        let core = open_core();
        let timing = Arc::new(StreamTiming::new(44100));
        let stream = AudioStream::start(
            &mut driver,
            Arc::clone(&core),
            Arc::clone(&timing),
            &settings(512, true),
            None,
            no_failure(),
        )
        .unwrap();
        assert!(wait_until(Duration::from_secs(2), || core.render_position() == 512));

        driver.change_buffer_size(128);
        assert_eq!(stream.latency().audio_latency_frames, 512);
        assert_eq!(stream.buffer_capacity(), 513);

        let mut out = vec![1.0f32; 2 * 128];
        assert!(driver.process_f32(&mut out));
        assert_eq!(out[0], 0.0);
        assert_eq!(out[2 * 127], 127.0);
        assert_eq!(timing.underruns(), 0);
        stream.stop(&mut driver);
    }

    #[test]
    fn synchronous_stream_fills_i16_buffers() {
        let mut driver = ManualDriver::new(64, false);
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(512, true),
            None,
            no_failure(),
        )
        .unwrap();
        let mut out = vec![0i16; 2 * 64];
        assert!(driver.process_i16(&mut out));
        // The ramp saturates after the first frame.
        assert_eq!(&out[..2], &[0, 0]);
        assert_eq!(out[2], i16::MAX);
        assert!(out[3] <= -i16::MAX);
        stream.stop(&mut driver);
    }

    #[test]
    fn open_failure_retains_nothing() {
        let mut driver = ManualDriver::new(256, true);
        driver.fail_next_open();
        let res = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(512, true),
            None,
            no_failure(),
        );
        assert!(matches!(res, Err(DriverError::ConnectionFailed(_))));
        assert!(!driver.is_open());
        assert!(!driver.is_started());
    }

    #[test]
    fn device_shutdown_runs_failure_hook() {
        let mut driver = ManualDriver::new(256, true);
        let failed = Arc::new(AtomicBool::new(false));
        let hook: FailureHook = {
            let failed = Arc::clone(&failed);
            Arc::new(move || failed.store(true, Ordering::Release))
        };
        let stream = AudioStream::start(
            &mut driver,
            open_core(),
            Arc::new(StreamTiming::new(44100)),
            &settings(512, true),
            None,
            hook,
        )
        .unwrap();
        driver.shutdown();
        assert!(failed.load(Ordering::Acquire));
        stream.stop(&mut driver);
    }
}
