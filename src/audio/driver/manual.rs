//! A driver whose cycles are run by the caller, for offline rendering and
//! for exercising the stream without hardware.

use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{AudioDriver, DriverEvents, DriverInfo};
use crate::{
    audio::{
        consumer::{CycleInfo, HardwareCallbackConsumer},
        CHANNEL_COUNT,
    },
    config::{AudioLatencyConfig, AudioSettings},
    error::DriverError,
};

pub const DEFAULT_BUFFER_SIZE: u32 = 256;

struct State {
    native_buffer_size: u32,
    realtime: bool,
    fail_open: bool,
    open: bool,
    consumer: Option<HardwareCallbackConsumer>,
    events: Option<Arc<dyn DriverEvents>>,
}

/// Cloning yields another handle to the same driver.
#[derive(Clone)]
pub struct ManualDriver {
    state: Arc<Mutex<State>>,
}

impl ManualDriver {
    pub fn new(native_buffer_size: u32, realtime: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                native_buffer_size,
                realtime,
                fail_open: false,
                open: false,
                consumer: None,
                events: None,
            })),
        }
    }

    /// Makes the next `open` fail as if the server were unreachable.
    pub fn fail_next_open(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_open = true;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.open).unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.consumer.is_some())
            .unwrap_or(false)
    }

    pub fn native_buffer_size(&self) -> u32 {
        self.state
            .lock()
            .map(|s| s.native_buffer_size)
            .unwrap_or(0)
    }

    /// Runs one cycle into an interleaved stereo `f32` buffer. Returns false
    /// when no stream is started.
    pub fn process_f32(&self, out: &mut [f32]) -> bool {
        self.process(out)
    }

    /// Runs one cycle into an interleaved stereo `i16` buffer.
    pub fn process_i16(&self, out: &mut [i16]) -> bool {
        self.process(out)
    }

    fn process<T>(&self, out: &mut [T]) -> bool
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let cycle = CycleInfo {
            buffer_size: state.native_buffer_size,
            frames_since_cycle_start: 0,
        };
        match state.consumer.as_mut() {
            Some(consumer) => {
                consumer.process(out, CHANNEL_COUNT, cycle);
                true
            }
            None => false,
        }
    }

    /// Reports a new native buffer size to the stream, as a server would
    /// between cycles.
    pub fn change_buffer_size(&self, new_size: u32) {
        let events = match self.state.lock() {
            Ok(mut state) => {
                state.native_buffer_size = new_size;
                state.events.clone()
            }
            Err(_) => None,
        };
        if let Some(events) = events {
            events.buffer_size_changed(new_size);
        }
    }

    /// Simulates the server going away.
    pub fn shutdown(&self) {
        let events = self.state.lock().ok().and_then(|s| s.events.clone());
        if let Some(events) = events {
            events.device_shutdown();
        }
    }
}

impl Default for ManualDriver {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, true)
    }
}

impl AudioDriver for ManualDriver {
    fn name(&self) -> &str {
        "manual"
    }

    fn validate_latency(&self, latency: &mut AudioLatencyConfig) {
        latency.chunk_len = 0;
    }

    fn open(&mut self, _settings: &AudioSettings) -> Result<DriverInfo, DriverError> {
        let mut state = self.state.lock().map_err(|_| DriverError::NotOpen)?;
        if state.fail_open {
            state.fail_open = false;
            return Err(DriverError::ConnectionFailed(
                "manual driver refused the connection".into(),
            ));
        }
        state.open = true;
        Ok(DriverInfo {
            native_buffer_size: state.native_buffer_size,
            realtime: state.realtime,
        })
    }

    fn start(
        &mut self,
        consumer: HardwareCallbackConsumer,
        events: Arc<dyn DriverEvents>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().map_err(|_| DriverError::NotOpen)?;
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        state.consumer = Some(consumer);
        state.events = Some(events);
        debug!("Manual driver started");
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open = false;
            state.consumer = None;
            state.events = None;
        }
    }
}
