use std::sync::Arc;

use super::consumer::HardwareCallbackConsumer;
use crate::{
    config::{AudioLatencyConfig, AudioSettings, DriverKind},
    error::DriverError,
};

pub mod manual;
pub mod output;

/// What a driver reports once its connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverInfo {
    pub native_buffer_size: u32,
    /// Callbacks run on a time-critical thread that must not render.
    pub realtime: bool,
}

/// Notifications a driver delivers outside its callback thread.
pub trait DriverEvents: Send + Sync {
    fn buffer_size_changed(&self, new_size: u32);
    fn device_shutdown(&self);
}

/// One audio output backend.
///
/// `open` establishes the connection without starting callbacks. `start`
/// hands over the consumer that the driver invokes from its own thread.
pub trait AudioDriver: Send {
    fn name(&self) -> &str;

    /// Adjusts configured latency to what the backend supports.
    fn validate_latency(&self, _latency: &mut AudioLatencyConfig) {}

    fn open(&mut self, settings: &AudioSettings) -> Result<DriverInfo, DriverError>;

    fn start(
        &mut self,
        consumer: HardwareCallbackConsumer,
        events: Arc<dyn DriverEvents>,
    ) -> Result<(), DriverError>;

    fn close(&mut self);
}

pub fn create_driver(kind: DriverKind) -> Box<dyn AudioDriver> {
    match kind {
        DriverKind::Cpal => Box::<output::CpalDriver>::default(),
        DriverKind::Manual => Box::<manual::ManualDriver>::default(),
    }
}
