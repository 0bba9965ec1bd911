use thiserror::Error;

use crate::{midi::SessionId, route::SynthRouteState};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Audio host not found: {0}")]
    HostNotFound(String),

    #[error("Audio output device not found: {0}")]
    DeviceNotFound(String),

    #[error("The host doesn't provide a default output device")]
    NoDefaultDevice,

    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("No default output config")]
    NoDefaultConfig,

    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Failed to open driver connection: {0}")]
    ConnectionFailed(String),

    #[error("Driver is not open")]
    NotOpen,

    #[error("Failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Failed to create synthesizer: {0}")]
    Init(String),

    #[error("Synthesizer is not open")]
    NotOpen,
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(SynthRouteState),

    #[error("Unknown MIDI session: {0}")]
    UnknownSession(SessionId),

    #[error("Audio driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Synthesizer error: {0}")]
    Synth(#[from] SynthError),

    #[error("Lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MidiInputError {
    #[error("Failed to connect MIDI port.")]
    ConnectError,

    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("MIDI port is not connected: {0}")]
    NotConnected(String),
}
