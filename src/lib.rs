pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod midi;
pub mod route;
pub mod synth;

pub use audio::{Frame, CHANNEL_COUNT};
pub use config::{AudioLatencyConfig, Settings};
pub use error::{ConfigError, DriverError, MidiInputError, RouteError, SynthError};
pub use route::{SynthRoute, SynthRouteState};
