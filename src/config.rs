use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Cpal,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Whatever the device reports as its default output format.
    Auto,
    F32,
    I16,
}

/// Buffering depth of a stream, in frames.
///
/// The values stored in [`Settings`] are what the user configured. An
/// [`crate::audio::stream::AudioStream`] derives its effective copy at start
/// from the native buffer size reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioLatencyConfig {
    pub audio_latency_frames: u32,
    pub midi_latency_frames: u32,
    /// Frames per driver callback; 0 means driver-determined.
    pub chunk_len: u32,
    pub auto_latency_mode: bool,
}

impl Default for AudioLatencyConfig {
    fn default() -> Self {
        Self {
            audio_latency_frames: 2048,
            midi_latency_frames: 0,
            chunk_len: 0,
            auto_latency_mode: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub driver: DriverKind,
    pub host: Option<String>,
    pub device: Option<String>,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub latency: AudioLatencyConfig,
    pub advanced_timing: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            driver: DriverKind::Cpal,
            host: None,
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_format: SampleFormat::Auto,
            latency: Default::default(),
            advanced_timing: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    pub input_ports: Vec<String>,
    /// Port whose session gets exclusive (bypass) routing, if any.
    pub exclusive_port: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub midi: MidiSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let settings = serde_json::from_reader(BufReader::new(file))?;
        Ok(settings)
    }

    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(settings.audio.latency.auto_latency_mode);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let settings = Settings::from_json(
            r#"{
                "audio": {
                    "driver": "manual",
                    "sample_format": "i16",
                    "latency": { "audio_latency_frames": 512 }
                },
                "midi": { "input_ports": ["Keys"] }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.audio.driver, DriverKind::Manual);
        assert_eq!(settings.audio.sample_format, SampleFormat::I16);
        assert_eq!(settings.audio.latency.audio_latency_frames, 512);
        assert_eq!(settings.audio.latency.chunk_len, 0);
        assert!(settings.audio.latency.auto_latency_mode);
        assert_eq!(settings.midi.input_ports, vec!["Keys".to_owned()]);
    }

    #[test]
    fn rejects_unknown_driver() {
        let res = Settings::from_json(r#"{ "audio": { "driver": "asio" } }"#);
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }
}
