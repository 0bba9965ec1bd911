use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use tracing::info;

use super::Synth;
use crate::{audio::Frame, error::SynthError, midi::unpack_short_message};

const DEFAULT_NAME: &str = "Rusty Synth";
const BLOCK_SIZE: usize = 1024;

/// Universal sysex "GM System On".
pub const GM_SYSTEM_ON: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];

/// SoundFont synthesizer backed by `rustysynth`.
pub struct RustySynth {
    sound_font: Arc<SoundFont>,
    synth: Option<Synthesizer>,
    tmp_lbuf: Vec<f32>,
    tmp_rbuf: Vec<f32>,
}

impl RustySynth {
    pub fn new(sound_font: Arc<SoundFont>) -> Self {
        Self {
            sound_font,
            synth: None,
            tmp_lbuf: vec![],
            tmp_rbuf: vec![],
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SynthError> {
        let file = File::open(path).map_err(|e| SynthError::Init(e.to_string()))?;
        let mut reader = BufReader::new(file);
        let sound_font = SoundFont::new(&mut reader).map_err(|e| SynthError::Init(e.to_string()))?;
        info!("SoundFont loaded: {}", path.display());
        Ok(Self::new(Arc::new(sound_font)))
    }
}

impl Synth for RustySynth {
    fn name(&self) -> &str {
        DEFAULT_NAME
    }

    fn open(&mut self, sample_rate: u32) -> Result<(), SynthError> {
        let settings = SynthesizerSettings::new(sample_rate as i32);
        let synth = Synthesizer::new(&self.sound_font, &settings)
            .map_err(|e| SynthError::Init(e.to_string()))?;
        self.synth = Some(synth);
        self.tmp_lbuf.resize(BLOCK_SIZE, 0.0);
        self.tmp_rbuf.resize(BLOCK_SIZE, 0.0);
        Ok(())
    }

    fn close(&mut self) {
        self.synth = None;
    }

    fn play_short_message(&mut self, msg: u32) {
        let Some(synth) = self.synth.as_mut() else {
            return;
        };
        let (status, data1, data2) = unpack_short_message(msg);
        // System messages mean nothing to the synthesizer.
        if (0x80..0xF0).contains(&status) {
            synth.process_midi_message(
                (status & 0x0F) as i32,
                (status & 0xF0) as i32,
                data1 as i32,
                data2 as i32,
            );
        }
    }

    fn play_sysex(&mut self, data: &[u8]) {
        if data == GM_SYSTEM_ON {
            self.reset();
        }
    }

    fn render(&mut self, frames: &mut [Frame]) {
        let Some(synth) = self.synth.as_mut() else {
            frames.fill([0.0; 2]);
            return;
        };
        for chunk in frames.chunks_mut(BLOCK_SIZE) {
            let n = chunk.len();
            synth.render(&mut self.tmp_lbuf[..n], &mut self.tmp_rbuf[..n]);
            for (i, frame) in chunk.iter_mut().enumerate() {
                *frame = [self.tmp_lbuf[i], self.tmp_rbuf[i]];
            }
        }
    }

    fn reset(&mut self) {
        if let Some(synth) = self.synth.as_mut() {
            synth.reset();
        }
    }

    fn max_frames_per_run(&self) -> usize {
        BLOCK_SIZE
    }
}
