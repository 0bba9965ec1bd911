use cpal::{FromSample, Sample};

pub mod consumer;
pub mod driver;
pub mod producer;
pub mod resize;
pub mod ring;
pub mod signal;
pub mod stream;
pub mod timing;

pub const CHANNEL_COUNT: usize = 2;

/// One stereo frame, left then right.
pub type Frame = [f32; CHANNEL_COUNT];
pub type I16Frame = [i16; CHANNEL_COUNT];

pub const SILENCE: Frame = [0.0; CHANNEL_COUNT];

/// How many native buffers of extra MIDI latency auto mode adds on top of
/// the prerendering depth.
pub const MINIMUM_DRIVER_BUFFER_COUNT: u32 = 2;

pub fn amplify_frames(frames: &mut [Frame], gain: f32) {
    if gain != 1.0 {
        frames
            .iter_mut()
            .for_each(|frame| frame.iter_mut().for_each(|x| *x *= gain));
    }
}

pub fn swap_channels(frames: &mut [Frame]) {
    frames.iter_mut().for_each(|frame| frame.swap(0, 1));
}

pub fn clear_frames(frames: &mut [Frame]) {
    frames.fill(SILENCE);
}

/// Writes stereo frames into an interleaved device buffer with `channels`
/// channels. Extra channels repeat left/right alternately.
pub fn write_interleaved<T>(out: &mut [T], channels: usize, frames: &[Frame])
where
    T: Sample + FromSample<f32>,
{
    for (slot, frame) in out.chunks_mut(channels).zip(frames) {
        let values = [T::from_sample(frame[0]), T::from_sample(frame[1])];
        for (k, sample) in slot.iter_mut().enumerate() {
            *sample = values[k & 1];
        }
    }
}

pub fn write_interleaved_silence<T: Sample>(out: &mut [T]) {
    out.fill(T::EQUILIBRIUM);
}

pub fn frames_to_i16(src: &[Frame], dst: &mut [I16Frame]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = [i16::from_sample(s[0]), i16::from_sample(s[1])];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplify_frames() {
        let gain = 3.2;
        let mut frames = [[1.0, 0.0], [3.2, -1.0]];
        super::amplify_frames(&mut frames, gain);
        assert_eq!(frames, [[1.0 * gain, 0.0], [3.2 * gain, -1.0 * gain]]);
    }

    #[test]
    fn swaps_left_and_right() {
        let mut frames = [[1.0, 2.0], [3.0, 4.0]];
        swap_channels(&mut frames);
        assert_eq!(frames, [[2.0, 1.0], [4.0, 3.0]]);
    }

    #[test]
    fn interleaves_into_wider_layout() {
        let mut out = [0.0f32; 8];
        write_interleaved(&mut out, 4, &[[0.5, -0.5], [0.25, -0.25]]);
        assert_eq!(out, [0.5, -0.5, 0.5, -0.5, 0.25, -0.25, 0.25, -0.25]);
    }

    #[test]
    fn converts_to_i16() {
        let mut out = [[0i16; 2]; 2];
        frames_to_i16(&[[0.0, 1.0], [-1.0, 0.5]], &mut out);
        assert_eq!(out[0][0], 0);
        assert_eq!(out[0][1], i16::MAX);
        assert_eq!(out[1][0], i16::MIN);
        assert!(out[1][1] > 16000);
    }
}
