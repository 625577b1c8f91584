//! Sample-rate conversion between the decoded track and the output device.
//!
//! Uses Rubato's sinc resampler on fixed-size input chunks. Input is accumulated until a
//! full chunk is available; [`RateConverter::flush`] pushes the tail through as a partial
//! chunk at the end of a track.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Largest ratio change we ask Rubato to support.
const MAX_RELATIVE_RATIO: f64 = 1.1;
const SINC_LEN: usize = 128;

/// Streaming resampler for interleaved `f32` audio.
pub struct RateConverter {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    from_hz: u32,
    to_hz: u32,
}

impl RateConverter {
    pub fn new(from_hz: u32, to_hz: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if from_hz == 0 || to_hz == 0 || channels == 0 {
            return Err(anyhow!(
                "invalid resampler setup: {from_hz} Hz -> {to_hz} Hz, {channels} channels"
            ));
        }
        let ratio = to_hz as f64 / from_hz as f64;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: calculate_cutoff(SINC_LEN, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            ratio,
            MAX_RELATIVE_RATIO,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init failed: {e}"))?;

        let out_frames = output_capacity_frames(chunk_frames, ratio);
        tracing::debug!(from_hz, to_hz, channels, chunk_frames, "resampler ready");
        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels),
            scratch: vec![0.0; out_frames * channels],
            from_hz,
            to_hz,
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from_hz, self.to_hz)
    }

    /// Convert `input`, appending every full chunk's output to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let chunk_samples = self.chunk_frames * self.channels;
        let mut rest = input;
        while !rest.is_empty() {
            let take = (chunk_samples - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == chunk_samples {
                self.run_chunk(None, out)?;
            }
        }
        Ok(())
    }

    /// Push buffered input through as a partial chunk.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let frames = self.pending.len() / self.channels;
        if frames == 0 {
            self.pending.clear();
            return Ok(());
        }
        self.pending.truncate(frames * self.channels);
        self.pending.resize(self.chunk_frames * self.channels, 0.0);
        self.run_chunk(Some(frames), out)
    }

    fn run_chunk(&mut self, partial_len: Option<usize>, out: &mut Vec<f32>) -> Result<()> {
        let input = InterleavedSlice::new(&self.pending, self.channels, self.chunk_frames)
            .map_err(|e| anyhow!("resampler input adapter: {e}"))?;
        let capacity_frames = self.scratch.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.scratch, self.channels, capacity_frames)
            .map_err(|e| anyhow!("resampler output adapter: {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resampler process failed: {e}"))?;
        out.extend_from_slice(&self.scratch[..produced * self.channels]);
        self.pending.clear();
        Ok(())
    }
}

/// Output frames needed for one input chunk, with headroom for the ratio margin and
/// the sinc delay line.
fn output_capacity_frames(chunk_frames: usize, ratio: f64) -> usize {
    (chunk_frames as f64 * ratio * MAX_RELATIVE_RATIO).ceil() as usize + 2 * SINC_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_capacity_covers_upsampling() {
        assert!(output_capacity_frames(1024, 192_000.0 / 44_100.0) >= 4459);
        assert!(output_capacity_frames(1024, 0.5) >= 512);
    }

    #[test]
    fn rejects_zero_rates() {
        assert!(RateConverter::new(0, 48_000, 2, 1024).is_err());
        assert!(RateConverter::new(44_100, 48_000, 0, 1024).is_err());
    }

    #[test]
    fn converts_roughly_by_ratio() {
        let mut conv = RateConverter::new(24_000, 48_000, 1, 256).unwrap();
        let input = vec![0.25f32; 24_000];
        let mut out = Vec::new();
        conv.process(&input, &mut out).unwrap();
        conv.flush(&mut out).unwrap();
        // Sinc delay eats a little at the start; the bulk should be doubled.
        assert!(out.len() > 44_000, "got {}", out.len());
        assert!(out.len() < 49_000, "got {}", out.len());
    }

    #[test]
    fn partial_input_waits_for_full_chunk() {
        let mut conv = RateConverter::new(44_100, 48_000, 2, 512).unwrap();
        let mut out = Vec::new();
        conv.process(&[0.0; 100], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(conv.rates(), (44_100, 48_000));
    }
}
