//! CPAL output stream and its real-time callback.
//!
//! The callback refills a small local buffer from [`SharedAudio`] without blocking, maps
//! channels, applies the volume and converts to the device sample format. While paused it
//! writes silence and leaves the queue alone.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

/// Shared knobs read by the output callback.
#[derive(Clone, Debug)]
pub struct OutputControls {
    pub paused: Arc<AtomicBool>,
    /// Linear gain stored as `f32` bits.
    pub volume: Arc<AtomicU32>,
    /// Frames handed to the device.
    pub played_frames: Arc<AtomicU64>,
    /// Callbacks that ran dry and padded with silence.
    pub underrun_events: Arc<AtomicU64>,
}

impl OutputControls {
    pub fn new(volume: f32) -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(true)),
            volume: Arc::new(AtomicU32::new(clamp_volume(volume).to_bits())),
            played_frames: Arc::new(AtomicU64::new(0)),
            underrun_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(clamp_volume(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Build a CPAL output stream that drains `queue`.
///
/// `queue` must already carry samples at the device rate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    controls: &OutputControls,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(device, config, queue, refill_max_frames, controls)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(device, config, queue, refill_max_frames, controls)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(device, config, queue, refill_max_frames, controls)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(device, config, queue, refill_max_frames, controls)
        }
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    controls: &OutputControls,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let mut local = LocalBuffer {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };
    let refill_max_frames = refill_max_frames.max(1);
    let queue = queue.clone();
    let controls = controls.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if controls.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let gain = f32::from_bits(controls.volume.load(Ordering::Relaxed));
            let frames = data.len() / channels_out;
            let mut filled = 0usize;

            for frame in 0..frames {
                if local.pos >= local.src.len() {
                    local.pos = 0;
                    match queue.pop_up_to(refill_max_frames) {
                        Some(v) => local.src = v,
                        None => {
                            local.src.clear();
                            controls.underrun_events.fetch_add(1, Ordering::Relaxed);
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = local.next_mapped(channels_out, ch) * gain;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
                filled += 1;
            }

            if filled > 0 {
                controls
                    .played_frames
                    .fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Samples pulled from the queue but not yet written to the device.
struct LocalBuffer {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    /// Next output sample for `dst_ch`.
    ///
    /// Mono is duplicated, stereo to mono is averaged, other layouts clamp to the last
    /// available channel. `pos` advances after the last destination channel.
    fn next_mapped(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.pos >= self.src.len() {
            return 0.0;
        }
        let frame = &self.src[self.pos..(self.pos + self.src_channels).min(self.src.len())];
        let get = |ch: usize| frame.get(ch).copied().unwrap_or(0.0);

        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };

        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}
