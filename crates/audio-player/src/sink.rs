//! Audio sinks: where decoded samples go.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use symphonia::core::audio::SignalSpec;

use crate::config::PlayerConfig;
use crate::device;
use crate::playback::{self, OutputControls};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::resample::RateConverter;

/// Output side of the player.
///
/// All calls come from the player thread; implementations need not be `Send`.
pub trait AudioSink {
    /// Prepare for samples in `spec`. Called before the first `write` of each track.
    fn start(&mut self, spec: SignalSpec) -> Result<()>;
    /// Queue interleaved samples, waiting at most `timeout` for room.
    ///
    /// Returns how many input samples were taken; the caller retries the rest.
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    /// Drop queued audio (seek, stop, track change).
    fn clear(&mut self);
    fn is_playing(&self) -> bool;
    fn set_volume(&mut self, volume: f32);
    /// Block until queued audio has been played or `timeout` elapses.
    fn drain(&mut self, _timeout: Duration) {}
}

struct OutputStream {
    spec: SignalSpec,
    queue: Arc<SharedAudio>,
    converter: Option<RateConverter>,
    outbox: Vec<f32>,
    // Kept alive for as long as the track plays.
    _stream: cpal::Stream,
}

/// CPAL-backed sink with rate conversion when the device cannot match the track.
pub struct CpalSink {
    device: cpal::Device,
    config: PlayerConfig,
    controls: OutputControls,
    output: Option<OutputStream>,
}

impl CpalSink {
    pub fn open(config: &PlayerConfig, volume: f32) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, config.device.as_deref())?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        tracing::info!(device = %device_name, "output device selected");
        Ok(Self {
            device,
            config: config.clone(),
            controls: OutputControls::new(volume),
            output: None,
        })
    }

    fn build(&self, spec: SignalSpec) -> Result<OutputStream> {
        let supported = device::pick_output_config(&self.device, Some(spec.rate))?;
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(size) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = size;
        }
        let channels = spec.channels.count();
        let dst_rate = stream_config.sample_rate;

        let converter = if dst_rate == spec.rate {
            tracing::info!(rate_hz = dst_rate, "resample skipped");
            None
        } else {
            tracing::info!(from_hz = spec.rate, to_hz = dst_rate, "resampling");
            Some(RateConverter::new(
                spec.rate,
                dst_rate,
                channels,
                self.config.chunk_frames,
            )?)
        };

        let queue = Arc::new(SharedAudio::new(
            channels,
            calc_max_buffered_samples(dst_rate, channels, self.config.buffer_seconds),
        ));
        let stream = playback::build_output_stream(
            &self.device,
            &stream_config,
            supported.sample_format(),
            &queue,
            self.config.refill_max_frames,
            &self.controls,
        )
        .context("build output stream")?;
        stream.play().context("start output stream")?;

        Ok(OutputStream {
            spec,
            queue,
            converter,
            outbox: Vec::new(),
            _stream: stream,
        })
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self, spec: SignalSpec) -> Result<()> {
        if let Some(out) = &mut self.output {
            if out.spec == spec {
                return Ok(());
            }
            // Let the previous track finish before switching formats.
            out.queue.wait_drained(Duration::from_secs(5));
        }
        self.output = None;
        self.output = Some(self.build(spec)?);
        Ok(())
    }

    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize> {
        let Some(out) = &mut self.output else {
            return Ok(samples.len());
        };
        if !out.outbox.is_empty() {
            let pushed = out.queue.push_interleaved_timeout(&out.outbox, timeout);
            out.outbox.drain(..pushed);
            if !out.outbox.is_empty() {
                return Ok(0);
            }
        }
        match &mut out.converter {
            Some(conv) => {
                conv.process(samples, &mut out.outbox)?;
                let pushed = out.queue.push_interleaved_timeout(&out.outbox, timeout);
                out.outbox.drain(..pushed);
                Ok(samples.len())
            }
            None => Ok(out.queue.push_interleaved_timeout(samples, timeout)),
        }
    }

    fn play(&mut self) -> Result<()> {
        self.controls.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.controls.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(out) = &mut self.output {
            out.queue.clear();
            out.outbox.clear();
            if let Some(conv) = &out.converter {
                let (from, to) = conv.rates();
                let channels = out.spec.channels.count();
                match RateConverter::new(from, to, channels, self.config.chunk_frames) {
                    Ok(fresh) => out.converter = Some(fresh),
                    Err(err) => tracing::warn!(error = %err, "resampler reset failed"),
                }
            }
        }
    }

    fn is_playing(&self) -> bool {
        !self.controls.paused.load(Ordering::Relaxed)
    }

    fn set_volume(&mut self, volume: f32) {
        self.controls.set_volume(volume);
    }

    fn drain(&mut self, timeout: Duration) {
        if let Some(out) = &mut self.output {
            if let Some(conv) = &mut out.converter {
                if let Err(err) = conv.flush(&mut out.outbox) {
                    tracing::warn!(error = %err, "resampler flush failed");
                }
            }
            let pushed = out.queue.push_interleaved_timeout(&out.outbox, timeout);
            out.outbox.drain(..pushed);
            out.queue.wait_drained(timeout);
        }
    }
}
