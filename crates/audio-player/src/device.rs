//! Output device discovery and stream configuration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .ok()
                .is_some_and(|desc| matches_device_name(&desc.name(), needle))
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose an output config for a track at `track_rate` Hz.
///
/// Prefers the highest supported rate at or below the track rate (an exact match when the
/// device has one), then the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    track_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), track_rate);
        let candidate = Candidate {
            at_or_below: track_rate.is_none_or(|t| rate <= t),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = best
            .as_ref()
            .is_none_or(|(current, _)| candidate.beats(current));
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Largest fixed buffer the device allows, capped to keep latency bounded.
///
/// `None` leaves the size to the backend.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    at_or_below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.at_or_below != other.at_or_below {
            self.at_or_below
        } else if self.rate != other.rate {
            // Below the track rate higher is better; above it, closer is better.
            if self.at_or_below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            }
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: Option<u32>) -> u32 {
    match target {
        Some(t) => t.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(at_or_below: bool, rate: u32, format_rank: u8) -> Candidate {
        Candidate {
            at_or_below,
            rate,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", " USB "));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn rate_clamps_into_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidate_prefers_rates_not_above_track() {
        assert!(c(true, 44_100, 2).beats(&c(false, 48_000, 0)));
        assert!(!c(false, 48_000, 0).beats(&c(true, 44_100, 2)));
    }

    #[test]
    fn candidate_prefers_closest_rate() {
        assert!(c(true, 48_000, 2).beats(&c(true, 44_100, 2)));
        assert!(c(false, 88_200, 2).beats(&c(false, 96_000, 2)));
    }

    #[test]
    fn candidate_breaks_ties_on_format() {
        assert!(c(true, 48_000, 0).beats(&c(true, 48_000, 2)));
        assert!(!c(true, 48_000, 3).beats(&c(true, 48_000, 1)));
    }
}
