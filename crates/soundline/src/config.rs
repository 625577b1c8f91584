//! Configuration loading and resolution.
//!
//! Every file key is optional; command line flags win over the file and built-in defaults
//! fill the rest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use audio_player::PlayerConfig;
use serde::Deserialize;
use stream_buffer::BufferConfig;

use crate::cli::Args;

const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SEEK_STEP_MS: u64 = 10_000;
const DEFAULT_LOG_FILTER: &str = "info,soundline=info";

/// Config file schema (TOML).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Directory for cached tracks.
    pub cache_dir: Option<PathBuf>,
    /// Write fetched tracks to `cache_dir` (default: true).
    pub cache_tracks: Option<bool>,
    /// Per-read network deadline; 0 disables it.
    pub read_timeout_ms: Option<u64>,
    /// Prefetch step size in KiB.
    pub prefetch_chunk_kib: Option<usize>,
    /// Pause between prefetch steps.
    pub prefetch_interval_ms: Option<u64>,
    /// Output queue target in seconds.
    pub buffer_seconds: Option<f32>,
    /// Output device substring.
    pub device: Option<String>,
    /// Initial volume, 0.0 to 1.0.
    pub volume: Option<f32>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Jump size for the forward/rewind commands.
    pub seek_step_ms: Option<u64>,
}

/// Fully resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// `None` when caching is disabled.
    pub cache_dir: Option<PathBuf>,
    pub read_timeout: Option<Duration>,
    pub buffer: BufferConfig,
    pub player: PlayerConfig,
    pub volume: f32,
    pub log_filter: String,
    pub seek_step_ms: i64,
}

impl AppConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<AppConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Merge with command line flags and fill in defaults.
    pub fn resolve(self, args: &Args) -> Settings {
        let cache_tracks = !args.no_cache && self.cache_tracks.unwrap_or(true);
        let cache_dir = cache_tracks.then(|| {
            args.cache_dir
                .clone()
                .or(self.cache_dir)
                .unwrap_or_else(default_cache_dir)
        });

        let read_timeout_ms = args
            .read_timeout_ms
            .or(self.read_timeout_ms)
            .unwrap_or(DEFAULT_READ_TIMEOUT_MS);
        let read_timeout = (read_timeout_ms > 0).then(|| Duration::from_millis(read_timeout_ms));

        let mut buffer = BufferConfig::default();
        if let Some(kib) = self.prefetch_chunk_kib.filter(|kib| *kib > 0) {
            buffer.chunk_size = kib * 1024;
        }
        if let Some(ms) = self.prefetch_interval_ms {
            buffer.tick_interval = Duration::from_millis(ms.max(1));
        }

        let mut player = PlayerConfig::default();
        if let Some(secs) = args
            .buffer_seconds
            .or(self.buffer_seconds)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
        {
            player.buffer_seconds = secs;
        }
        player.device = normalize_device_name(args.device.clone().or(self.device));

        Settings {
            cache_dir,
            read_timeout,
            buffer,
            player,
            volume: audio_player::playback::clamp_volume(args.volume.or(self.volume).unwrap_or(1.0)),
            log_filter: self
                .log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            seek_step_ms: self
                .seek_step_ms
                .unwrap_or(DEFAULT_SEEK_STEP_MS)
                .min(i64::MAX as u64) as i64,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("soundline-cache")
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
