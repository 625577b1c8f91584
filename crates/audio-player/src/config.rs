use std::time::Duration;

/// Player tuning shared by the decode, resample and output stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Output queue size, in seconds of audio.
    pub buffer_seconds: f32,
    /// Minimum spacing between two `Progress` events.
    pub progress_interval: Duration,
    /// Output device name substring; `None` picks the host default.
    pub device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            progress_interval: Duration::from_millis(33),
            device: None,
        }
    }
}
