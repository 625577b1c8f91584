use serde::{Deserialize, Serialize};

/// One playable item: where to fetch it and how to label it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    /// Stable identifier, also used to name the cache file.
    pub id: String,
    pub title: String,
    pub url: String,
    /// Nominal duration, when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Coarse player state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

/// Why the player went to [`PlayerState::Stopped`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A stop command.
    Requested,
    /// The decoder failed mid-track.
    DecodeError,
    /// The track could not be opened or probed.
    OpenFailed,
    /// The audio device rejected the stream.
    OutputError,
    /// `next` was issued on the last track.
    EndOfQueue,
}

/// Events emitted by the player, in the order they happen.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    TrackStarted {
        index: usize,
        title: String,
        duration_ms: Option<u64>,
    },
    /// Read position and fetched share of the current track, both in `[0, 1]`.
    Progress { fraction: f64, buffered: f64 },
    /// The current track was read to the end (or its stream failed); the owner usually
    /// advances to the next one.
    Finished { index: usize },
    Stopped {
        reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Point-in-time snapshot of the player.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// Index into the loaded track list.
    pub index: Option<usize>,
    pub title: Option<String>,
    /// Read position over track length.
    pub progress: f64,
    /// Fetched bytes over track length.
    pub buffered: f64,
    pub duration_ms: Option<u64>,
    /// Linear output gain, `0.0..=1.0`.
    pub volume: f32,
    /// Set when playback went idle.
    pub stop_reason: Option<StopReason>,
}
