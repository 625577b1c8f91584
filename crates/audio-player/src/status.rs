use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use soundline_types::{PlayerState, PlayerStatus, StopReason};

/// Shared status store written by the player thread and read by anyone holding a clone.
#[derive(Clone, Debug, Default)]
pub struct StatusCell {
    inner: Arc<Mutex<PlayerStatus>>,
}

impl StatusCell {
    pub fn new(volume: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlayerStatus {
                volume,
                ..PlayerStatus::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayerStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PlayerStatus {
        self.lock().clone()
    }

    pub fn track_started(&self, index: usize, title: &str, duration_ms: Option<u64>) {
        let mut s = self.lock();
        s.index = Some(index);
        s.title = Some(title.to_string());
        s.duration_ms = duration_ms;
        s.progress = 0.0;
        s.buffered = 0.0;
        s.stop_reason = None;
    }

    pub fn set_state(&self, state: PlayerState) {
        self.lock().state = state;
    }

    pub fn set_progress(&self, progress: f64, buffered: f64) {
        let mut s = self.lock();
        s.progress = progress;
        s.buffered = buffered;
    }

    pub fn set_volume(&self, volume: f32) {
        self.lock().volume = volume;
    }

    /// Go idle, clearing track fields but keeping the reason.
    pub fn stopped(&self, reason: StopReason) {
        let mut s = self.lock();
        s.state = PlayerState::Stopped;
        s.index = None;
        s.title = None;
        s.duration_ms = None;
        s.progress = 0.0;
        s.buffered = 0.0;
        s.stop_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_clears_track_fields_and_keeps_reason() {
        let cell = StatusCell::new(0.8);
        cell.track_started(2, "Song", Some(1000));
        cell.set_state(PlayerState::Playing);
        cell.set_progress(0.5, 0.9);

        let snap = cell.snapshot();
        assert_eq!(snap.index, Some(2));
        assert_eq!(snap.state, PlayerState::Playing);
        assert_eq!(snap.buffered, 0.9);

        cell.stopped(StopReason::DecodeError);
        let snap = cell.snapshot();
        assert_eq!(snap.state, PlayerState::Stopped);
        assert!(snap.title.is_none());
        assert_eq!(snap.progress, 0.0);
        assert_eq!(snap.stop_reason, Some(StopReason::DecodeError));
        assert_eq!(snap.volume, 0.8);
    }

    #[test]
    fn clones_share_state() {
        let cell = StatusCell::new(1.0);
        let other = cell.clone();
        other.set_volume(0.3);
        assert_eq!(cell.snapshot().volume, 0.3);
    }
}
