//! Bounded sample queue between the player thread and the CPAL callback.
//!
//! The player thread pushes with a bounded wait so it can keep serving commands while the
//! device is paused; the callback only ever pops without blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// Samples are stored interleaved (`frame0[ch0], frame0[ch1], frame1[ch0], ...`) and the
/// channel count is fixed for the lifetime of the queue.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    closed: bool,
}

/// Queue capacity in samples for `seconds` of audio at `rate_hz`.
///
/// Non-finite or non-positive `buffer_seconds` fall back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Buffered frames at the time of the call.
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    /// Stop accepting samples and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered (used on seek and track change).
    pub fn clear(&self) {
        self.lock().queue.clear();
        self.cv.notify_all();
    }

    /// Push as many samples as fit within `timeout`.
    ///
    /// Returns the number of samples accepted; stops early when the queue is closed.
    pub fn push_interleaved_timeout(&self, samples: &[f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;
        let mut g = self.lock();
        while offset < samples.len() && !g.closed {
            let room = self.max_buffered_samples.saturating_sub(g.queue.len());
            if room == 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                g = self
                    .cv
                    .wait_timeout(g, deadline - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                continue;
            }
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
        }
        drop(g);
        if offset > 0 {
            self.cv.notify_all();
        }
        offset
    }

    /// Pop up to `max_frames` whole frames without blocking.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_frames = (g.queue.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.queue.drain(..take_frames * self.channels).collect();
        let remaining = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(remaining);
        Some(out)
    }

    /// Wait until the queue is empty or `timeout` elapses. Returns `true` when empty.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while !g.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = self
                .cv
                .wait_timeout(g, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued == 0 || queued >= threshold {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::info!(
                queued_samples = queued,
                threshold_samples = threshold,
                "audio queue low watermark"
            );
        }
    }
}
