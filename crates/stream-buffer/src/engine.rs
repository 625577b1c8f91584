//! Shared state machine behind [`SeekableStream`](crate::SeekableStream) and
//! [`BufferedStream`](crate::BufferedStream).
//!
//! All bytes ever pulled from the network live in one growth buffer. The read cursor moves
//! freely inside `[0, len]`; the network cursor is the buffer length and only grows.
//! Network reads run with the source checked out of the locked state, so `close` never
//! waits on a stalled socket.

use std::io::{self, Read, SeekFrom};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cache::FanOut;
use crate::error::{StreamError, is_benign_eof};
use crate::window::ByteWindow;
use crate::{StreamState, lock};

/// Boxed one-shot network body.
pub(crate) type NetworkSource = Box<dyn Read + Send>;

/// Largest single network read issued on behalf of a consumer read.
const MAX_FETCH: u64 = 256 * 1024;

/// Network reads slower than this are logged.
const SLOW_FETCH: Duration = Duration::from_millis(250);

pub(crate) struct StreamCore {
    /// Held for the whole duration of a consumer `read`/`seek`.
    op: Mutex<()>,
    shared: Mutex<Shared>,
    /// Notified when the source is handed back or the state changes.
    changed: Condvar,
}

struct Shared {
    window: ByteWindow,
    cursor: u64,
    state: StreamState,
    source: Option<NetworkSource>,
    fetching: bool,
    fanout: Option<FanOut>,
}

impl Shared {
    fn effective_len(&self) -> u64 {
        self.window.capacity()
    }

    fn finish_buffering(&mut self) {
        if !self.window.is_full() {
            tracing::warn!(
                received = self.window.len(),
                declared = self.window.capacity(),
                "network ended before the declared length; truncating"
            );
            self.window.truncate_capacity();
        }
        self.state = StreamState::BufferingComplete;
        self.source = None;
        if let Some(fanout) = self.fanout.take() {
            fanout.close();
        }
        tracing::debug!(len = self.window.len(), "buffering complete");
    }
}

impl StreamCore {
    pub(crate) fn new(source: NetworkSource, total_size: u64, fanout: Option<FanOut>) -> Self {
        let mut shared = Shared {
            window: ByteWindow::new(total_size),
            cursor: 0,
            state: StreamState::Active,
            source: Some(source),
            fetching: false,
            fanout,
        };
        if total_size == 0 {
            shared.finish_buffering();
        }
        Self {
            op: Mutex::new(()),
            shared: Mutex::new(shared),
            changed: Condvar::new(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull at most `max` fresh bytes from the network into the window.
    ///
    /// Returns the number of bytes appended. `Ok(0)` means the stream is no longer active
    /// (buffering complete or closed). Bytes appended here are forwarded to the cache sinks
    /// inside the same critical section.
    pub(crate) fn fetch(&self, max: usize) -> io::Result<usize> {
        let (mut source, want) = {
            let mut shared = lock(&self.shared);
            while shared.fetching && shared.state == StreamState::Active {
                shared = self.wait(shared);
            }
            if shared.state != StreamState::Active {
                return Ok(0);
            }
            // Recomputed under the lock: bytes appended by a concurrent fetch are never
            // requested again.
            let want = shared.window.remaining().min(max as u64) as usize;
            if want == 0 {
                shared.finish_buffering();
                drop(shared);
                self.changed.notify_all();
                return Ok(0);
            }
            let Some(source) = shared.source.take() else {
                return Ok(0);
            };
            shared.fetching = true;
            (source, want)
        };

        let mut chunk = vec![0u8; want];
        let started = Instant::now();
        let result = read_retrying(&mut source, &mut chunk);
        let elapsed = started.elapsed();
        if elapsed > SLOW_FETCH {
            tracing::warn!(
                want,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow network read"
            );
        }

        let mut shared = lock(&self.shared);
        shared.fetching = false;
        let outcome = if shared.state == StreamState::Closed {
            drop(source);
            Ok(0)
        } else {
            match result {
                Ok(0) => {
                    drop(source);
                    shared.finish_buffering();
                    Ok(0)
                }
                Ok(n) => {
                    let kept = shared.window.append(&chunk[..n]);
                    if let Some(fanout) = &shared.fanout {
                        fanout.send(&chunk[..kept]);
                    }
                    if shared.window.is_full() {
                        drop(source);
                        shared.finish_buffering();
                    } else {
                        shared.source = Some(source);
                    }
                    Ok(kept)
                }
                Err(err) if is_benign_eof(&err) => {
                    tracing::debug!(error = %err, "network source reported end of data");
                    drop(source);
                    shared.finish_buffering();
                    Ok(0)
                }
                Err(err) => {
                    shared.source = Some(source);
                    Err(err)
                }
            }
        };
        drop(shared);
        self.changed.notify_all();
        outcome
    }

    pub(crate) fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
        let _op = lock(&self.op);
        if dest.is_empty() {
            return Ok(0);
        }
        let mut topped_up = false;
        loop {
            let (cursor, end, have, state) = {
                let shared = lock(&self.shared);
                (
                    shared.cursor,
                    shared.effective_len(),
                    shared.window.len(),
                    shared.state,
                )
            };
            if state == StreamState::Closed || cursor >= end {
                return Ok(0);
            }
            let target = cursor.saturating_add(dest.len() as u64).min(end);
            let starved = have <= cursor;
            if state == StreamState::Active && (starved || (have < target && !topped_up)) {
                // Covers the gap between the network cursor and the read cursor as well.
                let missing = target - have;
                match self.fetch(missing.min(MAX_FETCH) as usize) {
                    Ok(_) => {}
                    Err(err) if starved => return Err(err),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            buffered = have - cursor,
                            "top-up fetch failed; serving buffered bytes"
                        );
                    }
                }
                if !starved {
                    topped_up = true;
                }
                continue;
            }

            let mut shared = lock(&self.shared);
            if shared.state == StreamState::Closed {
                return Ok(0);
            }
            let span = (target - cursor) as usize;
            let n = shared.window.copy_out(cursor, &mut dest[..span]);
            shared.cursor += n as u64;
            return Ok(n);
        }
    }

    pub(crate) fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        let _op = lock(&self.op);
        let mut shared = lock(&self.shared);
        let len = shared.effective_len();
        let requested = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(shared.cursor) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(len) + i128::from(delta),
        };
        if requested < 0 || requested > i128::from(len) {
            return Err(StreamError::SeekOutOfRange { requested, len }.into());
        }
        shared.cursor = requested as u64;
        Ok(shared.cursor)
    }

    pub(crate) fn is_done(&self) -> bool {
        let shared = lock(&self.shared);
        shared.cursor >= shared.effective_len()
    }

    pub(crate) fn progress(&self) -> f64 {
        let shared = lock(&self.shared);
        ratio(shared.cursor, shared.effective_len())
    }

    pub(crate) fn buffering_progress(&self) -> f64 {
        let shared = lock(&self.shared);
        ratio(shared.window.len(), shared.effective_len())
    }

    pub(crate) fn len(&self) -> u64 {
        lock(&self.shared).effective_len()
    }

    pub(crate) fn buffered_len(&self) -> u64 {
        lock(&self.shared).window.len()
    }

    pub(crate) fn state(&self) -> StreamState {
        lock(&self.shared).state
    }

    /// Release the network source and close the cache sinks.
    ///
    /// Returns `true` for the call that performed the close. A network read in flight keeps
    /// its checked-out source and drops it when it returns.
    pub(crate) fn close(&self) -> bool {
        self.shut(false)
    }

    /// Like [`close`](Self::close), but only while the network source is still attached.
    /// A stream that finished buffering stays readable.
    pub(crate) fn abort(&self) -> bool {
        self.shut(true)
    }

    fn shut(&self, only_active: bool) -> bool {
        let (source, fanout) = {
            let mut shared = lock(&self.shared);
            if shared.state == StreamState::Closed
                || (only_active && shared.state != StreamState::Active)
            {
                return false;
            }
            let previous = shared.state;
            shared.state = StreamState::Closed;
            tracing::debug!(
                previous = ?previous,
                cursor = shared.cursor,
                buffered = shared.window.len(),
                "stream closed"
            );
            (shared.source.take(), shared.fanout.take())
        };
        drop(source);
        if let Some(fanout) = fanout {
            fanout.close();
        }
        self.changed.notify_all();
        true
    }

    /// Block until the stream is no longer active or `timeout` elapses.
    pub(crate) fn wait_settled(&self, timeout: Duration) -> StreamState {
        let deadline = Instant::now() + timeout;
        let mut shared = lock(&self.shared);
        while shared.state == StreamState::Active {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            shared = self
                .changed
                .wait_timeout(shared, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        shared.state
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64).clamp(0.0, 1.0)
}

fn read_retrying(source: &mut NetworkSource, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
