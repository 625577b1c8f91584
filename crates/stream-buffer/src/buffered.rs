//! Seekable stream that keeps pulling from the network on its own and mirrors every fetched
//! chunk into cache sinks.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::select;

use crate::cache::{CacheSink, FanOut};
use crate::cancel::CancelToken;
use crate::engine::StreamCore;
use crate::{PlaybackStream, StreamState};

/// Prefetch tuning.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Bytes requested from the network per prefetch step.
    pub chunk_size: usize,
    /// Pause between prefetch steps.
    pub tick_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            tick_interval: Duration::from_millis(10),
        }
    }
}

/// [`SeekableStream`](crate::SeekableStream) semantics plus a background prefetch loop and
/// cache fan-out.
///
/// Whether bytes come in through the prefetch loop or a foreground read, each fetched range
/// is appended and handed to the sinks in one critical section, so every sink sees the
/// whole body once, in order, regardless of seeks.
pub struct BufferedStream {
    core: Arc<StreamCore>,
    shutdown: CancelToken,
}

impl BufferedStream {
    pub fn new<R>(
        source: R,
        total_size: u64,
        sinks: Vec<Box<dyn CacheSink>>,
        config: BufferConfig,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        let sink_count = sinks.len();
        let core = Arc::new(StreamCore::new(
            Box::new(source),
            total_size,
            FanOut::spawn(sinks),
        ));
        let shutdown = CancelToken::new();

        let loop_core = core.clone();
        let loop_shutdown = shutdown.clone();
        let spawned = thread::Builder::new()
            .name("prefetch".into())
            .spawn(move || prefetch_loop(&loop_core, &loop_shutdown, &config));
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "prefetch thread failed to start; reads fetch on demand");
        }
        tracing::debug!(total_size, sinks = sink_count, "buffered stream opened");

        Self { core, shutdown }
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.core.read(buf)
    }

    pub fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        self.core.seek(pos)
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn progress(&self) -> f64 {
        self.core.progress()
    }

    pub fn buffering_progress(&self) -> f64 {
        self.core.buffering_progress()
    }

    pub fn len(&self) -> u64 {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffered_len(&self) -> u64 {
        self.core.buffered_len()
    }

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    /// Block until buffering completes, the stream closes, or `timeout` elapses.
    pub fn wait_buffered(&self, timeout: Duration) -> StreamState {
        self.core.wait_settled(timeout)
    }

    /// Close the stream when `token` is cancelled while the network source is still attached.
    ///
    /// Pair with a [`DeadlineReader`](crate::DeadlineReader) sharing the token: a stalled
    /// network read then tears the stream down and wakes any consumer blocked on it. Once
    /// buffering completed the cancellation is ignored.
    pub fn close_on_cancel(&self, token: &CancelToken) {
        let core = Arc::downgrade(&self.core);
        let cancelled = token.cancelled();
        let closed = self.shutdown.cancelled();
        let spawned = thread::Builder::new()
            .name("stream-abort".into())
            .spawn(move || {
                select! {
                    recv(cancelled) -> _ => {
                        if core.upgrade().is_some_and(|core| core.abort()) {
                            tracing::warn!("network source cancelled; stream closed");
                        }
                    }
                    recv(closed) -> _ => {}
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "abort watcher failed to start");
        }
    }

    /// Stop the prefetch loop and release the network source and sinks.
    ///
    /// Both halves are idempotent. Once buffering completed the source and sinks are
    /// already gone and are not touched again.
    pub fn close(&self) {
        let stopped = self.shutdown.cancel();
        let released = self.core.close();
        if stopped || released {
            tracing::debug!(stopped, released, "buffered stream close");
        }
    }
}

fn prefetch_loop(core: &StreamCore, shutdown: &CancelToken, config: &BufferConfig) {
    let ticker = crossbeam_channel::tick(config.tick_interval);
    let closed = shutdown.cancelled();
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match core.fetch(config.chunk_size) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "prefetch stopped after network error");
                break;
            }
        }
        if core.state() != StreamState::Active {
            break;
        }
        select! {
            recv(ticker) -> _ => {}
            recv(closed) -> _ => break,
        }
    }
    tracing::debug!(
        buffered = core.buffered_len(),
        state = ?core.state(),
        "prefetch loop exited"
    );
}

impl PlaybackStream for BufferedStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        BufferedStream::read(self, buf)
    }

    fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        BufferedStream::seek(self, pos)
    }

    fn is_done(&self) -> bool {
        BufferedStream::is_done(self)
    }

    fn progress(&self) -> f64 {
        BufferedStream::progress(self)
    }

    fn buffering_progress(&self) -> f64 {
        BufferedStream::buffering_progress(self)
    }

    fn len(&self) -> u64 {
        BufferedStream::len(self)
    }

    fn state(&self) -> StreamState {
        BufferedStream::state(self)
    }

    fn close(&self) {
        BufferedStream::close(self)
    }
}

impl Read for &BufferedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.core.read(buf)
    }
}

impl Seek for &BufferedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.core.seek(pos)
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        self.close();
    }
}
