//! Fake network sources and cache sinks shared by the unit tests.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::CacheSink;

/// Deterministic byte pattern; byte `i` is `i % 251`.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Counts how many times the owning value was dropped.
#[derive(Clone, Default)]
pub(crate) struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn token(&self) -> DropToken {
        DropToken(self.0.clone())
    }
}

struct DropToken(Arc<AtomicUsize>);

impl Drop for DropToken {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory body that hands out at most `chunk` bytes per read.
pub(crate) struct ChunkedSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    delay: Duration,
    fail_at: Option<usize>,
    stall: Option<(usize, Duration)>,
    reads: Arc<AtomicUsize>,
    _drop: DropToken,
}

impl ChunkedSource {
    pub(crate) fn new(data: Vec<u8>, chunk: usize) -> (Self, DropCounter) {
        let drops = DropCounter::default();
        let source = Self {
            data,
            pos: 0,
            chunk,
            delay: Duration::ZERO,
            fail_at: None,
            stall: None,
            reads: Arc::new(AtomicUsize::new(0)),
            _drop: drops.token(),
        };
        (source, drops)
    }

    /// Sleep before every read.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every read once `offset` bytes have been served.
    pub(crate) fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Sleep for `delay` before every read once `offset` bytes have been served.
    pub(crate) fn stalling_at(mut self, offset: usize, delay: Duration) -> Self {
        self.stall = Some((offset, delay));
        self
    }

    pub(crate) fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl Read for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match self.stall {
            Some((at, delay)) if self.pos >= at => thread::sleep(delay),
            _ => {}
        }
        if self.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
        }
        let n = buf
            .len()
            .min(self.chunk)
            .min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Default)]
struct SinkLog {
    bytes: Vec<u8>,
    closes: usize,
}

/// Cache sink recording everything it receives.
#[derive(Clone)]
pub(crate) struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    fail_after_writes: Option<usize>,
    writes: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::default(),
            fail_after_writes: None,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing_after(writes: usize) -> Self {
        Self {
            fail_after_writes: Some(writes),
            ..Self::new()
        }
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.log.lock().unwrap().bytes.clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

impl CacheSink for RecordingSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_writes.is_some_and(|limit| done >= limit) {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        }
        self.log.lock().unwrap().bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}
