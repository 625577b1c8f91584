//! Cache sinks and the fan-out that feeds them.
//!
//! Each sink gets its own worker thread and an unbounded queue, so a slow disk never holds
//! up the stream lock. Chunks arrive in fetch order and every sink is closed exactly once.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::lock;

/// Write target that receives every newly fetched byte range once.
pub trait CacheSink: Send + 'static {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Finish the sink. Called once, after the last chunk (or after a write failure).
    fn close(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write + Send + 'static> CacheSink for W {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_all(chunk)
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

/// Per-sink queues. Dropping (or [`FanOut::close`]) lets every worker drain and close.
pub(crate) struct FanOut {
    lanes: Vec<Sender<Arc<[u8]>>>,
}

impl FanOut {
    /// Start one worker per sink. Returns `None` when there is nothing to feed.
    pub(crate) fn spawn(sinks: Vec<Box<dyn CacheSink>>) -> Option<Self> {
        if sinks.is_empty() {
            return None;
        }
        let mut lanes = Vec::with_capacity(sinks.len());
        for (index, sink) in sinks.into_iter().enumerate() {
            let (tx, rx) = crossbeam_channel::unbounded::<Arc<[u8]>>();
            // The worker takes the sink out of the slot; a failed spawn leaves it here.
            let slot = Arc::new(Mutex::new(Some(sink)));
            let worker_slot = Arc::clone(&slot);
            let spawned = thread::Builder::new()
                .name(format!("cache-sink-{index}"))
                .spawn(move || {
                    let sink = lock(&worker_slot).take();
                    if let Some(sink) = sink {
                        drain_into(index, sink, rx);
                    }
                });
            match spawned {
                Ok(_) => lanes.push(tx),
                Err(err) => {
                    tracing::warn!(sink = index, error = %err, "cache sink worker failed to start");
                    close_unstarted(index, &slot);
                }
            }
        }
        Some(Self { lanes })
    }

    pub(crate) fn send(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let chunk: Arc<[u8]> = Arc::from(chunk);
        for lane in &self.lanes {
            // A worker that gave up after a write failure has dropped its receiver.
            let _ = lane.send(Arc::clone(&chunk));
        }
    }

    pub(crate) fn close(self) {
        drop(self);
    }
}

fn drain_into(index: usize, mut sink: Box<dyn CacheSink>, rx: Receiver<Arc<[u8]>>) {
    let mut written: u64 = 0;
    for chunk in rx.iter() {
        if let Err(err) = sink.write_chunk(&chunk) {
            tracing::warn!(sink = index, written, error = %err, "cache sink write failed");
            break;
        }
        written += chunk.len() as u64;
    }
    drop(rx);
    finish(index, sink, written);
}

fn close_unstarted(index: usize, slot: &Mutex<Option<Box<dyn CacheSink>>>) {
    let sink = lock(slot).take();
    if let Some(sink) = sink {
        finish(index, sink, 0);
    }
}

fn finish(index: usize, sink: Box<dyn CacheSink>, written: u64) {
    match sink.close() {
        Ok(()) => tracing::debug!(sink = index, written, "cache sink closed"),
        Err(err) => tracing::warn!(sink = index, written, error = %err, "cache sink close failed"),
    }
}
