//! Seekable, cache-writing, deadline-bounded byte streams over one-shot network bodies.
//!
//! A decoder wants `Read + Seek`; an HTTP response body offers neither seeking nor a
//! bound on how long a read may block. The types here close that gap:
//!
//! - [`DeadlineReader`] cancels a [`CancelToken`] when one read stalls past its timeout.
//! - [`SeekableStream`] keeps every fetched byte in memory and serves random access.
//! - [`BufferedStream`] adds a background prefetch loop and mirrors the body into
//!   [`CacheSink`]s.

mod buffered;
mod cache;
mod cancel;
mod deadline;
mod engine;
mod error;
mod seekable;
mod window;

#[cfg(test)]
mod testing;

use std::io::{self, SeekFrom};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use buffered::{BufferConfig, BufferedStream};
pub use cache::CacheSink;
pub use cancel::CancelToken;
pub use deadline::DeadlineReader;
pub use error::StreamError;
pub use seekable::SeekableStream;

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Network source still attached.
    Active,
    /// Every byte arrived; the network source and sinks are released.
    BufferingComplete,
    /// Closed by the owner; reads return end of data.
    Closed,
}

/// Shared-reference stream contract consumed by the player.
///
/// Implementations are safe to use from several threads: `read`/`seek` are serialized
/// internally and `close` may race them.
#[allow(clippy::len_without_is_empty)]
pub trait PlaybackStream: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn seek(&self, pos: SeekFrom) -> io::Result<u64>;
    /// Read cursor has reached the end of the stream.
    fn is_done(&self) -> bool;
    /// Read cursor over total length, in `[0, 1]`.
    fn progress(&self) -> f64;
    /// Fetched bytes over total length, in `[0, 1]`.
    fn buffering_progress(&self) -> f64;
    fn len(&self) -> u64;
    fn state(&self) -> StreamState;
    fn close(&self);
}

/// Progress of an optional stream; an unassigned stream reports zero.
pub fn progress_of<S: PlaybackStream + ?Sized>(stream: Option<&S>) -> f64 {
    stream.map_or(0.0, |s| s.progress())
}

/// Done flag of an optional stream; an unassigned stream is never done.
pub fn is_done_of<S: PlaybackStream + ?Sized>(stream: Option<&S>) -> bool {
    stream.is_some_and(|s| s.is_done())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
