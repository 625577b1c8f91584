//! Random access over a one-shot network body.

use std::io::{self, Read, Seek, SeekFrom};

use crate::engine::StreamCore;
use crate::{PlaybackStream, StreamState};

/// Seekable view of a non-seekable body of known length.
///
/// Bytes are fetched only when a read needs them. Seeking backward is served from memory;
/// seeking forward past what arrived makes the next read fetch the gap first.
pub struct SeekableStream {
    core: StreamCore,
}

impl SeekableStream {
    pub fn new<R>(source: R, total_size: u64) -> Self
    where
        R: Read + Send + 'static,
    {
        tracing::debug!(total_size, "seekable stream opened");
        Self {
            core: StreamCore::new(Box::new(source), total_size, None),
        }
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

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    pub fn close(&self) {
        self.core.close();
    }
}

impl PlaybackStream for SeekableStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        SeekableStream::read(self, buf)
    }

    fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        SeekableStream::seek(self, pos)
    }

    fn is_done(&self) -> bool {
        SeekableStream::is_done(self)
    }

    fn progress(&self) -> f64 {
        SeekableStream::progress(self)
    }

    fn buffering_progress(&self) -> f64 {
        SeekableStream::buffering_progress(self)
    }

    fn len(&self) -> u64 {
        SeekableStream::len(self)
    }

    fn state(&self) -> StreamState {
        SeekableStream::state(self)
    }

    fn close(&self) {
        SeekableStream::close(self)
    }
}

impl Read for &SeekableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.core.read(buf)
    }
}

impl Seek for &SeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.core.seek(pos)
    }
}

impl Drop for SeekableStream {
    fn drop(&mut self) {
        self.core.close();
    }
}
