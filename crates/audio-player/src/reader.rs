//! Decode-read wrapper: the byte source the decoder actually reads from.
//!
//! It watches the stream on every read. Reaching the end closes the stream and reports
//! `Finished` once; otherwise progress is reported at a bounded rate. A network failure is
//! turned into end of data so the decoder winds down and the owner moves on.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use soundline_types::PlayerEvent;
use stream_buffer::PlaybackStream;
use symphonia::core::io::MediaSource;

/// Fires `Finished` for one track at most once, closing its stream.
pub struct FinishLatch {
    fired: AtomicBool,
    index: usize,
    stream: Arc<dyn PlaybackStream>,
    events: Sender<PlayerEvent>,
}

impl FinishLatch {
    pub fn new(index: usize, stream: Arc<dyn PlaybackStream>, events: Sender<PlayerEvent>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            index,
            stream,
            events,
        }
    }

    /// Returns `true` for the call that fired.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stream.close();
        // Unbounded channel: never blocks the decoder.
        let _ = self.events.send(PlayerEvent::Finished { index: self.index });
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// `Read + Seek` view over a [`PlaybackStream`] that reports progress and end of track.
pub struct TrackReader {
    stream: Arc<dyn PlaybackStream>,
    latch: Arc<FinishLatch>,
    events: Sender<PlayerEvent>,
    progress_interval: Duration,
    last_progress: Option<Instant>,
}

impl TrackReader {
    pub fn new(
        stream: Arc<dyn PlaybackStream>,
        latch: Arc<FinishLatch>,
        events: Sender<PlayerEvent>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            stream,
            latch,
            events,
            progress_interval,
            last_progress: None,
        }
    }

    fn report_progress(&mut self) {
        let now = Instant::now();
        if self
            .last_progress
            .is_some_and(|last| now.duration_since(last) < self.progress_interval)
        {
            return;
        }
        self.last_progress = Some(now);
        let _ = self.events.send(PlayerEvent::Progress {
            fraction: self.stream.progress(),
            buffered: self.stream.buffering_progress(),
        });
    }
}

impl Read for TrackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.stream.read(buf) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "track stream failed; ending track");
                self.latch.fire();
                return Ok(0);
            }
        };
        if self.stream.is_done() {
            if self.latch.fire() {
                tracing::debug!(index = self.latch.index, "track stream fully read");
            }
        } else {
            self.report_progress();
        }
        Ok(n)
    }
}

impl Seek for TrackReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}

impl MediaSource for TrackReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.stream.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_buffer::SeekableStream;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    fn reader_over(
        stream: Arc<dyn PlaybackStream>,
        interval: Duration,
    ) -> (TrackReader, crossbeam_channel::Receiver<PlayerEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let latch = Arc::new(FinishLatch::new(7, stream.clone(), tx.clone()));
        (TrackReader::new(stream, latch, tx, interval), rx)
    }

    #[test]
    fn finished_fires_once_at_end_and_closes_stream() {
        let stream: Arc<dyn PlaybackStream> =
            Arc::new(SeekableStream::new(io::Cursor::new(vec![1u8; 64]), 64));
        let (mut reader, rx) = reader_over(stream.clone(), Duration::ZERO);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 64);
        reader.read(&mut [0u8; 4]).unwrap();

        let finished: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e, PlayerEvent::Finished { index: 7 }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(stream.state(), stream_buffer::StreamState::Closed);
    }

    #[test]
    fn progress_is_throttled() {
        let stream: Arc<dyn PlaybackStream> =
            Arc::new(SeekableStream::new(io::Cursor::new(vec![0u8; 1000]), 1000));
        let (mut reader, rx) = reader_over(stream, Duration::from_secs(60));
        for _ in 0..5 {
            reader.read(&mut [0u8; 10]).unwrap();
        }
        let progress = rx
            .try_iter()
            .filter(|e| matches!(e, PlayerEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 1);
    }

    #[test]
    fn network_error_becomes_end_of_track() {
        let stream: Arc<dyn PlaybackStream> = Arc::new(SeekableStream::new(Broken, 100));
        let (mut reader, rx) = reader_over(stream.clone(), Duration::ZERO);
        assert_eq!(reader.read(&mut [0u8; 16]).unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::Finished { index: 7 });
        assert_eq!(stream.state(), stream_buffer::StreamState::Closed);
    }

    #[test]
    fn seek_to_end_then_read_finishes() {
        let stream: Arc<dyn PlaybackStream> =
            Arc::new(SeekableStream::new(io::Cursor::new(vec![0u8; 100]), 100));
        let (mut reader, rx) = reader_over(stream, Duration::ZERO);
        reader.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(reader.read(&mut [0u8; 16]).unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::Finished { index: 7 });
    }
}
