//! Playback coordinator.
//!
//! One worker thread owns the decoder, the audio sink and the current track's stream.
//! Commands arrive over a channel; while playing, the worker alternates between draining
//! commands and pumping one decoded chunk into the sink. Events go out on an unbounded
//! channel so neither side ever blocks the other.

use std::io::SeekFrom;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use soundline_types::{PlayerEvent, PlayerState, PlayerStatus, StopReason, Track};
use stream_buffer::PlaybackStream;

use crate::config::PlayerConfig;
use crate::decode::{Decoder, DecoderFactory};
use crate::playback::clamp_volume;
use crate::reader::{FinishLatch, TrackReader};
use crate::sink::AudioSink;
use crate::status::StatusCell;

/// Longest a single sink write may wait for room before commands are checked again.
const WRITE_WAIT: Duration = Duration::from_millis(20);
/// Upper bound on waiting for queued audio at the end of the list.
const DRAIN_WAIT: Duration = Duration::from_secs(10);

/// Opens the byte stream for a track.
pub trait TrackOpener: Send + Sync {
    fn open(&self, track: &Track) -> Result<Arc<dyn PlaybackStream>>;
}

#[derive(Debug)]
enum Command {
    Load { tracks: Vec<Track>, start: usize },
    Play,
    Pause,
    TogglePause,
    Stop,
    Next,
    Previous,
    Advance { from: usize },
    SeekBy { delta_ms: i64 },
    SetVolume(f32),
    Shutdown,
}

/// Handle to the player worker. Dropping it shuts the worker down.
pub struct PlaybackCoordinator {
    cmd_tx: Sender<Command>,
    status: StatusCell,
    join: Option<JoinHandle<()>>,
}

impl PlaybackCoordinator {
    /// Start the worker. `make_sink` runs on the worker thread so device streams that are
    /// not `Send` stay there; its error is returned from here.
    pub fn spawn<S, F>(
        opener: Arc<dyn TrackOpener>,
        decoders: Arc<dyn DecoderFactory>,
        make_sink: F,
        config: PlayerConfig,
    ) -> Result<(Self, Receiver<PlayerEvent>)>
    where
        S: AudioSink + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let status = StatusCell::new(1.0);

        let worker_status = status.clone();
        let join = thread::Builder::new()
            .name("player".into())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let worker = Worker {
                    opener,
                    decoders,
                    sink,
                    config,
                    status: worker_status,
                    events: event_tx,
                    tracks: Vec::new(),
                    session: None,
                    state: PlayerState::Stopped,
                };
                worker.run(cmd_rx);
            })
            .context("spawn player thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = join.join();
                return Err(err.context("open audio output"));
            }
            Err(_) => return Err(anyhow!("player thread exited during startup")),
        }

        Ok((
            Self {
                cmd_tx,
                status,
                join: Some(join),
            },
            event_rx,
        ))
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!("player thread is gone; command dropped");
        }
    }

    /// Replace the track list and start playing `start`.
    pub fn load(&self, tracks: Vec<Track>, start: usize) {
        self.send(Command::Load { tracks, start });
    }

    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn toggle_pause(&self) {
        self.send(Command::TogglePause);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn next(&self) {
        self.send(Command::Next);
    }

    pub fn previous(&self) {
        self.send(Command::Previous);
    }

    /// Move to the track after `from` once `from` has been decoded completely.
    ///
    /// Meant as the reaction to `PlayerEvent::Finished`: unlike [`next`](Self::next) it
    /// lets already fetched audio play out. Stale requests (another track is current) are
    /// ignored.
    pub fn advance(&self, from: usize) {
        self.send(Command::Advance { from });
    }

    /// Jump by `delta_ms` within the current track (negative rewinds).
    pub fn seek_by(&self, delta_ms: i64) {
        self.send(Command::SeekBy { delta_ms });
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(Command::SetVolume(volume));
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.snapshot()
    }

    /// Stop playback and wait for the worker to exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("player thread panicked");
            }
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Byte offset for a relative jump of `delta_ms` from the current read position.
///
/// The offset is aligned down to `alignment`. Targets at or before the start clamp to
/// `Start(0)`; targets at or past the end become `End(0)`, which finishes the track on the
/// next read.
pub fn rewind_target(
    len: u64,
    progress: f64,
    delta_ms: i64,
    duration_ms: u64,
    alignment: u64,
) -> SeekFrom {
    if len == 0 {
        return SeekFrom::Start(0);
    }
    let current = len as f64 * progress.clamp(0.0, 1.0);
    let shift = if duration_ms == 0 {
        0.0
    } else {
        delta_ms as f64 * len as f64 / duration_ms as f64
    };
    let target = (current + shift).floor();
    if target <= 0.0 {
        return SeekFrom::Start(0);
    }
    if target >= len as f64 {
        return SeekFrom::End(0);
    }
    let target = target as u64;
    SeekFrom::Start(target - target % alignment.max(1))
}

struct Session {
    index: usize,
    stream: Arc<dyn PlaybackStream>,
    decoder: Box<dyn Decoder>,
    latch: Arc<FinishLatch>,
    duration_ms: Option<u64>,
    pending: Vec<f32>,
    offset: usize,
    /// Decoder returned end of data.
    drained: bool,
    advance_requested: bool,
}

enum Pump {
    Wrote,
    Drained,
    DecodeFailed(anyhow::Error),
    OutputFailed(anyhow::Error),
}

struct Worker<S> {
    opener: Arc<dyn TrackOpener>,
    decoders: Arc<dyn DecoderFactory>,
    sink: S,
    config: PlayerConfig,
    status: StatusCell,
    events: Sender<PlayerEvent>,
    tracks: Vec<Track>,
    session: Option<Session>,
    state: PlayerState,
}

impl<S: AudioSink> Worker<S> {
    fn run(mut self, commands: Receiver<Command>) {
        loop {
            let cmd = if self.wants_pump() {
                match commands.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            };
            match cmd {
                Some(Command::Shutdown) => break,
                Some(cmd) => self.handle(cmd),
                None => self.pump(),
            }
        }
        self.end_session();
        let _ = self.sink.pause();
        tracing::debug!("player thread exiting");
    }

    fn wants_pump(&self) -> bool {
        self.state == PlayerState::Playing && self.session.as_ref().is_some_and(|s| !s.drained)
    }

    fn set_state(&mut self, state: PlayerState) {
        self.state = state;
        self.status.set_state(state);
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn handle(&mut self, cmd: Command) {
        tracing::debug!(?cmd, "player command");
        match cmd {
            Command::Load { tracks, start } => {
                self.tracks = tracks;
                if self.tracks.is_empty() {
                    self.stop(StopReason::Requested, None);
                } else {
                    self.start_track(start.min(self.tracks.len() - 1), true);
                }
            }
            Command::Play => self.resume(),
            Command::Pause => self.pause(),
            Command::TogglePause => match self.state {
                PlayerState::Playing => self.pause(),
                _ => self.resume(),
            },
            Command::Stop => self.stop(StopReason::Requested, None),
            Command::Next => match self.current_index() {
                Some(i) if i + 1 < self.tracks.len() => self.start_track(i + 1, true),
                Some(_) => self.stop(StopReason::EndOfQueue, None),
                None => {}
            },
            Command::Previous => {
                if let Some(i) = self.current_index() {
                    self.start_track(i.saturating_sub(1), true);
                }
            }
            Command::Advance { from } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.index != from {
                    tracing::debug!(from, current = session.index, "stale advance ignored");
                    return;
                }
                if session.drained {
                    self.advance();
                } else {
                    session.advance_requested = true;
                }
            }
            Command::SeekBy { delta_ms } => self.seek_by(delta_ms),
            Command::SetVolume(volume) => {
                let volume = clamp_volume(volume);
                self.sink.set_volume(volume);
                self.status.set_volume(volume);
            }
            Command::Shutdown => {}
        }
    }

    fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    fn resume(&mut self) {
        match self.state {
            PlayerState::Paused => {
                if let Err(err) = self.sink.play() {
                    self.stop(StopReason::OutputError, Some(format!("{err:#}")));
                    return;
                }
                self.set_state(PlayerState::Playing);
            }
            PlayerState::Stopped if !self.tracks.is_empty() => self.start_track(0, true),
            _ => {}
        }
    }

    fn pause(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        if let Err(err) = self.sink.pause() {
            tracing::warn!(error = %err, "pause failed");
        }
        self.set_state(PlayerState::Paused);
    }

    fn start_track(&mut self, index: usize, clear_output: bool) {
        self.end_session();
        if clear_output {
            self.sink.clear();
        }
        let Some(track) = self.tracks.get(index).cloned() else {
            self.stop(StopReason::EndOfQueue, None);
            return;
        };
        tracing::info!(index, title = %track.title, url = %track.url, "starting track");
        self.status
            .track_started(index, &track.title, track.duration_ms);

        let session = match self.open_session(index, &track) {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(index, "open failed: {err:#}");
                self.stop(StopReason::OpenFailed, Some(format!("{err:#}")));
                return;
            }
        };
        if let Err(err) = self.sink.start(session.decoder.spec()) {
            session.stream.close();
            tracing::error!(index, "audio output failed: {err:#}");
            self.stop(StopReason::OutputError, Some(format!("{err:#}")));
            return;
        }
        if let Err(err) = self.sink.play() {
            session.stream.close();
            self.stop(StopReason::OutputError, Some(format!("{err:#}")));
            return;
        }

        let duration_ms = session.duration_ms;
        self.session = Some(session);
        self.set_state(PlayerState::Playing);
        self.emit(PlayerEvent::TrackStarted {
            index,
            title: track.title,
            duration_ms,
        });
    }

    fn open_session(&self, index: usize, track: &Track) -> Result<Session> {
        let stream = self
            .opener
            .open(track)
            .with_context(|| format!("open {}", track.url))?;
        let latch = Arc::new(FinishLatch::new(index, stream.clone(), self.events.clone()));
        let reader = TrackReader::new(
            stream.clone(),
            latch.clone(),
            self.events.clone(),
            self.config.progress_interval,
        );
        let decoder = match self.decoders.open(reader, track) {
            Ok(decoder) => decoder,
            Err(err) => {
                stream.close();
                return Err(err);
            }
        };
        let duration_ms = track.duration_ms.or_else(|| decoder.duration_ms());
        Ok(Session {
            index,
            stream,
            decoder,
            latch,
            duration_ms,
            pending: Vec::new(),
            offset: 0,
            drained: false,
            advance_requested: false,
        })
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stream.close();
            tracing::debug!(index = session.index, "session ended");
        }
    }

    fn stop(&mut self, reason: StopReason, message: Option<String>) {
        self.end_session();
        let _ = self.sink.pause();
        self.sink.clear();
        self.set_state(PlayerState::Stopped);
        self.status.stopped(reason);
        tracing::info!(?reason, "playback stopped");
        self.emit(PlayerEvent::Stopped { reason, message });
    }

    fn advance(&mut self) {
        let Some(index) = self.current_index() else {
            return;
        };
        if index + 1 < self.tracks.len() {
            self.start_track(index + 1, false);
        } else {
            self.end_session();
            self.sink.drain(DRAIN_WAIT);
            self.stop(StopReason::EndOfQueue, None);
        }
    }

    fn pump(&mut self) {
        let outcome = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let mut outcome = Pump::Wrote;
            if session.offset >= session.pending.len() {
                match session.decoder.next_chunk() {
                    Ok(Some(samples)) => {
                        session.pending = samples;
                        session.offset = 0;
                    }
                    Ok(None) => outcome = Pump::Drained,
                    Err(err) => outcome = Pump::DecodeFailed(err),
                }
            }
            if matches!(outcome, Pump::Wrote) && session.offset < session.pending.len() {
                match self
                    .sink
                    .write(&session.pending[session.offset..], WRITE_WAIT)
                {
                    Ok(n) => session.offset += n,
                    Err(err) => outcome = Pump::OutputFailed(err),
                }
            }
            self.status.set_progress(
                session.stream.progress(),
                session.stream.buffering_progress(),
            );
            outcome
        };

        match outcome {
            Pump::Wrote => {}
            Pump::Drained => self.on_drained(),
            Pump::DecodeFailed(err) => {
                tracing::error!("decode failed: {err:#}");
                self.stop(StopReason::DecodeError, Some(format!("{err:#}")));
            }
            Pump::OutputFailed(err) => {
                tracing::error!("audio output failed: {err:#}");
                self.stop(StopReason::OutputError, Some(format!("{err:#}")));
            }
        }
    }

    fn on_drained(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.drained = true;
        // Decoders may stop short of the last byte (trailing tags); the owner still needs
        // its `Finished`.
        session.latch.fire();
        tracing::debug!(index = session.index, "decoder drained");
        if session.advance_requested {
            self.advance();
        }
    }

    fn seek_by(&mut self, delta_ms: i64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.drained || session.latch.has_fired() {
            tracing::debug!("seek ignored; track already ended");
            return;
        }
        let Some(duration_ms) = session.duration_ms else {
            tracing::warn!("seek ignored; track duration unknown");
            return;
        };
        let len = session.stream.len();
        let target = rewind_target(
            len,
            session.stream.progress(),
            delta_ms,
            duration_ms,
            session.decoder.byte_alignment(),
        );
        let pos = match session.stream.seek(target) {
            Ok(pos) => pos,
            Err(err) => {
                tracing::warn!(error = %err, "seek failed");
                return;
            }
        };
        session.pending.clear();
        session.offset = 0;
        let resynced = session.decoder.resync(pos, len);
        tracing::debug!(delta_ms, pos, len, "seeked");
        self.sink.clear();
        if let Err(err) = resynced {
            tracing::error!("decoder resync failed: {err:#}");
            self.stop(StopReason::DecodeError, Some(format!("{err:#}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, Read};
    use std::sync::Mutex;
    use std::time::Instant;
    use stream_buffer::SeekableStream;
    use symphonia::core::audio::{Channels, SignalSpec};

    /// Bytes of stereo s16le PCM per `next_chunk`.
    const PCM_CHUNK: usize = 256;

    struct FakeOpener {
        bodies: HashMap<String, Vec<u8>>,
    }

    impl TrackOpener for FakeOpener {
        fn open(&self, track: &Track) -> Result<Arc<dyn PlaybackStream>> {
            let body = self
                .bodies
                .get(&track.url)
                .cloned()
                .ok_or_else(|| anyhow!("404 for {}", track.url))?;
            let len = body.len() as u64;
            Ok(Arc::new(SeekableStream::new(io::Cursor::new(body), len)))
        }
    }

    struct PcmDecoder {
        reader: TrackReader,
        fail_after: Option<usize>,
        chunks: usize,
    }

    impl Decoder for PcmDecoder {
        fn spec(&self) -> SignalSpec {
            SignalSpec::new(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT)
        }

        fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
            if self.fail_after.is_some_and(|n| self.chunks >= n) {
                return Err(anyhow!("corrupt frame"));
            }
            let mut buf = vec![0u8; PCM_CHUNK];
            let mut filled = 0;
            while filled < buf.len() {
                let n = self.reader.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                return Ok(None);
            }
            self.chunks += 1;
            Ok(Some(
                buf[..filled]
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .collect(),
            ))
        }

        fn duration_ms(&self) -> Option<u64> {
            None
        }

        fn resync(&mut self, _pos: u64, _len: u64) -> Result<()> {
            Ok(())
        }
    }

    struct PcmFactory;

    impl DecoderFactory for PcmFactory {
        fn open(&self, reader: TrackReader, track: &Track) -> Result<Box<dyn Decoder>> {
            let fail_after = track.url.contains("corrupt").then_some(2);
            Ok(Box::new(PcmDecoder {
                reader,
                fail_after,
                chunks: 0,
            }))
        }
    }

    #[derive(Default)]
    struct SinkLog {
        samples: usize,
        starts: usize,
        clears: usize,
        playing: bool,
        volume: f32,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        log: Arc<Mutex<SinkLog>>,
        write_delay: Duration,
    }

    impl AudioSink for RecordingSink {
        fn start(&mut self, _spec: SignalSpec) -> Result<()> {
            self.log.lock().unwrap().starts += 1;
            Ok(())
        }

        fn write(&mut self, samples: &[f32], _timeout: Duration) -> Result<usize> {
            if !self.write_delay.is_zero() {
                thread::sleep(self.write_delay);
            }
            self.log.lock().unwrap().samples += samples.len();
            Ok(samples.len())
        }

        fn play(&mut self) -> Result<()> {
            self.log.lock().unwrap().playing = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.log.lock().unwrap().playing = false;
            Ok(())
        }

        fn clear(&mut self) {
            self.log.lock().unwrap().clears += 1;
        }

        fn is_playing(&self) -> bool {
            self.log.lock().unwrap().playing
        }

        fn set_volume(&mut self, volume: f32) {
            self.log.lock().unwrap().volume = volume;
        }
    }

    fn track(url: &str, duration_ms: Option<u64>) -> Track {
        Track {
            id: url.to_string(),
            title: url.to_string(),
            url: url.to_string(),
            duration_ms,
        }
    }

    fn setup(
        bodies: &[(&str, usize)],
    ) -> (PlaybackCoordinator, Receiver<PlayerEvent>, RecordingSink) {
        setup_with_delay(bodies, Duration::ZERO)
    }

    fn setup_with_delay(
        bodies: &[(&str, usize)],
        write_delay: Duration,
    ) -> (PlaybackCoordinator, Receiver<PlayerEvent>, RecordingSink) {
        let bodies = bodies
            .iter()
            .map(|(url, len)| (url.to_string(), vec![0x11u8; *len]))
            .collect();
        let sink = RecordingSink {
            write_delay,
            ..RecordingSink::default()
        };
        let worker_sink = sink.clone();
        let (coordinator, events) = PlaybackCoordinator::spawn(
            Arc::new(FakeOpener { bodies }),
            Arc::new(PcmFactory),
            move || Ok(worker_sink),
            PlayerConfig::default(),
        )
        .unwrap();
        (coordinator, events, sink)
    }

    fn wait_event(
        rx: &Receiver<PlayerEvent>,
        mut want: impl FnMut(&PlayerEvent) -> bool,
    ) -> PlayerEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(event) if want(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("no matching event: {err}"),
            }
        }
    }

    fn wait_status(c: &PlaybackCoordinator, mut want: impl FnMut(&PlayerStatus) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if want(&c.status()) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("status never matched: {:?}", c.status());
    }

    #[test]
    fn rewind_target_is_aligned() {
        for delta in [-3_000i64, -7, 1, 13, 999] {
            if let SeekFrom::Start(pos) = rewind_target(1_000_003, 0.4321, delta, 60_000, 4) {
                assert_eq!(pos % 4, 0, "delta {delta}");
            }
        }
        assert_eq!(
            rewind_target(1_000_000, 0.5, -1_000, 10_000, 4),
            SeekFrom::Start(400_000)
        );
    }

    #[test]
    fn rewind_target_clamps_both_ends() {
        assert_eq!(
            rewind_target(1_000_000, 0.05, -10_000, 10_000, 4),
            SeekFrom::Start(0)
        );
        assert_eq!(
            rewind_target(1_000_000, 0.95, 10_000, 10_000, 4),
            SeekFrom::End(0)
        );
        assert_eq!(rewind_target(0, 0.5, 100, 1000, 4), SeekFrom::Start(0));
        assert_eq!(
            rewind_target(1000, 0.5, 100, 0, 4),
            SeekFrom::Start(500)
        );
    }

    #[test]
    fn plays_to_end_then_stops_at_end_of_queue() {
        let (c, events, sink) = setup(&[("a", 4096)]);
        c.load(vec![track("a", None)], 0);

        assert_eq!(
            wait_event(&events, |e| matches!(e, PlayerEvent::TrackStarted { .. })),
            PlayerEvent::TrackStarted {
                index: 0,
                title: "a".into(),
                duration_ms: None
            }
        );
        wait_event(&events, |e| matches!(e, PlayerEvent::Finished { index: 0 }));
        c.advance(0);
        let stopped = wait_event(&events, |e| matches!(e, PlayerEvent::Stopped { .. }));
        assert_eq!(
            stopped,
            PlayerEvent::Stopped {
                reason: StopReason::EndOfQueue,
                message: None
            }
        );
        assert_eq!(sink.log.lock().unwrap().samples, 2048);
        assert_eq!(c.status().state, PlayerState::Stopped);
    }

    #[test]
    fn advance_moves_to_next_track() {
        let (c, events, sink) = setup(&[("a", 1024), ("b", 2048)]);
        c.load(vec![track("a", None), track("b", None)], 0);
        wait_event(&events, |e| matches!(e, PlayerEvent::Finished { index: 0 }));
        c.advance(0);
        wait_event(&events, |e| {
            matches!(e, PlayerEvent::TrackStarted { index: 1, .. })
        });
        wait_event(&events, |e| matches!(e, PlayerEvent::Finished { index: 1 }));
        wait_status(&c, |s| s.index == Some(1));
        // A late advance for the first track is ignored.
        c.advance(0);
        c.advance(1);
        wait_event(&events, |e| matches!(e, PlayerEvent::Stopped { .. }));
        assert_eq!(sink.log.lock().unwrap().samples, 1536);
    }

    #[test]
    fn open_failure_stops_and_keeps_accepting_commands() {
        let (c, events, _sink) = setup(&[("ok", 512)]);
        c.load(vec![track("missing", None)], 0);
        match wait_event(&events, |e| matches!(e, PlayerEvent::Stopped { .. })) {
            PlayerEvent::Stopped { reason, message } => {
                assert_eq!(reason, StopReason::OpenFailed);
                assert!(message.unwrap().contains("404"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.status().stop_reason, Some(StopReason::OpenFailed));

        c.load(vec![track("ok", None)], 0);
        wait_event(&events, |e| matches!(e, PlayerEvent::TrackStarted { .. }));
    }

    #[test]
    fn decode_error_stops_the_track() {
        let (c, events, _sink) = setup(&[("corrupt", 8192)]);
        c.load(vec![track("corrupt", None)], 0);
        match wait_event(&events, |e| matches!(e, PlayerEvent::Stopped { .. })) {
            PlayerEvent::Stopped { reason, .. } => assert_eq!(reason, StopReason::DecodeError),
            other => panic!("unexpected {other:?}"),
        }
        wait_status(&c, |s| s.state == PlayerState::Stopped && s.index.is_none());
    }

    #[test]
    fn pause_toggle_and_volume_update_status() {
        let (c, events, sink) = setup_with_delay(&[("a", 1 << 20)], Duration::from_millis(1));
        c.load(vec![track("a", None)], 0);
        wait_event(&events, |e| matches!(e, PlayerEvent::TrackStarted { .. }));
        c.pause();
        wait_status(&c, |s| s.state == PlayerState::Paused);
        assert!(!sink.log.lock().unwrap().playing);
        c.toggle_pause();
        wait_status(&c, |s| s.state == PlayerState::Playing);
        c.set_volume(0.25);
        wait_status(&c, |s| s.volume == 0.25);
        c.set_volume(1.7);
        wait_status(&c, |s| s.volume == 1.0);
        assert_eq!(sink.log.lock().unwrap().volume, 1.0);
        c.stop();
        wait_status(&c, |s| s.stop_reason == Some(StopReason::Requested));
    }

    #[test]
    fn seeking_past_the_end_finishes_the_track() {
        let (c, events, sink) =
            setup_with_delay(&[("long", 1 << 20)], Duration::from_millis(1));
        c.load(vec![track("long", Some(60_000))], 0);
        wait_event(&events, |e| matches!(e, PlayerEvent::TrackStarted { .. }));
        c.pause();
        c.seek_by(120_000);
        c.play();
        wait_event(&events, |e| matches!(e, PlayerEvent::Finished { index: 0 }));
        assert!(sink.log.lock().unwrap().clears >= 2);
        assert!(sink.log.lock().unwrap().samples < (1 << 19));
    }

    #[test]
    fn next_on_last_track_reports_end_of_queue() {
        let (c, events, _sink) = setup_with_delay(&[("a", 1 << 20)], Duration::from_millis(1));
        c.load(vec![track("a", None)], 0);
        wait_event(&events, |e| matches!(e, PlayerEvent::TrackStarted { .. }));
        c.next();
        match wait_event(&events, |e| matches!(e, PlayerEvent::Stopped { .. })) {
            PlayerEvent::Stopped { reason, .. } => assert_eq!(reason, StopReason::EndOfQueue),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sink_failure_is_reported_from_spawn() {
        let res = PlaybackCoordinator::spawn(
            Arc::new(FakeOpener {
                bodies: HashMap::new(),
            }),
            Arc::new(PcmFactory),
            || -> Result<RecordingSink> { Err(anyhow!("no device")) },
            PlayerConfig::default(),
        );
        let err = res.err().unwrap();
        assert!(format!("{err:#}").contains("no device"));
    }
}
