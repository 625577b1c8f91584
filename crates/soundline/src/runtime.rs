//! Command runners: device listing, interactive playback and cache-only downloads.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use audio_player::{CpalSink, PlaybackCoordinator, SymphoniaFactory, device};
use crossbeam_channel::{Receiver, select};
use soundline_types::{PlayerEvent, PlayerStatus, StopReason, Track};
use stream_buffer::StreamState;

use crate::cache::{self, CacheFile, CacheOutcome};
use crate::config::Settings;
use crate::net::{self, HttpOpener};

const VOLUME_STEP: f32 = 0.1;
const CACHE_REPORT_INTERVAL: Duration = Duration::from_millis(500);
const CACHE_FINISH_WAIT: Duration = Duration::from_secs(30);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("{name}");
    }
    Ok(())
}

/// One line typed on stdin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UserCommand {
    TogglePause,
    Next,
    Previous,
    Seek(i64),
    Stop,
    Volume(f32),
    Status,
    Quit,
}

pub fn parse_command(line: &str, seek_step_ms: i64) -> Option<UserCommand> {
    let cmd = match line.trim() {
        "p" | "pause" | "play" => UserCommand::TogglePause,
        "n" | "next" => UserCommand::Next,
        "b" | "back" | "prev" => UserCommand::Previous,
        "f" => UserCommand::Seek(seek_step_ms),
        "r" => UserCommand::Seek(-seek_step_ms),
        "s" | "stop" => UserCommand::Stop,
        "+" => UserCommand::Volume(VOLUME_STEP),
        "-" => UserCommand::Volume(-VOLUME_STEP),
        "i" | "status" => UserCommand::Status,
        "q" | "quit" | "exit" => UserCommand::Quit,
        _ => return None,
    };
    Some(cmd)
}

/// Build the track list from command line URLs.
pub fn tracks_from_urls(urls: &[String]) -> Vec<Track> {
    urls.iter()
        .map(|url| {
            let title = url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').find(|seg| !seg.is_empty()))
                .unwrap_or(url)
                .to_string();
            Track {
                id: title.clone(),
                title,
                url: url.clone(),
                duration_ms: None,
            }
        })
        .collect()
}

/// What the event loop does after a player event.
#[derive(Debug, PartialEq)]
enum Step {
    Continue,
    Advance(usize),
    Restart(usize),
    Exit,
    Fail(String),
}

/// Track-to-track policy: advance on finish, skip tracks that fail, exit after the last.
#[derive(Debug)]
struct Sequencer {
    len: usize,
    /// Index the player is playing or was last asked to open.
    attempting: usize,
}

impl Sequencer {
    fn new(len: usize, start: usize) -> Self {
        Self {
            len,
            attempting: start,
        }
    }

    fn on_event(&mut self, event: &PlayerEvent) -> Step {
        match event {
            PlayerEvent::TrackStarted { index, .. } => {
                self.attempting = *index;
                Step::Continue
            }
            PlayerEvent::Progress { .. } => Step::Continue,
            PlayerEvent::Finished { index } => {
                self.attempting = index + 1;
                Step::Advance(*index)
            }
            PlayerEvent::Stopped { reason, message } => match reason {
                StopReason::EndOfQueue => Step::Exit,
                StopReason::Requested => Step::Continue,
                StopReason::OutputError => {
                    Step::Fail(message.clone().unwrap_or_else(|| "audio output failed".into()))
                }
                // A track that never opened emits no `TrackStarted`, so skip past the one
                // that was requested.
                StopReason::OpenFailed | StopReason::DecodeError => {
                    let next = self.attempting + 1;
                    if next < self.len {
                        self.attempting = next;
                        Step::Restart(next)
                    } else {
                        Step::Exit
                    }
                }
            },
        }
    }
}

/// Play `urls` in order, reading control commands from stdin until the list ends or `q`.
pub fn run_play(settings: Settings, urls: Vec<String>, start: usize, json: bool) -> Result<()> {
    if let Some(dir) = settings.cache_dir.as_deref() {
        prepare_cache_dir(dir);
    }
    let tracks = tracks_from_urls(&urls);
    if start >= tracks.len() {
        bail!("start index {start} is out of range for {} tracks", tracks.len());
    }

    let opener = Arc::new(HttpOpener::new(&settings));
    let sink_config = settings.player.clone();
    let volume = settings.volume;
    let (player, events) = PlaybackCoordinator::spawn(
        opener,
        Arc::new(SymphoniaFactory),
        move || CpalSink::open(&sink_config, volume),
        settings.player.clone(),
    )?;
    player.set_volume(volume);

    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(1);
    let _ = ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    });
    let commands = spawn_stdin_reader(settings.seek_step_ms);

    let mut sequencer = Sequencer::new(tracks.len(), start);
    player.load(tracks.clone(), start);

    let no_input = crossbeam_channel::never();
    let mut stdin_open = true;
    let result = loop {
        let input = if stdin_open { &commands } else { &no_input };
        select! {
            recv(events) -> event => {
                let Ok(event) = event else {
                    break Err(anyhow!("player thread exited"));
                };
                print_event(&event, json);
                match sequencer.on_event(&event) {
                    Step::Continue => {}
                    Step::Advance(index) => player.advance(index),
                    Step::Restart(index) => {
                        tracing::warn!(index, "skipping to the next track");
                        player.load(tracks.clone(), index);
                    }
                    Step::Exit => break Ok(()),
                    Step::Fail(message) => break Err(anyhow!(message)),
                }
            }
            recv(input) -> cmd => {
                let Ok(cmd) = cmd else {
                    stdin_open = false;
                    continue;
                };
                match cmd {
                    UserCommand::TogglePause => player.toggle_pause(),
                    UserCommand::Next => player.next(),
                    UserCommand::Previous => player.previous(),
                    UserCommand::Seek(delta_ms) => player.seek_by(delta_ms),
                    UserCommand::Stop => player.stop(),
                    UserCommand::Volume(step) => player.set_volume(player.status().volume + step),
                    UserCommand::Status => print_status(&player.status(), json),
                    UserCommand::Quit => break Ok(()),
                }
            }
            recv(quit_rx) -> _ => {
                tracing::info!("interrupted");
                break Ok(());
            }
        }
    };
    player.shutdown();
    result
}

/// Stdin lines become commands; unknown input is reported and ignored. The thread ends
/// with stdin.
fn spawn_stdin_reader(seek_step_ms: i64) -> Receiver<UserCommand> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line, seek_step_ms) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => eprintln!("commands: p n b f r s + - i q"),
            }
        }
    });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "stdin reader failed to start; keyboard control disabled");
    }
    rx
}

fn print_event(event: &PlayerEvent, json: bool) {
    if json {
        print_json(event);
        return;
    }
    match event {
        PlayerEvent::TrackStarted {
            index,
            title,
            duration_ms,
        } => match duration_ms {
            Some(ms) => println!("[{}] {title} ({})", index + 1, format_ms(*ms)),
            None => println!("[{}] {title}", index + 1),
        },
        PlayerEvent::Progress { .. } | PlayerEvent::Finished { .. } => {}
        PlayerEvent::Stopped { reason, message } => match message {
            Some(message) => println!("stopped ({reason:?}): {message}"),
            None => println!("stopped ({reason:?})"),
        },
    }
}

fn print_status(status: &PlayerStatus, json: bool) {
    if json {
        print_json(status);
        return;
    }
    let title = status.title.as_deref().unwrap_or("-");
    println!(
        "{:?} {title} {:.0}% (buffered {:.0}%) vol {:.0}%",
        status.state,
        status.progress * 100.0,
        status.buffered * 100.0,
        status.volume * 100.0
    );
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(err) => tracing::warn!(error = %err, "event not serializable"),
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn prepare_cache_dir(dir: &Path) {
    if let Err(err) = std::fs::create_dir_all(dir) {
        tracing::warn!(dir = ?dir, error = %err, "cache dir unavailable");
        return;
    }
    match cache::cleanup_partial_files(dir) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "cleaned up stale partial cache files"),
        Err(e) => tracing::warn!("cache cleanup warning: {e}"),
    }
}

/// Download one URL into the cache (or `out`) without playing it.
pub fn run_cache(settings: Settings, url: String, out: Option<PathBuf>) -> Result<PathBuf> {
    let dest = match out {
        Some(path) => path,
        None => {
            let dir = settings
                .cache_dir
                .as_deref()
                .ok_or_else(|| anyhow!("caching is disabled; pass --out"))?;
            prepare_cache_dir(dir);
            let track = tracks_from_urls(std::slice::from_ref(&url))
                .pop()
                .ok_or_else(|| anyhow!("no track"))?;
            cache::cache_path(dir, &track)
        }
    };

    let body = net::open_body(&url)?;
    let len = body.len;
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let sink = CacheFile::create(dest.clone(), len)
        .with_context(|| format!("create {:?}", dest))?
        .notify(done_tx);
    tracing::info!(url = %url, len, dest = ?dest, "caching");

    let stream = net::buffer_body(
        body,
        vec![Box::new(sink)],
        settings.read_timeout,
        settings.buffer.clone(),
    );
    // The prefetch loop stops quietly on a network error; no progress for this long ends
    // the download.
    let stall_limit = settings.read_timeout.unwrap_or(CACHE_FINISH_WAIT) + CACHE_REPORT_INTERVAL;
    let started = Instant::now();
    let mut last_buffered = 0;
    let mut last_progress = Instant::now();
    loop {
        let state = stream.wait_buffered(CACHE_REPORT_INTERVAL);
        let buffered = stream.buffered_len();
        tracing::info!(
            buffered,
            len,
            percent = format_args!("{:.1}", stream.buffering_progress() * 100.0),
            "caching progress"
        );
        if state != StreamState::Active {
            break;
        }
        if buffered != last_buffered {
            last_buffered = buffered;
            last_progress = Instant::now();
        } else if last_progress.elapsed() > stall_limit {
            tracing::warn!(buffered, len, "download stalled");
            break;
        }
    }
    stream.close();

    match done_rx.recv_timeout(CACHE_FINISH_WAIT) {
        Ok(CacheOutcome::Complete(path)) => {
            tracing::info!(
                path = ?path,
                took_ms = started.elapsed().as_millis() as u64,
                "cache complete"
            );
            Ok(path)
        }
        Ok(CacheOutcome::Discarded { written, expected }) => {
            bail!("download incomplete: {written} of {expected} bytes")
        }
        Err(_) => bail!("cache file for {url} was not finished in time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::scratch_dir;
    use crate::net::tests::{ok_response, serve};

    #[test]
    fn parses_single_letter_commands() {
        assert_eq!(parse_command(" p ", 5000), Some(UserCommand::TogglePause));
        assert_eq!(parse_command("f", 5000), Some(UserCommand::Seek(5000)));
        assert_eq!(parse_command("r", 5000), Some(UserCommand::Seek(-5000)));
        assert_eq!(parse_command("-", 5000), Some(UserCommand::Volume(-0.1)));
        assert_eq!(parse_command("q", 5000), Some(UserCommand::Quit));
        assert_eq!(parse_command("x", 5000), None);
    }

    #[test]
    fn track_titles_come_from_the_url_path() {
        let tracks = tracks_from_urls(&[
            "http://h/music/01%20intro.flac?sig=1".to_string(),
            "http://h/".to_string(),
        ]);
        assert_eq!(tracks[0].title, "01%20intro.flac");
        assert_eq!(tracks[0].id, tracks[0].title);
        assert_eq!(tracks[1].title, "h");
    }

    fn started(index: usize) -> PlayerEvent {
        PlayerEvent::TrackStarted {
            index,
            title: String::new(),
            duration_ms: None,
        }
    }

    fn stopped(reason: StopReason) -> PlayerEvent {
        PlayerEvent::Stopped {
            reason,
            message: None,
        }
    }

    #[test]
    fn sequencer_advances_skips_and_exits() {
        let mut seq = Sequencer::new(3, 0);
        assert_eq!(seq.on_event(&started(0)), Step::Continue);
        assert_eq!(
            seq.on_event(&PlayerEvent::Finished { index: 0 }),
            Step::Advance(0)
        );
        assert_eq!(seq.on_event(&started(1)), Step::Continue);
        assert_eq!(
            seq.on_event(&stopped(StopReason::DecodeError)),
            Step::Restart(2)
        );
        assert_eq!(seq.on_event(&started(2)), Step::Continue);
        assert_eq!(seq.on_event(&stopped(StopReason::OpenFailed)), Step::Exit);
        assert_eq!(seq.on_event(&stopped(StopReason::EndOfQueue)), Step::Exit);
        assert_eq!(seq.on_event(&stopped(StopReason::Requested)), Step::Continue);
    }

    #[test]
    fn sequencer_skips_a_first_track_that_never_opened() {
        let mut seq = Sequencer::new(2, 0);
        assert_eq!(
            seq.on_event(&stopped(StopReason::OpenFailed)),
            Step::Restart(1)
        );
    }

    #[test]
    fn open_failure_mid_list_moves_on_to_the_following_track() {
        let mut seq = Sequencer::new(3, 0);
        assert_eq!(seq.on_event(&started(0)), Step::Continue);
        assert_eq!(
            seq.on_event(&PlayerEvent::Finished { index: 0 }),
            Step::Advance(0)
        );
        // Track 1 never opens.
        assert_eq!(
            seq.on_event(&stopped(StopReason::OpenFailed)),
            Step::Restart(2)
        );
        assert_eq!(seq.on_event(&started(2)), Step::Continue);
        assert_eq!(
            seq.on_event(&PlayerEvent::Finished { index: 2 }),
            Step::Advance(2)
        );
    }

    #[test]
    fn repeated_open_failures_walk_to_the_end_of_the_list() {
        let mut seq = Sequencer::new(3, 1);
        assert_eq!(
            seq.on_event(&stopped(StopReason::OpenFailed)),
            Step::Restart(2)
        );
        assert_eq!(seq.on_event(&stopped(StopReason::OpenFailed)), Step::Exit);
    }

    #[test]
    fn output_errors_are_fatal() {
        let mut seq = Sequencer::new(2, 0);
        assert!(matches!(
            seq.on_event(&stopped(StopReason::OutputError)),
            Step::Fail(_)
        ));
    }

    #[test]
    fn run_cache_writes_the_whole_body() {
        let body: Vec<u8> = (0..70_000u32).map(|i| (i % 13) as u8).collect();
        let base = serve(vec![ok_response(&body)]);
        let dir = scratch_dir("run-cache");
        let settings = Settings {
            cache_dir: Some(dir.clone()),
            read_timeout: Some(Duration::from_secs(5)),
            buffer: stream_buffer::BufferConfig::default(),
            player: audio_player::PlayerConfig::default(),
            volume: 1.0,
            log_filter: String::new(),
            seek_step_ms: 1000,
        };
        let path = run_cache(settings, format!("{base}/album/song.mp3"), None).unwrap();
        assert_eq!(path, dir.join("song_mp3.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), body);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
