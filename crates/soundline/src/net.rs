//! HTTP track opener.
//!
//! Tracks are fetched with one plain GET. The response body becomes the network source of a
//! [`BufferedStream`], optionally behind an inactivity deadline, and is teed into the cache
//! directory. Complete cached copies are played from disk instead.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use audio_player::TrackOpener;
use soundline_types::Track;
use stream_buffer::{
    BufferConfig, BufferedStream, CacheSink, CancelToken, DeadlineReader, PlaybackStream,
    SeekableStream,
};

use crate::cache::{self, CacheFile};
use crate::config::Settings;

/// Connect and response-header timeout. Body stalls are handled by the deadline reader;
/// ureq's body timeout is a budget for the whole body and would cut long tracks short.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response body plus its declared length.
pub struct HttpBody {
    pub reader: Box<dyn Read + Send>,
    pub len: u64,
}

/// Issue a GET and return the body reader. The server must report `Content-Length`.
pub fn open_body(url: &str) -> Result<HttpBody> {
    let started = Instant::now();
    let resp = ureq::get(url)
        .config()
        .timeout_connect(Some(CONNECT_TIMEOUT))
        .timeout_recv_response(Some(CONNECT_TIMEOUT))
        .build()
        .call()
        .with_context(|| format!("GET {url}"))?;
    let len = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| anyhow!("{url}: server did not report a content length"))?;
    tracing::debug!(
        url,
        len,
        took_ms = started.elapsed().as_millis() as u64,
        "response headers received"
    );
    let (_, body) = resp.into_parts();
    Ok(HttpBody {
        reader: Box::new(body.into_reader()),
        len,
    })
}

/// Buffer a response body, tearing the stream down if the body goes quiet for longer than
/// `read_timeout`.
pub fn buffer_body(
    body: HttpBody,
    sinks: Vec<Box<dyn CacheSink>>,
    read_timeout: Option<Duration>,
    config: BufferConfig,
) -> BufferedStream {
    let Some(timeout) = read_timeout else {
        return BufferedStream::new(body.reader, body.len, sinks, config);
    };
    let token = CancelToken::new();
    let reader = DeadlineReader::new(body.reader, timeout, token.clone());
    let stream = BufferedStream::new(reader, body.len, sinks, config);
    stream.close_on_cancel(&token);
    stream
}

/// [`TrackOpener`] over HTTP with an optional disk cache.
pub struct HttpOpener {
    cache_dir: Option<PathBuf>,
    read_timeout: Option<Duration>,
    buffer: BufferConfig,
}

impl HttpOpener {
    pub fn new(settings: &Settings) -> Self {
        Self {
            cache_dir: settings.cache_dir.clone(),
            read_timeout: settings.read_timeout,
            buffer: settings.buffer.clone(),
        }
    }

    fn open_cached(&self, track: &Track) -> Option<Arc<dyn PlaybackStream>> {
        let path = cache::lookup(self.cache_dir.as_deref()?, track)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = ?path, error = %err, "cached copy unreadable");
                return None;
            }
        };
        let len = file.metadata().ok()?.len();
        tracing::info!(path = ?path, len, "playing cached copy");
        Some(Arc::new(SeekableStream::new(file, len)))
    }

    fn cache_sinks(&self, track: &Track, len: u64) -> Vec<Box<dyn CacheSink>> {
        let Some(dir) = self.cache_dir.as_deref() else {
            return Vec::new();
        };
        let dest = cache::cache_path(dir, track);
        match CacheFile::create(dest.clone(), len) {
            Ok(sink) => vec![Box::new(sink)],
            Err(err) => {
                tracing::warn!(path = ?dest, error = %err, "cache file not created; streaming only");
                Vec::new()
            }
        }
    }
}

impl TrackOpener for HttpOpener {
    fn open(&self, track: &Track) -> Result<Arc<dyn PlaybackStream>> {
        if let Some(stream) = self.open_cached(track) {
            return Ok(stream);
        }
        let body = open_body(&track.url)?;
        tracing::info!(url = %track.url, len = body.len, "stream opened");
        let sinks = self.cache_sinks(track, body.len);
        Ok(Arc::new(buffer_body(
            body,
            sinks,
            self.read_timeout,
            self.buffer.clone(),
        )))
    }
}
