//! On-disk track cache.
//!
//! A track is written to `<name>.part` while it downloads and renamed to `<name>` only once
//! every byte arrived, so a file without the suffix is always complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use soundline_types::Track;
use stream_buffer::CacheSink;

const PART_SUFFIX: &str = ".part";

/// How a cache file ended up.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Complete(PathBuf),
    /// The stream closed early or a write failed; the partial file was removed.
    Discarded { written: u64, expected: u64 },
}

/// Cache sink writing one track to disk.
pub struct CacheFile {
    file: BufWriter<File>,
    part: PathBuf,
    dest: PathBuf,
    expected: u64,
    written: u64,
    notify: Option<Sender<CacheOutcome>>,
}

impl CacheFile {
    pub fn create(dest: PathBuf, expected: u64) -> io::Result<Self> {
        let part = part_path(&dest);
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&part)?;
        Ok(Self {
            file: BufWriter::new(file),
            part,
            dest,
            expected,
            written: 0,
            notify: None,
        })
    }

    /// Report the outcome on `tx` when the sink closes.
    pub fn notify(mut self, tx: Sender<CacheOutcome>) -> Self {
        self.notify = Some(tx);
        self
    }

    fn finish(&mut self) -> io::Result<CacheOutcome> {
        self.file.flush()?;
        if self.written != self.expected {
            fs::remove_file(&self.part)?;
            return Ok(CacheOutcome::Discarded {
                written: self.written,
                expected: self.expected,
            });
        }
        self.file.get_ref().sync_all()?;
        fs::rename(&self.part, &self.dest)?;
        Ok(CacheOutcome::Complete(self.dest.clone()))
    }
}

impl CacheSink for CacheFile {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        let result = self.finish();
        match &result {
            Ok(CacheOutcome::Complete(path)) => {
                tracing::info!(path = ?path, bytes = self.written, "track cached")
            }
            Ok(CacheOutcome::Discarded { written, expected }) => {
                tracing::debug!(path = ?self.part, written, expected, "partial cache file discarded")
            }
            Err(err) => {
                tracing::warn!(path = ?self.part, error = %err, "cache file not finished");
                let _ = fs::remove_file(&self.part);
            }
        }
        match result {
            Ok(outcome) => {
                if let Some(tx) = self.notify.take() {
                    let _ = tx.send(outcome);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(tx) = self.notify.take() {
                    let _ = tx.send(CacheOutcome::Discarded {
                        written: self.written,
                        expected: self.expected,
                    });
                }
                Err(err)
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Final cache path for a track: its sanitized id plus the URL's extension.
pub fn cache_path(dir: &Path, track: &Track) -> PathBuf {
    let mut stem: String = track
        .id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim_matches('_').is_empty() {
        stem = "track".to_string();
    }
    let ext = audio_player::decode::infer_ext_from_url(&track.url).unwrap_or_else(|| "bin".into());
    dir.join(format!("{stem}.{ext}"))
}

/// The cached copy of `track`, if a complete one exists.
pub fn lookup(dir: &Path, track: &Track) -> Option<PathBuf> {
    let path = cache_path(dir, track);
    path.is_file().then_some(path)
}

/// Remove partial files left behind by an interrupted run.
pub fn cleanup_partial_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if !file_name.to_string_lossy().ends_with(PART_SUFFIX) {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
