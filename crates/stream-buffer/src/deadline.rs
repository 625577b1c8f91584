//! Inactivity deadline for blocking byte sources.
//!
//! A watcher thread races a timer against the token's cancellation and a control channel.
//! The first read starts the timer and every later read restarts it. If no read begins
//! within the timeout, whether a read is stuck or the caller went quiet, the token is
//! cancelled so its owner can abandon the request.

use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select};

use crate::cancel::CancelToken;
use crate::error::StreamError;

/// Wraps a reader and cancels `token` when no read starts within `timeout` of the previous
/// one.
pub struct DeadlineReader<R> {
    inner: Option<R>,
    timeout: Duration,
    token: CancelToken,
    /// Each message restarts the watcher's timer.
    watcher: Option<Sender<()>>,
    watcher_failed: bool,
}

impl<R> DeadlineReader<R> {
    pub fn new(inner: R, timeout: Duration, token: CancelToken) -> Self {
        Self {
            inner: Some(inner),
            timeout,
            token,
            watcher: None,
            watcher_failed: false,
        }
    }

    /// Stop the watcher, cancel the token and drop the inner source. Idempotent.
    pub fn close(&mut self) {
        // Dropping the sender disconnects the control channel; the watcher exits on it.
        self.watcher.take();
        self.token.cancel();
        if self.inner.take().is_some() {
            tracing::debug!("deadline reader closed");
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn touch(&mut self) {
        if self.watcher.is_none() && !self.watcher_failed {
            let (tx, rx) = crossbeam_channel::unbounded();
            let token = self.token.clone();
            let timeout = self.timeout;
            match thread::Builder::new()
                .name("read-deadline".into())
                .spawn(move || watch(rx, token, timeout))
            {
                Ok(_) => self.watcher = Some(tx),
                Err(err) => {
                    self.watcher_failed = true;
                    tracing::warn!(error = %err, "deadline watcher failed to start; reads are unbounded");
                }
            }
        }
        if let Some(tx) = &self.watcher {
            let _ = tx.send(());
        }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.is_none() {
            return Err(StreamError::SourceClosed.into());
        }
        if self.token.is_cancelled() {
            return Err(StreamError::DeadlineExceeded {
                timeout_ms: self.timeout_ms(),
            }
            .into());
        }
        self.touch();
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(StreamError::SourceClosed.into()),
        }
    }
}

impl<R> Drop for DeadlineReader<R> {
    fn drop(&mut self) {
        self.close();
    }
}

fn watch(control: Receiver<()>, token: CancelToken, timeout: Duration) {
    let cancelled = token.cancelled();
    let mut deadline: Option<Instant> = None;
    loop {
        let timer = match deadline {
            Some(at) => crossbeam_channel::at(at),
            None => crossbeam_channel::never(),
        };
        select! {
            recv(control) -> msg => match msg {
                Ok(()) => deadline = Some(Instant::now() + timeout),
                Err(_) => return,
            },
            recv(cancelled) -> _ => return,
            recv(timer) -> _ => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "no network read within the deadline; cancelling"
                );
                token.cancel();
                return;
            }
        }
    }
}
