//! One-shot cancellation signal shared across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::lock;

/// Clonable cancellation token.
///
/// Once cancelled it stays cancelled. [`CancelToken::cancelled`] hands out a receiver that
/// never yields a value and disconnects on cancel, so it can sit in a `select!` next to
/// timers.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Cancel the token. Returns `true` only for the call that actually cancelled it.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        lock(&self.inner.tx).take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    pub fn cancelled(&self) -> Receiver<()> {
        self.inner.rx.clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cancel_is_one_shot() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_receiver_wakes_waiters() {
        let token = CancelToken::new();
        let rx = token.cancelled();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let res = rx.recv_timeout(Duration::from_secs(2));
        assert!(matches!(
            res,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn receiver_stays_pending_until_cancel() {
        let token = CancelToken::new();
        let res = token.cancelled().recv_timeout(Duration::from_millis(10));
        assert!(matches!(
            res,
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        ));
    }
}
