//! Errors raised by the stream wrappers.
//!
//! The streams keep the `std::io::Read`/`Seek` contract, so these travel inside an
//! [`io::Error`]. Use [`StreamError::from_io`] to get them back out.

use std::io;

use thiserror::Error;

/// Stream-level failures that callers may want to tell apart from plain I/O errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A seek target fell outside `[0, len]`; the cursor was left where it was.
    #[error("seek to {requested} is outside the stream (0..={len})")]
    SeekOutOfRange { requested: i128, len: u64 },
    /// The read deadline fired; the associated token is cancelled for good.
    #[error("no read progress within {timeout_ms} ms")]
    DeadlineExceeded { timeout_ms: u64 },
    /// The underlying source was already released.
    #[error("read from a closed source")]
    SourceClosed,
}

impl StreamError {
    /// The `io::ErrorKind` used when this error is carried by an `io::Error`.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            StreamError::SeekOutOfRange { .. } => io::ErrorKind::InvalidInput,
            StreamError::DeadlineExceeded { .. } => io::ErrorKind::TimedOut,
            StreamError::SourceClosed => io::ErrorKind::NotConnected,
        }
    }

    /// Recover a [`StreamError`] wrapped in an `io::Error`, if there is one.
    pub fn from_io(err: &io::Error) -> Option<&StreamError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// End-of-data variants that are reported to consumers as a plain `Ok(0)`.
///
/// A close can race an in-flight network read, so "read after close" lands here too.
pub(crate) fn is_benign_eof(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
        || matches!(StreamError::from_io(err), Some(StreamError::SourceClosed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_recovers_wrapped_error() {
        let err: io::Error = StreamError::SeekOutOfRange {
            requested: -1,
            len: 10,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(
            StreamError::from_io(&err),
            Some(&StreamError::SeekOutOfRange {
                requested: -1,
                len: 10
            })
        );
    }

    #[test]
    fn from_io_ignores_foreign_errors() {
        let err = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(StreamError::from_io(&err).is_none());
    }

    #[test]
    fn benign_eof_covers_closed_source_and_unexpected_eof() {
        assert!(is_benign_eof(&StreamError::SourceClosed.into()));
        assert!(is_benign_eof(&io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(!is_benign_eof(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_benign_eof(
            &StreamError::DeadlineExceeded { timeout_ms: 5 }.into()
        ));
    }
}
