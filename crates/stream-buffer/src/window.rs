//! Append-only growth buffer indexed from stream offset zero.

/// Upper bound for the up-front allocation; larger streams grow on demand.
const INITIAL_RESERVE: u64 = 1024 * 1024;

/// Every byte pulled from the network so far.
///
/// `capacity` is the declared stream length. It only shrinks when the network ends early
/// and the stream settles for what actually arrived.
#[derive(Debug)]
pub(crate) struct ByteWindow {
    bytes: Vec<u8>,
    capacity: u64,
}

impl ByteWindow {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity.min(INITIAL_RESERVE) as usize),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.len())
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Append `chunk`, clipped at capacity. Returns how many bytes were kept.
    pub(crate) fn append(&mut self, chunk: &[u8]) -> usize {
        let keep = (self.remaining().min(chunk.len() as u64)) as usize;
        self.bytes.extend_from_slice(&chunk[..keep]);
        keep
    }

    /// Copy buffered bytes starting at `from` into `dest`. Returns the number copied.
    pub(crate) fn copy_out(&self, from: u64, dest: &mut [u8]) -> usize {
        if from >= self.len() {
            return 0;
        }
        let start = from as usize;
        let n = dest.len().min(self.bytes.len() - start);
        dest[..n].copy_from_slice(&self.bytes[start..start + n]);
        n
    }

    /// Settle for the bytes received so far.
    pub(crate) fn truncate_capacity(&mut self) {
        self.capacity = self.len();
    }
}
