use tracing::trace;

/// Suppresses the echo a half-duplex serial transceiver produces.
///
/// Whatever the pseudo-terminal peer writes to the serial line is remembered.
/// If the very next block read from the serial line is byte-for-byte the same,
/// it is considered an echo and swallowed, once.
///
/// Only whole reads are compared.
/// An echo which arrives split over several reads, or mixed with real inbound
/// data, does not match and is passed through.
#[derive(Debug)]
pub struct EchoFilter {
    last_written: Vec<u8>,
    capacity: usize,
}

impl EchoFilter {
    /// A filter remembering at most `capacity` bytes, i.e. one read-sized block.
    pub fn new(capacity: usize) -> Self {
        Self {
            last_written: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember a block just written towards the serial line.
    ///
    /// Supersedes whatever was remembered before.
    /// A block larger than the capacity clears the filter, since no single read can match it.
    pub fn record_sent(&mut self, bytes: &[u8]) {
        self.last_written.clear();

        if bytes.len() > self.capacity {
            trace!(len = bytes.len(), capacity = self.capacity, "Block too large to filter");
            return;
        }

        self.last_written.extend_from_slice(bytes);
    }

    /// Should this block read from the serial line be dropped as an echo?
    ///
    /// A match consumes the remembered block.
    /// A mismatch leaves it in place.
    pub fn should_suppress(&mut self, bytes: &[u8]) -> bool {
        if self.last_written.is_empty() || self.last_written != bytes {
            return false;
        }

        self.last_written.clear();
        true
    }

    /// The number of bytes currently remembered. Zero when nothing is pending.
    pub fn pending(&self) -> usize {
        self.last_written.len()
    }
}
