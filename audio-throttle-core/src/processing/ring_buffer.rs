/// Fixed-capacity circular byte buffer for captured audio.
///
/// Not synchronised: the owner wraps it in `parking_lot::Mutex` and performs
/// every operation under that one lock. All reads copy out, so no reference
/// into the backing storage survives a call.
///
/// Overflow behavior: drops oldest bytes. Writing never fails, since it runs
/// on the capture callback.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<u8>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Append `data` to the buffer.
    ///
    /// If the buffer overflows, the oldest unread bytes are dropped.
    /// If `data` is larger than capacity, only its last `capacity` bytes are kept.
    /// Returns the number of previously buffered bytes that were overwritten.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() || self.capacity == 0 {
            return 0;
        }

        // If more data than capacity, only keep the tail
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        // Drop oldest if we'd overflow
        let overflow = (self.available + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.discard(overflow);
        }

        let first = data.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&data[..first]);
        self.buffer[..data.len() - first].copy_from_slice(&data[first..]);

        self.write_index = (self.write_index + data.len()) % self.capacity;
        self.available += data.len();
        overflow
    }

    /// Read and remove up to `max_len` bytes from the buffer.
    ///
    /// Returns fewer bytes if fewer are available.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let out = self.peek(max_len);
        self.discard(out.len());
        out
    }

    /// Copy up to `max_len` unread bytes without consuming them.
    pub fn peek(&self, max_len: usize) -> Vec<u8> {
        let to_copy = max_len.min(self.available);
        if to_copy == 0 {
            return Vec::new();
        }

        let first = to_copy.min(self.capacity - self.read_index);
        let mut out = Vec::with_capacity(to_copy);
        out.extend_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out.extend_from_slice(&self.buffer[..to_copy - first]);
        out
    }

    /// Discard up to `n` unread bytes without copying them.
    ///
    /// Returns the number actually discarded, which is less than `n` only
    /// when fewer bytes were buffered.
    pub fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.available);
        self.discard(n);
        n
    }

    /// Number of unread bytes.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn is_full(&self) -> bool {
        self.available == self.capacity
    }

    /// Reset the buffer to empty state.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    /// The total capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn discard(&mut self, n: usize) {
        debug_assert!(n <= self.available);
        if n == 0 {
            return;
        }
        self.read_index = (self.read_index + n) % self.capacity;
        self.available -= n;
    }
}
