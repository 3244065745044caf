/// Bytes released by one successful `AudioThrottler::read`.
///
/// Always an owned copy; it never shares storage with the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioWaveBuffer {
    buffer: Vec<u8>,
    bytes_recorded: usize,
}

impl AudioWaveBuffer {
    pub fn new(buffer: Vec<u8>) -> Self {
        let bytes_recorded = buffer.len();
        Self {
            buffer,
            bytes_recorded,
        }
    }

    /// The valid bytes of this read.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.bytes_recorded]
    }

    pub fn bytes_recorded(&self) -> usize {
        self.bytes_recorded
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_recorded == 0
    }

    pub fn into_inner(mut self) -> Vec<u8> {
        self.buffer.truncate(self.bytes_recorded);
        self.buffer
    }
}

impl AsRef<[u8]> for AudioWaveBuffer {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}
