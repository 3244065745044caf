/// Counters for debugging a throttler.
///
/// Updated under the buffer lock, so a snapshot is always self-consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleDiagnostics {
    pub callback_count: u64,
    pub bytes_captured: u64,
    /// Oldest bytes overwritten because the ring was full.
    pub bytes_overwritten: u64,
    /// Bytes flushed by `SilenceTrim::TrimStart`.
    pub bytes_trimmed: u64,
    pub bytes_delivered: u64,
    pub reads_delivered: u64,
}
