/// Throttle state machine.
///
/// State transitions:
/// ```text
/// idle → running → stopping → stopped
///           ↓                    ↓
///        (cancel) ──────────→ stopped → running (next `run`)
///
/// any → disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Disposed,
}

impl ThrottleState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Whether `run` may enter the capture loop from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether a capture loop currently owns the device.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}
