use thiserror::Error;

/// Errors surfaced by the capture throttle.
///
/// Transient conditions (no endpoint, buffer not ready) are not errors and
/// never appear here; they are reported as `Ok(())` / `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("capture loop already running")]
    AlreadyRunning,

    #[error("throttler has been disposed")]
    Disposed,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("capture device failure: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, ThrottleError>;
