use crate::models::error::ThrottleError;
use crate::models::state::ThrottleState;

/// Event delegate for throttler notifications.
///
/// Called from whichever task drives `run`/`stop`/`dispose`; never from the
/// capture callback.
pub trait ThrottleDelegate: Send + Sync {
    /// Called when the throttler state changes.
    fn on_state_changed(&self, state: ThrottleState);

    /// Called when the capture loop fails.
    fn on_error(&self, error: &ThrottleError);
}
