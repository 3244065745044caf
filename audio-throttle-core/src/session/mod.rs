pub mod cancellation;
pub mod throttler;
