pub mod capture_backend;
pub mod throttle_delegate;
