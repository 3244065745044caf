pub mod config;
pub mod diagnostics;
pub mod error;
pub mod state;
pub mod wave_buffer;
pub mod wave_format;
