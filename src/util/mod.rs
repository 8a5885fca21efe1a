//! Shared helpers

pub mod format;
pub mod logging;

pub use format::{format_eta, format_size, format_speed};
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
