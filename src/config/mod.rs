//! Engine configuration.
//!
//! Read-only after process start; changes require restart.

mod load;
mod schema;

pub use load::{load, load_from_path};
pub use schema::{Config, ConfigError, ConfigLayer, LogFormat, LoggingConfig};
