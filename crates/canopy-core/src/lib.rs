pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::CanopyConfig;
pub use duration::{format_duration, parse_duration};
pub use error::ConfigError;
pub use types::*;
