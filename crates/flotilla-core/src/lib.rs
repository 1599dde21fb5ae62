pub mod backoff;
pub mod config;
pub mod location;
pub mod types;

pub use backoff::Backoff;
pub use config::{ConfigError, FlotillaConfig};
pub use location::Location;
pub use types::*;
