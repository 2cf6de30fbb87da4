pub mod config;
pub mod error;
pub mod observability;
pub mod telemetry;
pub mod utils;

pub use config::{LogLevel, TelemetryConfig};
pub use error::TelemetryError;
pub use telemetry::{Telemetry, TelemetryEvent};
