use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::taco_home;

pub const DEFAULT_INSTRUMENTATION_KEY: &str = "10baf391-c2e3-4651-a726-e9b25d8470fd";
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";
pub const DEFAULT_INTERNAL_ENV_VAR: &str = "TACOINTERNAL";
pub const DEFAULT_INTERNAL_DOMAIN_SUFFIX: &str = "microsoft.com";

/// Global output verbosity of the host tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent,
    Normal,
    /// Telemetry failures are only ever reported at this level.
    Diagnostic,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "silent" | "none" | "off" => Some(LogLevel::Silent),
            "normal" | "info" | "" => Some(LogLevel::Normal),
            "diagnostic" | "debug" | "verbose" => Some(LogLevel::Diagnostic),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        env::var("TACO_LOG_LEVEL")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or(LogLevel::Normal)
    }

    /// Default `tracing-subscriber` filter directive for this level.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Normal => "warn",
            LogLevel::Diagnostic => "debug",
        }
    }
}

/// Runtime configuration for the telemetry client.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub app_name: String,
    pub app_version: Option<String>,
    /// Directory holding `TelemetrySettings.json`.
    pub settings_dir: PathBuf,
    pub instrumentation_key: String,
    pub endpoint: String,
    /// Upper bound on how long a tracked event waits in the queue.
    pub max_batch_interval: Duration,
    pub max_batch_size: usize,
    pub http_timeout: Duration,
    pub internal_env_var: String,
    pub internal_domain_suffix: String,
    pub log_level: LogLevel,
}

impl TelemetryConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        let instrumentation_key = env::var("TACO_TELEMETRY_INSTRUMENTATION_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INSTRUMENTATION_KEY.to_string());

        let endpoint = env::var("TACO_TELEMETRY_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Self {
            app_name: app_name.into(),
            app_version: None,
            settings_dir: taco_home(),
            instrumentation_key,
            endpoint,
            max_batch_interval: Duration::from_millis(100),
            max_batch_size: 100,
            http_timeout: Duration::from_secs(5),
            internal_env_var: DEFAULT_INTERNAL_ENV_VAR.to_string(),
            internal_domain_suffix: DEFAULT_INTERNAL_DOMAIN_SUFFIX.to_string(),
            log_level: LogLevel::from_env(),
        }
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    pub fn settings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings_dir = dir.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn max_batch_interval(mut self, interval: Duration) -> Self {
        self.max_batch_interval = interval;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn settings_file(&self) -> PathBuf {
        self.settings_dir
            .join(crate::telemetry::settings::SETTINGS_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("Diagnostic"), Some(LogLevel::Diagnostic));
        assert_eq!(LogLevel::parse(" silent "), Some(LogLevel::Silent));
        assert_eq!(LogLevel::parse(""), Some(LogLevel::Normal));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Diagnostic > LogLevel::Normal);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TelemetryConfig::new("taco")
            .app_version("1.2.3")
            .settings_dir("/tmp/taco-test")
            .max_batch_interval(Duration::from_millis(5))
            .log_level(LogLevel::Diagnostic);

        assert_eq!(config.app_name, "taco");
        assert_eq!(config.app_version.as_deref(), Some("1.2.3"));
        assert_eq!(
            config.settings_file(),
            PathBuf::from("/tmp/taco-test").join("TelemetrySettings.json")
        );
        assert_eq!(config.max_batch_interval, Duration::from_millis(5));
        assert_eq!(config.internal_env_var, "TACOINTERNAL");
        assert_eq!(config.log_level, LogLevel::Diagnostic);
    }
}
