//! Durable identity settings stored in `<taco-home>/TelemetrySettings.json`.

use crate::error::TelemetryError;
use crate::utils::write_file_atomic;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

pub const SETTINGS_FILE_NAME: &str = "TelemetrySettings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserType {
    Internal,
    External,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Internal => "Internal",
            UserType::External => "External",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per installation. Absent fields have not been derived yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// `Some(None)` is written as `null` and means no hardware address was
    /// found when the id was derived. It is not re-derived on later runs.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub machine_id: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_user_type"
    )]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_in: Option<bool>,
    /// Keys written by other tool versions; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn lenient_user_type<'de, D>(deserializer: D) -> Result<Option<UserType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw.as_ref().and_then(|v| v.as_str()) {
        Some("Internal") => Some(UserType::Internal),
        Some("External") => Some(UserType::External),
        _ => None,
    })
}

impl TelemetrySettings {
    /// Load settings, treating a missing or malformed file as "no prior state".
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "starting with empty telemetry settings ({}): {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, TelemetryError> {
        let contents = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(contents.trim_start_matches('\u{feff}'))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), TelemetryError> {
        let json = serde_json::to_vec(self)?;
        write_file_atomic(path, &json)
    }
}
