use std::fmt;

#[derive(Debug)]
pub enum TelemetryError {
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    HttpError(String),
    PromptError(String),
    Generic(String),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::IoError(e) => write!(f, "IO error: {}", e),
            TelemetryError::JsonError(e) => write!(f, "JSON error: {}", e),
            TelemetryError::HttpError(msg) => write!(f, "HTTP error: {}", msg),
            TelemetryError::PromptError(msg) => write!(f, "Prompt error: {}", msg),
            TelemetryError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::IoError(e) => Some(e),
            TelemetryError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::IoError(err)
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::JsonError(err)
    }
}

impl From<ureq::Error> for TelemetryError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => TelemetryError::HttpError(format!(
                "ingestion endpoint returned {} {}",
                code,
                response.status_text()
            )),
            ureq::Error::Transport(transport) => TelemetryError::HttpError(transport.to_string()),
        }
    }
}
