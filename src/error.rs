//! Custom error types for wearhook
//!
//! Provides structured error handling for the correlation and
//! decryption paths, with user-friendly hints for the CLI.

use thiserror::Error;

/// Main error type for wearhook operations
#[derive(Error, Debug)]
pub enum WearhookError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Capture/correlation errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Payload decryption errors
    #[error("Decryption error: {0}")]
    Decrypt(#[from] DecryptError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

/// Errors on the correlation path. None of these stop ingestion.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Malformed capture event: {reason}")]
    MalformedEvent { reason: String },

    #[error("Response for unknown token {token}")]
    UnknownToken { token: String },

    #[error("Observer for {method} {route} failed: {source}")]
    Observer {
        route: String,
        method: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Correlator is no longer accepting messages")]
    Closed,
}

/// Decryption errors
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("Invalid base64 in {field}: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Flow {token} carries no session secret")]
    MissingSessionSecret { token: String },

    #[error("Failed to read exchange record {path}")]
    ReadRecord {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse exchange record: {0}")]
    ParseRecord(#[from] serde_json::Error),
}

impl CaptureError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CaptureError::MalformedEvent {
            reason: reason.into(),
        }
    }
}

impl WearhookError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            WearhookError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            WearhookError::Capture(e) => format!("Capture issue: {}", e.user_hint()),
            WearhookError::Decrypt(e) => format!("Decryption issue: {}", e.user_hint()),
            WearhookError::Io(e) => format!("File system issue: {}", e),
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl UserHint for CaptureError {
    fn user_hint(&self) -> String {
        match self {
            CaptureError::MalformedEvent { reason } => {
                format!("The capture script sent a message that could not be read ({}).", reason)
            }
            CaptureError::UnknownToken { token } => {
                format!("A response arrived for '{}' before (or without) its request.", token)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for DecryptError {
    fn user_hint(&self) -> String {
        match self {
            DecryptError::Decode { field, .. } => {
                format!("'{}' is not valid base64. Copy the value again without line breaks.", field)
            }
            DecryptError::MissingSessionSecret { .. } => {
                "No ssecurity value was captured for this flow, so it cannot be decrypted.".into()
            }
            DecryptError::ReadRecord { path, .. } => {
                format!("Could not read exchange record '{}'.", path)
            }
            DecryptError::ParseRecord(_) => {
                "The exchange record must be JSON with ssecurity, nonce, req_data and res_data.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_names_field() {
        let source = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            "!!!",
        )
        .unwrap_err();
        let err = WearhookError::from(DecryptError::Decode {
            field: "nonce",
            source,
        });
        assert!(err.user_message().contains("'nonce'"));
    }

    #[test]
    fn test_unknown_token_display() {
        let err = CaptureError::UnknownToken {
            token: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Response for unknown token abc");
    }
}
