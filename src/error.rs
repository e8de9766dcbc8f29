//! Error types and handling for Hesperus
//!
//! This module defines the error types used throughout the controller,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Hesperus operations
pub type Result<T> = std::result::Result<T, HesperusError>;

/// Main error type for Hesperus
#[derive(Debug, Error)]
pub enum HesperusError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Malformed sensor input
    #[error("Sensor error: {message}")]
    Sensor { message: String },

    /// Settings store errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Caller is not allowed to run a command
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },
}

impl HesperusError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HesperusError::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        HesperusError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new sensor error
    pub fn sensor<S: Into<String>>(message: S) -> Self {
        HesperusError::Sensor {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        HesperusError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        HesperusError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HesperusError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HesperusError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HesperusError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HesperusError::Auth {
            message: message.into(),
        }
    }

    /// Whether the error came from the charger link rather than from local logic
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HesperusError::Modbus { .. } | HesperusError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for HesperusError {
    fn from(err: std::io::Error) -> Self {
        HesperusError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HesperusError {
    fn from(err: serde_yaml::Error) -> Self {
        HesperusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HesperusError {
    fn from(err: serde_json::Error) -> Self {
        HesperusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for HesperusError {
    fn from(err: csv::Error) -> Self {
        HesperusError::io(format!("CSV write failed: {}", err))
    }
}

impl From<chrono::ParseError> for HesperusError {
    fn from(err: chrono::ParseError) -> Self {
        HesperusError::validation("time".to_string(), err.to_string())
    }
}
