//! Store error types.

use std::fmt;

/// Errors that can occur during key-value store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The backend failed or could not be reached
    Unavailable(String),
    /// Key holds a value of a different shape
    WrongType {
        key: String,
        expected: &'static str,
    },
    /// Hash field holds something other than an integer
    NotAnInteger { key: String, field: String },
    /// Serialization error
    Serialize(String),
    /// Deserialization error
    Deserialize(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "store unavailable: {}", e),
            Self::WrongType { key, expected } => {
                write!(f, "key '{}' does not hold a {}", key, expected)
            }
            Self::NotAnInteger { key, field } => {
                write!(f, "field '{}' of key '{}' is not an integer", field, key)
            }
            Self::Serialize(e) => write!(f, "serialization error: {}", e),
            Self::Deserialize(e) => write!(f, "deserialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<fjall::Error> for StoreError {
    fn from(err: fjall::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Deserialize(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
