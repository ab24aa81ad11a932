//! Crate-level error type

use std::fmt;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::inflight::InFlightError;
use crate::message::ConversionError;
use crate::store::StoreError;
use crate::topic::TopicError;

/// Any error the engine can return
#[derive(Debug)]
pub enum Error {
    /// Bad topic or filter, rejected before touching the store
    Topic(TopicError),
    /// Wire packet could not be converted
    Conversion(ConversionError),
    /// Corrupt in-flight state
    InFlight(InFlightError),
    /// Backing store failure
    Store(StoreError),
    Config(ConfigError),
    Auth(AuthError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Topic(e) => write!(f, "{}", e),
            Error::Conversion(e) => write!(f, "{}", e),
            Error::InFlight(e) => write!(f, "{}", e),
            Error::Store(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "{}", e),
            Error::Auth(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Topic(e) => Some(e),
            Error::Conversion(e) => Some(e),
            Error::InFlight(e) => Some(e),
            Error::Store(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Auth(e) => Some(e),
        }
    }
}

impl From<TopicError> for Error {
    fn from(e: TopicError) -> Self {
        Error::Topic(e)
    }
}

impl From<ConversionError> for Error {
    fn from(e: ConversionError) -> Self {
        Error::Conversion(e)
    }
}

impl From<InFlightError> for Error {
    fn from(e: InFlightError) -> Self {
        // Store failures surface as store errors wherever they come from
        match e {
            InFlightError::Store(e) => Error::Store(e),
            e => Error::InFlight(e),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
