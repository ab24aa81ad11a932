//! Authentication Module
//!
//! The engine never authorizes anything itself: the connection layer asks an
//! [`Authenticator`] and hands the outcome over. [`StaticAuthenticator`] is
//! the config-driven implementation with plaintext passwords.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::config::AuthConfig;
use crate::protocol::{ConnectReturnCode, QoS, SubAckReturnCode, Subscription};
use crate::topic::{validate_topic_filter, validate_topic_name};

#[cfg(test)]
mod tests;

/// Authenticator backend failure
#[derive(Debug)]
pub enum AuthError {
    /// The backend could not be reached or answered garbage
    Backend(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Backend(msg) => write!(f, "auth backend error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;

/// Outcome of a CONNECT or PUBLISH check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeResult {
    Ok,
    Forbidden,
}

impl AuthorizeResult {
    pub fn is_ok(self) -> bool {
        self == AuthorizeResult::Ok
    }

    /// CONNACK code for a CONNECT check
    pub fn connect_return_code(self) -> ConnectReturnCode {
        match self {
            AuthorizeResult::Ok => ConnectReturnCode::Accepted,
            AuthorizeResult::Forbidden => ConnectReturnCode::NotAuthorized,
        }
    }
}

/// Client authorization capability
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authorize a CONNECT
    async fn auth_connect(
        &self,
        client_id: &str,
        user_name: Option<&str>,
        password: Option<&[u8]>,
    ) -> AuthResult<AuthorizeResult>;

    /// Authorize a PUBLISH
    async fn auth_publish(
        &self,
        client_id: &str,
        user_name: Option<&str>,
        topic_name: &str,
        qos: QoS,
        retain: bool,
    ) -> AuthResult<AuthorizeResult>;

    /// Grant a SUBSCRIBE; returns one code per requested subscription
    async fn auth_subscribe(
        &self,
        client_id: &str,
        user_name: Option<&str>,
        subscriptions: &[Subscription],
    ) -> AuthResult<Vec<SubAckReturnCode>>;
}

/// Internal user entry
struct UserEntry {
    password: String,
    max_qos: QoS,
}

/// Authenticator over the static user list from configuration
pub struct StaticAuthenticator {
    enabled: bool,
    allow_anonymous: bool,
    users: HashMap<String, UserEntry>,
}

impl StaticAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|user| {
                (
                    user.username.clone(),
                    UserEntry {
                        password: user.password.clone(),
                        max_qos: QoS::from_u8(user.max_qos).unwrap_or(QoS::ExactlyOnce),
                    },
                )
            })
            .collect();

        Self {
            enabled: config.enabled,
            allow_anonymous: config.allow_anonymous,
            users,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Highest QoS the user may use, `None` if the user may do nothing
    fn qos_cap(&self, user_name: Option<&str>) -> Option<QoS> {
        if !self.enabled {
            return Some(QoS::ExactlyOnce);
        }
        match user_name.and_then(|name| self.users.get(name)) {
            Some(user) => Some(user.max_qos),
            None if self.allow_anonymous => Some(QoS::ExactlyOnce),
            None => None,
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn auth_connect(
        &self,
        client_id: &str,
        user_name: Option<&str>,
        password: Option<&[u8]>,
    ) -> AuthResult<AuthorizeResult> {
        if !self.enabled {
            return Ok(AuthorizeResult::Ok);
        }

        let Some(user_name) = user_name else {
            return Ok(if self.allow_anonymous {
                AuthorizeResult::Ok
            } else {
                AuthorizeResult::Forbidden
            });
        };

        let accepted = match self.users.get(user_name) {
            Some(user) => password.unwrap_or(&[]) == user.password.as_bytes(),
            None => false,
        };
        debug!(client_id, user_name, accepted, "CONNECT authorization");
        Ok(if accepted {
            AuthorizeResult::Ok
        } else {
            AuthorizeResult::Forbidden
        })
    }

    async fn auth_publish(
        &self,
        _client_id: &str,
        user_name: Option<&str>,
        topic_name: &str,
        qos: QoS,
        _retain: bool,
    ) -> AuthResult<AuthorizeResult> {
        if validate_topic_name(topic_name).is_err() {
            return Ok(AuthorizeResult::Forbidden);
        }
        Ok(match self.qos_cap(user_name) {
            Some(cap) if qos <= cap => AuthorizeResult::Ok,
            _ => AuthorizeResult::Forbidden,
        })
    }

    async fn auth_subscribe(
        &self,
        _client_id: &str,
        user_name: Option<&str>,
        subscriptions: &[Subscription],
    ) -> AuthResult<Vec<SubAckReturnCode>> {
        let cap = self.qos_cap(user_name);
        Ok(subscriptions
            .iter()
            .map(|sub| match cap {
                Some(cap) if validate_topic_filter(&sub.filter).is_ok() => {
                    SubAckReturnCode::Granted(sub.qos.min(cap))
                }
                _ => SubAckReturnCode::Failure,
            })
            .collect())
    }
}
