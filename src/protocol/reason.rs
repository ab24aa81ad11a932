//! MQTT v3.1.1 return codes
//!
//! CONNACK return codes and SUBACK per-topic return codes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::QoS;

/// CONNACK return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectReturnCode {
    /// Connection accepted
    #[default]
    Accepted = 0x00,
    /// The server does not support the requested protocol level
    UnacceptableProtocolVersion = 0x01,
    /// The client identifier is not allowed
    IdentifierRejected = 0x02,
    /// The MQTT service is unavailable
    ServerUnavailable = 0x03,
    /// Malformed user name or password
    BadUserNameOrPassword = 0x04,
    /// The client is not authorized to connect
    NotAuthorized = 0x05,
}

impl ConnectReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::UnacceptableProtocolVersion),
            0x02 => Some(Self::IdentifierRejected),
            0x03 => Some(Self::ServerUnavailable),
            0x04 => Some(Self::BadUserNameOrPassword),
            0x05 => Some(Self::NotAuthorized),
            _ => None,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "connection accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUserNameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(s)
    }
}

/// SUBACK return code for a single topic filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubAckReturnCode {
    /// Subscription accepted with the given maximum QoS
    Granted(QoS),
    /// Subscription refused (0x80)
    Failure,
}

impl SubAckReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x80 => Some(Self::Failure),
            v => QoS::from_u8(v).map(Self::Granted),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Granted(qos) => qos as u8,
            Self::Failure => 0x80,
        }
    }

    /// Granted QoS, if the subscription was accepted
    pub fn granted(self) -> Option<QoS> {
        match self {
            Self::Granted(qos) => Some(qos),
            Self::Failure => None,
        }
    }
}

impl From<QoS> for SubAckReturnCode {
    fn from(qos: QoS) -> Self {
        Self::Granted(qos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suback_codes() {
        assert_eq!(SubAckReturnCode::from_u8(0x80), Some(SubAckReturnCode::Failure));
        assert_eq!(
            SubAckReturnCode::from_u8(2),
            Some(SubAckReturnCode::Granted(QoS::ExactlyOnce))
        );
        assert_eq!(SubAckReturnCode::from_u8(3), None);
        assert_eq!(SubAckReturnCode::Granted(QoS::AtLeastOnce).to_u8(), 1);
        assert_eq!(SubAckReturnCode::Failure.granted(), None);
    }

    #[test]
    fn test_connack_codes() {
        assert!(ConnectReturnCode::from_u8(0).unwrap().is_accepted());
        assert_eq!(
            ConnectReturnCode::from_u8(5),
            Some(ConnectReturnCode::NotAuthorized)
        );
        assert!(ConnectReturnCode::from_u8(6).is_none());
    }
}
