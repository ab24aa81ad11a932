//! Auth module tests

use super::*;
use crate::config::{AuthConfig, UserConfig};

fn make_auth_config(enabled: bool, allow_anonymous: bool, users: Vec<UserConfig>) -> AuthConfig {
    AuthConfig {
        enabled,
        allow_anonymous,
        users,
    }
}

fn make_user(username: &str, password: &str, max_qos: u8) -> UserConfig {
    UserConfig {
        username: username.to_string(),
        password: password.to_string(),
        max_qos,
    }
}

fn sub(filter: &str, qos: QoS) -> Subscription {
    Subscription {
        filter: filter.to_string(),
        qos,
    }
}

#[tokio::test]
async fn test_auth_disabled_allows_all() {
    let config = make_auth_config(false, false, vec![]);
    let auth = StaticAuthenticator::new(&config);
    assert!(!auth.is_enabled());

    let result = auth
        .auth_connect("client1", Some("user"), Some(b"pass"))
        .await
        .unwrap();
    assert!(result.is_ok(), "Should allow when auth is disabled");

    let result = auth
        .auth_publish("client1", None, "a/b", QoS::ExactlyOnce, true)
        .await
        .unwrap();
    assert_eq!(result, AuthorizeResult::Ok);
}

#[tokio::test]
async fn test_auth_enabled_rejects_unknown_user() {
    let config = make_auth_config(true, false, vec![make_user("admin", "secret", 2)]);
    let auth = StaticAuthenticator::new(&config);

    let result = auth
        .auth_connect("client1", Some("unknown"), Some(b"pass"))
        .await
        .unwrap();
    assert_eq!(result, AuthorizeResult::Forbidden);
    assert_eq!(
        result.connect_return_code(),
        ConnectReturnCode::NotAuthorized
    );
}

#[tokio::test]
async fn test_auth_enabled_checks_password() {
    let config = make_auth_config(true, false, vec![make_user("admin", "secret", 2)]);
    let auth = StaticAuthenticator::new(&config);

    let wrong = auth
        .auth_connect("client1", Some("admin"), Some(b"wrong"))
        .await
        .unwrap();
    assert!(!wrong.is_ok(), "Should reject wrong password");

    let missing = auth.auth_connect("client1", Some("admin"), None).await.unwrap();
    assert!(!missing.is_ok(), "Should reject missing password");

    let ok = auth
        .auth_connect("client1", Some("admin"), Some(b"secret"))
        .await
        .unwrap();
    assert_eq!(ok.connect_return_code(), ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn test_anonymous_connect() {
    let allowed = StaticAuthenticator::new(&make_auth_config(true, true, vec![]));
    assert!(allowed.auth_connect("c", None, None).await.unwrap().is_ok());

    let rejected = StaticAuthenticator::new(&make_auth_config(true, false, vec![]));
    assert!(!rejected.auth_connect("c", None, None).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_publish_respects_max_qos() {
    let config = make_auth_config(true, false, vec![make_user("sensor", "pw", 1)]);
    let auth = StaticAuthenticator::new(&config);

    let ok = auth
        .auth_publish("c", Some("sensor"), "s/1", QoS::AtLeastOnce, false)
        .await
        .unwrap();
    assert_eq!(ok, AuthorizeResult::Ok);

    let too_high = auth
        .auth_publish("c", Some("sensor"), "s/1", QoS::ExactlyOnce, false)
        .await
        .unwrap();
    assert_eq!(too_high, AuthorizeResult::Forbidden);

    // Wildcards are not publishable
    let wildcard = auth
        .auth_publish("c", Some("sensor"), "s/+", QoS::AtMostOnce, false)
        .await
        .unwrap();
    assert_eq!(wildcard, AuthorizeResult::Forbidden);

    let anonymous = auth
        .auth_publish("c", None, "s/1", QoS::AtMostOnce, false)
        .await
        .unwrap();
    assert_eq!(anonymous, AuthorizeResult::Forbidden);
}

#[tokio::test]
async fn test_subscribe_grants_per_topic() {
    let config = make_auth_config(true, false, vec![make_user("viewer", "pw", 1)]);
    let auth = StaticAuthenticator::new(&config);

    let granted = auth
        .auth_subscribe(
            "c",
            Some("viewer"),
            &[
                sub("a/+", QoS::ExactlyOnce),
                sub("a/#/b", QoS::AtMostOnce),
                sub("b", QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap();
    assert_eq!(
        granted,
        vec![
            SubAckReturnCode::Granted(QoS::AtLeastOnce),
            SubAckReturnCode::Failure,
            SubAckReturnCode::Granted(QoS::AtMostOnce),
        ]
    );

    let denied = auth
        .auth_subscribe("c", Some("nobody"), &[sub("a", QoS::AtMostOnce)])
        .await
        .unwrap();
    assert_eq!(denied, vec![SubAckReturnCode::Failure]);
}

#[tokio::test]
async fn test_out_of_range_max_qos_falls_back() {
    let config = make_auth_config(true, false, vec![make_user("u", "pw", 9)]);
    let auth = StaticAuthenticator::new(&config);
    let granted = auth
        .auth_subscribe("c", Some("u"), &[sub("x", QoS::ExactlyOnce)])
        .await
        .unwrap();
    assert_eq!(granted, vec![SubAckReturnCode::Granted(QoS::ExactlyOnce)]);
}
