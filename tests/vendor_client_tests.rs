//! Wire-level vendor client behavior against a mock PowerSchool server.

mod test_utils;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use sis_sync::config::VendorClientConfig;
use sis_sync::connectors::client::{BreakerState, VendorClient};
use sis_sync::connectors::{
    AuthType, ConnectorError, PowerSchoolConnector, SisConnector, SisCredentials, SisVendor,
};
use test_utils::fast_client_config;
use wiremock::matchers::{basic_auth, bearer_token, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn oauth_credentials(server: &MockServer) -> SisCredentials {
    SisCredentials {
        vendor: "powerschool".to_string(),
        base_url: server.uri(),
        auth_type: AuthType::OAuth2,
        client_id: Some("client-id".to_string()),
        client_secret: Some("client-secret".to_string()),
        token_url: None,
        api_key_header: None,
    }
}

fn connector(server: &MockServer, config: &VendorClientConfig) -> PowerSchoolConnector {
    PowerSchoolConnector::new(&oauth_credentials(server), config).unwrap()
}

fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

fn student_body(id: u64) -> serde_json::Value {
    json!({
        "student": {
            "id": id,
            "name": {"first_name": "Ada", "last_name": "Lovelace"},
            "school_enrollment": {"grade_level": 10, "school_id": 5}
        }
    })
}

async fn mount_token(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .and(basic_auth("client-id", "client-secret"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(token_response(token))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn oauth_token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/123"))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(123)))
        .expect(2)
        .mount(&server)
        .await;

    let connector = connector(&server, &fast_client_config());
    let student = connector.get_student("123").await.unwrap();
    assert_eq!(student.external_id, "123");
    assert_eq!(student.first_name, "Ada");
    assert_eq!(student.grade.as_deref(), Some("10"));

    connector.get_student("123").await.unwrap();
}

#[tokio::test]
async fn rate_limited_request_is_retried_once() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/999"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(999)))
        .expect(1)
        .mount(&server)
        .await;

    let student = connector(&server, &fast_client_config())
        .get_student("999")
        .await
        .unwrap();
    assert_eq!(student.external_id, "999");
}

#[tokio::test]
async fn rejected_token_is_refreshed_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(token_response("tok-1"))
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(token_response("tok-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/123"))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/123"))
        .and(bearer_token("tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(123)))
        .expect(1)
        .mount(&server)
        .await;

    let student = connector(&server, &fast_client_config())
        .get_student("123")
        .await
        .unwrap();
    assert_eq!(student.first_name, "Ada");
}

#[tokio::test]
async fn persistent_unauthorized_surfaces_authentication_error() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 2).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/123"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .expect(2)
        .mount(&server)
        .await;

    let err = connector(&server, &fast_client_config())
        .get_student("123")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::Authentication {
            status: Some(401),
            ..
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn exhausted_retries_surface_vendor_status_and_body() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/district/school"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(4)
        .mount(&server)
        .await;

    let err = connector(&server, &fast_client_config())
        .list_schools()
        .await
        .unwrap_err();
    match err {
        ConnectorError::Http {
            vendor,
            status,
            body,
        } => {
            assert_eq!(vendor, "powerschool");
            assert_eq!(status, 503);
            assert_eq!(body.as_deref(), Some("maintenance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn breaker_opens_and_short_circuits_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/district"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = VendorClientConfig {
        max_retries: 0,
        breaker_failure_threshold: 2,
        breaker_cooldown_secs: 60,
        ..fast_client_config()
    };
    let credentials = SisCredentials {
        auth_type: AuthType::Basic,
        ..oauth_credentials(&server)
    };
    let client = VendorClient::new(SisVendor::PowerSchool, &credentials, &config).unwrap();

    for _ in 0..2 {
        let err = client.get_json("ws/v1/district", &[]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Http { status: 500, .. }));
    }
    assert_eq!(client.breaker_state(), BreakerState::Open);

    let err = client.get_json("ws/v1/district", &[]).await.unwrap_err();
    assert!(matches!(err, ConnectorError::CircuitOpen { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn not_found_is_neutral_for_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/404"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let config = VendorClientConfig {
        breaker_failure_threshold: 1,
        ..fast_client_config()
    };
    let credentials = SisCredentials {
        auth_type: AuthType::Basic,
        ..oauth_credentials(&server)
    };
    let client = VendorClient::new(SisVendor::PowerSchool, &credentials, &config).unwrap();

    for _ in 0..3 {
        let err = client.get_json("ws/v1/student/404", &[]).await.unwrap_err();
        assert!(err.is_not_found());
    }
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

#[tokio::test]
async fn students_by_ids_skip_missing_records() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(3)))
        .mount(&server)
        .await;

    let students = connector(&server, &fast_client_config())
        .get_students_by_ids(&["1".to_string(), "2".to_string(), "3".to_string()])
        .await
        .unwrap();
    let ids: Vec<_> = students.iter().map(|s| s.external_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

#[tokio::test]
async fn api_key_is_sent_in_vendor_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/district"))
        .and(header("x-api-key", "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"district": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = SisCredentials {
        auth_type: AuthType::ApiKey,
        client_id: None,
        client_secret: Some("secret-key".to_string()),
        ..oauth_credentials(&server)
    };
    let connector = PowerSchoolConnector::new(&credentials, &fast_client_config()).unwrap();
    connector.authenticate().await.unwrap();
    connector.test_connection().await.unwrap();
}

#[tokio::test]
async fn retry_after_header_sets_the_wait() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/77"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(student_body(77)))
        .expect(1)
        .mount(&server)
        .await;

    // Backoff alone would wait a few milliseconds
    let started = Instant::now();
    let student = connector(&server, &fast_client_config())
        .get_student("77")
        .await
        .unwrap();
    assert_eq!(student.external_id, "77");
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "retried after {:?}",
        started.elapsed()
    );
}

/// Hands out tokens that expire immediately and notes when each was asked for.
struct ExpiringTokens {
    requested_at: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for ExpiringTokens {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.requested_at.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "short-lived",
            "token_type": "Bearer",
            "expires_in": 0
        }))
    }
}

#[tokio::test]
async fn token_refresh_does_not_wait_for_a_request_slot() {
    let server = MockServer::start().await;
    let requested_at = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(ExpiringTokens {
            requested_at: requested_at.clone(),
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/v1/student/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(student_body(1))
                .set_delay(Duration::from_millis(600)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = VendorClientConfig {
        max_in_flight: 1,
        ..fast_client_config()
    };
    let connector = Arc::new(connector(&server, &config));
    let started = Instant::now();
    let first = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.get_student("1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = connector.get_student("1").await;

    first.await.unwrap().unwrap();
    second.unwrap();
    let requested_at = requested_at.lock().unwrap().clone();
    assert_eq!(requested_at.len(), 2);
    // The only slot is busy with the first request for 600ms
    assert!(
        requested_at[1].duration_since(started) < Duration::from_millis(500),
        "second token requested after {:?}",
        requested_at[1].duration_since(started)
    );
}
