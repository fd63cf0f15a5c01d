use std::time::Duration;

use roster_guru::{GuruClient, GuruClientConfig, GuruError, SubscriptionSource};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> GuruClient {
    GuruClient::new(GuruClientConfig {
        base_url: server.uri(),
        token: Some("secret-token".into()),
        timeout: Duration::from_secs(5),
        page_delay: Duration::from_millis(1),
        user_agent: None,
    })
    .expect("client")
}

fn sub(id: &str, email: &str) -> serde_json::Value {
    json!({
        "id": id,
        "last_status": "active",
        "updated_at": "2024-02-01T00:00:00Z",
        "contact": { "email": email, "name": "Someone", "doc": "123" },
        "product": { "id": "p1", "name": "Essay Prep" }
    })
}

#[tokio::test]
async fn follows_cursors_until_has_more_pages_is_zero() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param_is_missing("cursor"))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 3,
            "has_more_pages": 1,
            "next_cursor": "c2",
            "data": [sub("s1", "a@x.com")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 3,
            "has_more_pages": 1,
            "next_cursor": "c3",
            "data": [sub("s2", "b@x.com")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param("cursor", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 3,
            "has_more_pages": 0,
            "next_cursor": null,
            "data": [sub("s3", "c@x.com")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let all = client_for(&server).fetch_all().await.expect("fetch all");
    let ids = all.iter().filter_map(|s| s.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
}

#[tokio::test]
async fn single_page_stops_without_following_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 1,
            "has_more_pages": 0,
            "next_cursor": "ignored",
            "data": [sub("s1", "a@x.com")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let all = client_for(&server).fetch_all().await.expect("fetch all");
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn non_success_status_on_a_later_page_aborts_everything() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 2,
            "has_more_pages": 1,
            "next_cursor": "c2",
            "data": [sub("s1", "a@x.com")]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_all().await.unwrap_err();
    assert!(matches!(err, GuruError::HttpStatus { status: 503, .. }), "{err}");
}

#[tokio::test]
async fn more_pages_without_cursor_is_a_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 10,
            "has_more_pages": 1,
            "next_cursor": null,
            "data": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_all().await.unwrap_err();
    assert!(matches!(err, GuruError::MissingCursor { page: 1 }));
}

#[tokio::test]
async fn malformed_body_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_all().await.unwrap_err();
    assert!(matches!(err, GuruError::Decode { page: 1, .. }));
}

#[tokio::test]
async fn slow_page_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "has_more_pages": 0, "data": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = GuruClient::new(GuruClientConfig {
        base_url: server.uri(),
        token: Some("secret-token".into()),
        timeout: Duration::from_millis(50),
        page_delay: Duration::ZERO,
        user_agent: None,
    })
    .expect("client");

    let err = client.fetch_all().await.unwrap_err();
    match err {
        GuruError::Request { source, .. } => assert!(source.is_timeout()),
        other => panic!("expected timeout, got {other}"),
    }
}
