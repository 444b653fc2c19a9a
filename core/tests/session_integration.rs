//! XSRF-token session against a mock server.
use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use serde_json::json;

use taskbot_core::config::HttpConfig;
use taskbot_core::net::{CookieJar, FixedBackoff, HttpService, RequestOptions, COUNT_KEY};
use taskbot_core::runner::{TaskUpdate, TaskUpdateSink};
use taskbot_core::session::{AuthSession, TASK_UPDATE_PATH, XSRF_TOKEN_PATH};
use taskbot_core::task::TaskId;

fn session(base: &str) -> AuthSession {
    let svc = HttpService::new(base, &HttpConfig::default(), "taskbot-test")
        .unwrap()
        .with_backoff(Arc::new(FixedBackoff(Duration::from_millis(5))));
    AuthSession::new(svc, RequestOptions::default())
}

async fn token_mock(server: &mut mockito::ServerGuard, hits: usize) -> mockito::Mock {
    server
        .mock("POST", XSRF_TOKEN_PATH)
        .match_header("X-XSRF-Token-Request", "1")
        .match_body(Matcher::Json(json!({})))
        .with_status(200)
        .with_body(r#"{"xsrf_token": "token"}"#)
        .expect(hits)
        .create_async()
        .await
}

fn update_path() -> String {
    format!("{TASK_UPDATE_PATH}/23")
}

#[tokio::test]
async fn test_token_is_fetched_once_and_attached() {
    let mut server = mockito::Server::new_async().await;
    let token = token_mock(&mut server, 1).await;
    let updates = server
        .mock("POST", update_path().as_str())
        .match_header("X-XSRF-Token", "token")
        .match_body(Matcher::PartialJson(json!({"id": "localhost", "task_id": 23})))
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let session = session(&server.url());
    let update = TaskUpdate::new("localhost", TaskId::Int(23), 0.0);
    assert!(session.post_update(&update).await);
    assert!(session.post_update(&update).await);
    assert_eq!(session.token().as_deref(), Some("token"));

    token.assert_async().await;
    updates.assert_async().await;
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_call_replayed() {
    let mut server = mockito::Server::new_async().await;
    let token = token_mock(&mut server, 2).await;
    let rejected = server
        .mock("POST", update_path().as_str())
        .match_query(Matcher::Exact(String::new()))
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", update_path().as_str())
        .match_query(Matcher::UrlEncoded(COUNT_KEY.into(), "1".into()))
        .match_header("X-XSRF-Token", "token")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let session = session(&server.url());
    let update = TaskUpdate::new("localhost", TaskId::Int(23), 0.0);
    assert!(session.post_update(&update).await);

    token.assert_async().await;
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_first_use_fetches_a_single_token() {
    let mut server = mockito::Server::new_async().await;
    let token = token_mock(&mut server, 1).await;
    let updates = server
        .mock("POST", update_path().as_str())
        .match_header("X-XSRF-Token", "token")
        .with_status(200)
        .with_body("{}")
        .expect(3)
        .create_async()
        .await;

    let session = session(&server.url());
    let update = TaskUpdate::new("localhost", TaskId::Int(23), 0.0);
    let (a, b, c) = tokio::join!(
        session.post_update(&update),
        session.post_update(&update),
        session.post_update(&update)
    );
    assert!(a && b && c);

    token.assert_async().await;
    updates.assert_async().await;
}

#[tokio::test]
async fn test_update_fails_when_token_endpoint_refuses() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", XSRF_TOKEN_PATH)
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let session = session(&server.url());
    let update = TaskUpdate::new("localhost", TaskId::Int(23), 0.0);
    assert!(!session.post_update(&update).await);
    assert!(session.token().is_none());
    token.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_rejections_of_a_stale_token_refresh_once() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", XSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"xsrf_token": "fresh"}"#)
        .expect(1)
        .create_async()
        .await;
    let rejected = server
        .mock("POST", update_path().as_str())
        .match_query(Matcher::Any)
        .match_header("X-XSRF-Token", "stale")
        .with_status(403)
        .expect(3)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", update_path().as_str())
        .match_query(Matcher::Any)
        .match_header("X-XSRF-Token", "fresh")
        .with_status(200)
        .with_body("{}")
        .expect(3)
        .create_async()
        .await;

    let session = session(&server.url()).with_token("stale");
    let update = TaskUpdate::new("localhost", TaskId::Int(23), 0.0);
    let (a, b, c) = tokio::join!(
        session.post_update(&update),
        session.post_update(&update),
        session.post_update(&update)
    );
    assert!(a && b && c);
    assert_eq!(session.token().as_deref(), Some("fresh"));

    token.assert_async().await;
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_cookies_set_by_the_server_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cookies.json");
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("GET", "/login")
        .with_status(200)
        .with_header("set-cookie", "sid=abc123; Max-Age=3600; Path=/")
        .expect(1)
        .create_async()
        .await;
    let whoami = server
        .mock("GET", "/whoami")
        .match_header("cookie", "sid=abc123")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let opts = RequestOptions {
        max_attempts: Some(1),
        ..RequestOptions::default()
    };

    let first = HttpService::with_cookie_jar(
        &server.url(),
        &HttpConfig::default(),
        "taskbot-test",
        CookieJar::load(&path),
    )
    .unwrap();
    first.request("/login", None, &opts, None).await.unwrap();
    assert_eq!(first.cookies().len(), 1);
    first.cookies().save().unwrap();
    drop(first);

    let second = HttpService::with_cookie_jar(
        &server.url(),
        &HttpConfig::default(),
        "taskbot-test",
        CookieJar::load(&path),
    )
    .unwrap();
    second.request("/whoami", None, &opts, None).await.unwrap();

    login.assert_async().await;
    whoami.assert_async().await;
}
