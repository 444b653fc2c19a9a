//! Resilient HTTP client behavior against a mock server.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockito::Matcher;
use serde_json::json;

use taskbot_core::config::HttpConfig;
use taskbot_core::errors::NetError;
use taskbot_core::net::{
    Authenticator, Credential, FixedBackoff, HttpService, RequestOptions, COUNT_KEY,
};

fn service(base: &str, backoff: Duration) -> HttpService {
    HttpService::new(base, &HttpConfig::default(), "taskbot-test")
        .unwrap()
        .with_backoff(Arc::new(FixedBackoff(backoff)))
}

fn no_query() -> Matcher {
    Matcher::Exact(String::new())
}

fn attempt(n: u32) -> Matcher {
    Matcher::UrlEncoded(COUNT_KEY.into(), n.to_string())
}

/// Hands out `X-Test-Token`, swapping "stale" for "fresh" on authenticate.
struct TokenAuth {
    token: Mutex<String>,
    calls: AtomicUsize,
    succeed: bool,
}

impl TokenAuth {
    fn new(succeed: bool) -> Self {
        Self {
            token: Mutex::new("stale".into()),
            calls: AtomicUsize::new(0),
            succeed,
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuth {
    fn credential(&self) -> Option<Credential> {
        Some(Credential {
            header: "X-Test-Token".into(),
            value: self.token.lock().unwrap().clone(),
        })
    }

    async fn authenticate(&self, rejected: Option<&Credential>) -> bool {
        assert_eq!(rejected.map(|c| c.value.as_str()), Some("stale"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().unwrap() = "fresh".into();
        self.succeed
    }
}

#[tokio::test]
async fn test_get_returns_body_on_first_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/hello")
        .match_query(no_query())
        .with_status(200)
        .with_body("world")
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let resp = svc
        .request("/hello", None, &RequestOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "world");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_sends_json_body_and_extra_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/echo")
        .match_header("content-type", "application/json")
        .match_header("X-Extra", "1")
        .match_body(Matcher::Json(json!({"a": 1})))
        .with_status(200)
        .with_body(r#"{"ok": true}"#)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let opts = RequestOptions::default().header("X-Extra", "1");
    let resp = svc
        .request("/echo", Some(&json!({"a": 1})), &opts, None)
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body, json!({"ok": true}));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_retried_with_attempt_counter() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/flaky")
        .match_query(no_query())
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/flaky")
        .match_query(attempt(1))
        .with_status(200)
        .with_body("done")
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::from_millis(10));
    let resp = svc
        .request("/flaky", None, &RequestOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(resp.text(), "done");
    failing.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_404_is_fatal_by_default() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let err = svc
        .request("/missing", None, &RequestOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::Rejected { status: 404 }), "{err:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_404_is_retried_when_enabled() {
    let mut server = mockito::Server::new_async().await;
    let missing = server
        .mock("GET", "/eventually")
        .match_query(no_query())
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let found = server
        .mock("GET", "/eventually")
        .match_query(attempt(1))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let opts = RequestOptions {
        retry_404: true,
        ..RequestOptions::default()
    };
    svc.request("/eventually", None, &opts, None).await.unwrap();
    missing.assert_async().await;
    found.assert_async().await;
}

#[tokio::test]
async fn test_5xx_is_fatal_when_disabled() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/down")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let opts = RequestOptions {
        retry_5xx: false,
        ..RequestOptions::default()
    };
    let err = svc.request("/down", None, &opts, None).await.unwrap_err();
    assert!(matches!(err, NetError::Rejected { status: 500 }), "{err:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_exhausted_after_max_attempts() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/down")
        .match_query(Matcher::Any)
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::from_millis(5));
    let opts = RequestOptions {
        max_attempts: Some(3),
        ..RequestOptions::default()
    };
    let err = svc.request("/down", None, &opts, None).await.unwrap_err();
    match err {
        NetError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.and_then(|e| e.status()), Some(502));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_failures_are_retried_until_exhausted() {
    // Nothing listens on the discard port.
    let svc = service("http://127.0.0.1:9", Duration::from_millis(5));
    let opts = RequestOptions {
        max_attempts: Some(2),
        ..RequestOptions::default()
    };
    let err = svc.request("/x", None, &opts, None).await.unwrap_err();
    match err {
        NetError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.is_some_and(|e| e.is_transient()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_absolute_url_bypasses_base() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/data.zip")
        .with_status(200)
        .with_body("zip")
        .create_async()
        .await;

    let svc = service("http://127.0.0.1:9", Duration::ZERO);
    let url = format!("{}/data.zip", server.url());
    let resp = svc
        .request(&url, None, &RequestOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(resp.text(), "zip");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_403_reauthenticates_once_and_retries_without_sleeping() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("GET", "/secure")
        .match_header("X-Test-Token", "stale")
        .match_query(no_query())
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/secure")
        .match_header("X-Test-Token", "fresh")
        .match_query(attempt(1))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    // A regular retry would sleep far longer than the test allows.
    let svc = service(&server.url(), Duration::from_secs(60));
    let auth = TokenAuth::new(true);
    let opts = RequestOptions::default();
    let call = svc.request("/secure", None, &opts, Some(&auth));
    let resp = tokio::time::timeout(Duration::from_secs(10), call)
        .await
        .expect("retry after authentication must not sleep")
        .unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_second_credential_rejection_aborts() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/secure")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let auth = TokenAuth::new(true);
    let err = svc
        .request("/secure", None, &RequestOptions::default(), Some(&auth))
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::Unauthenticated { status: 401 }), "{err:?}");
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_authentication_aborts_immediately() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/secure")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let svc = service(&server.url(), Duration::ZERO);
    let auth = TokenAuth::new(false);
    let err = svc
        .request("/secure", None, &RequestOptions::default(), Some(&auth))
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::Unauthenticated { status: 403 }), "{err:?}");
    mock.assert_async().await;
}
