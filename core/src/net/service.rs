use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::HttpConfig;
use crate::errors::NetError;

use super::cookies::CookieJar;
use super::retry::{Backoff, JitteredBackoff, RetryLoop};

/// Query parameter carrying the attempt index on retried requests.
pub const COUNT_KEY: &str = "UrlOpenAttempt";

const SNIPPET_LEN: usize = 256;

/// Per-call policy of [`HttpService::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub retry_404: bool,
    pub retry_5xx: bool,
    /// Bound on a single attempt, connect to last body byte.
    pub read_timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl RequestOptions {
    pub fn from_config(cfg: &HttpConfig) -> Self {
        Self {
            max_attempts: Some(cfg.max_attempts),
            timeout: Some(Duration::from_secs(cfg.timeout_secs)),
            retry_404: false,
            retry_5xx: true,
            read_timeout: cfg.read_timeout_secs.map(Duration::from_secs),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn retryable(&self, status: u16) -> bool {
        (status >= 500 && self.retry_5xx) || (status == 404 && self.retry_404)
    }

    /// HTTP errors follow the status policy; anything else retries when
    /// transient.
    fn should_retry(&self, err: &NetError) -> bool {
        match err {
            NetError::Http { status, .. } => self.retryable(*status),
            other => other.is_transient(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(NetError::Decode)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A header attached to requests on behalf of an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub header: String,
    pub value: String,
}

/// Source of request credentials, consulted on every attempt.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn credential(&self) -> Option<Credential>;

    /// Called once per logical call after a 401/403. `rejected` is the
    /// credential the server refused. Returns whether retrying makes sense.
    async fn authenticate(&self, rejected: Option<&Credential>) -> bool;
}

/// HTTP client bound to one server, retrying transient failures.
pub struct HttpService {
    base_url: Url,
    client: reqwest::Client,
    backoff: Arc<dyn Backoff>,
    cookies: CookieJar,
}

impl HttpService {
    pub fn new(base_url: &str, cfg: &HttpConfig, user_agent: &str) -> Result<Self, NetError> {
        Self::with_cookie_jar(base_url, cfg, user_agent, CookieJar::in_memory())
    }

    /// Like [`HttpService::new`], keeping cookies in `cookies`.
    pub fn with_cookie_jar(
        base_url: &str,
        cfg: &HttpConfig,
        user_agent: &str,
        cookies: CookieJar,
    ) -> Result<Self, NetError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| NetError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .cookie_provider(cookies.provider())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| NetError::Connection(e.to_string()))?;
        Ok(Self {
            base_url,
            client,
            backoff: Arc::new(JitteredBackoff::default()),
            cookies,
        })
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Replaces the inter-attempt delay strategy.
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Resolves `path` against the base URL; absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> Result<Url, NetError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
        };
        Url::parse(&raw).map_err(|e| NetError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Performs one logical request: POST with a JSON body when `body` is
    /// given, GET otherwise.
    pub async fn request(
        &self,
        path: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
        auth: Option<&dyn Authenticator>,
    ) -> Result<HttpResponse, NetError> {
        let url = self.url_for(path)?;
        let mut retry = RetryLoop::with_backoff(opts.max_attempts, opts.timeout, self.backoff.clone());
        let mut authenticated = false;
        let mut last: Option<NetError> = None;

        while let Some(attempt) = retry.next().await {
            let mut attempt_url = url.clone();
            if attempt.attempt > 0 {
                attempt_url
                    .query_pairs_mut()
                    .append_pair(COUNT_KEY, &attempt.attempt.to_string());
            }
            let credential = auth.and_then(|a| a.credential());
            let timeout = match (opts.read_timeout, attempt.remaining) {
                (Some(read), Some(left)) => Some(read.min(left)),
                (read, left) => read.or(left),
            };

            let err = match self
                .send_once(attempt_url, body, opts, credential.as_ref(), timeout)
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            let retryable = opts.should_retry(&err);
            match err {
                NetError::Http { status, .. } if status == 401 || status == 403 => {
                    let Some(auth) = auth else {
                        return Err(NetError::Unauthenticated { status });
                    };
                    if authenticated {
                        tracing::error!(target: "taskbot.net", url = %url, status, "rejected after re-authentication");
                        return Err(NetError::Unauthenticated { status });
                    }
                    authenticated = true;
                    tracing::info!(target: "taskbot.net", url = %url, status, "credentials rejected, re-authenticating");
                    if !auth.authenticate(credential.as_ref()).await {
                        return Err(NetError::Unauthenticated { status });
                    }
                    attempt.skip_sleep = true;
                    last = Some(err);
                }
                _ if retryable => {
                    tracing::warn!(
                        target: "taskbot.net",
                        url = %url,
                        attempt = attempt.attempt,
                        status = ?err.status(),
                        error = %err,
                        "request failed, will retry"
                    );
                    last = Some(err);
                }
                NetError::Http { status, body_snippet } => {
                    tracing::error!(target: "taskbot.net", url = %url, status, body = %body_snippet, "request rejected");
                    return Err(NetError::Rejected { status });
                }
                other => return Err(other),
            }
        }

        let attempts = retry.attempts();
        tracing::error!(
            target: "taskbot.net",
            url = %url,
            attempts,
            last = last.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "no response"
        );
        Err(NetError::Exhausted {
            attempts,
            last: last.map(Box::new),
        })
    }

    async fn send_once(
        &self,
        url: Url,
        body: Option<&Value>,
        opts: &RequestOptions,
        credential: Option<&Credential>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, NetError> {
        let mut req = match body {
            Some(body) => self.client.post(url).json(body),
            None => self.client.get(url),
        };
        for (name, value) in &opts.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(c) = credential {
            req = req.header(c.header.as_str(), c.value.as_str());
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await.map_err(NetError::from_reqwest)?;
        let status = resp.status();
        // Read the body inside the attempt so a stalled read is retried too.
        let body = resp.bytes().await.map_err(NetError::from_reqwest)?;
        if status.is_success() {
            return Ok(HttpResponse {
                status: status.as_u16(),
                body,
            });
        }
        Err(NetError::Http {
            status: status.as_u16(),
            body_snippet: snippet(&body),
        })
    }
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(SNIPPET_LEN).collect()
}
