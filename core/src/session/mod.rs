//! Server session carrying an anti-forgery (XSRF) token.
//!
//! The token is fetched lazily on first use and refreshed when the server
//! answers 401/403. Refreshes are single-flight: concurrent callers that hit
//! a rejected token wait for one fetch and reuse its result.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::errors::NetError;
use crate::net::{Authenticator, Credential, HttpResponse, HttpService, RequestOptions};
use crate::runner::{TaskUpdate, TaskUpdateSink};

pub const XSRF_TOKEN_PATH: &str = "/auth/api/v1/accounts/self/xsrf_token";
pub const XSRF_HEADER: &str = "X-XSRF-Token";
pub const XSRF_REQUEST_HEADER: &str = "X-XSRF-Token-Request";
pub const TASK_UPDATE_PATH: &str = "/swarming/api/v1/bot/task_update";

#[derive(Debug, Deserialize)]
struct XsrfTokenResponse {
    xsrf_token: String,
}

pub struct AuthSession {
    service: HttpService,
    options: RequestOptions,
    token: RwLock<Option<String>>,
    refresh: Mutex<()>,
}

impl AuthSession {
    pub fn new(service: HttpService, options: RequestOptions) -> Self {
        Self {
            service,
            options,
            token: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Starts from a token obtained earlier instead of fetching one.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    pub fn service(&self) -> &HttpService {
        &self.service
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Currently cached token, if any.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub async fn request(&self, path: &str, body: Option<&Value>) -> Result<HttpResponse, NetError> {
        self.request_with(path, body, &self.options).await
    }

    /// Sends an authenticated request, fetching a token first if needed.
    pub async fn request_with(
        &self,
        path: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<HttpResponse, NetError> {
        if self.token().is_none() {
            self.refresh_token(None).await?;
        }
        self.service
            .request(path, body, opts, Some(self as &dyn Authenticator))
            .await
    }

    /// Returns a usable token. With `rejected` set, a cached token equal to it
    /// is dropped and a new one fetched; any other cached token is reused.
    async fn refresh_token(&self, rejected: Option<&str>) -> Result<String, NetError> {
        let _guard = self.refresh.lock().await;
        if let Some(current) = self.token() {
            if rejected != Some(current.as_str()) {
                return Ok(current);
            }
            self.set_token(None);
        }

        let opts = self.options.clone().header(XSRF_REQUEST_HEADER, "1");
        let resp = self
            .service
            .request(XSRF_TOKEN_PATH, Some(&json!({})), &opts, None)
            .await?;
        let parsed: XsrfTokenResponse = resp.json()?;
        tracing::debug!(target: "taskbot.session", "fetched xsrf token");
        self.set_token(Some(parsed.xsrf_token.clone()));
        Ok(parsed.xsrf_token)
    }
}

#[async_trait]
impl Authenticator for AuthSession {
    fn credential(&self) -> Option<Credential> {
        self.token().map(|value| Credential {
            header: XSRF_HEADER.to_string(),
            value,
        })
    }

    async fn authenticate(&self, rejected: Option<&Credential>) -> bool {
        match self.refresh_token(rejected.map(|c| c.value.as_str())).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(target: "taskbot.session", error = %e, "unable to refresh xsrf token");
                false
            }
        }
    }
}

#[async_trait]
impl TaskUpdateSink for AuthSession {
    async fn post_update(&self, update: &TaskUpdate) -> bool {
        let path = format!("{TASK_UPDATE_PATH}/{}", update.task_id);
        let body = match serde_json::to_value(update) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(target: "taskbot.session", error = %e, "unable to encode task update");
                return false;
            }
        };
        match self.request(&path, Some(&body)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    target: "taskbot.session",
                    task_id = %update.task_id,
                    error = %e,
                    "task update not accepted"
                );
                false
            }
        }
    }
}
