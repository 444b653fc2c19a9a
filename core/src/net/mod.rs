pub mod cookies;
pub mod retry;
pub mod service;

pub use cookies::CookieJar;
pub use retry::{Backoff, FixedBackoff, JitteredBackoff, RetryAttempt, RetryLoop, MAX_SLEEP};
pub use service::{
    Authenticator, Credential, HttpResponse, HttpService, RequestOptions, COUNT_KEY,
};
