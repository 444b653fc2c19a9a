//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `taskbot_core::api` instead of reaching into internal modules.

pub use crate::config::{
    load as load_config, AppConfig, HttpConfig, LoggingConfig, RunnerConfig, ServerConfig,
    SupervisorConfig,
};
pub use crate::errors::{ConfigError, ManifestError, NetError, SpawnError, StagingError};
pub use crate::net::{
    Authenticator, Backoff, CookieJar, Credential, FixedBackoff, HttpResponse, HttpService, JitteredBackoff,
    RequestOptions, RetryAttempt, RetryLoop,
};
pub use crate::runner::{
    run_command, run_process, ProcessTree, RunCommandArgs, TaskUpdate, TaskUpdateSink,
};
pub use crate::session::AuthSession;
pub use crate::task::{load_and_run, DataSource, LoadAndRunArgs, TaskDetails, TaskId};

/// Process exit status of the binary when the task did not succeed.
pub const TASK_FAILED: i32 = 89;
