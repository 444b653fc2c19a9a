use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// File persisting server cookies across runs; in memory when unset.
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

fn default_server_url() -> String {
    "https://localhost".to_string()
}

fn default_user_agent() -> String {
    concat!("taskbot/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            user_agent: default_user_agent(),
            cookie_file: None,
        }
    }
}

/// Defaults for the resilient HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_timeout_secs() -> u64 {
    360
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            read_timeout_secs: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Tuning of the process supervisor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Upper bound of a single wait for output, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum spacing of intermediate updates that carry small outputs.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: f64,

    /// Pending output size that forces an update; also the per-update cap.
    #[serde(default = "default_output_chunk_size")]
    pub output_chunk_size: usize,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_report_interval_secs() -> f64 {
    10.0
}

fn default_output_chunk_size() -> usize {
    100 * 1024
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.report_interval_secs.max(0.0))
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            report_interval_secs: default_report_interval_secs(),
            output_chunk_size: default_output_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Whole-command attempts; the second one absorbs rare flaky failures.
    #[serde(default = "default_command_attempts")]
    pub command_attempts: u32,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_command_attempts() -> u32 {
    2
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            command_attempts: default_command_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}
