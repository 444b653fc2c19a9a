use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ManifestError;

fn default_grace_period() -> f64 {
    30.0
}

/// Server-assigned task identifier; numeric or opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Int(i64),
    Str(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Int(id) => write!(f, "{id}"),
            TaskId::Str(id) => f.write_str(id),
        }
    }
}

/// An archive to fetch and extract before running; `[url, name]` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub url: String,
    pub name: String,
}

/// Everything needed to run one task, as read from the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetails {
    pub bot_id: String,
    pub command: Vec<String>,

    #[serde(default)]
    pub data: Vec<DataSource>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Seconds between the terminate and the kill signal.
    #[serde(default = "default_grace_period")]
    pub grace_period: f64,

    /// Wall clock budget from process start; `0` or absent means none.
    #[serde(default)]
    pub hard_timeout: Option<f64>,

    /// Longest allowed gap without output; `0` or absent means none.
    #[serde(default)]
    pub io_timeout: Option<f64>,

    pub task_id: TaskId,
}

impl TaskDetails {
    pub fn from_json(s: &str) -> Result<Self, ManifestError> {
        let details: TaskDetails = serde_json::from_str(s).map_err(ManifestError::Parse)?;
        details.validate()?;
        Ok(details)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let s = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&s)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.command.is_empty() {
            return Err(ManifestError::Invalid("command is empty".into()));
        }
        let checks = [
            ("grace_period", Some(self.grace_period)),
            ("hard_timeout", self.hard_timeout),
            ("io_timeout", self.io_timeout),
        ];
        for (name, value) in checks {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ManifestError::Invalid(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn hard_timeout(&self) -> Option<Duration> {
        deadline(self.hard_timeout)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        deadline(self.io_timeout)
    }

    pub fn grace_period(&self) -> Duration {
        saturating_secs(self.grace_period)
    }
}

fn deadline(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| *s > 0.0).map(saturating_secs)
}

/// Values too large for a `Duration` saturate; `validate` rules out the rest.
fn saturating_secs(secs: f64) -> Duration {
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
