use async_trait::async_trait;
use base64::Engine as _;
use serde::{Serialize, Serializer};

use crate::task::TaskId;

/// One progress report sent to the server while a task runs.
///
/// The first update carries only `id`, `task_id` and `cost_usd`; the final one
/// adds the exit fields. `output` is sent as standard base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskUpdate {
    pub id: String,
    pub task_id: TaskId,
    pub cost_usd: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_timeout: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout: Option<bool>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_output"
    )]
    pub output: Option<Vec<u8>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_chunk_start: Option<u64>,
}

impl TaskUpdate {
    pub fn new(id: impl Into<String>, task_id: TaskId, cost_usd: f64) -> Self {
        Self {
            id: id.into(),
            task_id,
            cost_usd,
            duration: None,
            exit_code: None,
            hard_timeout: None,
            io_timeout: None,
            output: None,
            output_chunk_start: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.exit_code.is_some()
    }
}

fn serialize_output<S: Serializer>(output: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match output {
        Some(bytes) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
        None => s.serialize_none(),
    }
}

/// Destination of task updates.
#[async_trait]
pub trait TaskUpdateSink: Send + Sync {
    /// Returns whether the server accepted the update.
    async fn post_update(&self, update: &TaskUpdate) -> bool;
}
