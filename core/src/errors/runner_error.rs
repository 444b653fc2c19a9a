// core/src/errors/runner_error.rs
use thiserror::Error;

/// Failure to start the task command. The supervisor turns this into a
/// synthetic failed run; it never escapes `run_command`.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn process: {program}")]
    Os {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
