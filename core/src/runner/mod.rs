//! Process supervision: spawning, deadlines, escalation and progress reports.

pub mod exit;
mod output;
mod process;
mod supervisor;
mod update;

pub use exit::{normalize_exit, FORCED_KILL_EXIT_CODE};
pub use output::OutputAccumulator;
pub use process::{spawn_command, ChildProcess, ProcessTree, SpawnedCommand};
pub use supervisor::{run_command, run_process, RunCommandArgs};
pub use update::{TaskUpdate, TaskUpdateSink};
