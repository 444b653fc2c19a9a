//! Task manifests, data staging and the top-level run entry point.

mod details;
mod load;
mod staging;

pub use details::{DataSource, TaskDetails, TaskId};
pub use load::{load_and_run, LoadAndRunArgs};
pub use staging::{extract_archive, stage_data};
