pub mod cli;
pub mod task_runner;
