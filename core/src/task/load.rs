use std::path::Path;
use std::time::SystemTime;

use crate::config::AppConfig;
use crate::runner::{run_command, RunCommandArgs};
use crate::session::AuthSession;

use super::details::TaskDetails;
use super::staging::stage_data;

pub struct LoadAndRunArgs<'a> {
    pub manifest: &'a Path,
    pub session: &'a AuthSession,
    pub work_dir: &'a Path,
    pub cost_usd_hour: f64,
    pub start: SystemTime,
    pub summary_file: Option<&'a Path>,
    pub config: &'a AppConfig,
}

/// Loads the manifest, stages its data and runs the command, running it
/// again (up to `runner.command_attempts` times in total) while it fails.
///
/// Returns true iff one of the runs exited with 0.
pub async fn load_and_run(args: LoadAndRunArgs<'_>) -> bool {
    let details = match TaskDetails::load(args.manifest) {
        Ok(details) => details,
        Err(e) => {
            tracing::error!(
                target: "taskbot.task",
                manifest = %args.manifest.display(),
                error = %e,
                "unable to load manifest"
            );
            return false;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(args.work_dir).await {
        tracing::error!(
            target: "taskbot.task",
            work_dir = %args.work_dir.display(),
            error = %e,
            "unable to create work dir"
        );
        return false;
    }
    if let Err(e) = stage_data(args.session, &details.data, args.work_dir).await {
        tracing::error!(target: "taskbot.task", task_id = %details.task_id, error = ?e, "data staging failed");
        return false;
    }

    let attempts = args.config.runner.command_attempts.max(1);
    for attempt in 1..=attempts {
        tracing::info!(
            target: "taskbot.task",
            task_id = %details.task_id,
            attempt,
            command = ?details.command,
            "running command"
        );
        let exit_code = run_command(RunCommandArgs {
            sink: args.session,
            details: &details,
            work_dir: args.work_dir,
            cost_usd_hour: args.cost_usd_hour,
            start: args.start,
            summary_file: args.summary_file,
            config: &args.config.supervisor,
        })
        .await;
        if exit_code == 0 {
            return true;
        }
        tracing::warn!(
            target: "taskbot.task",
            task_id = %details.task_id,
            attempt,
            exit_code,
            "command failed"
        );
    }
    false
}
