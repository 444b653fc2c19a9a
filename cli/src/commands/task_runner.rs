use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use taskbot_core::api::{
    load_and_run, AppConfig, AuthSession, CookieJar, HttpService, LoadAndRunArgs, RequestOptions,
    TASK_FAILED,
};

use super::cli::TaskRunnerArgs;

/// Runs one task and maps the outcome to the process exit status.
pub async fn run(args: TaskRunnerArgs, config: &AppConfig) -> anyhow::Result<i32> {
    let server = args.server.as_deref().unwrap_or(&config.server.url);
    let start = accepted_at(args.start)?;

    let cookies = match &config.server.cookie_file {
        Some(path) => CookieJar::load(path),
        None => CookieJar::in_memory(),
    };
    let service =
        HttpService::with_cookie_jar(server, &config.http, &config.server.user_agent, cookies)
            .with_context(|| format!("invalid server url {server}"))?;
    let session = AuthSession::new(service, RequestOptions::from_config(&config.http));

    tracing::info!(
        target: "taskbot.task",
        server = %server,
        manifest = %args.file.display(),
        work_dir = %config.runner.work_dir.display(),
        "starting task runner"
    );

    let ok = load_and_run(LoadAndRunArgs {
        manifest: &args.file,
        session: &session,
        work_dir: &config.runner.work_dir,
        cost_usd_hour: args.cost_usd_hour,
        start,
        summary_file: args.json_file.as_deref(),
        config,
    })
    .await;

    if let Err(e) = session.service().cookies().save() {
        tracing::warn!(target: "taskbot.net", error = %e, "unable to save cookies");
    }
    Ok(if ok { 0 } else { TASK_FAILED })
}

fn accepted_at(start: Option<f64>) -> anyhow::Result<SystemTime> {
    match start {
        None => Ok(SystemTime::now()),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|offset| UNIX_EPOCH.checked_add(offset))
            .with_context(|| format!("--start is out of range: {secs}")),
        Some(secs) => bail!("--start must be a non-negative epoch timestamp, got {secs}"),
    }
}
