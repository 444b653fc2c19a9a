use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SupervisorConfig;
use crate::errors::SpawnError;
use crate::task::{TaskDetails, TaskId};

use super::exit::FORCED_KILL_EXIT_CODE;
use super::output::OutputAccumulator;
use super::process::{spawn_command, ProcessTree};
use super::update::{TaskUpdate, TaskUpdateSink};

/// Upper bound on waiting for a process after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(10);
/// Upper bound on reading leftover output once the process is gone.
const DRAIN_LIMIT: Duration = Duration::from_secs(5);
/// Deadlines fire once strictly exceeded, so waits end just past them.
const PAST_DEADLINE: Duration = Duration::from_millis(1);

pub struct RunCommandArgs<'a> {
    pub sink: &'a dyn TaskUpdateSink,
    pub details: &'a TaskDetails,
    pub work_dir: &'a Path,
    pub cost_usd_hour: f64,
    /// Wall clock time the task was accepted; cost is counted from here.
    pub start: SystemTime,
    pub summary_file: Option<&'a Path>,
    pub config: &'a SupervisorConfig,
}

/// Runs the task command to completion and reports it. Returns the exit code.
pub async fn run_command(args: RunCommandArgs<'_>) -> i32 {
    let details = args.details;
    match spawn_command(&details.command, &details.env, args.work_dir) {
        Ok(spawned) => run_process(spawned.process, spawned.output, &args).await,
        Err(err) => report_spawn_failure(&args, err).await,
    }
}

/// Supervises an already started process whose merged output arrives on
/// `output`.
pub async fn run_process<P: ProcessTree>(
    mut process: P,
    output: mpsc::Receiver<Vec<u8>>,
    args: &RunCommandArgs<'_>,
) -> i32 {
    let details = args.details;
    let poll = args.config.poll_interval();
    let hard = details.hard_timeout();
    let io = details.io_timeout();

    let mut reporter = Reporter::new(args);
    reporter.send_initial().await;

    let mut stream = OutputStream::new(output);
    let mut acc = OutputAccumulator::new();
    let started = reporter.started;
    let mut last_io = started;
    let mut had_hard_timeout = false;
    let mut had_io_timeout = false;

    let exit_code = loop {
        let now = Instant::now();
        let mut wait = poll;
        if let Some(deadline) = hard.and_then(|hard| started.checked_add(hard)) {
            wait = wait.min(until(deadline, now));
        }
        if let Some(deadline) = io.and_then(|io| last_io.checked_add(io)) {
            wait = wait.min(until(deadline, now));
        }
        if let Some(chunk) = stream.next(wait).await {
            acc.push(&chunk);
            last_io = Instant::now();
        }

        let now = Instant::now();
        if hard.is_some_and(|hard| now.duration_since(started) > hard) {
            had_hard_timeout = true;
        } else if io.is_some_and(|io| now.duration_since(last_io) > io) {
            had_io_timeout = true;
        }
        if had_hard_timeout || had_io_timeout {
            tracing::warn!(
                target: "taskbot.supervisor",
                task_id = %details.task_id,
                hard_timeout = had_hard_timeout,
                io_timeout = had_io_timeout,
                elapsed_secs = now.duration_since(started).as_secs_f64(),
                "task timed out, terminating"
            );
            reporter.send_progress(&mut acc).await;
            break terminate(&mut process, &mut stream, &mut acc, &mut reporter).await;
        }

        match process.try_exit_code() {
            Ok(Some(code)) => break code,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(target: "taskbot.supervisor", task_id = %details.task_id, error = %e, "unable to poll process");
                if let Err(e) = process.force_kill() {
                    tracing::error!(target: "taskbot.supervisor", task_id = %details.task_id, error = %e, "kill failed");
                }
                break FORCED_KILL_EXIT_CODE;
            }
        }
        reporter.maybe_report(&mut acc).await;
    };

    drain(&mut stream, &mut acc, poll).await;
    tracing::info!(
        target: "taskbot.supervisor",
        task_id = %details.task_id,
        exit_code,
        hard_timeout = had_hard_timeout,
        io_timeout = had_io_timeout,
        output_bytes = acc.total(),
        "task finished"
    );
    reporter
        .send_final(&mut acc, exit_code, had_hard_timeout, had_io_timeout)
        .await;
    exit_code
}

/// Graceful termination, then a forced kill once the grace period is over.
async fn terminate<P: ProcessTree>(
    process: &mut P,
    stream: &mut OutputStream,
    acc: &mut OutputAccumulator,
    reporter: &mut Reporter<'_>,
) -> i32 {
    let task_id = reporter.task_id;
    let poll = reporter.config.poll_interval();
    if let Err(e) = process.terminate_gracefully() {
        tracing::warn!(target: "taskbot.supervisor", task_id = %task_id, error = %e, "terminate signal failed");
    }

    // An unrepresentable grace period waits for the process indefinitely.
    let deadline = Instant::now().checked_add(reporter.grace_period);
    loop {
        match process.try_exit_code() {
            Ok(Some(code)) => return code,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "taskbot.supervisor", task_id = %task_id, error = %e, "unable to poll process");
                break;
            }
        }
        let now = Instant::now();
        let wait = match deadline {
            Some(deadline) if now >= deadline => break,
            Some(deadline) => poll.min(deadline - now),
            None => poll,
        };
        if let Some(chunk) = stream.next(wait).await {
            acc.push(&chunk);
        }
        reporter.maybe_report(acc).await;
    }

    tracing::warn!(target: "taskbot.supervisor", task_id = %task_id, "grace period elapsed, killing");
    if let Err(e) = process.force_kill() {
        tracing::error!(target: "taskbot.supervisor", task_id = %task_id, error = %e, "kill failed");
    }
    let deadline = Instant::now() + KILL_WAIT;
    loop {
        if let Ok(Some(code)) = process.try_exit_code() {
            return code;
        }
        if Instant::now() >= deadline {
            return FORCED_KILL_EXIT_CODE;
        }
        if let Some(chunk) = stream.next(poll).await {
            acc.push(&chunk);
        }
    }
}

/// Reads what is left in the pipes until they close or stay idle for one
/// poll interval.
async fn drain(stream: &mut OutputStream, acc: &mut OutputAccumulator, poll: Duration) {
    let deadline = Instant::now() + DRAIN_LIMIT;
    while stream.open {
        let wait = poll.min(deadline.saturating_duration_since(Instant::now()));
        if wait.is_zero() {
            break;
        }
        match stream.next(wait).await {
            Some(chunk) => acc.push(&chunk),
            None => break,
        }
    }
}

fn until(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now) + PAST_DEADLINE
}

async fn report_spawn_failure(args: &RunCommandArgs<'_>, err: SpawnError) -> i32 {
    let reason = match &err {
        SpawnError::Os { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    tracing::error!(
        target: "taskbot.supervisor",
        task_id = %args.details.task_id,
        error = %err,
        "command failed to start"
    );

    let mut reporter = Reporter::new(args);
    reporter.send_initial().await;
    let mut acc = OutputAccumulator::new();
    let message = format!(
        "Command \"{}\" failed to start.\nError: {}",
        args.details.command.join(" "),
        reason
    );
    acc.push(message.as_bytes());
    reporter.send_final(&mut acc, 1, false, false).await;
    1
}

struct OutputStream {
    rx: mpsc::Receiver<Vec<u8>>,
    open: bool,
}

impl OutputStream {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, open: true }
    }

    /// Waits up to `wait` for the next chunk. Once the channel is closed this
    /// just sleeps, so callers keep their pacing.
    async fn next(&mut self, wait: Duration) -> Option<Vec<u8>> {
        if !self.open {
            tokio::time::sleep(wait).await;
            return None;
        }
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(chunk)) => Some(chunk),
            Ok(None) => {
                self.open = false;
                None
            }
            Err(_) => None,
        }
    }
}

/// Builds and sends updates for one run, tracking cost and report pacing.
struct Reporter<'a> {
    sink: &'a dyn TaskUpdateSink,
    bot_id: &'a str,
    task_id: &'a TaskId,
    cost_usd_hour: f64,
    start: SystemTime,
    summary_file: Option<&'a Path>,
    config: &'a SupervisorConfig,
    grace_period: Duration,
    started: Instant,
    last_report: Instant,
    last_failed: bool,
}

impl<'a> Reporter<'a> {
    fn new(args: &RunCommandArgs<'a>) -> Self {
        let now = Instant::now();
        Self {
            sink: args.sink,
            bot_id: &args.details.bot_id,
            task_id: &args.details.task_id,
            cost_usd_hour: args.cost_usd_hour,
            start: args.start,
            summary_file: args.summary_file,
            config: args.config,
            grace_period: args.details.grace_period(),
            started: now,
            last_report: now,
            last_failed: false,
        }
    }

    fn cost_usd(&self) -> f64 {
        let elapsed = SystemTime::now()
            .duration_since(self.start)
            .unwrap_or_default()
            .as_secs_f64();
        (elapsed * self.cost_usd_hour / 3600.0).max(0.0)
    }

    fn duration(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn base(&self) -> TaskUpdate {
        TaskUpdate::new(self.bot_id, self.task_id.clone(), self.cost_usd())
    }

    async fn post(&mut self, update: &TaskUpdate) -> bool {
        self.last_report = Instant::now();
        let accepted = self.sink.post_update(update).await;
        self.last_failed = !accepted;
        if !accepted {
            tracing::warn!(
                target: "taskbot.supervisor",
                task_id = %self.task_id,
                final_update = update.is_final(),
                "task update failed"
            );
        }
        accepted
    }

    async fn send_initial(&mut self) {
        let update = self.base();
        self.post(&update).await;
    }

    /// Sends the next chunk of pending output (or a bare heartbeat when there
    /// is none). Returns whether the server accepted it.
    async fn send_progress(&mut self, acc: &mut OutputAccumulator) -> bool {
        let chunk = acc.peek(self.config.output_chunk_size).to_vec();
        let len = chunk.len();
        let mut update = TaskUpdate {
            duration: Some(self.duration()),
            ..self.base()
        };
        if len > 0 {
            update.output = Some(chunk);
            update.output_chunk_start = Some(acc.chunk_start());
        }
        let accepted = self.post(&update).await;
        if accepted {
            acc.commit(len);
        }
        accepted
    }

    /// Sends full chunks as they fill up, and smaller backlogs once the report
    /// interval has passed. After a failed update, waits out the interval.
    async fn maybe_report(&mut self, acc: &mut OutputAccumulator) {
        let interval = self.config.report_interval();
        let chunk_size = self.config.output_chunk_size;
        if self.last_failed && self.last_report.elapsed() < interval {
            return;
        }
        while acc.pending_len() >= chunk_size {
            if !self.send_progress(acc).await {
                return;
            }
        }
        if acc.pending_len() > 0 && self.last_report.elapsed() >= interval {
            self.send_progress(acc).await;
        }
    }

    async fn send_final(
        &mut self,
        acc: &mut OutputAccumulator,
        exit_code: i32,
        hard_timeout: bool,
        io_timeout: bool,
    ) {
        let chunk_size = self.config.output_chunk_size;
        while acc.pending_len() > chunk_size {
            if !self.send_progress(acc).await {
                break;
            }
        }

        // Whatever the progress updates could not deliver rides along here.
        let chunk = acc.peek(acc.pending_len()).to_vec();
        let len = chunk.len();
        let duration = self.duration();
        let update = TaskUpdate {
            duration: Some(duration),
            exit_code: Some(exit_code),
            hard_timeout: Some(hard_timeout),
            io_timeout: Some(io_timeout),
            output: Some(chunk),
            output_chunk_start: Some(acc.chunk_start()),
            ..self.base()
        };
        if self.post(&update).await {
            acc.commit(len);
        }

        if let Some(path) = self.summary_file {
            let summary = TaskSummary {
                version: env!("CARGO_PKG_VERSION"),
                task_id: self.task_id,
                exit_code,
                hard_timeout,
                io_timeout,
                duration,
                cost_usd: update.cost_usd,
                output_bytes: acc.total(),
                finished_at: chrono::Utc::now().to_rfc3339(),
            };
            write_summary(path, &summary);
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskSummary<'a> {
    version: &'static str,
    task_id: &'a TaskId,
    exit_code: i32,
    hard_timeout: bool,
    io_timeout: bool,
    duration: f64,
    cost_usd: f64,
    output_bytes: u64,
    finished_at: String,
}

fn write_summary(path: &Path, summary: &TaskSummary<'_>) {
    let result = serde_json::to_vec_pretty(summary)
        .map_err(std::io::Error::other)
        .and_then(|bytes| std::fs::write(path, bytes));
    if let Err(e) = result {
        tracing::warn!(
            target: "taskbot.supervisor",
            path = %path.display(),
            error = %e,
            "unable to write task summary"
        );
    }
}
