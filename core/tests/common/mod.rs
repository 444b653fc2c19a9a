#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use taskbot_core::config::SupervisorConfig;
use taskbot_core::runner::{ProcessTree, TaskUpdate, TaskUpdateSink, FORCED_KILL_EXIT_CODE};
use taskbot_core::task::{TaskDetails, TaskId};

/// Keeps every update it receives; rejects the calls listed in `reject`.
#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<TaskUpdate>>,
    pub reject: Vec<usize>,
}

impl RecordingSink {
    pub fn rejecting(calls: &[usize]) -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            reject: calls.to_vec(),
        }
    }

    pub fn updates(&self) -> Vec<TaskUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskUpdateSink for RecordingSink {
    async fn post_update(&self, update: &TaskUpdate) -> bool {
        let mut updates = self.updates.lock().unwrap();
        let call = updates.len();
        updates.push(update.clone());
        !self.reject.contains(&call)
    }
}

/// Output carried by `updates`, concatenated in order.
pub fn output_of(updates: &[TaskUpdate]) -> Vec<u8> {
    updates
        .iter()
        .filter_map(|u| u.output.clone())
        .flatten()
        .collect()
}

/// Scripted stand-in for a process tree, driven by tokio's clock.
pub struct FakeProcess {
    pub exit_at: Option<Instant>,
    pub exit_code: i32,
    /// Exit code used when the process honors the terminate request.
    pub on_terminate: Option<i32>,
    pub terminated_at: Arc<Mutex<Option<Instant>>>,
    pub killed_at: Arc<Mutex<Option<Instant>>>,
    /// Makes every status poll and kill request fail.
    pub broken: bool,
}

impl FakeProcess {
    pub fn exits_at(at: Instant, code: i32) -> Self {
        Self {
            exit_at: Some(at),
            exit_code: code,
            on_terminate: None,
            terminated_at: Arc::default(),
            killed_at: Arc::default(),
            broken: false,
        }
    }

    pub fn hangs() -> Self {
        Self {
            exit_at: None,
            exit_code: 0,
            on_terminate: None,
            terminated_at: Arc::default(),
            killed_at: Arc::default(),
            broken: false,
        }
    }
}

impl ProcessTree for FakeProcess {
    fn terminate_gracefully(&mut self) -> io::Result<()> {
        *self.terminated_at.lock().unwrap() = Some(Instant::now());
        if let Some(code) = self.on_terminate {
            self.exit_at = Some(Instant::now());
            self.exit_code = code;
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        *self.killed_at.lock().unwrap() = Some(Instant::now());
        if self.broken {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.exit_at = Some(Instant::now());
        self.exit_code = FORCED_KILL_EXIT_CODE;
        Ok(())
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        if self.broken {
            return Err(io::Error::other("wait failed"));
        }
        Ok(self
            .exit_at
            .filter(|at| Instant::now() >= *at)
            .map(|_| self.exit_code))
    }
}

pub fn details(command: &[&str], hard: f64, io: f64, grace: f64) -> TaskDetails {
    TaskDetails {
        bot_id: "localhost".into(),
        command: command.iter().map(|s| s.to_string()).collect(),
        data: Vec::new(),
        env: BTreeMap::new(),
        grace_period: grace,
        hard_timeout: Some(hard),
        io_timeout: Some(io),
        task_id: TaskId::Int(23),
    }
}

pub fn sh(script: &str, hard: f64, io: f64, grace: f64) -> TaskDetails {
    details(&["sh", "-c", script], hard, io, grace)
}

pub fn supervisor_config(chunk_size: usize) -> SupervisorConfig {
    SupervisorConfig {
        poll_interval_ms: 20,
        report_interval_secs: 10.0,
        output_chunk_size: chunk_size,
    }
}
