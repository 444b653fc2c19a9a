use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::errors::SpawnError;

use super::exit::normalize_exit;

const READ_BUF_SIZE: usize = 16 * 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Control over a running command and everything it spawned.
pub trait ProcessTree: Send {
    /// Asks the whole tree to exit (SIGTERM to the process group on POSIX).
    fn terminate_gracefully(&mut self) -> io::Result<()>;

    /// Kills the whole tree unconditionally.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Non-blocking exit check; `Some` holds the normalized exit code.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;
}

/// A spawned command, leader of its own process group on POSIX.
pub struct ChildProcess {
    child: Child,
    #[cfg_attr(not(unix), allow(dead_code))]
    pid: Option<u32>,
}

impl ChildProcess {
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // The group is already gone.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}

impl ProcessTree for ChildProcess {
    fn terminate_gracefully(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn force_kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(normalize_exit))
    }
}

pub struct SpawnedCommand {
    pub process: ChildProcess,
    /// Merged stdout and stderr, in arrival order. Closes once both pipes do.
    pub output: mpsc::Receiver<Vec<u8>>,
}

/// Starts `argv` in `work_dir` with `env` overlaid on the current environment.
pub fn spawn_command(
    argv: &[String],
    env: &BTreeMap<String, String>,
    work_dir: &Path,
) -> Result<SpawnedCommand, SpawnError> {
    let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| SpawnError::Os {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    tracing::debug!(target: "taskbot.supervisor", program = %program, pid = ?pid, "spawned");

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, tx.clone(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, tx, "stderr"));
    }

    Ok(SpawnedCommand {
        process: ChildProcess { child, pid },
        output: rx,
    })
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, stream: &'static str) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(target: "taskbot.supervisor", stream, error = %e, "output read failed");
                break;
            }
        }
    }
}
