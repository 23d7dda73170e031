//! Worker launchers: process-per-round and thread-per-round isolation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::{execute, WorkerLauncher, WorkerRequest, WorkerResponse};
use crate::{Error, Result};

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "subset-worker";

/// Lines of worker stderr kept in [`Error::WorkerFailed`].
const STDERR_TAIL_LINES: usize = 20;

/// One fresh OS process per round.
///
/// The request is written to the worker's stdin as JSON and stdin is closed;
/// the worker answers with one JSON response on stdout and exits. The wait is
/// bounded: on timeout the child is killed (`kill_on_drop`) and the round
/// fails with [`Error::WorkerTimeout`].
pub struct ProcessLauncher {
    program: PathBuf,
    timeout: Duration,
    runtime: Runtime,
}

impl ProcessLauncher {
    /// Launcher for the worker at `program`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the supervising runtime cannot start.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            program: program.into(),
            timeout,
            runtime,
        })
    }

    /// `subset-worker` next to the running executable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the current executable cannot be located.
    pub fn default_program() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        Ok(exe.with_file_name(format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX)))
    }

    /// Worker program path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Bounded wait per round.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, payload: Vec<u8>) -> Result<WorkerResponse> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerFailed {
                status: format!("spawn failed: {e}"),
                stderr: String::new(),
            })?;
        let pid = child.id();
        debug!(?pid, program = %self.program.display(), "worker spawned");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("worker stdin was not captured".to_string()))?;

        let round = async move {
            let write = async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            // A worker that dies before reading surfaces through its exit status.
            if let Err(e) = written {
                debug!(error = %e, "writing worker request failed");
            }
            output
        };

        let output = match tokio::time::timeout(self.timeout, round).await {
            Ok(output) => output.map_err(|e| Error::WorkerFailed {
                status: format!("wait failed: {e}"),
                stderr: String::new(),
            })?,
            Err(_) => {
                warn!(?pid, timeout = ?self.timeout, "worker timed out; killed");
                return Err(Error::WorkerTimeout(self.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(target: "subset_worker", "{line}");
        }

        if !output.status.success() {
            return Err(Error::WorkerFailed {
                status: output.status.to_string(),
                stderr: tail(&stderr),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| Error::WorkerFailed {
            status: format!("malformed response: {e}"),
            stderr: tail(&stderr),
        })
    }
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl WorkerLauncher for ProcessLauncher {
    fn run(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let kind = request.kind();
        let payload = serde_json::to_vec(&request)?;
        drop(request);
        let response = self.runtime.block_on(self.exchange(payload))?;
        info!(kind, response = response.kind(), "worker process finished");
        Ok(response)
    }
}

/// One dedicated OS thread per round.
///
/// The model lives only on the worker thread and is dropped when it exits.
/// On timeout the thread cannot be killed: it is detached, its eventual
/// result discarded, and the round fails with [`Error::WorkerTimeout`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadLauncher {
    timeout: Duration,
}

impl ThreadLauncher {
    /// Launcher with the given bounded wait.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Bounded wait per round.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn run(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let kind = request.kind();
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name(WORKER_BINARY.to_string())
            .spawn(move || {
                // The receiver is gone if the round already timed out.
                let _ = tx.send(execute(request));
            })
            .map_err(|e| Error::WorkerFailed {
                status: format!("spawn failed: {e}"),
                stderr: String::new(),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(response) => {
                if handle.join().is_err() {
                    warn!(kind, "worker thread panicked after responding");
                }
                debug!(kind, response = response.kind(), "worker thread finished");
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(kind, timeout = ?self.timeout, "worker thread timed out; detaching");
                Err(Error::WorkerTimeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let reason = match handle.join() {
                    Err(payload) => payload
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string()),
                    Ok(()) => "worker exited without responding".to_string(),
                };
                Err(Error::WorkerFailed {
                    status: "panicked".to_string(),
                    stderr: reason,
                })
            }
        }
    }
}
