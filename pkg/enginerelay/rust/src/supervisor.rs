// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{EngineError, Result};
use crate::listener::OutputListener;
use crate::state::{EngineState, EngineStatus, Lifecycle};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap, cloneable view of a supervisor: lifecycle reads and command queueing.
#[derive(Clone)]
pub struct EngineHandle {
    lifecycle: watch::Receiver<Lifecycle>,
    commands: mpsc::UnboundedSender<String>,
}

impl EngineHandle {
    /// Queue `command` for the engine's stdin. Never blocks.
    pub fn send(&self, command: &str) -> Result<()> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        self.commands
            .send(format!("{command}\n"))
            .map_err(|_| EngineError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.borrow().state.is_alive()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn last_status(&self) -> Option<EngineStatus> {
        self.lifecycle.borrow().status
    }

    /// Wait until start-up has resolved, then return the lifecycle at that point.
    pub async fn wait_settled(&self) -> Lifecycle {
        let mut rx = self.lifecycle.clone();
        // Err means the supervisor is gone and the current value is final.
        let _ = rx.wait_for(Lifecycle::is_settled).await;
        let lifecycle = *rx.borrow();
        lifecycle
    }
}

/// Owns one engine process and the task pumping its standard streams.
///
/// A supervisor is started at most once. Restarting an engine means building
/// a new supervisor.
pub struct EngineSupervisor {
    path: PathBuf,
    stop_timeout: Duration,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    commands: mpsc::UnboundedSender<String>,
    queue: Option<mpsc::UnboundedReceiver<String>>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl EngineSupervisor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::initial());
        let (commands, queue) = mpsc::unbounded_channel();
        Self {
            path: path.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            lifecycle: Arc::new(lifecycle),
            commands,
            queue: Some(queue),
            shutdown: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            lifecycle: self.lifecycle.subscribe(),
            commands: self.commands.clone(),
        }
    }

    /// Spawn the engine and its I/O loop. Every line the engine prints is
    /// handed to `listeners`, in order.
    ///
    /// On spawn failure the lifecycle ends in `Failed` with status `not found`.
    pub fn start(&mut self, listeners: Vec<Arc<dyn OutputListener>>) -> Result<()> {
        let Some(queue) = self.queue.take() else {
            return Err(EngineError::AlreadyStarted);
        };
        transition(&self.lifecycle, EngineState::Starting, None);

        let spawned = spawn_engine(&self.path);
        let (child, stdin, stdout) = match spawned {
            Ok(parts) => parts,
            Err(source) => {
                error!("[engine] failed to spawn {}: {source}", self.path.display());
                transition(
                    &self.lifecycle,
                    EngineState::Failed,
                    Some(EngineStatus::NotFound),
                );
                return Err(EngineError::Spawn {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        info!(
            "[engine] spawned (pid={}, path={})",
            child.id().unwrap_or(0),
            self.path.display()
        );
        transition(
            &self.lifecycle,
            EngineState::Running,
            Some(EngineStatus::Started),
        );

        let io_loop = IoLoop {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            queue,
            listeners,
            lifecycle: Arc::clone(&self.lifecycle),
            shutdown: self.shutdown.clone(),
            stop_timeout: self.stop_timeout,
        };
        self.worker = Some(tokio::spawn(io_loop.run()));
        Ok(())
    }

    /// Ask the I/O loop to exit and wait until it has released the process.
    /// Safe to call repeatedly, and on a supervisor that never started.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        transition_if_allowed(&self.lifecycle, EngineState::Stopping, None);
        self.shutdown.cancel();
        if let Err(e) = worker.await {
            error!("[engine] I/O loop task failed: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.borrow().state.is_alive()
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.borrow().state
    }

    pub fn last_status(&self) -> Option<EngineStatus> {
        self.lifecycle.borrow().status
    }
}

impl Drop for EngineSupervisor {
    fn drop(&mut self) {
        // The loop task releases the child once it observes the cancellation.
        self.shutdown.cancel();
    }
}

fn spawn_engine(path: &Path) -> std::io::Result<(Child, ChildStdin, ChildStdout)> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("engine stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("engine stdout was not captured"))?;
    Ok((child, stdin, stdout))
}

fn transition(
    lifecycle: &watch::Sender<Lifecycle>,
    next: EngineState,
    status: Option<EngineStatus>,
) {
    if !transition_if_allowed(lifecycle, next, status) {
        warn!(
            "[engine] ignoring invalid transition {} -> {next}",
            lifecycle.borrow().state
        );
    }
}

fn transition_if_allowed(
    lifecycle: &watch::Sender<Lifecycle>,
    next: EngineState,
    status: Option<EngineStatus>,
) -> bool {
    lifecycle.send_if_modified(|current| {
        if !current.state.can_transition_to(next) {
            return false;
        }
        current.state = next;
        if status.is_some() {
            current.status = status;
        }
        true
    })
}

enum LoopExit {
    Requested,
    EndOfStream,
    Failed(std::io::Error),
}

struct IoLoop {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    queue: mpsc::UnboundedReceiver<String>,
    listeners: Vec<Arc<dyn OutputListener>>,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    shutdown: CancellationToken,
    stop_timeout: Duration,
}

impl IoLoop {
    async fn run(self) {
        let IoLoop {
            mut child,
            mut stdin,
            mut stdout,
            mut queue,
            listeners,
            lifecycle,
            shutdown,
            stop_timeout,
        } = self;

        let exit = pump(&mut stdout, &mut stdin, &mut queue, &listeners, &shutdown).await;
        let (state, status) = match exit {
            LoopExit::Requested => (EngineState::Stopped, EngineStatus::Stopped),
            LoopExit::EndOfStream => {
                warn!("[engine] output stream closed, engine exited");
                (EngineState::Failed, EngineStatus::NotFound)
            }
            LoopExit::Failed(e) => {
                warn!("[engine] I/O failure: {e}");
                (EngineState::Failed, EngineStatus::NotFound)
            }
        };

        release(&mut child, stdin, stop_timeout).await;
        transition(&lifecycle, state, Some(status));
        info!("[engine] {status}");
    }
}

async fn pump(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    stdin: &mut ChildStdin,
    queue: &mut mpsc::UnboundedReceiver<String>,
    listeners: &[Arc<dyn OutputListener>],
    shutdown: &CancellationToken,
) -> LoopExit {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return LoopExit::Requested,
            line = stdout.next_line() => match line {
                Ok(Some(line)) => {
                    debug!("[engine:in] {line}");
                    for listener in listeners {
                        listener.on_engine_output(&line);
                    }
                }
                Ok(None) => return LoopExit::EndOfStream,
                Err(e) => return LoopExit::Failed(e),
            },
            Some(command) = queue.recv() => {
                debug!("[engine:out] {}", command.trim_end());
                let written = async {
                    stdin.write_all(command.as_bytes()).await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    return LoopExit::Failed(e);
                }
            }
        }
    }
}

/// Close stdin, then SIGTERM, wait up to `stop_timeout`, and SIGKILL if the
/// engine is still alive.
async fn release(child: &mut Child, stdin: ChildStdin, stop_timeout: Duration) {
    drop(stdin);

    if let Ok(Some(status)) = child.try_wait() {
        info!("[engine] exited with {status}");
        return;
    }

    terminate(child);
    match timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => info!("[engine] exited with {status}"),
        Ok(Err(e)) => warn!("[engine] failed to wait for exit: {e}"),
        Err(_) => {
            warn!(
                "[engine] stop timeout ({}ms) reached, sending SIGKILL",
                stop_timeout.as_millis()
            );
            if let Err(e) = child.kill().await {
                warn!("[engine] failed to kill: {e}");
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id()
        && let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
    {
        warn!("[engine] failed to send SIGTERM: {e}");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("[engine] failed to kill: {e}");
    }
}
