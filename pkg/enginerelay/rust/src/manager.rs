// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{EngineError, Result};
use crate::listener::{OutputFanout, OutputListener};
use crate::state::Lifecycle;
use crate::supervisor::{DEFAULT_STOP_TIMEOUT, EngineHandle, EngineSupervisor};
use log::{info, warn};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Duration;

/// Engine requested by a client: a display name and a path relative to the
/// engines directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub name: String,
    pub path: String,
}

impl EngineDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Resolve the executable under `engines_dir`. Paths that are absolute or
    /// climb out of the directory are rejected.
    pub fn resolve(&self, engines_dir: &Path) -> Result<PathBuf> {
        let relative = Path::new(&self.path);
        if self.path.trim().is_empty() {
            return Err(EngineError::InvalidDescriptor("empty engine path".into()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(EngineError::InvalidDescriptor(format!(
                        "engine path {} escapes the engines directory",
                        self.path
                    )));
                }
            }
        }
        Ok(engines_dir.join(relative))
    }
}

/// Owns the single active engine and the output fan-out every engine
/// instance publishes into.
pub struct EngineManager {
    engines_dir: PathBuf,
    stop_timeout: Duration,
    fanout: Arc<OutputFanout>,
    // Serializes start/stop so two engines never overlap.
    lifecycle: tokio::sync::Mutex<Option<EngineSupervisor>>,
    active: Mutex<Option<EngineHandle>>,
}

impl EngineManager {
    pub fn new(engines_dir: impl Into<PathBuf>) -> Self {
        Self {
            engines_dir: engines_dir.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            fanout: Arc::new(OutputFanout::new()),
            lifecycle: tokio::sync::Mutex::new(None),
            active: Mutex::new(None),
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn engines_dir(&self) -> &Path {
        &self.engines_dir
    }

    /// Register `listener` for every line any engine prints from now on.
    pub fn subscribe<L: OutputListener + 'static>(&self, listener: &Arc<L>) {
        self.fanout.subscribe(listener);
    }

    pub fn output(&self) -> &OutputFanout {
        &self.fanout
    }

    /// Stop whatever engine is active, start the one described by `descriptor`
    /// and wait for it to come up.
    ///
    /// Returns `Ok(false)` when the executable could not be launched, and
    /// `Err` only for descriptors that do not resolve.
    pub async fn start_engine(&self, descriptor: &EngineDescriptor) -> Result<bool> {
        let path = descriptor.resolve(&self.engines_dir)?;

        let mut slot = self.lifecycle.lock().await;
        if let Some(mut previous) = slot.take() {
            self.set_active(None);
            info!("[engine] stopping {} before restart", previous.path().display());
            previous.stop().await;
        }

        let mut supervisor = EngineSupervisor::new(path).with_stop_timeout(self.stop_timeout);
        let handle = supervisor.handle();
        let fanout: Arc<dyn OutputListener> = self.fanout.clone();
        if let Err(e) = supervisor.start(vec![fanout]) {
            warn!("[engine] {} did not start: {e}", descriptor.name);
        }
        self.set_active(Some(handle.clone()));
        *slot = Some(supervisor);
        drop(slot);

        let ready = handle.wait_settled().await.state.is_alive();
        info!(
            "[engine] {} {}",
            descriptor.name,
            if ready { "ready" } else { "not ready" }
        );
        Ok(ready)
    }

    /// Stop the active engine and wait until its process is released.
    /// A no-op when nothing is active.
    pub async fn stop_engine(&self) {
        let mut slot = self.lifecycle.lock().await;
        let Some(mut supervisor) = slot.take() else {
            return;
        };
        self.set_active(None);
        supervisor.stop().await;
        info!("[engine] {} stopped", supervisor.path().display());
    }

    pub fn send_command(&self, command: &str) -> Result<()> {
        match self.active_handle() {
            Some(handle) => handle.send(command),
            None => Err(EngineError::NotRunning),
        }
    }

    pub fn is_engine_running(&self) -> bool {
        self.active_handle().is_some_and(|h| h.is_running())
    }

    /// Wait until the active engine has either come up or failed to, and
    /// report whether it is running.
    pub async fn await_ready(&self) -> bool {
        match self.active_handle() {
            Some(handle) => handle.wait_settled().await.state.is_alive(),
            None => false,
        }
    }

    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.active_handle().map(|h| h.lifecycle())
    }

    fn active_handle(&self) -> Option<EngineHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, handle: Option<EngineHandle>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }
}
