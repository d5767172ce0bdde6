// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Supervisor built, process not spawned yet.
    NotStarted,
    /// Spawn in progress.
    Starting,
    /// Child process is alive and the I/O loop is pumping.
    Running,
    /// Stop requested, I/O loop winding down.
    Stopping,
    /// I/O loop exited on request and the process was released.
    Stopped,
    /// Spawn or stream failure. Terminal for this instance.
    Failed,
}

impl EngineState {
    pub fn is_alive(self) -> bool {
        self == EngineState::Running
    }

    pub(crate) fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::NotStarted => write!(f, "not started"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Last status label reported by a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Started,
    NotFound,
    Stopped,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Started => write!(f, "started"),
            EngineStatus::NotFound => write!(f, "not found"),
            EngineStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by a supervisor on every lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: EngineState,
    pub status: Option<EngineStatus>,
}

impl Lifecycle {
    pub(crate) fn initial() -> Self {
        Self {
            state: EngineState::NotStarted,
            status: None,
        }
    }

    /// True once start-up has resolved one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            Some(EngineStatus::Started) | Some(EngineStatus::NotFound)
        )
    }
}
