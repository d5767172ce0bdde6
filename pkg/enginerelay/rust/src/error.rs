// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::relay::SessionId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The executable could not be launched. Terminal for that engine instance.
    #[error("failed to spawn engine {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stream to or from the engine failed mid-session.
    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine is not running")]
    NotRunning,

    #[error("engine supervisor was already started")]
    AlreadyStarted,

    #[error("server is busy")]
    AdmissionDenied,

    #[error("session {0} is no longer bound")]
    StaleSession(SessionId),

    #[error("invalid engine descriptor: {0}")]
    InvalidDescriptor(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
