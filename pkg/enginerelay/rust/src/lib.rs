// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod lease;
pub mod listener;
pub mod manager;
pub mod relay;
pub mod state;
pub mod supervisor;

pub use error::{EngineError, Result};
pub use manager::{EngineDescriptor, EngineManager};
pub use relay::TransportRelay;
