// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "engine-relayd", version, about = "Engine process relay daemon")]
pub struct Args {
    /// Path to the YAML config file (falls back to ENGINE_RELAY_CONFIG)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
