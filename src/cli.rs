// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-tenant SMS self-scheduling core for radiology imaging orders.
#[derive(Parser, Debug)]
#[command(name = "radsched", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the search paths).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RADSCHED_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Move every non-terminal session past its TTL to EXPIRED.
    ///
    /// Sends nothing. Idempotent; run it every 30 seconds from the
    /// scheduler of your choice.
    ExpireSessions,

    /// Retry slot requests stuck in AWAITING_SLOTS past the timeout,
    /// cancelling sessions that already used their one retry.
    ///
    /// Idempotent; run it every 30 seconds alongside expire-sessions.
    RetryTimeouts,

    /// Print the merged configuration with secrets redacted.
    ShowConfig,
}
