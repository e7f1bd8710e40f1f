// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chainwatcher", about = "EVM chain watcher and state materializer")]
pub struct Args {
    /// Path to the watcher YAML configuration.
    #[arg(long, short, global = true, default_value = "watcher.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: WatcherCommand,
}

#[derive(Subcommand)]
pub enum WatcherCommand {
    /// Follow the chain head, index blocks and materialize state.
    Run,

    /// Create a checkpoint for a watched contract.
    CreateCheckpoint {
        /// Contract address.
        contract: String,
        /// Block hash to checkpoint at; defaults to the latest canonical block.
        block_hash: Option<String>,
    },

    /// Prune all blocks and derived state above a height and rewind cursors.
    ResetToBlock {
        /// Height to reset onto.
        block_number: u64,
    },

    /// Materialize state over a historical block range.
    FillState {
        /// First block of the range (inclusive).
        start: u64,
        /// Last block of the range (inclusive).
        end: u64,
    },
}
