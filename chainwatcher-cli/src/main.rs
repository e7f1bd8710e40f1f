// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainwatcher::config::WatcherConfig;
use chainwatcher::error::WatcherError;
use chainwatcher::node::{run_node, WatcherContext};
use chainwatcher::operator;
use chainwatcher_cli::{Args, WatcherCommand};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Invariant violations get a single-line diagnostic; everything
            // else keeps its error chain.
            match e.downcast_ref::<WatcherError>() {
                Some(WatcherError::InvariantViolation(reason)) => {
                    eprintln!("invariant violation: {reason}");
                }
                _ => eprintln!("{e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = WatcherConfig::load(&args.config)?;
    let context = WatcherContext::build(config).await?;

    match args.command {
        WatcherCommand::Run => {
            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    ctrl_c_cancel.cancel();
                }
            });
            run_node(&context, cancel).await?;
        }
        WatcherCommand::CreateCheckpoint {
            contract,
            block_hash,
        } => {
            let record = operator::create_checkpoint(
                context.store.clone(),
                context.client.clone(),
                &contract,
                block_hash,
            )
            .await?;
            println!("{}", record.cid);
        }
        WatcherCommand::ResetToBlock { block_number } => {
            operator::reset_to_block(context.store.clone(), block_number).await?;
        }
        WatcherCommand::FillState { start, end } => {
            operator::fill_state(
                context.store.clone(),
                context.client.clone(),
                context.indexer(),
                context.processor(),
                start,
                end,
            )
            .await?;
        }
    }
    Ok(())
}
