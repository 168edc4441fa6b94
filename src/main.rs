// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use ingenico_core::config::CoreConfig;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    core: CoreConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli.core).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config: CoreConfig) -> anyhow::Result<()> {
    let (core, mut join) = ingenico_core::run(config).await?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            core.shutdown.cancel();
            let _ = join.await;
        }
        result = &mut join => {
            if let Err(err) = result {
                tracing::error!(%err, "master loop task panicked");
            }
        }
    }
    Ok(())
}
