//! synergyx: drug-pair synergy classifier
//! Entry point for the training binary.

mod config;
mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = config::Config::load();

    // Initialise structured logging; RUST_LOG wins over the config file
    let default_filter = loaded
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "synergyx=debug,info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("synergyx starting up...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(c) => {
            info!(
                "Configuration loaded. Variant: {:?}, text channel: {:?}, epochs: {}",
                c.model.variant, c.embedding.provider, c.training.epochs
            );
            c
        }
        Err(e) => {
            error!("Could not load configuration: {e:#}");
            return Err(e);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping at the next batch boundary");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    // Training is CPU/GPU bound; keep it off the async workers
    let result = tokio::task::spawn_blocking(move || pipeline::run(&config, cancel)).await?;
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("Training failed: {e:#}");
            return Err(e);
        }
    };

    if summary.interrupted {
        warn!("Run {} interrupted after {} epochs", summary.run_id, summary.epochs_run);
        return Ok(());
    }
    match (summary.best_epoch, &summary.test) {
        (Some(epoch), Some(test)) => info!(
            "Run {} done: best val {} {:.4} at epoch {}; test {}",
            summary.run_id, summary.metric, summary.best_score, epoch, test
        ),
        (None, Some(test)) => info!(
            "Run {} done without an improving epoch; test {}",
            summary.run_id, test
        ),
        (_, None) => warn!("Run {} produced no test metrics", summary.run_id),
    }
    if summary.stopped_early {
        info!("Stopped early after {} epochs", summary.epochs_run);
    }

    Ok(())
}
