// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod origin;
pub mod pipeline;
pub mod proxy;
pub mod state;
pub mod sweeper;

pub use config::{load_config, ProxyConfigMap};
pub use error::{AppError, Result};
pub use proxy::ProxyInstance;

use std::path::Path;
use tracing::{error, info};

/// Loads the configuration at `path` and spawns one `ProxyInstance` per labeled
/// entry, each on its own task. Every instance shares the same shutdown signal so
/// a single Ctrl-C/SIGTERM brings all of them down together. If any instance's task
/// ends in an error (e.g. a listener bind failure), that error is propagated to the
/// caller so `main` can exit non-zero rather than silently swallowing it.
pub async fn run(path: &Path, shutdown: tokio::sync::watch::Receiver<()>) -> Result<()> {
    let config = load_config(path)?;

    let mut tasks = Vec::with_capacity(config.len());
    for (label, proxy_config) in config {
        let instance = ProxyInstance::new(label.clone(), proxy_config)?;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { instance.run(shutdown).await }));
    }

    info!(proxies = tasks.len(), "all proxy instances started");

    let mut first_error = None;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "proxy instance exited with an error");
                first_error.get_or_insert(e);
            }
            Err(join_err) => {
                error!(error = %join_err, "proxy instance task panicked");
                first_error.get_or_insert(AppError::Internal(join_err.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
