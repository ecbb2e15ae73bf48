/*
* File: src/main.rs
*
* Entry point for the gitops-controller binary.
*
* Architecture:
* 1. Parse CLI flags (`cli.rs`) and initialize `tracing` at the
*    requested level.
* 2. Build a Kubernetes client: try the given (or default) kubeconfig
*    path first, falling back to in-cluster credentials on failure.
* 3. Construct the `Reconciler` (the intake queue, reconcile queue, git
*    workspace, and cluster gateway) and run it until a shutdown signal
*    arrives.
* 4. SIGINT/SIGTERM triggers orderly shutdown; a second signal within
*    the same run forces exit with code 1.
*
* SPDX-License-Identifier: Apache-2.0
*/

mod cli;
mod controllers {
    pub mod application;
    pub mod utils;
}
mod crds;
mod diff;
mod error;
mod gateway;
mod git;
mod informer;
mod queue;
mod ratelimiter;
mod reconciler;
mod status;

use clap::Parser;
use cli::{Cli, Command};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use reconciler::Reconciler;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Command::Run {
        kubeconfig,
        workers,
        log_level,
    } = cli.command;

    init_logging(&log_level);

    let client = match build_client(kubeconfig).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to build Kubernetes client: {e}");
            std::process::exit(1);
        }
    };

    let reconciler = match Reconciler::new(client, std::env::var("GIT_TOKEN").ok()).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("failed to initialize reconciler: {e}");
            std::process::exit(1);
        }
    };

    let stop_rx = spawn_shutdown_handler();

    tracing::info!(workers, "gitops-controller starting");
    reconciler.run(workers, stop_rx).await;
    tracing::info!("gitops-controller shut down cleanly");
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli::tracing_filter(log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Builds a client from `kubeconfig_path` (or `~/.kube/config` if not
/// given); on any failure, falls back to in-cluster credentials.
async fn build_client(kubeconfig_path: Option<String>) -> error::Result<Client> {
    let path = kubeconfig_path
        .map(std::path::PathBuf::from)
        .or_else(cli::default_kubeconfig_path);

    if let Some(path) = path {
        if let Ok(kubeconfig) = Kubeconfig::read_from(&path) {
            if let Ok(config) =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await
            {
                if let Ok(client) = Client::try_from(config) {
                    return Ok(client);
                }
            }
        }
        tracing::warn!(path = %path.display(), "could not load kubeconfig, falling back to in-cluster credentials");
    }

    let config = Config::incluster()
        .map_err(|e| error::Error::Internal(format!("in-cluster config unavailable: {e}")))?;
    Client::try_from(config).map_err(|e| error::Error::Internal(format!("{e}")))
}

/// Spawns the signal-handling task and returns the stop channel the
/// reconciler watches. The first SIGINT/SIGTERM flips the channel for
/// an orderly shutdown; a second one forces exit with code 1.
fn spawn_shutdown_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::info!("shutdown signal received, draining in-flight work");
        let _ = tx.send(true);

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::warn!("second shutdown signal received, forcing exit");
        std::process::exit(1);
    });

    rx
}
