//! banksync Daemon - Background ledger synchronization service
//!
//! This binary keeps a budgeting-service ledger in sync with a banking
//! provider:
//! - Registers a callback endpoint with the provider and reacts to
//!   inbound notifications
//! - Falls back to periodic polling when no reachable endpoint can be
//!   established
//! - Graceful shutdown on SIGTERM/SIGINT with callback deregistration
//!   and port-mapping release
//!
//! # Architecture
//!
//! The daemon wires the HTTP adapters and the network channel into the
//! [`SyncScheduler`] and runs its loop. The loop is controlled by a
//! `CancellationToken` that is triggered on receipt of SIGTERM or
//! SIGINT.

mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use banksync_core::config::Config;
use banksync_core::ports::bank_provider::IBankProvider;
use banksync_core::ports::port_mapper::IPortMapper;
use banksync_net::channel::CallbackChannel;
use banksync_net::portmap::UpnpPortMapper;
use banksync_provider::client::BankClient;
use banksync_provider::ledger::{LedgerClient, LedgerSync};
use banksync_provider::provider::BankProviderAdapter;
use banksync_provider::registrar::CallbackRegistrar;

use crate::scheduler::SyncScheduler;

/// Command line arguments; every timing option overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "banksyncd", about = "Callback-driven bank-to-ledger synchronization daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP port number to listen on. Default is a random port.
    #[arg(long)]
    port: Option<u16>,

    /// Sync interval in minutes when there is no callback. Default 60.
    #[arg(long)]
    wait: Option<u64>,

    /// Sync interval in minutes with a callback. Default 240.
    #[arg(long)]
    interval: Option<u64>,

    /// Minutes between callback setup refreshes. Default 480.
    #[arg(long)]
    refresh: Option<u64>,
}

impl Args {
    /// Layers CLI overrides over the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if self.port.is_some() {
            config.listener.port = self.port;
        }
        if let Some(wait) = self.wait {
            config.schedule.wait_minutes = wait;
        }
        if let Some(interval) = self.interval {
            config.schedule.interval_minutes = interval;
        }
        if let Some(refresh) = self.refresh {
            config.schedule.refresh_minutes = refresh;
        }
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path);
    args.apply(&mut config);

    // Initialize tracing; RUST_LOG wins over the configured level.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "banksync daemon starting (banksyncd)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    // Wire the adapters into the scheduler.
    let bank_client = BankClient::new(
        config.provider.api_url.clone(),
        config.provider.api_token.clone(),
    );
    let provider: Arc<dyn IBankProvider> = Arc::new(BankProviderAdapter::new(bank_client));

    let ledger_client = LedgerClient::new(
        config.ledger.api_url.clone(),
        config.ledger.access_token.clone(),
        config.ledger.budget_id.clone(),
    );
    let ledger = LedgerSync::new(
        Arc::clone(&provider),
        ledger_client,
        config.ledger.lookback_days,
    );

    let mapper: Arc<dyn IPortMapper> = Arc::new(UpnpPortMapper::new());
    let channel = CallbackChannel::new(
        config.listener.port,
        &config.provider.notification_ranges,
        mapper,
    )
    .context("Invalid listener configuration")?;

    let registrar = CallbackRegistrar::new(Arc::clone(&provider));

    let mut scheduler = SyncScheduler::new(
        config.schedule.clone(),
        Box::new(channel),
        registrar,
        Box::new(ledger),
        shutdown_token.clone(),
    );

    scheduler.run().await;

    if shutdown_token.is_cancelled() {
        info!("banksync daemon shut down gracefully");
    } else {
        error!("banksync daemon loop exited without a shutdown signal");
    }
    Ok(())
}
