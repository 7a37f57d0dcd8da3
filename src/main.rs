//! Vigil - Uptime Monitoring Service
//!
//! Probes registered HTTP endpoints on a fixed cadence, records every result
//! and emails on up/down transitions.

mod clock;
mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod web;

use clock::{Clock, SystemClock};
use config::ServerConfig;
use db::Store;
use notify::{EmailNotifier, LogNotifier, Notifier};
use probe::HttpProber;
use scheduler::{Aggregator, PeriodicTrigger, Scheduler, StateTracker};
use web::Server;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Vigil on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    let prober = Arc::new(HttpProber::new(cfg.request_timeout, clock.clone(), shutdown.child_token())?);
    let notifier = build_notifier(&cfg);
    let tracker = StateTracker::new(store.clone(), notifier, cfg.alert_recipients.clone());
    let aggregator = Arc::new(Aggregator::new(store.clone(), clock.clone()));
    let scheduler = Scheduler::new(store.clone(), store.clone(), prober, tracker, cfg.concurrency);

    // First sweep runs right away; later ones follow the cadence.
    scheduler.spawn_sweep("startup");

    let trigger = PeriodicTrigger::new(cfg.interval_minutes, cfg.timezone, clock.clone());
    let sweeper = scheduler.clone();
    let trigger_cancel = shutdown.clone();
    tokio::spawn(async move {
        trigger
            .run(trigger_cancel, || {
                let sweeper = sweeper.clone();
                async move {
                    if let Err(e) = sweeper.check_all().await {
                        tracing::error!("Scheduled sweep failed: {}", e);
                    }
                }
            })
            .await;
    });

    let signal_cancel = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    // Start web server
    let server = Server::new(cfg, store, scheduler, aggregator);
    server.start(shutdown).await?;

    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// A handler that cannot be installed never completes, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

fn build_notifier(cfg: &ServerConfig) -> Arc<dyn Notifier> {
    let Some(email) = &cfg.email else {
        tracing::warn!("SMTP not configured; alerts will only be logged");
        return Arc::new(LogNotifier);
    };

    match EmailNotifier::new(email) {
        Ok(notifier) => {
            tracing::info!("Email alerts via {}:{}", email.smtp_host, email.smtp_port);
            Arc::new(notifier)
        }
        Err(e) => {
            tracing::error!("Failed to set up SMTP transport, falling back to log alerts: {}", e);
            Arc::new(LogNotifier)
        }
    }
}
