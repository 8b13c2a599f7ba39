use anyhow::{anyhow, Context};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod approval;
mod attendance;
mod claims;
mod clock;
mod config;
mod employees;
mod face;
mod leave_ledger;
mod models;
mod notification;
mod payroll;
mod storage;
mod store;

use crate::api::{Adapters, AppState};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::face::{EmbeddingFaceVerifier, FaceEngine, FaceVerifier, UnavailableFaceVerifier};
use crate::notification::{
    run_notification_worker, LogNotifier, NotificationQueue, RetryPolicy, StatusNotifier,
    WebhookNotifier,
};
use crate::payroll::PayrollCalculator;
use crate::storage::{DisabledStorage, HttpObjectStorage, ObjectStorage};
use crate::store::HrStore;

#[derive(Parser, Debug)]
#[command(name = "hrms-core", about = "Payroll, leave and attendance service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Generate and save payroll for one month, then exit.
    ProcessPayroll {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
}

fn open_store(config: &Config) -> anyhow::Result<HrStore> {
    let store = match &config.data_file {
        Some(path) => HrStore::load_snapshot(&PathBuf::from(path))
            .with_context(|| format!("Failed to load snapshot from {}", path))?,
        None => {
            warn!("HRMS_DATA_FILE not set, data will not survive a restart");
            HrStore::new()
        }
    };
    store.seed_default_leave_types()?;
    Ok(store)
}

fn save_store(store: &HrStore, config: &Config) {
    if let Some(path) = &config.data_file {
        match store.save_snapshot(&PathBuf::from(path)) {
            Ok(()) => info!("Snapshot saved to {}", path),
            Err(e) => error!("Failed to save snapshot to {}: {}", path, e),
        }
    }
}

fn system_clock(config: &Config) -> anyhow::Result<Arc<dyn Clock>> {
    let clock = SystemClock::with_offset_minutes(config.utc_offset_minutes)
        .ok_or_else(|| anyhow!("Invalid UTC offset {} minutes", config.utc_offset_minutes))?;
    Ok(Arc::new(clock))
}

fn object_storage(config: &Config) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    match &config.storage_base_url {
        Some(base_url) => {
            let storage = HttpObjectStorage::new(base_url, config.storage_api_key.clone())
                .context("Invalid object storage configuration")?;
            info!("Uploads go to {} (bucket {})", base_url, config.storage_bucket);
            Ok(Arc::new(storage))
        }
        None => {
            warn!("HRMS_STORAGE_BASE_URL not set, document uploads are disabled");
            Ok(Arc::new(DisabledStorage))
        }
    }
}

fn face_verifier(config: &Config) -> anyhow::Result<Arc<dyn FaceVerifier>> {
    match &config.face_engine_url {
        Some(endpoint) => {
            let engine = FaceEngine::global(endpoint, config.face_timeout())
                .context("Failed to initialize face engine")?;
            Ok(Arc::new(EmbeddingFaceVerifier::new(
                engine,
                config.face_match_threshold,
            )))
        }
        None => {
            warn!("HRMS_FACE_ENGINE_URL not set, attendance verification is unavailable");
            Ok(Arc::new(UnavailableFaceVerifier))
        }
    }
}

fn status_notifier(config: &Config) -> anyhow::Result<Arc<dyn StatusNotifier>> {
    match &config.notification_webhook_url {
        Some(url) => Ok(Arc::new(
            WebhookNotifier::new(url.clone()).context("Failed to build webhook notifier")?,
        )),
        None => {
            info!("No notification webhook configured, status emails will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn serve(config: Config, store: HrStore) -> anyhow::Result<()> {
    let clock = system_clock(&config)?;
    let (notifications, outbox) = NotificationQueue::new();
    let adapters = Adapters {
        storage: object_storage(&config)?,
        verifier: face_verifier(&config)?,
        notifications,
    };
    let state = AppState::assemble(store.clone(), clock, adapters, &config)?;
    info!("Application state initialized.");

    // --- Background Tasks ---
    let notifier = status_notifier(&config)?;
    let policy = RetryPolicy {
        max_attempts: config.notification_max_attempts,
        base_delay: config.notification_backoff(),
    };
    tokio::spawn(run_notification_worker(outbox, notifier, policy));

    if config.data_file.is_some() {
        let snapshot_store = store.clone();
        let snapshot_config = config.clone();
        let interval = Duration::from_secs(config.snapshot_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                save_store(&snapshot_store, &snapshot_config);
            }
        });
    }

    let app = api::router(state);
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr))?;

    let result = match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
                .await
                .with_context(|| format!("Failed to load TLS cert/key from {} and {}", cert_path, key_path))?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
        }
        None => {
            warn!("No TLS certificate configured, serving plain HTTP");
            info!("Starting server on http://{}", addr);
            axum_server::bind(addr).serve(app.into_make_service()).await
        }
    };

    save_store(&store, &config);
    result.context("Server terminated with an error")
}

fn process_payroll(config: &Config, store: &HrStore, month: u32, year: i32) -> anyhow::Result<()> {
    let calculator = PayrollCalculator::new(store.clone(), system_clock(config)?);
    let report = calculator
        .process_payroll(month, year)
        .with_context(|| format!("Payroll run for {:02}/{} failed", month, year))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    save_store(store, config);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("App configuration loaded.");

    let store = open_store(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::ProcessPayroll { month, year } => process_payroll(&config, &store, month, year),
    }
}
