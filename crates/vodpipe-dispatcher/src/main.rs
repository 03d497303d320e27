//! Ingestion dispatcher binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vodpipe_dispatcher::{
    metrics, Dispatcher, DispatcherConfig, DockerLauncher, LauncherConfig, ProcessLauncher, RedisLedger,
    RedisOverlayResolver, TaskLauncher,
};
use vodpipe_firestore::{FirestoreClient, StatusRepository};
use vodpipe_queue::{QueueConfig, RedisEventQueue};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vodpipe-dispatcher");

    if let Err(e) = run().await {
        error!("Dispatcher failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Dispatcher shutdown complete");
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vodpipe=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = DispatcherConfig::from_env().context("invalid dispatcher configuration")?;
    let queue_config = QueueConfig::from_env().context("invalid queue configuration")?;
    // Forwarded values carry credentials; log names only
    info!(
        destination_bucket = %config.destination_bucket,
        batch_size = config.batch_size,
        launcher = ?config.launcher,
        forwarded = ?config.forwarded_env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        "Dispatcher config"
    );

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Serving metrics on {}", addr);
    }

    let redis = redis::Client::open(queue_config.redis_url.as_str()).context("invalid REDIS_URL")?;

    let queue = RedisEventQueue::new(queue_config).context("failed to create queue client")?;
    queue.init().await.context("failed to initialize consumer group")?;
    info!(consumer = queue.consumer_name(), "Connected to ingestion stream");

    let firestore = FirestoreClient::from_env().await.context("failed to create Firestore client")?;
    let status = StatusRepository::from_env(firestore);

    let launcher: Arc<dyn TaskLauncher> = match &config.launcher {
        LauncherConfig::Docker {
            host_url,
            image,
            network,
        } => Arc::new(DockerLauncher::new(
            host_url.as_str(),
            image.as_str(),
            network.clone(),
            config.forwarded_env.clone(),
        )?),
        LauncherConfig::Process { binary } => Arc::new(ProcessLauncher::new(binary, config.forwarded_env.clone())),
    };

    let overlay = Arc::new(RedisOverlayResolver::new(redis.clone(), config.overlay_key_prefix.as_str()));
    let ledger = Arc::new(RedisLedger::new(redis));

    let dispatcher = Dispatcher::new(config, Arc::new(queue), launcher, Arc::new(status))
        .with_overlay_resolver(overlay)
        .with_ledger(ledger);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, finishing current batch");
        shutdown_tx.send(true).ok();
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
