//! Video generation worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_provider::{HttpProviderClient, ProviderClient};
use vgen_queue::{JobQueue, PollRegistry, PollRegistryConfig, QueueConfig, RedisPollRegistry};
use vgen_services::{
    AssetPersistence, HttpAssetPersistence, HttpNotifier, NotificationConfig, Notifier,
    PersistenceConfig,
};
use vgen_store::{JobStore, RedisJobStore, StoreConfig};
use vgen_worker::{
    retry_async, PollScheduler, PollingStage, QueueMonitor, RetryConfig, SubmissionExecutor,
    SubmissionStage, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting vgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!("Prometheus metrics listening on {}", addr);
    }

    let connect_retry = RetryConfig::new("redis_connect").with_max_attempts(5);

    let store_config = StoreConfig::from_env();
    let store: Arc<dyn JobStore> = Arc::new(
        retry_async(&connect_retry, |_| RedisJobStore::connect(store_config.clone()))
            .await
            .into_result()
            .context("failed to connect job store")?,
    );

    let queue_config = QueueConfig::from_env();
    let queue = Arc::new(
        retry_async(&connect_retry, |_| JobQueue::connect(queue_config.clone()))
            .await
            .into_result()
            .context("failed to connect job queue")?,
    );

    let registry_config = PollRegistryConfig::from_env();
    let registry: Arc<dyn PollRegistry> = Arc::new(
        retry_async(&connect_retry, |_| {
            RedisPollRegistry::connect(registry_config.clone())
        })
        .await
        .into_result()
        .context("failed to connect poll registry")?,
    );

    let provider: Arc<dyn ProviderClient> =
        Arc::new(HttpProviderClient::from_env().context("failed to configure provider client")?);

    let notifier: Option<Arc<dyn Notifier>> = match NotificationConfig::from_env() {
        Some(cfg) => Some(Arc::new(
            HttpNotifier::new(cfg).context("failed to configure notifier")?,
        )),
        None => {
            warn!("NOTIFICATION_BASE_URL not set, notifications disabled");
            None
        }
    };

    let persistence: Option<Arc<dyn AssetPersistence>> = match PersistenceConfig::from_env() {
        Some(cfg) => Some(Arc::new(
            HttpAssetPersistence::new(cfg).context("failed to configure asset persistence")?,
        )),
        None => {
            warn!("PERSISTENCE_BASE_URL not set, completed videos will not be persisted");
            None
        }
    };

    let submission_stage = Arc::new(
        SubmissionStage::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::clone(&registry),
            config.poll_interval,
        )
        .with_notifier(notifier.clone()),
    );

    let polling_stage = Arc::new(
        PollingStage::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::clone(&registry),
            config.poll_limits(),
        )
        .with_persistence(persistence)
        .with_notifier(notifier),
    );

    let executor = Arc::new(SubmissionExecutor::new(
        config.clone(),
        Arc::clone(&queue),
        submission_stage,
    ));
    let scheduler = Arc::new(PollScheduler::new(
        Arc::clone(&registry),
        polling_stage,
        config.max_concurrent_polls,
        config.poll_tick,
    ));
    let monitor = Arc::new(QueueMonitor::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&store),
        config.monitor_interval,
    ));

    let executor_handle = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            if let Err(e) = executor.run().await {
                error!("Submission executor error: {}", e);
            }
        })
    };
    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let drain_timeout = config.shutdown_timeout;
        tokio::spawn(async move { scheduler.run(drain_timeout).await })
    };
    let monitor_handle = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    shutdown_signal().await;

    executor.shutdown();
    scheduler.shutdown();
    monitor.shutdown();

    let _ = tokio::join!(executor_handle, scheduler_handle, monitor_handle);

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse()?);

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
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
