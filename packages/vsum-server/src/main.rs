mod http;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use vsum_core::cache::bundle::BundleManager;
use vsum_core::cache::key::NoopExtractor;
use vsum_core::cache::service::CacheService;
use vsum_core::job::{JobQueue, JobWorker};
use vsum_core::pipeline::limits::PipelineLimits;
use vsum_core::store::SqliteStore;
use vsum_core::upload::UploadStorage;
use vsum_core::{Config, GarbageCollector};

use crate::http::rate_limit::RateLimiter;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env());

    let store = Arc::new(SqliteStore::connect(&config.db_path).await?);
    let bundles = Arc::new(BundleManager::new(config.cache_root.clone(), config.tmp_root.clone()));
    let cache = Arc::new(CacheService::new(
        store.clone(),
        bundles.clone(),
        config.profile_version.clone(),
    ));
    let uploads = Arc::new(UploadStorage::new(
        store.clone(),
        config.upload_root.clone(),
        config.upload_max_size_bytes,
        config.upload_ttl_seconds as i64,
        config.upload_chunk_size,
        config.upload_read_timeout,
        config.upload_write_timeout,
        config.upload_concurrency,
    ));
    uploads.recover().await?;

    let queue = Arc::new(JobQueue::new());
    queue.start();

    let limits = Arc::new(PipelineLimits::from_config(&config));
    let worker = Arc::new(JobWorker::new(
        store.clone(),
        cache.clone(),
        bundles.clone(),
        limits,
        queue.clone(),
    ));
    let worker_handles = worker.spawn_pool(config.job_worker_count);

    let gc = Arc::new(GarbageCollector::new(store.clone(), bundles.clone(), &config));
    let gc_interval = config.gc_interval;
    let gc_for_task = gc.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_interval);
        loop {
            ticker.tick().await;
            match gc_for_task.run_cycle().await {
                Ok(report) => info!(?report, "gc cycle complete"),
                Err(e) => tracing::error!(error = %e, "gc cycle failed"),
            }
        }
    });

    let uploads_for_sweeper = uploads.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            match uploads_for_sweeper.cleanup_expired().await {
                Ok(n) => info!(expired = n, "upload ttl sweep complete"),
                Err(e) => tracing::error!(error = %e, "upload ttl sweep failed"),
            }
        }
    });

    let state = AppState {
        store,
        cache,
        bundles,
        uploads,
        queue: queue.clone(),
        config,
        rate_limiter: Arc::new(RateLimiter::new()),
        extractor: Arc::new(NoopExtractor),
        version: env!("CARGO_PKG_VERSION"),
    };

    let router = http::build_router(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "vsum-server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    queue.stop();
    for handle in worker_handles {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
