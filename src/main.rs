mod analyzer;
mod api;
mod config;
mod generator;
mod grader;
mod languages;
mod models;
mod pool;
mod publisher;
mod repository;
mod sandbox;
mod worker;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use analyzer::LintAnalyzer;
use api::ApiState;
use config::Config;
use pool::SandboxPool;
use publisher::HttpResultSink;
use repository::Repository;
use sandbox::{DockerDriver, SandboxDriver};
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grader_engine=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cfg = Arc::new(Config::from_env().context("failed to load configuration")?);
    languages::init_languages()?;

    info!("Starting grading worker");
    info!("  queue: {} @ {}", cfg.task_queue, cfg.redis_url);
    info!("  backend: {}", cfg.backend_api_url);
    info!("  sandbox image: {}", cfg.sandbox_image);
    info!("  pool size: {}", cfg.pool_size);

    let repo = Arc::new(
        Repository::connect(&cfg)
            .await
            .context("database connection failed")?,
    );
    info!("Database connected");

    let driver: Arc<dyn SandboxDriver> =
        Arc::new(DockerDriver::connect().context("sandbox driver unavailable")?);

    let sandbox_pool = Arc::new(
        SandboxPool::new(Arc::clone(&driver), &cfg.sandbox_image, cfg.pool_size)
            .await
            .context("failed to initialize sandbox pool")?,
    );
    sandbox_pool.start_reaper();
    info!(
        "Sandbox pool ready with {} sandboxes",
        sandbox_pool.size().await
    );

    let sink: Arc<dyn publisher::ResultSink> =
        Arc::new(HttpResultSink::new(cfg.backend_api_url.clone()));
    let quality_analyzer: Arc<dyn analyzer::QualityAnalyzer> = Arc::new(LintAnalyzer);
    let tasks_processed = Arc::new(AtomicU64::new(0));

    // Health surface runs for the life of the process.
    let api_state = ApiState {
        started_at: Instant::now(),
        pool: Arc::clone(&sandbox_pool),
        repo: Arc::clone(&repo),
        tasks_processed: Arc::clone(&tasks_processed),
    };
    let api_port = cfg.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, api_port).await {
            error!("health API failed: {:#}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::with_capacity(cfg.pool_size);
    for id in 0..cfg.pool_size {
        let w = Worker {
            id,
            cfg: Arc::clone(&cfg),
            driver: Arc::clone(&driver),
            pool: Arc::clone(&sandbox_pool),
            repo: Arc::clone(&repo),
            sink: Arc::clone(&sink),
            analyzer: Some(Arc::clone(&quality_analyzer)),
            tasks_processed: Arc::clone(&tasks_processed),
            shutdown: shutdown_rx.clone(),
        };
        workers.push(tokio::spawn(w.run()));
    }
    info!("Started {} workers", workers.len());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    warn!("Shutdown signal received, draining workers...");

    let _ = shutdown_tx.send(true);
    for handle in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("worker exited with error: {:#}", e),
            Err(e) => error!("worker task panicked: {}", e),
        }
    }

    sandbox_pool.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
