use anyhow::Context;
use clap::Parser;
use hlstatsd::config::{Args, DaemonConfig};
use hlstatsd::crypto::CredentialCipher;
use hlstatsd::geo::NoopGeo;
use hlstatsd::handlers::{HandlerCtx, WeaponCache};
use hlstatsd::ingress::{Ingress, IngressConfig};
use hlstatsd::metrics::Metrics;
use hlstatsd::notify::Notifier;
use hlstatsd::orchestrator::ServerOrchestrator;
use hlstatsd::pipeline;
use hlstatsd::repo::MemoryRepository;
use hlstatsd::scrape::StatusScraper;
use hlstatsd::skill::SkillConfig;
use rcon::{PoolConfig, RconPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = DaemonConfig::from_args(Args::parse());

    let cipher = CredentialCipher::from_env()
        .context("ENCRYPTION_KEY is set but not a valid base64 32-byte key")?
        .map(Arc::new);
    if cipher.is_none() {
        warn!("no ENCRYPTION_KEY; sealed RCON credentials cannot be used");
    }

    let repo = MemoryRepository::new();
    let metrics = Arc::new(Metrics::default());
    let pool = RconPool::new(PoolConfig::default());
    let notifier = Notifier::new(pool.clone(), metrics.clone());

    let ctx = HandlerCtx {
        repo: repo.clone(),
        notifier: notifier.clone(),
        metrics: metrics.clone(),
        skill: SkillConfig::default(),
        weapons: WeaponCache::new(repo.clone(), Duration::from_secs(60)),
        geo: Arc::new(NoopGeo),
    };

    // Intake (ingress, scraper, notifier) stops first; workers get their
    // own token so the queue can drain before they are cancelled.
    let intake_cancel = CancellationToken::new();
    let worker_cancel = CancellationToken::new();

    let (pipeline, workers) = pipeline::spawn(
        ctx,
        config.workers,
        config.queue_capacity,
        worker_cancel.clone(),
    );

    let notifier_task = notifier.spawn(intake_cancel.clone());

    let orchestrator = ServerOrchestrator::new(repo.clone());
    let ingress = Ingress::bind(
        config.bind,
        repo.clone(),
        orchestrator,
        pipeline.clone(),
        metrics.clone(),
        IngressConfig {
            default_game: config.default_game.clone(),
            auto_register: config.auto_register,
        },
    )
    .await
    .with_context(|| format!("binding ingress socket {}", config.bind))?;

    let ingress_task = tokio::spawn(ingress.run(intake_cancel.clone()));

    let scraper = StatusScraper::new(
        repo.clone(),
        pool.clone(),
        pipeline.clone(),
        cipher,
        config.status_interval,
        config.active_window,
    );
    let scraper_task = tokio::spawn(scraper.run(intake_cancel.clone()));

    info!(
        workers = config.workers,
        queue = config.queue_capacity,
        "hlstatsd running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    // Stop intake, drop our submission handle, then give the workers the
    // drain window before cancelling them outright.
    intake_cancel.cancel();
    let _ = ingress_task.await;
    let _ = scraper_task.await;
    let _ = notifier_task.await;
    drop(pipeline);

    let drain = async {
        for worker in workers {
            let _ = worker.await;
        }
    };

    if tokio::time::timeout(config.drain_timeout, drain)
        .await
        .is_err()
    {
        warn!("drain deadline passed, cancelling workers");
        worker_cancel.cancel();
    }

    pool.disconnect_all().await;

    info!(
        events = Metrics::get(&metrics.events_processed),
        dead_lettered = Metrics::get(&metrics.events_dead_lettered),
        unknown_sources = Metrics::get(&metrics.unknown_sources),
        "goodbye"
    );

    Ok(())
}
