mod config;
mod db;
mod errors;
mod geocoder;
mod limiter;
mod pipeline;
mod queue;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{AppConfig, PublicAppConfig};
pub use db::{bootstrap, DatabaseContext, Site, SiteStore, SqliteStore};
pub use errors::{AppError, AppResult};
pub use geocoder::{GeocodeMatch, GeocodeResolver, GeocoderService};
pub use limiter::RateLimiter;
pub use pipeline::{spawn_persistence_worker, BackfillRunner, BackfillStats};
pub use queue::BoundedQueue;

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,geo_backfill=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// Wires the pipeline and runs it to completion: one enrichment pass over
/// the current snapshot, then the process blocks on Ctrl-C so the
/// persistence worker keeps applying queued updates until shutdown.
pub async fn run() -> AppResult<()> {
    init_tracing();
    let config = AppConfig::from_env();
    info!(profile = ?config.public_profile(), "starting geocoding backfill");

    // A store that cannot be opened is fatal; everything after this point
    // degrades per record instead.
    let DatabaseContext { connection, path } = bootstrap(&config.database_path)?;
    let store = Arc::new(SqliteStore::new(Arc::new(Mutex::new(connection))));
    info!(path = %path.display(), "store ready");

    let resolver = GeocoderService::new(&config)?;
    let limiter = RateLimiter::new(config.rate_per_sec, config.rate_burst);
    let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
    let cancel = CancellationToken::new();

    let worker = spawn_persistence_worker(
        Arc::clone(&store) as Arc<dyn SiteStore>,
        Arc::clone(&queue),
        cancel.clone(),
    );

    let sites = store.fetch_all()?;
    let runner = BackfillRunner::new(resolver, limiter, Arc::clone(&queue), cancel.clone());
    let stats = runner.run(sites).await;
    info!(
        enriched = stats.enriched,
        pending = queue.len(),
        "backfill pass complete; waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; draining persistence queue");
    cancel.cancel();
    match worker.await {
        Ok(applied) => info!(applied, "shutdown complete"),
        Err(err) => warn!(?err, "persistence worker panicked"),
    }
    Ok(())
}
