use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{Site, SiteStore};
use crate::geocoder::GeocoderService;
use crate::limiter::RateLimiter;
use crate::queue::BoundedQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillStats {
    pub total_sites: usize,
    pub candidates: usize,
    pub enriched: usize,
    pub no_match: usize,
    pub failed: usize,
}

/// Sequential enrichment pass over a snapshot of sites. Each candidate costs
/// one rate-limiter token and at most one resolver call; successfully
/// enriched sites are handed to the persistence worker through the queue.
/// The runner never writes to the store itself.
pub struct BackfillRunner {
    resolver: GeocoderService,
    limiter: RateLimiter,
    queue: Arc<BoundedQueue<Site>>,
    cancel: CancellationToken,
}

impl BackfillRunner {
    pub fn new(
        resolver: GeocoderService,
        limiter: RateLimiter,
        queue: Arc<BoundedQueue<Site>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            limiter,
            queue,
            cancel,
        }
    }

    pub async fn run(&self, sites: Vec<Site>) -> BackfillStats {
        let begin = Instant::now();
        let mut stats = BackfillStats {
            total_sites: sites.len(),
            ..BackfillStats::default()
        };

        for mut site in sites {
            // Sites that already carry coordinates are never queried.
            if !site.is_candidate() {
                continue;
            }
            stats.candidates += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(
                        candidates = stats.candidates - 1,
                        "backfill pass cancelled before completion"
                    );
                    break;
                }
                _ = self.limiter.wait() => {}
            }

            let matches = match self.resolver.resolve(&site.name).await {
                Ok(matches) => matches,
                Err(err) => {
                    warn!(
                        ?err,
                        site_id = site.id,
                        name = %site.name,
                        "geocoder lookup failed; skipping site"
                    );
                    stats.failed += 1;
                    continue;
                }
            };

            // The provider ranks its suggestions; only the first is used.
            let Some(hit) = matches.into_iter().next() else {
                debug!(
                    site_id = site.id,
                    name = %site.name,
                    elapsed = ?begin.elapsed(),
                    "no geocoder match; skipping site"
                );
                stats.no_match += 1;
                continue;
            };

            site.address = hit.address;
            site.latitude = hit.latitude;
            site.longitude = hit.longitude;

            let site_id = site.id;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(site_id, "backfill pass cancelled while queue was full");
                    break;
                }
                _ = self.queue.put(site) => {
                    stats.enriched += 1;
                    debug!(
                        site_id,
                        elapsed = ?begin.elapsed(),
                        queued = self.queue.len(),
                        "site enriched and queued"
                    );
                }
            }
        }

        info!(
            total_sites = stats.total_sites,
            candidates = stats.candidates,
            enriched = stats.enriched,
            no_match = stats.no_match,
            failed = stats.failed,
            elapsed = ?begin.elapsed(),
            "backfill pass finished"
        );
        stats
    }
}

/// Starts the single background task that applies queued enrichments to the
/// store. Runs until the token is cancelled, then drains whatever the
/// producer already queued and returns the number of updates applied.
pub fn spawn_persistence_worker(
    store: Arc<dyn SiteStore>,
    queue: Arc<BoundedQueue<Site>>,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut applied = 0_u64;
        loop {
            let site = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                site = queue.get() => site,
            };
            if apply_update(store.as_ref(), &site) {
                applied += 1;
            }
        }

        while let Some(site) = queue.try_get() {
            if apply_update(store.as_ref(), &site) {
                applied += 1;
            }
        }

        info!(applied, "persistence worker stopped");
        applied
    })
}

fn apply_update(store: &dyn SiteStore, site: &Site) -> bool {
    match store.update_location(site) {
        Ok(()) => true,
        Err(err) => {
            // A write failure must never take down the worker loop; the
            // update is logged and dropped, not retried or re-enqueued.
            warn!(
                ?err,
                site_id = site.id,
                "failed to persist enrichment; dropping update"
            );
            false
        }
    }
}
