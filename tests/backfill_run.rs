use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::json_encoded;
use httptest::{Expectation, Server};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use geo_backfill::{
    bootstrap, spawn_persistence_worker, AppConfig, BackfillRunner, BoundedQueue, GeocoderService,
    RateLimiter, SiteStore, SqliteStore,
};

#[tokio::test]
async fn backfill_pass_enriches_and_persists_candidates() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/ws/place/v1/suggestion"),
            request::query(url_decoded(contains(("keyword", "Oakwood")))),
            request::query(url_decoded(contains(("region", "Testville")))),
            request::query(url_decoded(contains(("filter", "category=residential")))),
            request::query(url_decoded(contains(("key", "test-key")))),
        ))
        .times(1)
        .respond_with(json_encoded(json!({
            "status": 0,
            "message": "query ok",
            "count": 1,
            "data": [{
                "id": "poi-1",
                "title": "Oakwood",
                "address": "123 Oak St",
                "category": "residential",
                "type": 0,
                "location": {"lat": 40.1, "lng": -73.9},
                "adcode": 320100,
                "province": "Testshire",
                "city": "Testville",
                "district": "Old Town"
            }],
            "request_id": "r-1"
        }))),
    );

    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/ws/place/v1/suggestion"),
            request::query(url_decoded(contains(("keyword", "Nowhere")))),
        ))
        .times(1)
        .respond_with(json_encoded(json!({
            "status": 0,
            "message": "query ok",
            "count": 0,
            "data": [],
            "request_id": "r-2"
        }))),
    );

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("backfill.db");

    std::env::set_var(
        "GEOCODER_SUGGEST_ENDPOINT",
        server.url("/ws/place/v1/suggestion").to_string(),
    );
    std::env::set_var("GEOCODER_API_KEY", "test-key");
    std::env::set_var("GEOCODER_REGION", "Testville");
    std::env::set_var("GEOCODER_CATEGORY", "residential");
    std::env::set_var("DATABASE_PATH", db_path.to_string_lossy().to_string());

    let config = AppConfig::from_env();
    let ctx = bootstrap(&config.database_path).expect("bootstrap store");
    ctx.connection
        .execute_batch(
            r#"
            INSERT INTO sites (name, address, division_id, latitude, longitude)
            VALUES ('Oakwood', '', 3, 0, 0);
            INSERT INTO sites (name, address, division_id, latitude, longitude)
            VALUES ('Nowhere', '', 3, 0, 0);
            INSERT INTO sites (name, address, division_id, latitude, longitude)
            VALUES ('Plaza', 'already known', 4, 32.05, 118.77);
            "#,
        )
        .expect("seed sites");

    let store = Arc::new(SqliteStore::new(Arc::new(Mutex::new(ctx.connection))));
    let resolver = GeocoderService::new(&config).expect("geocoder service");
    let limiter = RateLimiter::new(config.rate_per_sec, config.rate_burst);
    let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
    let cancel = CancellationToken::new();

    let worker = spawn_persistence_worker(
        Arc::clone(&store) as Arc<dyn SiteStore>,
        Arc::clone(&queue),
        cancel.clone(),
    );

    let sites = store.fetch_all().expect("fetch snapshot");
    assert_eq!(sites.len(), 3);

    let runner = BackfillRunner::new(resolver, limiter, Arc::clone(&queue), cancel.clone());
    let stats = runner.run(sites).await;

    assert_eq!(stats.total_sites, 3);
    assert_eq!(stats.candidates, 2);
    assert_eq!(stats.enriched, 1);
    assert_eq!(stats.no_match, 1);
    assert_eq!(stats.failed, 0);

    cancel.cancel();
    let applied = worker.await.expect("worker join");
    assert_eq!(applied, 1);

    let conn = store.connection();
    let conn = conn.lock();

    let (address, lat, lng, geocoded_at): (String, f64, f64, Option<String>) = conn
        .query_row(
            "SELECT address, latitude, longitude, geocoded_at FROM sites WHERE name = 'Oakwood'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("oakwood row");
    assert_eq!(address, "123 Oak St");
    assert_eq!(lat, 40.1);
    assert_eq!(lng, -73.9);
    assert!(geocoded_at.is_some());

    let (lat, geocoded_at): (f64, Option<String>) = conn
        .query_row(
            "SELECT latitude, geocoded_at FROM sites WHERE name = 'Nowhere'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("nowhere row");
    assert_eq!(lat, 0.0);
    assert!(geocoded_at.is_none());

    let (address, lat): (String, f64) = conn
        .query_row(
            "SELECT address, latitude FROM sites WHERE name = 'Plaza'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("plaza row");
    assert_eq!(address, "already known");
    assert_eq!(lat, 32.05);
}
