use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::AppResult;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

/// Opens (creating if necessary) the backfill database. A failure here is
/// fatal to the process; callers must not continue without a store.
pub fn bootstrap<P: AsRef<Path>>(db_path: P) -> AppResult<DatabaseContext> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "database context established"
    );

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            division_id INTEGER NOT NULL DEFAULT 0,
            latitude REAL NOT NULL DEFAULT 0,
            longitude REAL NOT NULL DEFAULT 0,
            geocoded_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sites_latitude ON sites(latitude);
        "#,
    )?;
    Ok(())
}

/// A location record. `latitude == 0.0` marks the coordinates as unset and
/// makes the site a candidate for enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub division_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Site {
    pub fn is_candidate(&self) -> bool {
        self.latitude == 0.0
    }
}

/// The two store operations the pipeline consumes. The producer only reads;
/// the consumer only writes.
pub trait SiteStore: Send + Sync {
    /// All sites, in stored order.
    fn fetch_all(&self) -> AppResult<Vec<Site>>;

    /// Partial update keyed by id: address and coordinates only. Name and
    /// division are never touched by the pipeline.
    fn update_location(&self, site: &Site) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }
}

impl SiteStore for SqliteStore {
    fn fetch_all(&self) -> AppResult<Vec<Site>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, division_id, latitude, longitude
            FROM sites ORDER BY id ASC",
        )?;
        let sites = stmt
            .query_map([], |row| {
                Ok(Site {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    address: row.get(2)?,
                    division_id: row.get(3)?,
                    latitude: row.get(4)?,
                    longitude: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    fn update_location(&self, site: &Site) -> AppResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "UPDATE sites
            SET address = ?2, latitude = ?3, longitude = ?4, geocoded_at = ?5
            WHERE id = ?1",
            (
                site.id,
                site.address.as_str(),
                site.latitude,
                site.longitude,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }
}
