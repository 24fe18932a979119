//! Local catalog
//!
//! SQLite-backed record of logical files, their chunk references, and the
//! named backend configurations, managed through Diesel with embedded
//! migrations. The catalog holds everything needed to find and decrypt a
//! file again: the per-file key, the chunk ordering, and the opaque
//! backend handles.

mod backends;
mod chunks;
mod files;
mod models;
mod schema;

pub use models::{BackendRecord, ChunkRecord, FileStatus, FileUpdate, NewFile, StoredFile};

use crate::cipher::CipherError;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/catalog");

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog error types
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Lookup by id returned nothing
    #[error("file not found: {0}")]
    NotFound(String),

    /// Caller violated a precondition
    #[error("{0}")]
    Usage(String),

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Connection pool failure
    #[error("database pool error: {0}")]
    Pool(String),

    /// A persisted JSON column failed to parse
    #[error("stored JSON is invalid: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted encryption key has the wrong shape
    #[error("stored encryption key is invalid: {0}")]
    InvalidKey(#[from] CipherError),

    /// Opening the database or running migrations failed
    #[error("failed to open catalog: {0}")]
    Open(String),
}

/// Enables foreign keys on every pooled connection; SQLite leaves them off
/// by default and chunk cascade deletion depends on them.
#[derive(Debug)]
struct ConnectionSetup;

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionSetup
{
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// SQLite-backed catalog of files, chunks, and backend configurations.
pub struct Catalog {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl Catalog {
    /// Create or open the catalog at the default location
    /// (`~/.discord-vault/catalog.db`).
    pub fn open_default() -> CatalogResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CatalogError::Open("unable to determine home directory".into()))?;
        Self::open(home.join(".discord-vault").join("catalog.db"))
    }

    /// Create or open the catalog at a specific path. The schema is
    /// migrated to the latest version on startup.
    pub fn open(path: PathBuf) -> CatalogResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CatalogError::Open(format!(
                    "failed to create catalog parent dir {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let database_url = path
            .to_str()
            .ok_or_else(|| CatalogError::Open("invalid catalog database path".into()))?
            .to_string();
        Self::from_url(&database_url, 1)
    }

    /// An in-memory catalog for tests and ephemeral runs.
    pub fn open_in_memory() -> CatalogResult<Self> {
        // A single pooled connection keeps the in-memory database alive
        Self::from_url(":memory:", 1)
    }

    fn from_url(database_url: &str, max_size: u32) -> CatalogResult<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionSetup))
            .build(manager)
            .map_err(|e| CatalogError::Open(format!("failed to build connection pool: {e}")))?;

        let mut conn = pool
            .get()
            .map_err(|e| CatalogError::Open(format!("failed to get connection: {e}")))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| CatalogError::Open(format!("failed to run migrations: {e}")))?;

        tracing::debug!(target: "catalog", database_url, "catalog opened");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub(crate) fn conn(
        &self,
    ) -> CatalogResult<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool
            .get()
            .map_err(|e| CatalogError::Pool(e.to_string()))
    }
}

pub(crate) fn to_json_map(raw: &str) -> CatalogResult<crate::backend::JsonMap> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(CatalogError::Usage(
            "stored JSON column is not an object".into(),
        )),
    }
}

pub(crate) fn json_map_string(map: &crate::backend::JsonMap) -> CatalogResult<String> {
    Ok(serde_json::to_string(map)?)
}
