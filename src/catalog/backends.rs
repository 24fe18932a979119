//! Backend directory: named backend configurations

use super::models::BackendRecord;
use super::schema::backends::{self, dsl as backends_dsl};
use super::{Catalog, CatalogError, CatalogResult, json_map_string, to_json_map};
use crate::backend::BackendRegistry;
use diesel::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

impl Catalog {
    /// Fetch a backend configuration by id.
    pub fn get_backend(&self, backend_id: i64) -> CatalogResult<BackendRecord> {
        let mut conn = self.conn()?;
        let row = backends_dsl::backends
            .filter(backends_dsl::id.eq(backend_id))
            .first::<BackendRow>(&mut conn)
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("backend {backend_id}")))?;
        BackendRecord::try_from(row)
    }

    /// Fetch a backend configuration by its unique name.
    pub fn get_backend_by_name(&self, name: &str) -> CatalogResult<Option<BackendRecord>> {
        let mut conn = self.conn()?;
        let row = backends_dsl::backends
            .filter(backends_dsl::name.eq(name))
            .first::<BackendRow>(&mut conn)
            .optional()?;
        row.map(BackendRecord::try_from).transpose()
    }

    /// All configured backends, ordered by name.
    pub fn list_backends(&self) -> CatalogResult<Vec<BackendRecord>> {
        let mut conn = self.conn()?;
        let rows = backends_dsl::backends
            .order(backends_dsl::name.asc())
            .load::<BackendRow>(&mut conn)?;
        rows.into_iter().map(BackendRecord::try_from).collect()
    }

    /// Register a new named backend. The name must be unused, the platform
    /// known to the registry, and the config a non-empty JSON object.
    pub fn create_backend(
        &self,
        name: &str,
        platform: &str,
        config: &Value,
        registry: &BackendRegistry,
    ) -> CatalogResult<BackendRecord> {
        debug!(target: "catalog", name, platform, "creating backend");

        if name.is_empty() || platform.is_empty() {
            return Err(CatalogError::Usage(
                "name and platform are required to create a backend".into(),
            ));
        }
        let config_map = match config {
            Value::Object(map) if !map.is_empty() => map,
            Value::Object(_) => {
                return Err(CatalogError::Usage("backend config cannot be empty".into()));
            }
            _ => {
                return Err(CatalogError::Usage("backend config must be a JSON object".into()));
            }
        };
        if !registry.contains(platform) {
            return Err(CatalogError::Usage(format!(
                "invalid platform '{platform}', must be one of {:?}",
                registry.platforms()
            )));
        }
        if self.get_backend_by_name(name)?.is_some() {
            return Err(CatalogError::Usage(format!(
                "backend with name '{name}' already exists"
            )));
        }

        let mut conn = self.conn()?;
        let row = NewBackendRow {
            name: name.to_string(),
            platform: platform.to_string(),
            config: json_map_string(config_map)?,
        };
        diesel::insert_into(backends::table)
            .values(&row)
            .execute(&mut conn)?;

        let stored = backends_dsl::backends
            .filter(backends_dsl::name.eq(name))
            .first::<BackendRow>(&mut conn)?;

        info!(target: "catalog", name, platform, id = stored.id, "backend created");
        BackendRecord::try_from(stored)
    }
}

// =========================================================================
// Row Types
// =========================================================================

#[derive(Queryable)]
pub(crate) struct BackendRow {
    pub id: i64,
    pub name: String,
    pub platform: String,
    pub config: String,
}

#[derive(Insertable)]
#[diesel(table_name = backends)]
struct NewBackendRow {
    name: String,
    platform: String,
    config: String,
}

impl TryFrom<BackendRow> for BackendRecord {
    type Error = CatalogError;

    fn try_from(row: BackendRow) -> CatalogResult<Self> {
        Ok(BackendRecord {
            config: to_json_map(&row.config)?,
            id: row.id,
            name: row.name,
            platform: row.platform,
        })
    }
}
