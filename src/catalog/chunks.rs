//! Chunk records: one row per ciphertext chunk parked on a backend

use super::models::ChunkRecord;
use super::schema::chunks::{self, dsl as chunks_dsl};
use super::{Catalog, CatalogError, CatalogResult, json_map_string, to_json_map};
use crate::backend::JsonMap;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use tracing::debug;

impl Catalog {
    /// Record one uploaded chunk. Orders are 1-based and unique per file.
    pub fn create_chunk(
        &self,
        file_id: &str,
        order: i32,
        reference: &JsonMap,
    ) -> CatalogResult<ChunkRecord> {
        if order < 1 {
            return Err(CatalogError::Usage(format!(
                "chunk order must be >= 1, got {order}"
            )));
        }

        let mut conn = self.conn()?;
        let row = NewChunkRow {
            file_id: file_id.to_string(),
            chunk_order: order,
            reference: json_map_string(reference)?,
        };

        diesel::insert_into(chunks::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    CatalogError::Usage(format!(
                        "chunk {order} is already recorded for file {file_id}"
                    ))
                }
                other => CatalogError::Database(other),
            })?;

        let stored = chunks_dsl::chunks
            .filter(chunks_dsl::file_id.eq(file_id))
            .filter(chunks_dsl::chunk_order.eq(order))
            .first::<ChunkRow>(&mut conn)?;

        debug!(target: "catalog", file_id, order, "chunk recorded");
        ChunkRecord::try_from(stored)
    }

    /// All chunks of a file, in ascending order.
    pub fn list_chunks(&self, file_id: &str) -> CatalogResult<Vec<ChunkRecord>> {
        let mut conn = self.conn()?;
        let rows = chunks_dsl::chunks
            .filter(chunks_dsl::file_id.eq(file_id))
            .order(chunks_dsl::chunk_order.asc())
            .load::<ChunkRow>(&mut conn)?;
        rows.into_iter().map(ChunkRecord::try_from).collect()
    }

    /// The sorted chunk orders already persisted for a file.
    pub fn chunk_orders(&self, file_id: &str) -> CatalogResult<Vec<i32>> {
        let mut conn = self.conn()?;
        let orders = chunks_dsl::chunks
            .filter(chunks_dsl::file_id.eq(file_id))
            .select(chunks_dsl::chunk_order)
            .order(chunks_dsl::chunk_order.asc())
            .load::<i32>(&mut conn)?;
        Ok(orders)
    }
}

pub(crate) fn count_chunks(conn: &mut SqliteConnection, file_id: &str) -> CatalogResult<i64> {
    let count = chunks_dsl::chunks
        .filter(chunks_dsl::file_id.eq(file_id))
        .count()
        .get_result::<i64>(conn)?;
    Ok(count)
}

// =========================================================================
// Row Types
// =========================================================================

#[derive(Queryable)]
pub(crate) struct ChunkRow {
    pub id: i64,
    pub file_id: String,
    pub chunk_order: i32,
    pub reference: String,
}

#[derive(Insertable)]
#[diesel(table_name = chunks)]
struct NewChunkRow {
    file_id: String,
    chunk_order: i32,
    reference: String,
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = CatalogError;

    fn try_from(row: ChunkRow) -> CatalogResult<Self> {
        Ok(ChunkRecord {
            reference: to_json_map(&row.reference)?,
            id: row.id,
            file_id: row.file_id,
            order: row.chunk_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRegistry, PLATFORM_DISCORD};
    use crate::catalog::models::NewFile;
    use crate::cipher::FileKey;
    use serde_json::json;

    fn catalog_with_file() -> (Catalog, String) {
        let catalog = Catalog::open_in_memory().unwrap();
        let backend = catalog
            .create_backend(
                "discord_default",
                PLATFORM_DISCORD,
                &json!({
                    "bot_token": "t.t.t",
                    "server_id": "123456789012345678",
                    "channel_id": "876543210987654321",
                }),
                &BackendRegistry::builtin(),
            )
            .unwrap();
        let file = catalog
            .create_file(NewFile {
                original_name: "data.bin".into(),
                description: String::new(),
                encryption_key: FileKey::generate(),
                backend_id: backend.id,
                storage_context: JsonMap::new(),
                client_fingerprint: String::new(),
            })
            .unwrap();
        (catalog, file.id)
    }

    fn reference(message_id: &str) -> JsonMap {
        json!({ "message_id": message_id })
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn chunks_keep_their_references_in_order() {
        let (catalog, file_id) = catalog_with_file();
        // Insert out of order on purpose
        catalog.create_chunk(&file_id, 2, &reference("m2")).unwrap();
        catalog.create_chunk(&file_id, 1, &reference("m1")).unwrap();
        catalog.create_chunk(&file_id, 3, &reference("m3")).unwrap();

        let chunks = catalog.list_chunks(&file_id).unwrap();
        let orders: Vec<i32> = chunks.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(chunks[0].reference.get("message_id").unwrap(), "m1");

        assert_eq!(catalog.chunk_orders(&file_id).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let (catalog, file_id) = catalog_with_file();
        catalog.create_chunk(&file_id, 1, &reference("m1")).unwrap();
        let err = catalog
            .create_chunk(&file_id, 1, &reference("m1-again"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Usage(_)));
    }

    #[test]
    fn zero_or_negative_order_is_rejected() {
        let (catalog, file_id) = catalog_with_file();
        assert!(matches!(
            catalog.create_chunk(&file_id, 0, &reference("m")).unwrap_err(),
            CatalogError::Usage(_)
        ));
        assert!(matches!(
            catalog.create_chunk(&file_id, -1, &reference("m")).unwrap_err(),
            CatalogError::Usage(_)
        ));
    }

    #[test]
    fn orders_are_scoped_per_file() {
        let (catalog, file_id) = catalog_with_file();
        let other = {
            let backend = catalog.get_backend_by_name("discord_default").unwrap().unwrap();
            catalog
                .create_file(NewFile {
                    original_name: "other.bin".into(),
                    description: String::new(),
                    encryption_key: FileKey::generate(),
                    backend_id: backend.id,
                    storage_context: JsonMap::new(),
                    client_fingerprint: String::new(),
                })
                .unwrap()
        };

        catalog.create_chunk(&file_id, 1, &reference("a")).unwrap();
        catalog.create_chunk(&other.id, 1, &reference("b")).unwrap();

        assert_eq!(catalog.chunk_orders(&file_id).unwrap(), vec![1]);
        assert_eq!(catalog.chunk_orders(&other.id).unwrap(), vec![1]);
    }
}
