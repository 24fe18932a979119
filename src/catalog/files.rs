//! File records: creation, lookup, status transitions, resume probing

use super::models::{FileStatus, FileUpdate, NewFile, StoredFile};
use super::schema::files::{self, dsl as files_dsl};
use super::{Catalog, CatalogError, CatalogResult, json_map_string, to_json_map};
use crate::cipher::FileKey;
use chrono::Utc;
use diesel::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

impl Catalog {
    /// Create a new logical file record in `PENDING` state. The id and the
    /// opaque remote-facing name are generated here.
    pub fn create_file(&self, new: NewFile) -> CatalogResult<StoredFile> {
        let mut conn = self.conn()?;
        let row = FileRow {
            id: Uuid::new_v4().to_string(),
            original_name: new.original_name,
            opaque_name: Uuid::new_v4().simple().to_string(),
            description: new.description,
            encryption_key: new.encryption_key.as_bytes().to_vec(),
            client_fingerprint: new.client_fingerprint,
            uploaded_at: Utc::now().timestamp(),
            backend_id: new.backend_id,
            storage_context: json_map_string(&new.storage_context)?,
            status: FileStatus::Pending.as_str().to_string(),
        };

        diesel::insert_into(files::table)
            .values(&row)
            .execute(&mut conn)?;

        info!(target: "catalog", file_id = %row.id, name = %row.original_name, "file record created");
        StoredFile::try_from(row)
    }

    /// Fetch a file by id.
    pub fn get_file(&self, file_id: &str) -> CatalogResult<StoredFile> {
        let mut conn = self.conn()?;
        let row = files_dsl::files
            .filter(files_dsl::id.eq(file_id))
            .first::<FileRow>(&mut conn)
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(file_id.to_string()))?;
        StoredFile::try_from(row)
    }

    /// All files, newest first.
    pub fn list_files(&self) -> CatalogResult<Vec<StoredFile>> {
        let mut conn = self.conn()?;
        let rows = files_dsl::files
            .order((files_dsl::uploaded_at.desc(), files_dsl::id.asc()))
            .load::<FileRow>(&mut conn)?;
        rows.into_iter().map(StoredFile::try_from).collect()
    }

    /// Update fields of an existing file.
    pub fn update_file(&self, file_id: &str, update: FileUpdate) -> CatalogResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let changes = FileChangesRow {
            description: update.description,
            status: update.status.map(|s| s.as_str().to_string()),
            client_fingerprint: update.client_fingerprint,
            storage_context: update
                .storage_context
                .as_ref()
                .map(json_map_string)
                .transpose()?,
        };
        let affected = diesel::update(files_dsl::files.filter(files_dsl::id.eq(file_id)))
            .set(&changes)
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(CatalogError::NotFound(file_id.to_string()));
        }
        Ok(())
    }

    /// Delete a file; its chunk rows go with it (cascade).
    pub fn delete_file(&self, file_id: &str) -> CatalogResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::delete(files_dsl::files.filter(files_dsl::id.eq(file_id)))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(CatalogError::NotFound(file_id.to_string()));
        }
        info!(target: "catalog", file_id, "file record deleted");
        Ok(())
    }

    /// Transition a file to a new lifecycle status.
    pub fn change_status(&self, file_id: &str, status: FileStatus) -> CatalogResult<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(files_dsl::files.filter(files_dsl::id.eq(file_id)))
            .set(files_dsl::status.eq(status.as_str()))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(CatalogError::NotFound(file_id.to_string()));
        }
        debug!(target: "catalog", file_id, status = %status, "file status changed");
        Ok(())
    }

    /// Find the best candidate for resuming an interrupted upload: a
    /// `PENDING` file with the given fingerprint, preferring the one with
    /// the most chunks already persisted (ties broken by lowest id). An
    /// empty fingerprint never matches.
    pub fn find_resumable(&self, client_fingerprint: &str) -> CatalogResult<Option<StoredFile>> {
        if client_fingerprint.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn()?;
        let rows = files_dsl::files
            .filter(files_dsl::client_fingerprint.eq(client_fingerprint))
            .filter(files_dsl::status.eq(FileStatus::Pending.as_str()))
            .order(files_dsl::id.asc())
            .load::<FileRow>(&mut conn)?;

        let mut best: Option<(i64, FileRow)> = None;
        for row in rows {
            let count = super::chunks::count_chunks(&mut conn, &row.id)?;
            let better = match &best {
                None => true,
                Some((best_count, _)) => count > *best_count,
            };
            if better {
                best = Some((count, row));
            }
        }

        match best {
            Some((count, row)) => {
                debug!(
                    target: "catalog",
                    file_id = %row.id,
                    chunks = count,
                    "found resumable upload"
                );
                Ok(Some(StoredFile::try_from(row)?))
            }
            None => Ok(None),
        }
    }
}

// =========================================================================
// Row Types
// =========================================================================

#[derive(Queryable, Insertable)]
#[diesel(table_name = files)]
pub(crate) struct FileRow {
    pub id: String,
    pub original_name: String,
    pub opaque_name: String,
    pub description: String,
    pub encryption_key: Vec<u8>,
    pub client_fingerprint: String,
    pub uploaded_at: i64,
    pub backend_id: i64,
    pub storage_context: String,
    pub status: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = files)]
struct FileChangesRow {
    description: Option<String>,
    status: Option<String>,
    client_fingerprint: Option<String>,
    storage_context: Option<String>,
}

impl TryFrom<FileRow> for StoredFile {
    type Error = CatalogError;

    fn try_from(row: FileRow) -> CatalogResult<Self> {
        Ok(StoredFile {
            encryption_key: FileKey::from_slice(&row.encryption_key)?,
            storage_context: to_json_map(&row.storage_context)?,
            status: FileStatus::parse(&row.status)?,
            id: row.id,
            original_name: row.original_name,
            opaque_name: row.opaque_name,
            description: row.description,
            client_fingerprint: row.client_fingerprint,
            uploaded_at: row.uploaded_at,
            backend_id: row.backend_id,
        })
    }
}
