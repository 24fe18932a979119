use crate::backend::JsonMap;
use crate::cipher::FileKey;

use super::CatalogError;

/// Upload lifecycle state of a logical file.
///
/// `Pending` is the only state a resumable upload can be found in;
/// `Completed` is terminal with respect to uploads. `Failed` and `Error`
/// are set administratively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Completed,
    Failed,
    Error,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Failed => "FAILED",
            FileStatus::Error => "ERROR",
        }
    }

    /// Parse a status string. Anything outside the closed set is a usage
    /// error.
    pub fn parse(value: &str) -> Result<Self, CatalogError> {
        match value {
            "PENDING" => Ok(FileStatus::Pending),
            "COMPLETED" => Ok(FileStatus::Completed),
            "FAILED" => Ok(FileStatus::Failed),
            "ERROR" => Ok(FileStatus::Error),
            other => Err(CatalogError::Usage(format!(
                "invalid file status '{other}', must be one of PENDING, COMPLETED, FAILED, ERROR"
            ))),
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical file as recorded in the catalog. The content itself lives on
/// the storage backend as encrypted chunks.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub original_name: String,
    /// Generated identifier used toward the remote side
    pub opaque_name: String,
    pub description: String,
    pub encryption_key: FileKey,
    /// Caller-supplied opaque string used to locate a prior partial
    /// upload; empty means the file can never be resumed
    pub client_fingerprint: String,
    /// Unix timestamp of creation
    pub uploaded_at: i64,
    pub backend_id: i64,
    /// Backend-specific context produced by `prepare_storage`
    pub storage_context: JsonMap,
    pub status: FileStatus,
}

/// One stored ciphertext chunk of a logical file
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: String,
    /// 1-based position of the chunk in the file
    pub order: i32,
    /// Backend-specific handle for retrieving the chunk
    pub reference: JsonMap,
}

/// A named backend configuration
#[derive(Debug, Clone)]
pub struct BackendRecord {
    pub id: i64,
    pub name: String,
    pub platform: String,
    pub config: JsonMap,
}

/// Fields needed to create a new logical file record
#[derive(Debug, Clone)]
pub struct NewFile {
    pub original_name: String,
    pub description: String,
    pub encryption_key: FileKey,
    pub backend_id: i64,
    pub storage_context: JsonMap,
    pub client_fingerprint: String,
}

/// Optional field updates for an existing file record
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub description: Option<String>,
    pub status: Option<FileStatus>,
    pub client_fingerprint: Option<String>,
    pub storage_context: Option<JsonMap>,
}

impl FileUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.status.is_none()
            && self.client_fingerprint.is_none()
            && self.storage_context.is_none()
    }
}
