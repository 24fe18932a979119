//! Storage backend drivers
//!
//! A backend driver knows how to park ciphertext chunks on a remote
//! messaging platform and fetch them back. Drivers are stateless apart from
//! their configured credentials and may be shared across files stored on
//! the same backend.

mod error;
pub mod bot_channel;
pub mod registry;
pub mod validator;
pub mod webhook;

pub use bot_channel::BotChannelBackend;
pub use error::{StorageError, StorageResult};
pub use registry::{BackendFactory, BackendRegistry, PLATFORM_DISCORD, PLATFORM_DISCORD_WEBHOOK};
pub use webhook::WebhookBackend;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

/// Backend-specific JSON objects: storage contexts, chunk references,
/// and backend configs. Opaque to everything above the driver.
pub type JsonMap = serde_json::Map<String, Value>;

/// Base URL of the Discord REST API
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Default per-chunk plaintext budget (8 MiB, below Discord's 10 MiB cap
/// to leave room for IV and padding overhead)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Timeout for storage preparation and credential probes
pub const PREPARE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for chunk uploads and downloads
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata about the file an upload is being prepared for
#[derive(Debug, Clone, Default)]
pub struct FileMeta {
    pub filename: Option<String>,
}

impl FileMeta {
    pub fn for_filename(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
        }
    }
}

/// Contract every storage backend driver implements.
///
/// `prepare_storage` is called once per upload and produces the storage
/// context persisted on the logical file; `upload_chunk` and
/// `download_chunk` move one ciphertext chunk at a time. No retry policy is
/// applied at this layer.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Create the remote container for a new file (thread, bookmark, ...)
    /// and return the storage context to persist with it.
    async fn prepare_storage(&self, file_meta: &FileMeta) -> StorageResult<JsonMap>;

    /// Upload one ciphertext chunk. Returns the chunk reference needed to
    /// retrieve it later. Must not mutate `storage_context`.
    async fn upload_chunk(&self, chunk: Bytes, storage_context: &JsonMap)
        -> StorageResult<JsonMap>;

    /// Download one ciphertext chunk previously stored via `upload_chunk`.
    async fn download_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<Bytes>;

    /// Delete one remote chunk. Backends that cannot delete may no-op.
    async fn delete_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<()>;

    /// Maximum number of plaintext bytes per chunk.
    fn max_chunk_size(&self) -> usize {
        DEFAULT_MAX_CHUNK_SIZE
    }
}

/// Read a string-ish field from a backend JSON object. Discord snowflake
/// ids arrive either as strings or as integers depending on the source.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fetch a required string field from a context or reference object.
pub(crate) fn require_str<'a>(
    object: &'a JsonMap,
    key: &str,
    what: &str,
) -> Result<&'a str, String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("{what} must contain '{key}'"))
}
