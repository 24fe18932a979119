//! Storage facade
//!
//! A thin, validating front for one backend driver. Resolves a backend
//! *name* to a driver instance (directory lookup, registry dispatch,
//! config validation) and wraps every delegation in defensive contract
//! checks so driver bugs surface as typed errors instead of corrupt state.

use crate::backend::{
    BackendRegistry, FileMeta, JsonMap, StorageBackend, StorageError, StorageResult,
};
use crate::catalog::Catalog;
use bytes::Bytes;
use tracing::{debug, info};

#[derive(Debug)]
pub struct StorageService {
    backend: Box<dyn StorageBackend>,
    backend_name: String,
    backend_id: i64,
}

impl StorageService {
    /// Resolve `backend_name` through the directory and registry and
    /// construct the driver. `skip_validation` bypasses config validation
    /// and is meant for test harnesses only.
    pub async fn open(
        backend_name: &str,
        catalog: &Catalog,
        registry: &BackendRegistry,
        http: reqwest::Client,
        skip_validation: bool,
    ) -> StorageResult<Self> {
        let record = catalog
            .get_backend_by_name(backend_name)
            .map_err(|e| StorageError::usage(format!("backend directory lookup failed: {e}")))?
            .ok_or_else(|| {
                StorageError::usage(format!("storage backend '{backend_name}' not found"))
            })?;

        let backend = registry
            .build(&record.platform, http, record.config, skip_validation)
            .await?;

        info!(
            target: "storage",
            backend = %backend_name,
            platform = %record.platform,
            "storage service ready"
        );

        Ok(Self {
            backend,
            backend_name: backend_name.to_string(),
            backend_id: record.id,
        })
    }

    /// Wrap an already-constructed driver. Lets tests and embedded setups
    /// supply their own backend implementation.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        backend_name: impl Into<String>,
        backend_id: i64,
    ) -> Self {
        Self {
            backend,
            backend_name: backend_name.into(),
            backend_id,
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Directory id of the backend this facade is bound to
    pub fn backend_id(&self) -> i64 {
        self.backend_id
    }

    pub fn max_chunk_size(&self) -> usize {
        self.backend.max_chunk_size()
    }

    /// Prepare remote storage for a new file.
    pub async fn prepare_storage(&self, file_meta: &FileMeta) -> StorageResult<JsonMap> {
        let context = self.backend.prepare_storage(file_meta).await?;
        debug!(target: "storage", backend = %self.backend_name, "storage prepared");
        Ok(context)
    }

    /// Upload one ciphertext chunk through the driver.
    pub async fn upload_chunk(
        &self,
        chunk: Bytes,
        storage_context: &JsonMap,
    ) -> StorageResult<JsonMap> {
        if chunk.is_empty() {
            return Err(StorageError::usage("encrypted chunk cannot be empty"));
        }

        let reference = self.backend.upload_chunk(chunk, storage_context).await?;
        if reference.is_empty() {
            return Err(StorageError::upload(
                "driver returned an empty chunk reference",
            ));
        }
        Ok(reference)
    }

    /// Download one ciphertext chunk through the driver.
    pub async fn download_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<Bytes> {
        if chunk_ref.is_empty() {
            return Err(StorageError::usage("chunk reference cannot be empty"));
        }

        let data = self.backend.download_chunk(chunk_ref, storage_context).await?;
        if data.is_empty() {
            return Err(StorageError::download("driver returned empty chunk data"));
        }
        Ok(data)
    }

    /// Delete one remote chunk through the driver.
    pub async fn delete_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<()> {
        if chunk_ref.is_empty() {
            return Err(StorageError::usage("chunk reference cannot be empty"));
        }
        self.backend.delete_chunk(chunk_ref, storage_context).await
    }
}
