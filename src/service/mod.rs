//! File service
//!
//! Orchestrates uploads and downloads: slices the caller's byte source
//! into chunks, encrypts each chunk, parks it on the storage backend, and
//! records the reference in the catalog. Interrupted uploads stay
//! `PENDING` with their chunks on record; a later upload with the same
//! client fingerprint resumes where the previous one stopped.

use crate::backend::{BackendRegistry, FileMeta, StorageError};
use crate::catalog::{Catalog, CatalogError, FileStatus, NewFile, StoredFile};
use crate::cipher::{ChunkCipher, CipherError};
use crate::storage::StorageService;
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Result type for file service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// File service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Download was requested for a file with no chunks on record
    #[error("no chunks found for the given file")]
    NoChunks,

    /// Caller violated a precondition
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Reading the plaintext source failed
    #[error("failed to read upload source: {0}")]
    Source(#[from] std::io::Error),
}

/// Parameters for one upload call
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    /// Name of the backend to store a fresh upload on
    pub backend_name: String,
    /// Plaintext bytes per chunk
    pub chunk_size: usize,
    pub description: String,
    /// Opaque resume handle; empty disables resuming
    pub client_fingerprint: String,
}

pub struct FileService {
    catalog: Arc<Catalog>,
    registry: Arc<BackendRegistry>,
    http: reqwest::Client,
    skip_validation: bool,
}

impl FileService {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<BackendRegistry>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            catalog,
            registry,
            http,
            skip_validation: false,
        }
    }

    /// Skip backend config validation when constructing drivers. Test
    /// harnesses only.
    pub fn skip_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    async fn open_storage(&self, backend_name: &str) -> ServiceResult<StorageService> {
        Ok(StorageService::open(
            backend_name,
            &self.catalog,
            &self.registry,
            self.http.clone(),
            self.skip_validation,
        )
        .await?)
    }

    /// Open a facade for the backend a stored file lives on.
    async fn open_storage_for(&self, file: &StoredFile) -> ServiceResult<StorageService> {
        let record = self.catalog.get_backend(file.backend_id)?;
        self.open_storage(&record.name).await
    }

    /// Upload a file, resuming a prior interrupted upload when the
    /// fingerprint matches one.
    ///
    /// The source is read in `chunk_size` slices; a resumed upload must be
    /// driven with the same chunk size as the original, otherwise the
    /// slices cannot line up with the chunks already on record.
    pub async fn upload<R>(&self, source: &mut R, request: UploadRequest) -> ServiceResult<StoredFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        info!(
            target: "service",
            filename = %request.filename,
            chunk_size = request.chunk_size,
            "starting file upload"
        );

        let pending = if request.client_fingerprint.is_empty() {
            warn!(
                target: "service",
                filename = %request.filename,
                "no client fingerprint provided, this upload cannot be resumed if interrupted"
            );
            None
        } else {
            self.catalog.find_resumable(&request.client_fingerprint)?
        };

        let (file, storage, cipher, known_orders) = match pending {
            None => {
                let storage = self.open_storage(&request.backend_name).await?;
                self.check_chunk_size(&request, &storage)?;

                let cipher = ChunkCipher::generate();
                let context = storage
                    .prepare_storage(&FileMeta::for_filename(&request.filename))
                    .await?;
                let file = self.catalog.create_file(NewFile {
                    original_name: request.filename.clone(),
                    description: request.description.clone(),
                    encryption_key: cipher.key().clone(),
                    backend_id: storage.backend_id(),
                    storage_context: context,
                    client_fingerprint: request.client_fingerprint.clone(),
                })?;
                info!(target: "service", file_id = %file.id, "created file record");
                (file, storage, cipher, Vec::new())
            }
            Some(file) => {
                info!(
                    target: "service",
                    file_id = %file.id,
                    fingerprint = %request.client_fingerprint,
                    "found pending upload, resuming"
                );
                let storage = self.open_storage_for(&file).await?;
                self.check_chunk_size(&request, &storage)?;

                let cipher = ChunkCipher::from_key(file.encryption_key.clone());
                let known_orders = self.catalog.chunk_orders(&file.id)?;
                debug!(target: "service", existing = ?known_orders, "chunks already persisted");
                (file, storage, cipher, known_orders)
            }
        };

        let mut order: i32 = 1;
        loop {
            let slice = read_slice(source, request.chunk_size).await?;
            // An empty file is still stored as one (empty) chunk
            if slice.is_empty() && order > 1 {
                break;
            }

            if known_orders.binary_search(&order).is_ok() {
                info!(target: "service", file_id = %file.id, order, "skipping already uploaded chunk");
            } else {
                debug!(target: "service", file_id = %file.id, order, size = slice.len(), "processing chunk");
                let encrypted = cipher.encrypt_chunk(&slice);
                let reference = storage
                    .upload_chunk(Bytes::from(encrypted), &file.storage_context)
                    .await?;
                self.catalog.create_chunk(&file.id, order, &reference)?;
            }

            let at_eof = slice.len() < request.chunk_size;
            order += 1;
            if at_eof {
                break;
            }
        }

        self.catalog.change_status(&file.id, FileStatus::Completed)?;
        info!(
            target: "service",
            file_id = %file.id,
            chunks = order - 1,
            "file upload completed"
        );
        self.catalog.get_file(&file.id).map_err(Into::into)
    }

    /// Lazily stream the decrypted content of a stored file. No chunk is
    /// fetched from the backend until the consumer polls for it.
    pub async fn download_stream(
        &self,
        file: &StoredFile,
    ) -> ServiceResult<impl Stream<Item = ServiceResult<Bytes>> + Send + 'static> {
        let chunks = self.catalog.list_chunks(&file.id)?;
        if chunks.is_empty() {
            warn!(target: "service", file_id = %file.id, "no chunks found for file");
            return Err(ServiceError::NoChunks);
        }

        info!(
            target: "service",
            file_id = %file.id,
            chunks = chunks.len(),
            "starting decrypted stream"
        );

        let storage = self.open_storage_for(file).await?;
        let cipher = ChunkCipher::from_key(file.encryption_key.clone());
        let context = file.storage_context.clone();

        let state = (storage, cipher, context, chunks.into_iter());
        Ok(futures::stream::try_unfold(
            state,
            |(storage, cipher, context, mut chunks)| async move {
                let Some(chunk) = chunks.next() else {
                    return Ok(None);
                };
                debug!(
                    target: "service",
                    file_id = %chunk.file_id,
                    order = chunk.order,
                    "fetching chunk"
                );
                let encrypted = storage.download_chunk(&chunk.reference, &context).await?;
                let plaintext = cipher.decrypt_chunk(&encrypted)?;
                Ok(Some((
                    Bytes::from(plaintext),
                    (storage, cipher, context, chunks),
                )))
            },
        ))
    }

    /// Delete a stored file: remote chunks first, in order, then the
    /// catalog record. A storage-side failure aborts before the record is
    /// touched so a later retry can finish the job.
    pub async fn delete(&self, file: &StoredFile) -> ServiceResult<()> {
        info!(target: "service", file_id = %file.id, "starting file deletion");

        let chunks = self.catalog.list_chunks(&file.id)?;
        let storage = self.open_storage_for(file).await?;
        for chunk in &chunks {
            storage
                .delete_chunk(&chunk.reference, &file.storage_context)
                .await?;
            debug!(target: "service", file_id = %file.id, order = chunk.order, "remote chunk deleted");
        }

        self.catalog.delete_file(&file.id)?;
        info!(target: "service", file_id = %file.id, "file deleted");
        Ok(())
    }

    fn check_chunk_size(
        &self,
        request: &UploadRequest,
        storage: &StorageService,
    ) -> ServiceResult<()> {
        if request.chunk_size == 0 {
            return Err(ServiceError::Usage("chunk_size must be positive".into()));
        }
        let max = storage.max_chunk_size();
        if request.chunk_size > max {
            return Err(ServiceError::Usage(format!(
                "chunk_size {} exceeds the backend's maximum of {max}",
                request.chunk_size
            )));
        }
        Ok(())
    }
}

/// Read up to `chunk_size` bytes from the source, short only at EOF.
async fn read_slice<R>(source: &mut R, chunk_size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendFactory, JsonMap, StorageBackend, StorageResult};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory backend shared by every driver instance the factory
    /// hands out, with call counters and failure injection.
    #[derive(Default, Debug)]
    struct MockState {
        store: Mutex<HashMap<String, Vec<u8>>>,
        next_id: AtomicUsize,
        prepare_calls: AtomicUsize,
        upload_calls: AtomicUsize,
        download_calls: AtomicUsize,
        /// Fail the nth upload call (0 = disarmed)
        fail_on_upload: AtomicUsize,
        fail_deletes: AtomicBool,
    }

    #[derive(Debug)]
    struct MockBackend {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl StorageBackend for MockBackend {
        async fn prepare_storage(&self, _meta: &FileMeta) -> StorageResult<JsonMap> {
            self.state.prepare_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "container": "c-1" }).as_object().unwrap().clone())
        }

        async fn upload_chunk(&self, chunk: Bytes, _ctx: &JsonMap) -> StorageResult<JsonMap> {
            let call = self.state.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.state.fail_on_upload.load(Ordering::SeqCst) == call {
                return Err(StorageError::upload("injected failure"));
            }
            let id = (self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            self.state
                .store
                .lock()
                .unwrap()
                .insert(id.clone(), chunk.to_vec());
            Ok(json!({ "message_id": id }).as_object().unwrap().clone())
        }

        async fn download_chunk(&self, chunk_ref: &JsonMap, _ctx: &JsonMap) -> StorageResult<Bytes> {
            self.state.download_calls.fetch_add(1, Ordering::SeqCst);
            let id = chunk_ref
                .get("message_id")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| StorageError::download("missing message_id"))?;
            self.state
                .store
                .lock()
                .unwrap()
                .get(id)
                .map(|data| Bytes::from(data.clone()))
                .ok_or_else(|| StorageError::download(format!("no chunk stored under {id}")))
        }

        async fn delete_chunk(&self, chunk_ref: &JsonMap, _ctx: &JsonMap) -> StorageResult<()> {
            if self.state.fail_deletes.load(Ordering::SeqCst) {
                return Err(StorageError::delete("injected delete failure"));
            }
            if let Some(id) = chunk_ref.get("message_id").and_then(serde_json::Value::as_str) {
                self.state.store.lock().unwrap().remove(id);
            }
            Ok(())
        }
    }

    struct MockFactory {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl BackendFactory for MockFactory {
        async fn build(
            &self,
            _http: reqwest::Client,
            _config: JsonMap,
            _skip_validation: bool,
        ) -> StorageResult<Box<dyn StorageBackend>> {
            Ok(Box::new(MockBackend {
                state: self.state.clone(),
            }))
        }
    }

    fn setup() -> (FileService, Arc<Catalog>, Arc<MockState>) {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let state = Arc::new(MockState::default());
        let mut registry = BackendRegistry::builtin();
        registry.register(
            "Mock",
            Box::new(MockFactory {
                state: state.clone(),
            }),
        );
        let registry = Arc::new(registry);
        catalog
            .create_backend("mock_backend", "Mock", &json!({"kind": "in-memory"}), &registry)
            .unwrap();
        let service =
            FileService::new(catalog.clone(), registry, reqwest::Client::new()).skip_validation();
        (service, catalog, state)
    }

    fn request(chunk_size: usize, fingerprint: &str) -> UploadRequest {
        UploadRequest {
            filename: "data.bin".into(),
            backend_name: "mock_backend".into(),
            chunk_size,
            description: String::new(),
            client_fingerprint: fingerprint.into(),
        }
    }

    async fn collect(service: &FileService, file: &StoredFile) -> Vec<u8> {
        let stream = service.download_stream(file).await.unwrap();
        futures::pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn fresh_upload_single_chunk_roundtrips() {
        let (service, catalog, state) = setup();
        let data = b"hello world .........\n";

        let mut source = &data[..];
        let file = service.upload(&mut source, request(4096, "")).await.unwrap();

        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1]);
        assert_eq!(state.prepare_calls.load(Ordering::SeqCst), 1);
        assert_eq!(collect(&service, &file).await, data);
    }

    #[tokio::test]
    async fn fresh_upload_three_chunks_roundtrips() {
        let (service, catalog, _state) = setup();
        let data = vec![0x41u8; 3072];

        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();

        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1, 2, 3]);
        assert_eq!(collect(&service, &file).await, data);
    }

    #[tokio::test]
    async fn exact_chunk_size_produces_one_chunk() {
        let (service, catalog, _state) = setup();
        let data = vec![7u8; 1024];
        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn one_extra_byte_produces_two_chunks() {
        let (service, catalog, _state) = setup();
        let data = vec![7u8; 1025];
        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1, 2]);
        assert_eq!(collect(&service, &file).await, data);
    }

    #[tokio::test]
    async fn empty_file_becomes_one_empty_chunk() {
        let (service, catalog, _state) = setup();
        let mut source: &[u8] = b"";
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();

        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1]);
        assert_eq!(collect(&service, &file).await, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn failed_upload_stays_pending_and_resumes() {
        let (service, catalog, state) = setup();
        let data = vec![0x41u8; 3072];

        // First attempt: the third chunk upload blows up
        state.fail_on_upload.store(3, Ordering::SeqCst);
        let mut source = &data[..];
        let err = service
            .upload(&mut source, request(1024, "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::Upload(_))));

        let pending = catalog.find_resumable("abc").unwrap().unwrap();
        assert_eq!(pending.status, FileStatus::Pending);
        assert_eq!(catalog.chunk_orders(&pending.id).unwrap(), vec![1, 2]);

        // Second attempt with the same fingerprint and source picks up at
        // chunk 3: exactly one more driver upload call
        state.fail_on_upload.store(0, Ordering::SeqCst);
        let calls_before = state.upload_calls.load(Ordering::SeqCst);
        let mut source = &data[..];
        let file = service
            .upload(&mut source, request(1024, "abc"))
            .await
            .unwrap();

        assert_eq!(state.upload_calls.load(Ordering::SeqCst), calls_before + 1);
        assert_eq!(file.id, pending.id);
        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1, 2, 3]);
        assert_eq!(collect(&service, &file).await, data);
        // One prepare call total: the resumed upload reuses the container
        assert_eq!(state.prepare_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn download_stream_is_lazy() {
        let (service, catalog, state) = setup();
        let data = vec![9u8; 3000];
        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();
        assert_eq!(catalog.chunk_orders(&file.id).unwrap().len(), 3);

        let stream = service.download_stream(&file).await.unwrap();
        assert_eq!(state.download_calls.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(state.download_calls.load(Ordering::SeqCst), 0);

        let stream = service.download_stream(&file).await.unwrap();
        futures::pin_mut!(stream);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(state.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.len(), 1024);
    }

    #[tokio::test]
    async fn download_without_chunks_fails() {
        let (service, catalog, _state) = setup();
        let backend = catalog.get_backend_by_name("mock_backend").unwrap().unwrap();
        let file = catalog
            .create_file(NewFile {
                original_name: "empty.bin".into(),
                description: String::new(),
                encryption_key: crate::cipher::FileKey::generate(),
                backend_id: backend.id,
                storage_context: JsonMap::new(),
                client_fingerprint: String::new(),
            })
            .unwrap();

        let err = match service.download_stream(&file).await {
            Err(e) => e,
            Ok(_) => panic!("called `Result::unwrap_err()` on an `Ok` value"),
        };
        assert!(matches!(err, ServiceError::NoChunks));
    }

    #[tokio::test]
    async fn oversized_chunk_size_is_rejected() {
        let (service, _catalog, _state) = setup();
        let mut source: &[u8] = b"data";
        let err = service
            .upload(&mut source, request(9 * 1024 * 1024, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Usage(_)));

        let mut source: &[u8] = b"data";
        let err = service.upload(&mut source, request(0, "")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Usage(_)));
    }

    #[tokio::test]
    async fn delete_removes_remote_chunks_then_record() {
        let (service, catalog, state) = setup();
        let data = vec![1u8; 2048];
        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();
        assert_eq!(state.store.lock().unwrap().len(), 2);

        service.delete(&file).await.unwrap();
        assert!(state.store.lock().unwrap().is_empty());
        assert!(matches!(
            catalog.get_file(&file.id).unwrap_err(),
            CatalogError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_failure_keeps_the_record() {
        let (service, catalog, state) = setup();
        let data = vec![1u8; 512];
        let mut source = &data[..];
        let file = service.upload(&mut source, request(1024, "")).await.unwrap();

        state.fail_deletes.store(true, Ordering::SeqCst);
        let err = service.delete(&file).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::Delete(_))));

        // The record survives so the deletion can be retried later
        assert!(catalog.get_file(&file.id).is_ok());
    }

    #[tokio::test]
    async fn uploads_with_different_fingerprints_do_not_mix() {
        let (service, catalog, _state) = setup();
        let data = vec![2u8; 100];

        let mut source = &data[..];
        let a = service.upload(&mut source, request(64, "fp-a")).await.unwrap();
        let mut source = &data[..];
        let b = service.upload(&mut source, request(64, "fp-b")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(catalog.chunk_orders(&a.id).unwrap(), vec![1, 2]);
        assert_eq!(catalog.chunk_orders(&b.id).unwrap(), vec![1, 2]);
    }
}
