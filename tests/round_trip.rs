//! End-to-end upload/download round trips against an in-memory backend,
//! exercised through the public API only.

use async_trait::async_trait;
use bytes::Bytes;
use discord_vault::backend::{
    BackendFactory, BackendRegistry, FileMeta, JsonMap, StorageBackend, StorageError,
    StorageResult,
};
use discord_vault::catalog::{Catalog, FileStatus};
use discord_vault::service::{FileService, UploadRequest};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Chunk store shared across driver instances, as if it were the remote
/// platform.
#[derive(Default)]
#[derive(Debug)]
struct RemoteState {
    store: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicUsize,
}

#[derive(Debug)]
struct InMemoryBackend {
    state: Arc<RemoteState>,
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn prepare_storage(&self, meta: &FileMeta) -> StorageResult<JsonMap> {
        let container = format!("container-{}", meta.filename.as_deref().unwrap_or("unnamed"));
        Ok(json!({ "container": container }).as_object().unwrap().clone())
    }

    async fn upload_chunk(&self, chunk: Bytes, _ctx: &JsonMap) -> StorageResult<JsonMap> {
        let id = (self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        self.state
            .store
            .lock()
            .unwrap()
            .insert(id.clone(), chunk.to_vec());
        Ok(json!({ "message_id": id }).as_object().unwrap().clone())
    }

    async fn download_chunk(&self, chunk_ref: &JsonMap, _ctx: &JsonMap) -> StorageResult<Bytes> {
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
        if let Some(id) = chunk_ref.get("message_id").and_then(serde_json::Value::as_str) {
            self.state.store.lock().unwrap().remove(id);
        }
        Ok(())
    }
}

struct InMemoryFactory {
    state: Arc<RemoteState>,
}

#[async_trait]
impl BackendFactory for InMemoryFactory {
    async fn build(
        &self,
        _http: reqwest::Client,
        _config: JsonMap,
        _skip_validation: bool,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(InMemoryBackend {
            state: self.state.clone(),
        }))
    }
}

fn registry_with(state: &Arc<RemoteState>) -> Arc<BackendRegistry> {
    let mut registry = BackendRegistry::builtin();
    registry.register(
        "InMemory",
        Box::new(InMemoryFactory {
            state: state.clone(),
        }),
    );
    Arc::new(registry)
}

fn service_over(catalog: &Arc<Catalog>, registry: &Arc<BackendRegistry>) -> FileService {
    FileService::new(catalog.clone(), registry.clone(), reqwest::Client::new()).skip_validation()
}

async fn download_all(service: &FileService, file: &discord_vault::StoredFile) -> Vec<u8> {
    let stream = service.download_stream(file).await.unwrap();
    futures::pin_mut!(stream);
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn multi_chunk_binary_round_trip() {
    let state = Arc::new(RemoteState::default());
    let registry = registry_with(&state);
    let catalog = Arc::new(Catalog::open_in_memory().unwrap());
    catalog
        .create_backend("mem", "InMemory", &json!({"kind": "test"}), &registry)
        .unwrap();
    let service = service_over(&catalog, &registry);

    // Not a multiple of the chunk size, with all byte values represented
    let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let mut source = &data[..];
    let file = service
        .upload(
            &mut source,
            UploadRequest {
                filename: "blob.bin".into(),
                backend_name: "mem".into(),
                chunk_size: 4096,
                description: "raw bytes".into(),
                client_fingerprint: String::new(),
            },
        )
        .await
        .unwrap();

    assert_eq!(file.status, FileStatus::Completed);
    assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1, 2, 3]);
    assert_eq!(download_all(&service, &file).await, data);

    // The remote only ever saw ciphertext
    let leading = &data[..64];
    for stored in state.store.lock().unwrap().values() {
        assert!(!stored.windows(64).any(|window| window == leading));
    }
}

#[tokio::test]
async fn resume_survives_a_service_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");

    let state = Arc::new(RemoteState::default());
    let registry = registry_with(&state);
    let data = vec![0x5au8; 5000];
    let request = UploadRequest {
        filename: "large.bin".into(),
        backend_name: "mem".into(),
        chunk_size: 1024,
        description: String::new(),
        client_fingerprint: "restart-fp".into(),
    };

    // First process: upload three of five chunks, then die
    {
        let catalog = Arc::new(Catalog::open(db_path.clone()).unwrap());
        catalog
            .create_backend("mem", "InMemory", &json!({"kind": "test"}), &registry)
            .unwrap();
        let service = service_over(&catalog, &registry);

        let mut source = &data[..3072];
        let partial = service.upload(&mut source, request.clone()).await.unwrap();
        // Simulate the crash by resetting the finished state back to
        // pending, as if the loop had been cut after chunk 3
        catalog
            .change_status(&partial.id, FileStatus::Pending)
            .unwrap();
    }

    // Second process: a fresh catalog handle resumes the same file
    {
        let catalog = Arc::new(Catalog::open(db_path).unwrap());
        let service = service_over(&catalog, &registry);

        let mut source = &data[..];
        let file = service.upload(&mut source, request).await.unwrap();

        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(catalog.chunk_orders(&file.id).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(download_all(&service, &file).await, data);
    }
}
