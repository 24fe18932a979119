pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod cipher;
pub mod logging;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use backend::{BackendRegistry, StorageBackend, StorageError};
pub use catalog::{Catalog, FileStatus, StoredFile};
pub use cipher::{ChunkCipher, FileKey};
pub use logging::LogConfig;
pub use service::{FileService, ServiceError, UploadRequest};
pub use storage::StorageService;
