//! Disk-backed file storage implementation
//!
//! Streams part bodies into files under a configured directory. Each file
//! carries a JSON sidecar (`<name>.json`) holding its record, so lifecycle
//! state survives restarts. Same-name writes are serialized behind an async
//! write lock; the record index is an in-memory cache over the sidecars.

use crate::config::StorageConfig;
use crate::errors::{codes, ErrorRegistry, UploadError};
use crate::storage::{
    file_name_for, FileInit, FileRecord, FileStorage, UploadStatus, WriteRequest,
};
use crate::validator::{ValidationCheck, Validator};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Disk storage backend.
pub struct DiskStore {
    directory: PathBuf,
    records: Mutex<HashMap<String, FileRecord>>,
    write_lock: tokio::sync::Mutex<()>,
    validation: Validator<FileInit>,
}

impl DiskStore {
    /// Build the store and register its creation-time validation chain.
    /// Check responses land in the registry under `ValidationError<Key>`.
    pub fn new(config: &StorageConfig, registry: &mut ErrorRegistry) -> Self {
        let directory = PathBuf::from(&config.directory);
        if !directory.exists() {
            std::fs::create_dir_all(&directory).expect("Failed to create storage directory");
        }
        info!("Using disk storage directory: {}", directory.display());

        let max_upload_size = config.max_upload_size;
        let allowed_content_types = config.allowed_content_types.clone();
        let mut validation = Validator::new();
        validation.add(
            registry,
            vec![
                (
                    "size".to_string(),
                    ValidationCheck::new(move |init: &FileInit| {
                        init.size.map_or(true, |size| size <= max_upload_size)
                    })
                    .response(413, "Upload exceeds the allowed size"),
                ),
                (
                    "mime".to_string(),
                    ValidationCheck::new(move |init: &FileInit| {
                        content_type_allowed(init.content_type.as_deref(), &allowed_content_types)
                    })
                    .response(415, "Unsupported content type"),
                ),
                (
                    "filename".to_string(),
                    ValidationCheck::new(|init: &FileInit| {
                        acceptable_filename(init.original_name.as_deref())
                    })
                    .response(400, "Invalid file name"),
                ),
            ],
        );

        Self {
            directory,
            records: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            validation,
        }
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", name))
    }

    /// Fetch a record from the cache, falling back to its sidecar on disk.
    fn load_record(&self, name: &str) -> Option<FileRecord> {
        if let Some(found) = self.records.lock().unwrap().get(name) {
            return Some(found.clone());
        }
        let raw = std::fs::read(self.meta_path(name)).ok()?;
        let record: FileRecord = serde_json::from_slice(&raw).ok()?;
        self.records
            .lock()
            .unwrap()
            .insert(name.to_string(), record.clone());
        Some(record)
    }

    fn persist_record(&self, record: &FileRecord) -> Result<(), UploadError> {
        let encoded = serde_json::to_vec_pretty(record)
            .map_err(|err| UploadError::with_message(codes::STORAGE_ERROR, err.to_string()))?;
        std::fs::write(self.meta_path(&record.name), encoded)?;
        self.records
            .lock()
            .unwrap()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }
}

#[async_trait(?Send)]
impl FileStorage for DiskStore {
    async fn create(&self, init: FileInit) -> Result<FileRecord, UploadError> {
        self.validation.verify(&init).await?;
        let name = file_name_for(&init);

        if let Some(existing) = self.load_record(&name) {
            debug!("create for existing upload {}, returning record", name);
            return Ok(existing);
        }

        let record = FileRecord::new(name.clone(), init);
        tokio::fs::File::create(self.data_path(&name)).await?;
        self.persist_record(&record)?;
        info!("created upload {} ({:?} bytes declared)", name, record.size);
        Ok(record)
    }

    async fn write(&self, request: WriteRequest) -> Result<FileRecord, UploadError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.load_record(&request.name).ok_or_else(|| {
            UploadError::with_message(codes::FILE_NOT_FOUND, format!("no upload named {}", request.name))
        })?;

        if record.status == UploadStatus::Completed {
            debug!("upload {} already completed, skipping write", record.name);
            return Ok(record);
        }
        if request.start != record.bytes_written {
            return Err(UploadError::with_message(
                codes::INVALID_RANGE,
                format!(
                    "write offset {} does not match recorded {} for {}",
                    request.start, record.bytes_written, record.name
                ),
            ));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.data_path(&record.name))
            .await?;

        // A body stream error terminates the write; the record keeps the
        // bytes that arrived and reports partial status.
        let mut body = request.body;
        let mut written: u64 = 0;
        let mut interrupted = false;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Err(err) => {
                    warn!("body stream for {} interrupted: {}", record.name, err);
                    interrupted = true;
                    break;
                }
            }
        }
        file.flush().await?;

        record.bytes_written += written;
        record.derive_status(!interrupted);
        self.persist_record(&record)?;
        info!(
            "wrote {} bytes to {} (total {}, status {:?})",
            written, record.name, record.bytes_written, record.status
        );
        Ok(record)
    }

    async fn delete(&self, name: &str) -> Result<Vec<FileRecord>, UploadError> {
        let mut record = match self.load_record(name) {
            Some(record) => record,
            None => {
                debug!("delete for unknown upload {}", name);
                return Ok(vec![FileRecord::tombstone(name)]);
            }
        };

        for path in [self.data_path(name), self.meta_path(name)] {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        self.records.lock().unwrap().remove(name);

        record.status = UploadStatus::Deleted;
        info!("deleted upload {}", name);
        Ok(vec![record])
    }
}

fn content_type_allowed(declared: Option<&str>, allowed: &[String]) -> bool {
    let content_type = match declared {
        Some(value) => value,
        None => return true,
    };
    if allowed.is_empty() {
        return true;
    }
    allowed.iter().any(|pattern| {
        if pattern == "*" || pattern == "*/*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            content_type.starts_with(prefix)
                && content_type[prefix.len()..].starts_with('/')
        } else {
            pattern == content_type
        }
    })
}

fn acceptable_filename(name: Option<&str>) -> bool {
    match name {
        Some(value) => {
            !value.is_empty() && !value.contains('/') && !value.contains('\\') && value != "." && value != ".."
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PartBody;
    use bytes::Bytes;
    use futures::stream;

    fn store_in(dir: &std::path::Path) -> (DiskStore, ErrorRegistry) {
        let config = StorageConfig {
            directory: dir.to_string_lossy().to_string(),
            max_upload_size: 1024,
            allowed_content_types: vec!["image/*".to_string(), "text/plain".to_string()],
            ..StorageConfig::default()
        };
        let mut registry = ErrorRegistry::new();
        let store = DiskStore::new(&config, &mut registry);
        (store, registry)
    }

    fn init_for(name: &str, size: u64, content_type: &str) -> FileInit {
        FileInit {
            original_name: Some(name.to_string()),
            size: Some(size),
            content_type: Some(content_type.to_string()),
            user_id: Some("alice".to_string()),
            ..FileInit::default()
        }
    }

    fn body_of(chunks: Vec<Result<Bytes, UploadError>>) -> PartBody {
        Box::pin(stream::iter(chunks))
    }

    #[actix_web::test]
    async fn test_create_then_complete_write() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let created = store.create(init_for("a.txt", 5, "text/plain")).await.unwrap();
        assert_eq!(created.status, UploadStatus::Created);
        assert_eq!(created.bytes_written, 0);
        assert!(dir.path().join(&created.name).exists());
        assert!(dir.path().join(format!("{}.json", created.name)).exists());

        let record = store
            .write(WriteRequest {
                name: created.name.clone(),
                start: 0,
                content_length: Some(5),
                body: body_of(vec![Ok(Bytes::from_static(b"he")), Ok(Bytes::from_static(b"llo"))]),
            })
            .await
            .unwrap();
        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(record.bytes_written, 5);
        assert_eq!(std::fs::read(dir.path().join(&record.name)).unwrap(), b"hello");
    }

    #[actix_web::test]
    async fn test_create_is_idempotent_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let first = store.create(init_for("a.txt", 5, "text/plain")).await.unwrap();
        let second = store.create(init_for("a.txt", 5, "text/plain")).await.unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(second.status, UploadStatus::Created);
    }

    #[actix_web::test]
    async fn test_interrupted_body_yields_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let created = store.create(init_for("a.txt", 10, "text/plain")).await.unwrap();
        let record = store
            .write(WriteRequest {
                name: created.name.clone(),
                start: 0,
                content_length: Some(10),
                body: body_of(vec![
                    Ok(Bytes::from_static(b"hel")),
                    Err(UploadError::with_message(codes::BAD_REQUEST, "connection reset")),
                ]),
            })
            .await
            .unwrap();
        assert_eq!(record.status, UploadStatus::Part);
        assert_eq!(record.bytes_written, 3);
    }

    #[actix_web::test]
    async fn test_out_of_order_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let created = store.create(init_for("a.txt", 5, "text/plain")).await.unwrap();
        let err = store
            .write(WriteRequest {
                name: created.name,
                start: 3,
                content_length: Some(2),
                body: body_of(vec![Ok(Bytes::from_static(b"lo"))]),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_RANGE);
    }

    #[actix_web::test]
    async fn test_write_unknown_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let err = store
            .write(WriteRequest {
                name: "missing".to_string(),
                start: 0,
                content_length: None,
                body: body_of(vec![]),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::FILE_NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_delete_removes_data_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let created = store.create(init_for("a.txt", 5, "text/plain")).await.unwrap();
        let records = store.delete(&created.name).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UploadStatus::Deleted);
        assert!(!dir.path().join(&created.name).exists());
        assert!(!dir.path().join(format!("{}.json", created.name)).exists());
    }

    #[actix_web::test]
    async fn test_delete_unknown_name_returns_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let records = store.delete("missing").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "missing");
        assert_eq!(records[0].status, UploadStatus::Deleted);
    }

    #[actix_web::test]
    async fn test_validation_rejects_oversized_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = store_in(dir.path());

        let err = store
            .create(init_for("a.txt", 4096, "text/plain"))
            .await
            .unwrap_err();
        assert_eq!(err.code, "ValidationErrorSize");
        assert_eq!(registry.response_for(&err.code).status.as_u16(), 413);
    }

    #[actix_web::test]
    async fn test_validation_rejects_disallowed_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let err = store
            .create(init_for("a.bin", 5, "application/octet-stream"))
            .await
            .unwrap_err();
        assert_eq!(err.code, "ValidationErrorMime");

        assert!(store.create(init_for("b.png", 5, "image/png")).await.is_ok());
    }

    #[actix_web::test]
    async fn test_validation_rejects_path_traversal_filename() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry) = store_in(dir.path());

        let err = store
            .create(init_for("../etc/passwd", 5, "text/plain"))
            .await
            .unwrap_err();
        assert_eq!(err.code, "ValidationErrorFilename");
    }

    #[test]
    fn test_content_type_allowed_patterns() {
        let allowed = vec!["image/*".to_string(), "text/plain".to_string()];
        assert!(content_type_allowed(Some("image/png"), &allowed));
        assert!(content_type_allowed(Some("text/plain"), &allowed));
        assert!(!content_type_allowed(Some("text/html"), &allowed));
        assert!(content_type_allowed(None, &allowed));
        assert!(content_type_allowed(Some("anything"), &[]));
    }
}
