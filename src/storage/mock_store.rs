//! Mock implementation of FileStorage for testing

use crate::errors::{codes, UploadError};
use crate::storage::{
    file_name_for, FileInit, FileRecord, FileStorage, UploadStatus, WriteRequest,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory storage backend with call counters and inspection helpers.
pub struct MockFileStore {
    // name -> (record, stored bytes)
    files: Arc<Mutex<HashMap<String, (FileRecord, Vec<u8>)>>>,
    create_calls: AtomicUsize,
    write_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    last_write_start: Mutex<Option<u64>>,
    fail_writes: AtomicBool,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            create_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            last_write_start: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with `STORAGE_ERROR`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Offset carried by the most recent write call.
    pub fn last_write_start(&self) -> Option<u64> {
        *self.last_write_start.lock().unwrap()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn record(&self, name: &str) -> Option<FileRecord> {
        self.files.lock().unwrap().get(name).map(|(record, _)| record.clone())
    }

    pub fn data(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).map(|(_, data)| data.clone())
    }

    pub fn clear(&self) {
        self.files.lock().unwrap().clear();
    }
}

impl Default for MockFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl FileStorage for MockFileStore {
    async fn create(&self, init: FileInit) -> Result<FileRecord, UploadError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let name = file_name_for(&init);

        let mut files = self.files.lock().unwrap();
        if let Some((existing, _)) = files.get(&name) {
            info!("Mock: create for existing upload {}", name);
            return Ok(existing.clone());
        }
        let record = FileRecord::new(name.clone(), init);
        files.insert(name.clone(), (record.clone(), Vec::new()));
        info!("Mock: created upload {}", name);
        Ok(record)
    }

    async fn write(&self, request: WriteRequest) -> Result<FileRecord, UploadError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_write_start.lock().unwrap() = Some(request.start);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(UploadError::with_message(
                codes::STORAGE_ERROR,
                "simulated backend failure",
            ));
        }

        let mut record = {
            let files = self.files.lock().unwrap();
            match files.get(&request.name) {
                Some((record, _)) => record.clone(),
                None => {
                    return Err(UploadError::with_message(
                        codes::FILE_NOT_FOUND,
                        format!("no upload named {}", request.name),
                    ))
                }
            }
        };

        if record.status == UploadStatus::Completed {
            return Ok(record);
        }
        if request.start != record.bytes_written {
            return Err(UploadError::with_message(
                codes::INVALID_RANGE,
                format!(
                    "write offset {} does not match recorded {}",
                    request.start, record.bytes_written
                ),
            ));
        }

        let mut body = request.body;
        let mut buffer = Vec::new();
        let mut interrupted = false;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(err) => {
                    warn!("Mock: body stream for {} interrupted: {}", record.name, err);
                    interrupted = true;
                    break;
                }
            }
        }

        record.bytes_written += buffer.len() as u64;
        record.derive_status(!interrupted);

        let mut files = self.files.lock().unwrap();
        if let Some((stored, data)) = files.get_mut(&request.name) {
            data.extend_from_slice(&buffer);
            *stored = record.clone();
        }
        info!(
            "Mock: wrote {} bytes to {} (status {:?})",
            buffer.len(),
            record.name,
            record.status
        );
        Ok(record)
    }

    async fn delete(&self, name: &str) -> Result<Vec<FileRecord>, UploadError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let removed = self.files.lock().unwrap().remove(name);
        match removed {
            Some((mut record, _)) => {
                record.status = UploadStatus::Deleted;
                info!("Mock: deleted upload {}", name);
                Ok(vec![record])
            }
            None => Ok(vec![FileRecord::tombstone(name)]),
        }
    }
}
