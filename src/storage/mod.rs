//! Pluggable file storage layer
//!
//! This module defines the storage contract the upload handlers depend on.
//! Backends own all persisted byte state and the per-name write-offset
//! bookkeeping; the handlers never mutate a returned record.

pub mod disk_store;
pub mod mock_store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::UploadError;

/// Lifecycle state of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Created,
    Part,
    Completed,
    Deleted,
}

/// Creation-time attributes for a new file. Built fresh per incoming part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInit {
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub size: Option<u64>,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub user_id: Option<String>,
}

/// Persisted-file descriptor owned by the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub status: UploadStatus,
    pub bytes_written: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub size: Option<u64>,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(name: String, init: FileInit) -> Self {
        Self {
            name,
            status: UploadStatus::Created,
            bytes_written: 0,
            metadata: init.metadata,
            size: init.size,
            original_name: init.original_name,
            content_type: init.content_type,
            user_id: init.user_id,
            created_at: Utc::now(),
        }
    }

    /// Record stub for operations on names the backend has no file for.
    pub fn tombstone(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: UploadStatus::Deleted,
            bytes_written: 0,
            metadata: HashMap::new(),
            size: None,
            original_name: None,
            content_type: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    /// Derive the lifecycle status from the current write offset.
    /// `body_finished` marks a clean end of the incoming byte stream; with an
    /// unknown declared size that is the only completion signal available.
    pub fn derive_status(&mut self, body_finished: bool) {
        self.status = match self.size {
            Some(size) if self.bytes_written >= size => UploadStatus::Completed,
            None if body_finished => UploadStatus::Completed,
            _ if self.bytes_written > 0 => UploadStatus::Part,
            _ => self.status,
        };
    }
}

/// Byte stream feeding a single write call. Not `Send`: part bodies are
/// consumed on the worker that accepted the request.
pub type PartBody = LocalBoxStream<'static, Result<Bytes, UploadError>>;

/// One append-style write of a part body at a given offset.
pub struct WriteRequest {
    pub name: String,
    pub start: u64,
    pub content_length: Option<u64>,
    pub body: PartBody,
}

/// Abstract persistence contract consumed by the upload handlers.
#[async_trait(?Send)]
pub trait FileStorage: Send + Sync {
    /// Validate the init attributes and register a new file. Creating the
    /// same logical upload again returns the existing record.
    async fn create(&self, init: FileInit) -> Result<FileRecord, UploadError>;

    /// Append the request body at the given offset. `start` must equal the
    /// recorded `bytes_written` for the name or the write is rejected.
    async fn write(&self, request: WriteRequest) -> Result<FileRecord, UploadError>;

    /// Remove a file, returning the affected records.
    async fn delete(&self, name: &str) -> Result<Vec<FileRecord>, UploadError>;
}

/// Derive a stable backend name for an upload from its identity fields.
/// Identical (original name, size, user) triples map to the same name, which
/// is what makes creation idempotent.
pub fn file_name_for(init: &FileInit) -> String {
    let identity = format!(
        "{}-{}-{}",
        init.original_name.as_deref().unwrap_or(""),
        init.size.map(|s| s.to_string()).unwrap_or_default(),
        init.user_id.as_deref().unwrap_or("anonymous"),
    );
    hex::encode(md5::compute(identity.as_bytes()).0)
}
