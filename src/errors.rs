//! Error classification and the error-response catalog
//!
//! Every failure raised by the upload pipeline carries a stable string code.
//! The registry maps codes to HTTP responses and is built once at startup,
//! then shared read-only through the application state.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use lazy_static::lazy_static;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// Stable error codes raised by the core pipeline.
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const FILE_CONFLICT: &str = "FILE_CONFLICT";
    pub const INVALID_RANGE: &str = "INVALID_RANGE";
    pub const INVALID_FILE_NAME: &str = "INVALID_FILE_NAME";
    pub const REQUEST_ENTITY_TOO_LARGE: &str = "REQUEST_ENTITY_TOO_LARGE";
    pub const UNSUPPORTED_MEDIA_TYPE: &str = "UNSUPPORTED_MEDIA_TYPE";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
}

/// Classified pipeline error. The `code` is the key into the registry.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct UploadError {
    pub code: String,
    pub message: String,
}

impl UploadError {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            message: String::new(),
        }
    }

    pub fn with_message(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Error tagged with the derived code for a failed validation check.
    pub fn validation(key: &str) -> Self {
        Self::with_message(&validation_code(key), format!("failed check: {}", key))
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::with_message(codes::STORAGE_ERROR, err.to_string())
    }
}

/// Derive the stable error code for a validation check key,
/// e.g. `size` -> `ValidationErrorSize`.
pub fn validation_code(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => format!("ValidationError{}{}", first.to_uppercase(), chars.as_str()),
        None => "ValidationError".to_string(),
    }
}

/// HTTP response registered for an error code.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
}

lazy_static! {
    // Base catalog every registry starts from.
    static ref BASE_RESPONSES: HashMap<&'static str, (StatusCode, &'static str)> = {
        let mut responses = HashMap::new();
        responses.insert(codes::BAD_REQUEST, (StatusCode::BAD_REQUEST, "Bad request"));
        responses.insert(codes::FILE_NOT_FOUND, (StatusCode::NOT_FOUND, "Not found"));
        responses.insert(codes::FILE_CONFLICT, (StatusCode::CONFLICT, "File already exists"));
        responses.insert(codes::INVALID_RANGE, (StatusCode::BAD_REQUEST, "Invalid write offset"));
        responses.insert(codes::INVALID_FILE_NAME, (StatusCode::BAD_REQUEST, "Invalid file name"));
        responses.insert(
            codes::REQUEST_ENTITY_TOO_LARGE,
            (StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large"),
        );
        responses.insert(
            codes::UNSUPPORTED_MEDIA_TYPE,
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type"),
        );
        responses.insert(codes::STORAGE_ERROR, (StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable"));
        responses.insert(codes::UNKNOWN_ERROR, (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"));
        responses
    };
}

/// Mapping from error codes to HTTP responses. Mutable only during startup
/// wiring; components receive it behind an `Arc` afterwards.
#[derive(Debug, Clone)]
pub struct ErrorRegistry {
    responses: HashMap<String, ErrorResponse>,
}

impl ErrorRegistry {
    /// Registry seeded with the base catalog.
    pub fn new() -> Self {
        let responses = BASE_RESPONSES
            .iter()
            .map(|(code, entry)| {
                (
                    code.to_string(),
                    ErrorResponse {
                        status: entry.0,
                        message: entry.1.to_string(),
                    },
                )
            })
            .collect();
        Self { responses }
    }

    /// Register a response for a code, replacing any existing entry.
    pub fn register(&mut self, code: &str, status: u16, message: &str) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.responses.insert(
            code.to_string(),
            ErrorResponse {
                status,
                message: message.to_string(),
            },
        );
    }

    pub fn contains(&self, code: &str) -> bool {
        self.responses.contains_key(code)
    }

    /// Response registered for a code. Unknown codes map to a 500 so the
    /// connection is never left without a valid HTTP response.
    pub fn response_for(&self, code: &str) -> ErrorResponse {
        self.responses.get(code).cloned().unwrap_or(ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal error".to_string(),
        })
    }

    /// Render a classified error as an HTTP response.
    pub fn to_response(&self, error: &UploadError) -> HttpResponse {
        let entry = self.response_for(&error.code);
        let message = if entry.message.is_empty() {
            error.message.clone()
        } else {
            entry.message
        };
        HttpResponse::build(entry.status).json(json!({
            "error": { "code": error.code, "message": message }
        }))
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
