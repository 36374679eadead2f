//! Multipart part-stream adaptation
//!
//! Re-expresses the actix-multipart field stream as an explicit sequence of
//! typed part events, so handler control flow stays linear and testable
//! without a live socket. Structured fields and the reserved `metadata` blob
//! surface as distinct variants instead of a string-key special case.

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::http::header;
use bytes::BytesMut;
use futures::{future, StreamExt};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::{codes, UploadError};
use crate::storage::PartBody;

/// Reserved form field whose JSON contents merge into upload metadata.
pub const METADATA_FIELD: &str = "metadata";

// Upper bound for a single structured field value.
const MAX_FIELD_BYTES: usize = 64 * 1024;

/// One parsed part of a multipart request body.
#[derive(Debug)]
pub enum PartEvent {
    /// Plain form field, stored verbatim under its own key.
    Field { name: String, value: String },
    /// Contents of the reserved `metadata` field, already deserialized.
    Metadata(HashMap<String, Value>),
    /// File attachment with its body still on the wire.
    File(FilePart),
}

/// A file attachment: envelope metadata plus the undrained body.
#[derive(Debug)]
pub struct FilePart {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub declared_size: Option<u64>,
    field: Field,
}

impl FilePart {
    /// The part body as a byte stream. Errors on the part's own stream are
    /// logged and end the stream early instead of failing the surrounding
    /// request, so sibling parts stay unaffected.
    pub fn into_body(self) -> PartBody {
        let label = self.filename.unwrap_or_default();
        Box::pin(
            self.field
                .map(move |chunk| {
                    chunk.map_err(|err| {
                        warn!("part body stream for '{}' failed: {}", label, err);
                        UploadError::with_message(codes::BAD_REQUEST, err.to_string())
                    })
                })
                .take_while(|chunk| future::ready(chunk.is_ok())),
        )
    }
}

/// Pull-based event stream over a multipart request body.
pub struct PartEventStream {
    inner: Multipart,
}

impl PartEventStream {
    pub fn new(multipart: Multipart) -> Self {
        Self { inner: multipart }
    }

    /// The next part event, or `None` when the form ends. A `File` event's
    /// body must be drained before pulling the next event; all parts share
    /// the one underlying payload.
    pub async fn next_event(&mut self) -> Option<Result<PartEvent, UploadError>> {
        let field = match self.inner.next().await? {
            Ok(field) => field,
            Err(err) => return Some(Err(stream_error(err))),
        };
        Some(classify(field).await)
    }
}

async fn classify(field: Field) -> Result<PartEvent, UploadError> {
    let (name, filename) = {
        let disposition = field.content_disposition();
        (
            disposition.get_name().unwrap_or_default().to_string(),
            disposition.get_filename().map(str::to_string),
        )
    };

    if filename.is_some() {
        let content_type = field.content_type().map(|mime| mime.to_string());
        let declared_size = field
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        return Ok(PartEvent::File(FilePart {
            filename,
            content_type,
            declared_size,
            field,
        }));
    }

    let value = read_field_value(field).await?;
    if name == METADATA_FIELD {
        let map: HashMap<String, Value> = serde_json::from_str(&value).map_err(|err| {
            UploadError::with_message(codes::BAD_REQUEST, format!("malformed metadata field: {}", err))
        })?;
        return Ok(PartEvent::Metadata(map));
    }
    Ok(PartEvent::Field { name, value })
}

async fn read_field_value(mut field: Field) -> Result<String, UploadError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(stream_error)?;
        if buffer.len() + chunk.len() > MAX_FIELD_BYTES {
            return Err(UploadError::with_message(
                codes::BAD_REQUEST,
                "form field value too large",
            ));
        }
        buffer.extend_from_slice(&chunk);
    }
    String::from_utf8(buffer.to_vec())
        .map_err(|_| UploadError::with_message(codes::BAD_REQUEST, "form field value is not valid UTF-8"))
}

fn stream_error(err: MultipartError) -> UploadError {
    UploadError::with_message(codes::BAD_REQUEST, err.to_string())
}
