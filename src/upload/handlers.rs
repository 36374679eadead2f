//! HTTP handlers for multipart upload ingestion
//!
//! POST streams every file part of a multipart body through the storage
//! port's create/write contract and maps the resulting lifecycle state to
//! the HTTP response. DELETE resolves a file name from the path and removes
//! it through the same port.

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::errors::{codes, UploadError};
use crate::multipart::{PartEvent, PartEventStream};
use crate::storage::{FileInit, FileRecord, UploadStatus, WriteRequest};

/// POST handler: ingest a multipart body.
///
/// Structured fields accumulate into the pending metadata map as they
/// arrive; each file part triggers one create and one write against the
/// storage backend. When a request carries several file parts, the response
/// reflects the last part's record; earlier records are still persisted.
pub async fn upload_post_handler(
    req: HttpRequest,
    multipart: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = (app_state.identity)(&req);
    if let Some(user) = user_id.as_deref() {
        log_mdc::insert("user", user);
    }
    debug!("starting multipart ingest for user {:?}", user_id);

    let mut events = PartEventStream::new(multipart);
    let mut metadata: HashMap<String, Value> = HashMap::new();
    let mut resolved: Option<FileRecord> = None;

    loop {
        let event = match events.next_event().await {
            Some(Ok(event)) => event,
            Some(Err(err)) => {
                warn!("multipart stream failed: {}", err);
                return Ok(app_state.registry.to_response(&err));
            }
            None => break,
        };

        match event {
            PartEvent::Field { name, value } => {
                metadata.insert(name, Value::String(value));
            }
            PartEvent::Metadata(map) => {
                metadata.extend(map);
            }
            PartEvent::File(part) => {
                let declared_size = part.declared_size;
                let init = FileInit {
                    metadata: metadata.clone(),
                    size: declared_size,
                    original_name: part.filename.clone(),
                    content_type: part.content_type.clone(),
                    user_id: user_id.clone(),
                };

                let created = match app_state.storage.create(init).await {
                    Ok(record) => record,
                    Err(err) => return Ok(app_state.registry.to_response(&err)),
                };
                let written = app_state
                    .storage
                    .write(WriteRequest {
                        name: created.name.clone(),
                        start: 0,
                        content_length: declared_size,
                        body: part.into_body(),
                    })
                    .await;
                match written {
                    Ok(record) => {
                        info!(
                            "ingested part for {} ({} bytes, status {:?})",
                            record.name, record.bytes_written, record.status
                        );
                        resolved = Some(record);
                    }
                    Err(err) => return Ok(app_state.registry.to_response(&err)),
                }
            }
        }
    }

    match resolved {
        Some(record) => {
            let mut response = HttpResponse::Ok();
            if record.status == UploadStatus::Completed {
                response.insert_header((header::LOCATION, file_location(&req, &record.name)));
            }
            Ok(response.json(record))
        }
        None => {
            let err = UploadError::with_message(codes::BAD_REQUEST, "no file part in request");
            Ok(app_state.registry.to_response(&err))
        }
    }
}

/// DELETE handler: remove the file named by the path tail.
///
/// Without a resolvable name the request fails `FILE_NOT_FOUND` before any
/// backend call is made.
pub async fn upload_delete_handler(
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let name = match req.match_info().get("name").filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            let err = UploadError::with_message(codes::FILE_NOT_FOUND, "no file name in request");
            return Ok(app_state.registry.to_response(&err));
        }
    };

    match app_state.storage.delete(&name).await {
        Ok(records) => {
            if let Some(record) = records.first() {
                debug!("deleted upload {} (status {:?})", record.name, record.status);
            }
            Ok(HttpResponse::NoContent().finish())
        }
        Err(err) => Ok(app_state.registry.to_response(&err)),
    }
}

/// Canonical retrieval URL for a stored file, derived from the request.
fn file_location(req: &HttpRequest, name: &str) -> String {
    let info = req.connection_info();
    format!(
        "{}://{}{}/{}",
        info.scheme(),
        info.host(),
        req.path().trim_end_matches('/'),
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_file_location_appends_name_to_path() {
        let req = TestRequest::default()
            .uri("http://localhost:8080/files")
            .to_http_request();
        let location = file_location(&req, "abc123");
        assert!(location.ends_with("/files/abc123"));
        assert!(location.starts_with("http://"));
    }
}
