use super::{base_url, error::ApiError};
use crate::app_config::ServerConfig;
use crate::ingest::{IngestPipeline, UploadedFile};
use crate::storage::mime_type_for;
use actix_multipart::Multipart;
use actix_web::web::{self, BytesMut};
use actix_web::{post, HttpRequest, HttpResponse};
use futures::StreamExt;

pub(super) fn configure(conf: &mut web::ServiceConfig) {
    conf.service(upload_images);
}

/// Accept up to `upload.max_files` images in the configured multipart field.
///
/// Type and size are checked while the body streams in, so an oversized or
/// disallowed file is rejected before it is fully buffered. Other fields are
/// ignored.
#[post("/api/upload")]
async fn upload_images(
    req: HttpRequest,
    pipeline: web::Data<IngestPipeline>,
    server: web::Data<ServerConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let limits = pipeline.limits();
    let max_bytes = limits.max_file_size_bytes();
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            log::error!("upload_images: multipart read error: {}", e);
            ApiError::BadRequest("Error interpreting user input.".to_string())
        })?;

        let (field_name, file_name) = {
            let disposition = field.content_disposition();
            (
                disposition.get_name().map(str::to_owned),
                disposition.get_filename().map(str::to_owned),
            )
        };

        if field_name.as_deref() != Some(limits.field_name.as_str()) {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
            }
            continue;
        }

        if files.len() >= limits.max_files {
            return Err(ApiError::BadRequest(format!(
                "Too many files (max {})",
                limits.max_files
            )));
        }

        let file_name = file_name.unwrap_or_else(|| "upload".to_string());
        let mime_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| mime_type_for(&file_name).to_string());

        if !limits.is_allowed(&mime_type) {
            return Err(ApiError::BadRequest(format!(
                "Unsupported file type {} for {}",
                mime_type, file_name
            )));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let bytes = chunk.map_err(|e| {
                log::error!("upload_images: multipart read error: {}", e);
                ApiError::BadRequest("Error interpreting user input.".to_string())
            })?;
            if buf.len() + bytes.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "{} exceeds the {} MB limit",
                    file_name, limits.max_file_size_mb
                )));
            }
            buf.extend_from_slice(&bytes);
        }

        files.push(UploadedFile {
            file_name,
            mime_type,
            data: buf.freeze(),
        });
    }

    let report = pipeline
        .ingest_batch(files, &base_url(&req, &server))
        .await?;
    Ok(HttpResponse::Ok().json(report))
}
