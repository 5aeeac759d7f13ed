//! Health, index maintenance and runtime compression settings.

use super::error::ApiError;
use crate::ingest::{CompressionView, IngestPipeline};
use crate::transcode::CompressionUpdate;
use actix_web::{get, post, web, HttpResponse};
use serde::Serialize;

pub(super) fn configure(conf: &mut web::ServiceConfig) {
    conf.service(health)
        .service(cleanup_index)
        .service(get_compression)
        .service(update_compression);
}

#[derive(Serialize)]
struct CompressionResponse {
    success: bool,
    config: CompressionView,
}

#[get("/api/health")]
async fn health(pipeline: web::Data<IngestPipeline>) -> HttpResponse {
    HttpResponse::Ok().json(pipeline.health())
}

/// Drop index entries whose files were removed behind our back.
#[post("/api/index/cleanup")]
async fn cleanup_index(pipeline: web::Data<IngestPipeline>) -> Result<HttpResponse, ApiError> {
    let report = pipeline.cleanup_index().await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/api/config/compression")]
async fn get_compression(pipeline: web::Data<IngestPipeline>) -> HttpResponse {
    HttpResponse::Ok().json(CompressionResponse {
        success: true,
        config: pipeline.compression_view(),
    })
}

#[post("/api/config/compression")]
async fn update_compression(
    pipeline: web::Data<IngestPipeline>,
    update: web::Json<CompressionUpdate>,
) -> HttpResponse {
    let settings = pipeline.update_compression(&update);
    HttpResponse::Ok().json(CompressionResponse {
        success: true,
        config: CompressionView::from(&settings),
    })
}
