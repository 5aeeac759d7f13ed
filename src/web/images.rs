use super::{base_url, error::ApiError};
use crate::app_config::ServerConfig;
use crate::ingest::IngestPipeline;
use actix_web::{delete, get, web, HttpRequest, HttpResponse};
use serde::Serialize;

pub(super) fn configure(conf: &mut web::ServiceConfig) {
    conf.service(list_images).service(delete_image);
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

#[get("/api/images")]
async fn list_images(
    req: HttpRequest,
    pipeline: web::Data<IngestPipeline>,
    server: web::Data<ServerConfig>,
) -> Result<HttpResponse, ApiError> {
    let report = pipeline.list(&base_url(&req, &server)).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[delete("/api/images/{name}")]
async fn delete_image(
    name: web::Path<String>,
    pipeline: web::Data<IngestPipeline>,
) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    pipeline.delete(&name).await?;
    Ok(HttpResponse::Ok().json(DeleteResponse {
        success: true,
        message: format!("Deleted {}", name),
    }))
}
