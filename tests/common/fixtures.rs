//! Test fixtures for building apps and upload payloads
#![allow(dead_code)]

use actix_web::http::header;
use actix_web::test::TestRequest;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgbed::app_config::AppConfig;
use imgbed::ingest::IngestPipeline;
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;

pub const BOUNDARY: &str = "----imgbedtestboundary";

pub const SVG: &[u8] =
    br#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16"><rect width="16" height="16"/></svg>"#;

/// Isolated content directory, originals directory and index file.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = AppConfig::default();
        config.storage.content_dir = path_string(dir.path().join("images"));
        config.storage.original_dir = path_string(dir.path().join("original"));
        config.storage.index_path = path_string(dir.path().join("file-hash-map.json"));
        config.server.public_base_url = "http://img.test".to_string();
        Self { dir, config }
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::from_config(&self.config).expect("Failed to build pipeline")
    }

    pub fn content_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.storage.content_dir)
    }

    pub fn original_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.storage.original_dir)
    }

    /// Names of the files currently in the content directory.
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.content_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// Build a test app with every route and the static file services.
#[macro_export]
macro_rules! test_app {
    ($env:expr, $pipeline:expr) => {{
        let storage = $env.config.storage.clone();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($pipeline.clone())
                .app_data(actix_web::web::Data::new($env.config.server.clone()))
                .configure(imgbed::web::configure)
                .configure(|conf| imgbed::web::configure_files(conf, &storage)),
        )
        .await
    }};
}

/// A solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([shade, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

/// One file part of a multipart body.
pub struct Part<'a> {
    pub field: &'a str,
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn image(file_name: &'a str, mime_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            field: "images",
            file_name,
            mime_type,
            data,
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.field, part.file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.mime_type).as_bytes());
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// `POST /api/upload` carrying `parts`.
pub fn upload_request(parts: &[Part<'_>]) -> TestRequest {
    TestRequest::post()
        .uri("/api/upload")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(parts))
}
