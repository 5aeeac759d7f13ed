pub mod error;
pub mod images;
pub mod system;
pub mod upload;

use crate::app_config::{ServerConfig, StorageConfig};
use crate::ingest::{IMAGES_PREFIX, ORIGINALS_PREFIX};
use actix_web::HttpRequest;

/// Configures the web app by adding services from each web file.
///
/// @see https://docs.rs/actix-web/4.0.1/actix_web/struct.App.html#method.configure
pub fn configure(conf: &mut actix_web::web::ServiceConfig) {
    upload::configure(conf);
    images::configure(conf);
    system::configure(conf);
}

/// Serve stored images and kept originals straight from disk.
pub fn configure_files(conf: &mut actix_web::web::ServiceConfig, storage: &StorageConfig) {
    conf.service(actix_files::Files::new(IMAGES_PREFIX, &storage.content_dir))
        .service(actix_files::Files::new(ORIGINALS_PREFIX, &storage.original_dir));
}

/// Scheme and host that absolute URLs in responses start with.
pub fn base_url(req: &HttpRequest, server: &ServerConfig) -> String {
    if !server.public_base_url.is_empty() {
        return server.public_base_url.trim_end_matches('/').to_string();
    }
    let info = req.connection_info();
    format!("{}://{}", info.scheme(), info.host())
}
