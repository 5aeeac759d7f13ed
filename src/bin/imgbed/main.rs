use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use env_logger::Env;
use imgbed::app_config::AppConfig;
use imgbed::ingest::IngestPipeline;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    init_lib_mods();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Failed to load configuration, using defaults: {}", err);
            AppConfig::default()
        }
    };

    let pipeline = IngestPipeline::from_config(&config)
        .map_err(|e| io::Error::other(format!("storage init failed: {}", e)))?;
    let pipeline = Data::new(pipeline);
    let server_config = Data::new(config.server.clone());
    let storage_config = config.storage.clone();

    log::info!("Content directory: {}", config.storage.content_dir);
    log::info!("Originals directory: {}", config.storage.original_dir);
    log::info!(
        "Compression: quality {}, max {}x{}, keep originals: {}",
        config.compression.quality,
        config.compression.max_width,
        config.compression.max_height,
        config.compression.save_original
    );

    // Spawn upload lock cleanup task
    let sweeper = pipeline.clone();
    let sweep_interval = config.dedup.sweep_interval();
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let purged = sweeper.sweep_locks();
            if purged > 0 {
                log::debug!("Purged {} expired upload locks", purged);
            }
        }
    });

    log::info!("Listening on {}", config.server.bind);

    HttpServer::new(move || {
        // Order of middleware IS IMPORTANT and is in REVERSE EXECUTION ORDER.
        App::new()
            .app_data(pipeline.clone())
            .app_data(server_config.clone())
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"))
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("Referrer-Policy", "strict-origin-when-cross-origin")),
            )
            .wrap(Logger::new("%a %r %s %b %Dms"))
            .configure(imgbed::web::configure)
            .configure(|conf| imgbed::web::configure_files(conf, &storage_config))
    })
    .bind(&config.server.bind)?
    .run()
    .await
}

/// Initialize third party crates we rely on but don't have control over.
pub fn init_lib_mods() {
    // .env is optional outside development.
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
