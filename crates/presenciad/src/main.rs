use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod areas;
mod config;
mod dbus_interface;
mod engine;
mod extractor;
mod service;

use areas::AreaDirectory;
use config::Config;
use dbus_interface::PresenciaService;
use extractor::DbusExtractor;
use presencia_store::Store;
use service::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenciad starting");

    let config = Config::from_env();

    let directory = AreaDirectory::load(&config.areas_path)
        .with_context(|| format!("loading areas from {}", config.areas_path.display()))?;
    if directory.is_empty() {
        tracing::warn!(
            path = %config.areas_path.display(),
            "area directory is empty; all attendance requests will be rejected"
        );
    } else {
        tracing::info!(areas = directory.len(), "area directory loaded");
    }

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    let per_image_timeout = Duration::from_secs(config.per_image_timeout_secs);
    let extractor =
        DbusExtractor::connect(per_image_timeout).context("connecting to feature extractor")?;
    let engine = engine::spawn_engine(
        Box::new(extractor),
        config.strict_face_detection,
        per_image_timeout,
        config.max_enroll_batch,
    );

    let service = Arc::new(AttendanceService::new(
        directory,
        store,
        engine,
        config.confidence_threshold,
        config.sweep_back_days,
    ));

    let _conn = zbus::connection::Builder::system()?
        .name("org.presencia.Presencia1")?
        .serve_at(
            "/org/presencia/Presencia1",
            PresenciaService::new(service),
        )?
        .build()
        .await
        .context("registering on the system bus")?;

    tracing::info!("presenciad ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenciad shutting down");

    Ok(())
}
