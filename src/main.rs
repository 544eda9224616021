mod app;
mod config;
mod upload;
mod utils;

use app::{ImageUploader, PreviewLoader, UploadController};
use clap::Parser;
use config::Config;
use eframe::CreationContext;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use upload::{FirebaseStorage, StorageTransport};

fn main() -> eframe::Result<()> {
    // A missing .env is fine; everything can come from flags or the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("failed to build upload runtime: {err}");
            std::process::exit(1);
        }
    };

    let storage = match FirebaseStorage::new(
        &config.endpoint,
        config.bucket.clone(),
        config.auth_token.clone(),
        config.chunk_size(),
    ) {
        Ok(storage) => storage,
        Err(err) => {
            tracing::error!(endpoint = %config.endpoint, "invalid storage configuration: {err}");
            std::process::exit(1);
        }
    };
    tracing::info!(bucket = %config.bucket, endpoint = %config.endpoint, "storage configured");

    let transport: Arc<dyn StorageTransport> = Arc::new(storage);
    let controller = UploadController::new(
        transport,
        runtime.handle().clone(),
        config.key_prefix.clone(),
    );
    let preview = PreviewLoader::new(runtime.handle().clone());
    let accent = config.accent_color();

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([560.0, 640.0])
            .with_min_inner_size([400.0, 480.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "Image Uploader",
        options,
        Box::new(move |cc: &CreationContext| {
            Box::new(ImageUploader::new(cc, controller, preview, accent))
        }),
    )
}
