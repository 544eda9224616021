use crate::utils::color::ColorExt;
use clap::Parser;
use eframe::egui::Color32;

const DEFAULT_ACCENT: Color32 = Color32::from_rgb(59, 130, 246);

/// Drop an image, watch it upload, get a link back.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-drop-uploader", version, about)]
pub struct Config {
    /// Storage bucket the images are uploaded to, e.g. `my-app.appspot.com`.
    #[arg(long, env = "STORAGE_BUCKET")]
    pub bucket: String,

    #[arg(
        long,
        env = "STORAGE_ENDPOINT",
        default_value = "https://firebasestorage.googleapis.com"
    )]
    pub endpoint: String,

    /// Sent as `Authorization: Firebase <token>` when set.
    #[arg(long, env = "STORAGE_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    #[arg(long, env = "STORAGE_KEY_PREFIX", default_value = "uploads/")]
    pub key_prefix: String,

    /// Upload chunk size, rounded up to a multiple of 256 KiB.
    #[arg(long, default_value_t = 256)]
    pub chunk_size_kib: usize,

    /// Accent color as `#RRGGBB`.
    #[arg(long, env = "UPLOADER_ACCENT", default_value = "#3B82F6")]
    pub accent: String,
}

impl Config {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kib.saturating_mul(1024)
    }

    pub fn accent_color(&self) -> Color32 {
        Color32::from_hex(&self.accent).unwrap_or_else(|| {
            tracing::warn!(accent = %self.accent, "invalid accent color, using default");
            DEFAULT_ACCENT
        })
    }
}
