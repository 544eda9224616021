use eframe::egui;
use std::sync::mpsc::{channel, Receiver, Sender};
use thiserror::Error;
use tokio::runtime::Handle;
use url::Url;

/// Largest edge of the preview texture.
const MAX_PREVIEW_EDGE: u32 = 1024;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("failed to download image: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image request returned status {0}")]
    Status(u16),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

pub fn decode_preview(bytes: &[u8]) -> Result<PreviewImage, PreviewError> {
    let decoded = image::load_from_memory(bytes)?;
    // `thumbnail` fits to the box in both directions; small images stay as they are.
    let resized = if decoded.width() > MAX_PREVIEW_EDGE || decoded.height() > MAX_PREVIEW_EDGE {
        decoded.thumbnail(MAX_PREVIEW_EDGE, MAX_PREVIEW_EDGE).to_rgba8()
    } else {
        decoded.to_rgba8()
    };
    Ok(PreviewImage {
        width: resized.width() as usize,
        height: resized.height() as usize,
        rgba: resized.into_raw(),
    })
}

async fn fetch_preview(client: &reqwest::Client, url: Url) -> Result<PreviewImage, PreviewError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PreviewError::Status(status.as_u16()));
    }
    let bytes = response.bytes().await?;
    decode_preview(&bytes)
}

pub enum PreviewState {
    Empty,
    Loading,
    Ready(egui::TextureHandle),
    Failed(String),
}

/// Downloads the uploaded image from its public address and keeps it as a texture.
pub struct PreviewLoader {
    client: reqwest::Client,
    runtime: Handle,
    url: Option<Url>,
    state: PreviewState,
    sender: Sender<(Url, Result<PreviewImage, PreviewError>)>,
    receiver: Receiver<(Url, Result<PreviewImage, PreviewError>)>,
}

impl PreviewLoader {
    pub fn new(runtime: Handle) -> Self {
        let (sender, receiver) = channel();
        Self {
            client: reqwest::Client::new(),
            runtime,
            url: None,
            state: PreviewState::Empty,
            sender,
            receiver,
        }
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// Starts loading `url` unless it is already the current image.
    pub fn request(&mut self, url: &Url) {
        if self.url.as_ref() == Some(url) {
            return;
        }
        self.url = Some(url.clone());
        self.state = PreviewState::Loading;

        let client = self.client.clone();
        let sender = self.sender.clone();
        let url = url.clone();
        self.runtime.spawn(async move {
            let result = fetch_preview(&client, url.clone()).await;
            let _ = sender.send((url, result));
        });
    }

    pub fn clear(&mut self) {
        self.url = None;
        self.state = PreviewState::Empty;
    }

    pub fn poll(&mut self, ctx: &egui::Context) {
        while let Ok((url, result)) = self.receiver.try_recv() {
            if self.url.as_ref() != Some(&url) {
                continue;
            }
            self.state = match result {
                Ok(image) => {
                    let color_image = egui::ColorImage::from_rgba_unmultiplied(
                        [image.width, image.height],
                        &image.rgba,
                    );
                    PreviewState::Ready(ctx.load_texture(
                        format!("upload-preview:{}", url.path()),
                        color_image,
                        egui::TextureOptions::LINEAR,
                    ))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not load preview");
                    PreviewState::Failed(err.to_string())
                }
            };
            ctx.request_repaint();
        }
    }
}
