mod controller;
mod preview;
mod state;
mod ui;

pub use controller::UploadController;
pub use preview::PreviewLoader;

use preview::PreviewState;

use crate::upload::{accept_selection, SelectionCandidate, IMAGE_EXTENSIONS};
use eframe::egui::{self, Color32};
use eframe::App;
use rfd::FileDialog;
use std::time::Duration;

pub struct ImageUploader {
    controller: UploadController,
    preview: PreviewLoader,
    accent: Color32,
}

impl ImageUploader {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        controller: UploadController,
        preview: PreviewLoader,
        accent: Color32,
    ) -> Self {
        tracing::info!("image uploader ready");
        Self {
            controller,
            preview,
            accent,
        }
    }

    /// Hands a picker selection to the controller once it passes the image filter.
    fn offer(&mut self, candidates: Vec<SelectionCandidate>) {
        if !self.controller.session().is_idle() {
            tracing::debug!("picker is not shown, ignoring selection");
            return;
        }
        match accept_selection(candidates) {
            Ok(file) => {
                self.controller.select_file(file);
            }
            Err(err) => tracing::info!(error = %err, "selection rejected"),
        }
    }

    pub fn choose_file(&mut self) {
        if let Some(path) = FileDialog::new()
            .add_filter("Images", &IMAGE_EXTENSIONS)
            .pick_file()
        {
            self.offer(vec![SelectionCandidate::from_path(path)]);
        }
    }

    fn take_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if dropped.is_empty() {
            return;
        }
        let candidates = dropped
            .into_iter()
            .map(|file| SelectionCandidate {
                name: file.name,
                path: file.path,
                bytes: file.bytes,
            })
            .collect();
        self.offer(candidates);
    }

    pub fn back(&mut self) {
        self.controller.reset();
        self.preview.clear();
    }

    pub fn update_state(&mut self, ctx: &egui::Context) {
        if self.controller.poll() {
            ctx.request_repaint();
        }

        if let Some(url) = self.controller.session().result_url() {
            self.preview.request(url);
        }
        self.preview.poll(ctx);

        // Transport events arrive off the UI thread; keep polling while they can.
        if self.controller.session().is_uploading()
            || matches!(self.preview.state(), PreviewState::Loading)
        {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}

impl App for ImageUploader {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_state(ctx);
        self.take_dropped_files(ctx);
        self.render(ctx);
    }
}
