use super::preview::PreviewState;
use super::state::UploadStatus;
use super::ImageUploader;
use crate::utils::file_size::FileSizeUtils;
use eframe::egui::{self, Color32, RichText};

const SUCCESS_COLOR: Color32 = Color32::from_rgb(34, 197, 94);
const ERROR_COLOR: Color32 = Color32::from_rgb(220, 50, 50);

impl ImageUploader {
    pub fn render(&mut self, ctx: &egui::Context) {
        let hovering = ctx.input(|i| !i.raw.hovered_files.is_empty());

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.add_space(30.0);
                ui.vertical_centered(|ui| match self.controller.session().status() {
                    UploadStatus::Idle => self.render_picker(ui, hovering),
                    UploadStatus::Uploading => self.render_progress(ui),
                    UploadStatus::Succeeded => self.render_preview(ui),
                });
                ui.add_space(20.0);
            });
        });
    }

    fn render_picker(&mut self, ui: &mut egui::Ui, hovering: bool) {
        ui.heading("Upload your image");
        ui.add_space(5.0);
        ui.label(
            RichText::new("File should be jpeg, png...")
                .color(ui.visuals().text_color().gamma_multiply(0.7)),
        );
        ui.add_space(20.0);

        let stroke_color = if hovering {
            self.accent
        } else {
            ui.visuals().widgets.noninteractive.bg_stroke.color
        };
        egui::Frame::none()
            .stroke(egui::Stroke::new(2.0, stroke_color))
            .rounding(12.0)
            .inner_margin(egui::Margin::symmetric(60.0, 40.0))
            .show(ui, |ui| {
                ui.vertical_centered(|ui| {
                    ui.label(RichText::new("🖼").size(48.0).color(self.accent));
                    ui.add_space(10.0);
                    ui.label(if hovering {
                        "Drop the image here..."
                    } else {
                        "Drag & drop your image here"
                    });
                });
            });

        ui.add_space(10.0);
        ui.label("Or");
        ui.add_space(10.0);

        let button = egui::Button::new(RichText::new("Choose a file").color(Color32::WHITE))
            .fill(self.accent)
            .min_size(egui::vec2(160.0, 36.0));
        if ui.add(button).clicked() {
            self.choose_file();
        }

        if let Some(error) = self.controller.last_error() {
            ui.add_space(15.0);
            ui.colored_label(ERROR_COLOR, error);
        }
    }

    fn render_progress(&mut self, ui: &mut egui::Ui) {
        let session = self.controller.session();

        ui.add(egui::Spinner::new().size(32.0));
        ui.add_space(10.0);
        if let Some(file) = session.file() {
            ui.label(format!("📤 Uploading: {}", file.name));
        }
        ui.add_space(10.0);

        let progress_bar = egui::ProgressBar::new(session.get_progress_fraction())
            .show_percentage()
            .animate(false)
            .fill(self.accent)
            .desired_width(320.0);
        ui.add(progress_bar);

        ui.add_space(5.0);
        ui.label(
            RichText::new(FileSizeUtils::format_transfer(
                session.bytes_transferred(),
                session.total_bytes(),
            ))
            .color(ui.visuals().text_color().gamma_multiply(0.7)),
        );
    }

    fn render_preview(&mut self, ui: &mut egui::Ui) {
        let url = self.controller.session().result_url().cloned();

        ui.label(RichText::new("✔").size(36.0).color(SUCCESS_COLOR));
        ui.label(self.controller.session().get_status_text());
        ui.add_space(15.0);

        match self.preview.state() {
            PreviewState::Empty | PreviewState::Loading => {
                ui.add(egui::Spinner::new().size(32.0));
            }
            PreviewState::Ready(texture) => {
                ui.add(
                    egui::Image::new((texture.id(), texture.size_vec2()))
                        .max_size(egui::vec2(480.0, 360.0)),
                );
            }
            PreviewState::Failed(reason) => {
                ui.colored_label(ERROR_COLOR, format!("Preview unavailable: {}", reason));
            }
        }

        if let Some(url) = &url {
            ui.add_space(15.0);
            ui.group(|ui| {
                ui.label(RichText::new(url.as_str()).monospace().small());
                ui.horizontal(|ui| {
                    if ui.button("📋 Copy URL").clicked() {
                        ui.output_mut(|o| o.copied_text = url.to_string());
                    }
                    if ui.button("🌐 Open in browser").clicked() {
                        if let Err(err) = open::that(url.as_str()) {
                            tracing::warn!(error = %err, "could not open browser");
                        }
                    }
                });
            });
        }

        ui.add_space(20.0);
        let back = egui::Button::new(RichText::new("Back").color(Color32::WHITE))
            .fill(self.accent)
            .min_size(egui::vec2(120.0, 36.0));
        if ui.add(back).clicked() {
            self.back();
        }
    }
}
