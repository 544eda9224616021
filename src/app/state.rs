use crate::upload::SelectedFile;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading,
    Succeeded,
}

/// One attempt to upload a single file. `result_url` is only ever set while
/// `status` is `Succeeded`.
#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    status: UploadStatus,
    file: Option<SelectedFile>,
    progress: f32,
    bytes_transferred: u64,
    total_bytes: u64,
    result_url: Option<Url>,
}

impl UploadSession {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn uploading(file: SelectedFile) -> Self {
        Self {
            status: UploadStatus::Uploading,
            total_bytes: file.size,
            file: Some(file),
            ..Self::default()
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    /// Percentage in `[0, 100]`.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn result_url(&self) -> Option<&Url> {
        self.result_url.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.status == UploadStatus::Idle
    }

    pub fn is_uploading(&self) -> bool {
        self.status == UploadStatus::Uploading
    }

    pub(super) fn record_progress(&mut self, bytes_transferred: u64, total_bytes: u64) {
        if total_bytes == 0 {
            return;
        }
        self.bytes_transferred = bytes_transferred;
        self.total_bytes = total_bytes;
        self.progress = progress_percentage(bytes_transferred, total_bytes);
    }

    pub(super) fn succeed(&mut self, url: Url) {
        self.status = UploadStatus::Succeeded;
        self.progress = 100.0;
        self.bytes_transferred = self.total_bytes;
        self.result_url = Some(url);
    }

    /// Fraction in `[0, 1]` for progress bars.
    pub fn get_progress_fraction(&self) -> f32 {
        self.progress / 100.0
    }

    pub fn get_status_text(&self) -> String {
        match self.status {
            UploadStatus::Idle => String::new(),
            UploadStatus::Uploading => format!("Uploading... {:.0}%", self.progress),
            UploadStatus::Succeeded => "Upload successful".to_string(),
        }
    }
}

pub fn progress_percentage(bytes_transferred: u64, total_bytes: u64) -> f32 {
    if total_bytes == 0 {
        return 0.0;
    }
    let percentage = bytes_transferred as f64 / total_bytes as f64 * 100.0;
    percentage.clamp(0.0, 100.0) as f32
}
