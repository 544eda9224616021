use crate::upload::types::SelectedFile;
use chrono::Utc;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Name of the object inside the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// `{prefix}{utc timestamp}-{random token}.{ext}`
    pub fn generate(prefix: &str, file: &SelectedFile) -> Self {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let token = Uuid::new_v4().simple();
        match extension_for(file) {
            Some(ext) => Self(format!("{prefix}{timestamp}-{token}.{ext}")),
            None => Self(format!("{prefix}{timestamp}-{token}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn extension_for(file: &SelectedFile) -> Option<String> {
    Path::new(&file.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&file.content_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
}
