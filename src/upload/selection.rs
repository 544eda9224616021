use crate::upload::types::{FileSource, SelectedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File extensions offered by the "Choose a file" dialog.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "bmp", "avif"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no file was selected")]
    Empty,

    #[error("only one file can be uploaded at a time ({0} were selected)")]
    MultipleFiles(usize),

    #[error("{name} is not an image ({mime})")]
    NotAnImage { name: String, mime: String },

    #[error("{0} could not be read")]
    Unreadable(String),
}

/// A file offered by the drop target or the file dialog, before filtering.
#[derive(Debug, Clone, Default)]
pub struct SelectionCandidate {
    pub name: String,
    pub path: Option<PathBuf>,
    pub bytes: Option<Arc<[u8]>>,
}

impl SelectionCandidate {
    pub fn from_path(path: PathBuf) -> Self {
        Self {
            name: display_name(&path),
            path: Some(path),
            bytes: None,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Accepts exactly one candidate whose MIME type is `image/*`.
pub fn accept_selection(
    mut candidates: Vec<SelectionCandidate>,
) -> Result<SelectedFile, SelectionError> {
    match candidates.len() {
        0 => return Err(SelectionError::Empty),
        1 => {}
        n => return Err(SelectionError::MultipleFiles(n)),
    }
    let candidate = candidates.remove(0);

    let name = if candidate.name.is_empty() {
        candidate
            .path
            .as_deref()
            .map(display_name)
            .unwrap_or_default()
    } else {
        candidate.name
    };

    let mime = mime_guess::from_path(&name).first();
    match &mime {
        Some(mime) if mime.type_().as_str() == "image" => {}
        other => {
            return Err(SelectionError::NotAnImage {
                name,
                mime: other
                    .as_ref()
                    .map(|m| m.essence_str().to_string())
                    .unwrap_or_else(|| "unknown type".to_string()),
            })
        }
    }
    let content_type = mime
        .map(|m| m.essence_str().to_string())
        .unwrap_or_default();

    // Dropped files carry either their bytes or a path, depending on the platform.
    let (size, source) = match (candidate.bytes, candidate.path) {
        (Some(bytes), _) => (bytes.len() as u64, FileSource::Memory(bytes)),
        (None, Some(path)) => {
            let size = std::fs::metadata(&path)
                .map_err(|_| SelectionError::Unreadable(name.clone()))?
                .len();
            (size, FileSource::Path(path))
        }
        (None, None) => return Err(SelectionError::Unreadable(name)),
    };

    Ok(SelectedFile {
        name,
        content_type,
        size,
        source,
    })
}
