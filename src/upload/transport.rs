//! The seam between the upload controller and whatever stores the bytes.
//!
//! A transport reports progress while it uploads and ends with exactly one
//! terminal result. Everything it reports travels to the UI thread as a
//! [`SessionEvent`] tagged with the generation of the session that started it.

use crate::upload::key::ObjectKey;
use crate::upload::types::{SelectedFile, UploadedObject};
use async_trait::async_trait;
use std::sync::mpsc::Sender;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("storage did not return a resumable upload URL")]
    MissingUploadUrl,

    #[error("storage returned an invalid resumable upload URL: {0}")]
    InvalidUploadUrl(String),

    #[error("object {0} has no download token")]
    NoDownloadToken(String),

    #[error("invalid storage endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Uploads `file` under `key`, reporting progress as chunks are acknowledged.
    async fn upload(
        &self,
        key: &ObjectKey,
        file: &SelectedFile,
        progress: &ProgressSender,
    ) -> Result<UploadedObject, TransportError>;

    /// Resolves a publicly readable address for a completed upload.
    async fn resolve_address(&self, object: &UploadedObject) -> Result<Url, TransportError>;
}

#[derive(Debug)]
pub enum TransportEvent {
    Progress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    Failed(TransportError),
    Completed(UploadedObject),
    Resolved(Url),
    ResolveFailed(TransportError),
}

#[derive(Debug)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Handed to a transport so progress lands in the right session.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    generation: u64,
    sender: Sender<SessionEvent>,
}

impl ProgressSender {
    pub fn new(generation: u64, sender: Sender<SessionEvent>) -> Self {
        Self { generation, sender }
    }

    pub fn report(&self, bytes_transferred: u64, total_bytes: u64) {
        self.send(TransportEvent::Progress {
            bytes_transferred,
            total_bytes,
        });
    }

    pub(crate) fn send(&self, event: TransportEvent) {
        // The receiver only goes away when the app shuts down.
        let _ = self.sender.send(SessionEvent {
            generation: self.generation,
            event,
        });
    }
}
