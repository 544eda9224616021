use crate::upload::key::ObjectKey;
use crate::upload::transport::{ProgressSender, StorageTransport, TransportError};
use crate::upload::types::{SelectedFile, UploadedObject};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::ops::Range;
use url::Url;

/// Resumable upload chunks must be a multiple of this, except for the last one.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    bucket: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    download_tokens: Option<String>,
}

impl From<ObjectMetadata> for UploadedObject {
    fn from(metadata: ObjectMetadata) -> Self {
        UploadedObject {
            name: metadata.name,
            bucket: metadata.bucket,
            size: metadata
                .size
                .and_then(|size| size.parse().ok())
                .unwrap_or_default(),
            content_type: metadata.content_type,
            download_tokens: metadata
                .download_tokens
                .map(|tokens| {
                    tokens
                        .split(',')
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Firebase Storage over its REST surface, using the resumable upload protocol.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    auth_token: Option<String>,
    chunk_size: usize,
}

impl FirebaseStorage {
    pub fn new(
        endpoint: &str,
        bucket: String,
        auth_token: Option<String>,
        chunk_size: usize,
    ) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket,
            auth_token,
            chunk_size: round_chunk_size(chunk_size),
        })
    }

    fn url_with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn objects_url(&self) -> Url {
        self.url_with_segments(&["v0", "b", &self.bucket, "o"])
    }

    fn object_url(&self, name: &str) -> Url {
        self.url_with_segments(&["v0", "b", &self.bucket, "o", name])
    }

    pub fn download_url(&self, name: &str, token: &str) -> Url {
        let mut url = self.object_url(name);
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", token);
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header("Authorization", format!("Firebase {}", token)),
            None => request,
        }
    }

    async fn start_session(
        &self,
        key: &ObjectKey,
        file: &SelectedFile,
        total: u64,
    ) -> Result<Url, TransportError> {
        let mut url = self.objects_url();
        url.query_pairs_mut().append_pair("name", key.as_str());

        let payload = json!({
            "name": key.as_str(),
            "contentType": file.content_type,
        });

        let response = self
            .authorized(self.client.post(url))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", total)
            .header("X-Goog-Upload-Header-Content-Type", file.content_type.as_str())
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        upload_url_from(response.headers())
    }

    async fn send_chunk(
        &self,
        upload_url: &Url,
        command: &str,
        offset: usize,
        chunk: Vec<u8>,
    ) -> Result<Response, TransportError> {
        let response = self
            .authorized(self.client.post(upload_url.clone()))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", command)
            .header("X-Goog-Upload-Offset", offset)
            .body(chunk)
            .send()
            .await?;
        check_status(response).await
    }
}

#[async_trait]
impl StorageTransport for FirebaseStorage {
    async fn upload(
        &self,
        key: &ObjectKey,
        file: &SelectedFile,
        progress: &ProgressSender,
    ) -> Result<UploadedObject, TransportError> {
        let data = file.read().await?;
        let total = data.len() as u64;
        progress.report(0, total);

        let upload_url = self.start_session(key, file, total).await?;
        tracing::info!(key = %key, bytes = total, "started resumable upload");

        let mut ranges = chunk_ranges(data.len(), self.chunk_size);
        let last = ranges.pop().unwrap_or(0..0);

        for range in ranges {
            let end = range.end;
            self.send_chunk(&upload_url, "upload", range.start, data[range.clone()].to_vec())
                .await?;
            tracing::debug!(key = %key, sent = end, total, "chunk acknowledged");
            progress.report(end as u64, total);
        }

        let response = self
            .send_chunk(
                &upload_url,
                "upload, finalize",
                last.start,
                data[last.clone()].to_vec(),
            )
            .await?;
        progress.report(total, total);

        let metadata: ObjectMetadata = response.json().await?;
        Ok(metadata.into())
    }

    async fn resolve_address(&self, object: &UploadedObject) -> Result<Url, TransportError> {
        let response = self
            .authorized(self.client.get(self.object_url(&object.name)))
            .send()
            .await?;
        let metadata: ObjectMetadata = check_status(response).await?.json().await?;
        let object = UploadedObject::from(metadata);

        let token = object
            .download_tokens
            .first()
            .ok_or_else(|| TransportError::NoDownloadToken(object.name.clone()))?;
        Ok(self.download_url(&object.name, token))
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

fn upload_url_from(headers: &HeaderMap) -> Result<Url, TransportError> {
    let upload_url = headers
        .get("X-Goog-Upload-URL")
        .and_then(|value| value.to_str().ok())
        .ok_or(TransportError::MissingUploadUrl)?;
    Url::parse(upload_url).map_err(|_| TransportError::InvalidUploadUrl(upload_url.to_string()))
}

fn round_chunk_size(chunk_size: usize) -> usize {
    let chunks = chunk_size.div_ceil(CHUNK_GRANULARITY).max(1);
    chunks * CHUNK_GRANULARITY
}

/// Splits `total` bytes into upload ranges. An empty file still gets one
/// (empty) range so the session can be finalized.
fn chunk_ranges(total: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return vec![0..0];
    }
    (0..total)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total))
        .collect()
}
