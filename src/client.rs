//! HTTP client for the picture frame API, shared by the slideshow and the
//! `manage` command.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::store::{DeleteOutcome, ImageRecord, content_type_for};
use crate::web::UPLOAD_FIELD;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn images_url(&self) -> String {
        // Timestamp query defeats intermediary caches.
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("{}/api/images?_={stamp}", self.base_url)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>, ClientError> {
        let url = self.images_url();
        let resp = self.send(&url, self.client.get(&url)).await?;
        let images: Vec<ImageRecord> = decode(&url, resp).await?;
        debug!(count = images.len(), "fetched image list");
        Ok(images)
    }

    /// Upload one file under the `image` form field, with the content type
    /// guessed from its extension.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageRecord, ClientError> {
        let mime = content_type_for(file_name).unwrap_or("application/octet-stream");
        self.upload_as(file_name, mime, bytes).await
    }

    pub async fn upload_as(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageRecord, ClientError> {
        let url = format!("{}/api/upload", self.base_url);
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;
        let form = Form::new().part(UPLOAD_FIELD, part);
        let resp = self
            .send(&url, self.client.post(&url).multipart(form))
            .await?;
        let record: ImageRecord = decode(&url, resp).await?;
        info!(file = file_name, size, id = %record.id, "uploaded image");
        Ok(record)
    }

    pub async fn upload_path(&self, path: &Path) -> Result<ImageRecord, ClientError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.upload(&file_name, bytes).await
    }

    /// Delete one image. A missing image is a `success: false` outcome, not an
    /// error.
    pub async fn delete_image(&self, id: &str) -> Result<DeleteOutcome, ClientError> {
        let url = format!("{}/api/images/{id}", self.base_url);
        let resp = self.send(&url, self.client.delete(&url)).await?;
        let outcome: DeleteOutcome = decode(&url, resp).await?;
        if !outcome.success {
            warn!(id, error = ?outcome.error, "server refused delete");
        }
        Ok(outcome)
    }

    /// Delete several images one by one; every id gets an outcome.
    pub async fn delete_images(&self, ids: &[String]) -> Vec<(String, DeleteOutcome)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.delete_image(id).await {
                Ok(outcome) => outcome,
                Err(err) => DeleteOutcome {
                    success: false,
                    error: Some(err.to_string()),
                },
            };
            results.push((id.clone(), outcome));
        }
        results
    }

    /// Fetch binary content at a server-relative URL such as
    /// `ImageRecord::url`.
    pub async fn fetch_bytes(&self, relative_url: &str) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}{relative_url}", self.base_url);
        let resp = self.send(&url, self.client.get(&url)).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| ClientError::Decode { url, source })?;
        Ok(bytes.to_vec())
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ClientError> {
        let resp = request
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("server returned {status}"));
        debug!(url, %status, %message, "request rejected");
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T, ClientError> {
    resp.json::<T>().await.map_err(|source| ClientError::Decode {
        url: url.to_string(),
        source,
    })
}
