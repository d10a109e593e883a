//! Validation and translation between the HTTP surface and the repository.
//!
//! Listing never fails: a storage hiccup shows as an empty collection so the
//! frame keeps running. Uploads and deletes report precise reasons because
//! the management page shows them to the user.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{RepositoryError, StoreError};
use crate::repository::{ImageRepository, SUPPORTED_EXTENSIONS, extension_of, id_of};

/// API-facing descriptor of one stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub url: String,
}

impl ImageRecord {
    pub fn from_filename(name: &str, public_prefix: &str) -> Self {
        let locator = format!("{public_prefix}/{name}");
        Self {
            id: id_of(name).to_string(),
            name: name.to_string(),
            path: locator.clone(),
            url: locator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 25 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// One file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub content_type: Option<String>,
}

/// Result of a delete request. Missing images are reported here rather than
/// as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeleteOutcome {
    fn removed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Clone)]
pub struct ImageStore {
    repo: Arc<dyn ImageRepository>,
    limits: UploadLimits,
    public_prefix: Arc<str>,
}

impl ImageStore {
    pub fn new(
        repo: Arc<dyn ImageRepository>,
        limits: UploadLimits,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            limits,
            public_prefix: Arc::from(public_prefix.into()),
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ImageRepository) -> Result<T, RepositoryError> + Send + 'static,
    {
        let repo = self.repo.clone();
        task::spawn_blocking(move || f(repo.as_ref()))
            .await
            .map_err(|err| RepositoryError::Io(std::io::Error::other(err)))?
    }

    pub async fn ensure_ready(&self) -> Result<(), RepositoryError> {
        self.blocking(|repo| repo.ensure_ready()).await
    }

    pub async fn list_images(&self) -> Vec<ImageRecord> {
        match self.blocking(|repo| repo.list_files()).await {
            Ok(names) => {
                debug!(count = names.len(), "listing images");
                names
                    .iter()
                    .map(|name| ImageRecord::from_filename(name, &self.public_prefix))
                    .collect()
            }
            Err(err) => {
                warn!(error = %err, "image storage unreadable; reporting empty collection");
                Vec::new()
            }
        }
    }

    /// Checks one file against the size ceiling and the allowed image types.
    pub fn validate(&self, file: &UploadFile) -> Result<(), StoreError> {
        if file.bytes.len() > self.limits.max_file_bytes {
            return Err(StoreError::payload_too_large(self.limits.max_file_bytes));
        }
        if file.bytes.is_empty() {
            return Err(StoreError::EmptyFile {
                name: file.original_name.clone(),
            });
        }
        let ext_ok = matches!(
            extension_of(&file.original_name),
            Some(ref e) if SUPPORTED_EXTENSIONS.contains(&e.as_str())
        );
        if !ext_ok && mime_extension(file.content_type.as_deref()).is_none() {
            return Err(StoreError::UnsupportedMediaType {
                mime: file
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(())
    }

    /// Stores every file of one request, or none of them.
    pub async fn upload_images(
        &self,
        files: Vec<UploadFile>,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        if files.is_empty() {
            return Err(StoreError::NoFile);
        }
        if files.len() > self.limits.max_files {
            return Err(StoreError::TooManyFiles {
                limit: self.limits.max_files,
            });
        }
        for file in &files {
            self.validate(file)?;
        }

        let mut saved: Vec<ImageRecord> = Vec::with_capacity(files.len());
        for file in files {
            match self.persist(file).await {
                Ok(record) => saved.push(record),
                Err(err) => {
                    self.roll_back(&saved).await;
                    return Err(err);
                }
            }
        }
        Ok(saved)
    }

    pub async fn upload_image(&self, file: UploadFile) -> Result<ImageRecord, StoreError> {
        let mut records = self.upload_images(vec![file]).await?;
        records.pop().ok_or(StoreError::NoFile)
    }

    async fn persist(&self, file: UploadFile) -> Result<ImageRecord, StoreError> {
        let UploadFile {
            bytes,
            original_name,
            content_type,
        } = file;
        let storage_name = storage_name_hint(&original_name, content_type.as_deref());
        let size = bytes.len();
        let name = self
            .blocking(move |repo| repo.save_upload(&bytes, &storage_name))
            .await
            .map_err(StoreError::StorageUnavailable)?;

        let check = name.clone();
        let err = match self.blocking(move |repo| repo.stat(&check)).await {
            Ok(Some(len)) if len > 0 => {
                info!(original = %original_name, %name, size, "image uploaded");
                return Ok(ImageRecord::from_filename(&name, &self.public_prefix));
            }
            Ok(stored) => {
                warn!(%name, ?stored, "upload could not be verified after write");
                StoreError::StorageWriteFailed { name: name.clone() }
            }
            Err(err) => {
                warn!(%name, error = %err, "failed to verify upload after write");
                StoreError::StorageUnavailable(err)
            }
        };
        self.discard(&name).await;
        Err(err)
    }

    /// Removes a file written by a request that is failing.
    async fn discard(&self, name: &str) {
        let target = name.to_string();
        match self.blocking(move |repo| repo.remove(&target)).await {
            Ok(_) | Err(RepositoryError::NotFound(_)) => {}
            Err(err) => warn!(%name, error = %err, "failed to remove unverified upload"),
        }
    }

    async fn roll_back(&self, saved: &[ImageRecord]) {
        for record in saved {
            let name = record.name.clone();
            if let Err(err) = self.blocking(move |repo| repo.remove(&name)).await {
                warn!(name = %record.name, error = %err, "failed to roll back partial upload");
            }
        }
    }

    pub async fn delete_image(&self, id: &str) -> DeleteOutcome {
        let target = id.to_string();
        match self.blocking(move |repo| repo.delete_by_id(&target)).await {
            Ok(name) => {
                info!(id, %name, "image deleted");
                DeleteOutcome::removed()
            }
            Err(RepositoryError::NotFound(_)) => {
                warn!(id, "delete requested for unknown image");
                DeleteOutcome::failed(StoreError::NotFound.to_string())
            }
            Err(err) => {
                warn!(id, error = %err, "failed to delete image");
                DeleteOutcome::failed("Failed to delete image")
            }
        }
    }

    /// Stored bytes and content type for serving under the public prefix.
    pub async fn read_image(&self, name: &str) -> Result<(Vec<u8>, &'static str), StoreError> {
        let content_type = content_type_for(name).ok_or(StoreError::NotFound)?;
        let target = name.to_string();
        match self.blocking(move |repo| repo.read(&target)).await {
            Ok(bytes) => Ok((bytes, content_type)),
            Err(RepositoryError::NotFound(_)) => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::StorageUnavailable(err)),
        }
    }
}

/// Extension implied by an allowed `image/*` MIME type.
fn mime_extension(content_type: Option<&str>) -> Option<&'static str> {
    let essence = content_type?
        .split(';')
        .next()?
        .trim()
        .to_ascii_lowercase();
    let subtype = essence.strip_prefix("image/")?;
    SUPPORTED_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| *ext == subtype)
}

/// Name handed to the repository for extension derivation. When the original
/// extension is not an image type but the MIME type is, the MIME type wins so
/// the stored file stays listable.
fn storage_name_hint(original_name: &str, content_type: Option<&str>) -> String {
    let ext_ok = matches!(
        extension_of(original_name),
        Some(ref e) if SUPPORTED_EXTENSIONS.contains(&e.as_str())
    );
    match (ext_ok, mime_extension(content_type)) {
        (false, Some(ext)) => format!("upload.{ext}"),
        _ => original_name.to_string(),
    }
}

pub fn content_type_for(name: &str) -> Option<&'static str> {
    match extension_of(name)?.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
