use axum::http::StatusCode;
use thiserror::Error;

/// Failures raised by an [`ImageRepository`](crate::repository::ImageRepository).
///
/// The repository reports raw conditions only; the store decides how each one
/// surfaces to callers.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no stored image matches '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures the store reports to API callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No image found in request")]
    NoFile,
    #[error("Uploaded file '{name}' is empty")]
    EmptyFile { name: String },
    #[error("Content-Type must be multipart/form-data")]
    NotMultipart,
    #[error("Only image files are allowed! Got: {mime}")]
    UnsupportedMediaType { mime: String },
    #[error("File too large (max {})", human_limit(.limit_bytes))]
    PayloadTooLarge { limit_bytes: usize },
    #[error("Too many files (max {limit})")]
    TooManyFiles { limit: usize },
    #[error("Image not found")]
    NotFound,
    #[error("Image storage is unavailable")]
    StorageUnavailable(#[source] RepositoryError),
    #[error("File was not saved correctly")]
    StorageWriteFailed { name: String },
    #[error("Upload error: {0}")]
    Malformed(String),
}

/// Failures of [`ApiClient`](crate::client::ApiClient) calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error status. `message` is the server's
    /// own `error` text when it sent one.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read {}", .path.display())]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::NoFile
            | StoreError::EmptyFile { .. }
            | StoreError::NotMultipart
            | StoreError::UnsupportedMediaType { .. }
            | StoreError::TooManyFiles { .. }
            | StoreError::Malformed(_) => StatusCode::BAD_REQUEST,
            StoreError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::StorageUnavailable(_) | StoreError::StorageWriteFailed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn payload_too_large(limit_bytes: usize) -> Self {
        StoreError::PayloadTooLarge { limit_bytes }
    }
}

/// Upload ceiling as shown to users, rounded up so it never reads as zero.
fn human_limit(bytes: &usize) -> String {
    let bytes = *bytes;
    const KIB: usize = 1024;
    const MIB: usize = 1024 * KIB;
    if bytes >= MIB {
        format!("{}MB", bytes.div_ceil(MIB))
    } else if bytes >= KIB {
        format!("{}KB", bytes.div_ceil(KIB))
    } else {
        format!("{bytes} bytes")
    }
}
