use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{DisplaySurface, ImageSource};
use crate::client::ApiClient;
use crate::store::ImageRecord;

/// Fetches the collection from a running picture frame server.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    api: ApiClient,
}

impl HttpImageSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(ApiClient::new(base_url))
    }

    pub fn with_client(api: ApiClient) -> Self {
        Self { api }
    }
}

impl ImageSource for HttpImageSource {
    async fn fetch_images(&self) -> Result<Vec<ImageRecord>> {
        self.api
            .list_images()
            .await
            .context("failed to fetch image list")
    }

    async fn preload(&self, image: &ImageRecord) -> Result<()> {
        let bytes = self
            .api
            .fetch_bytes(&image.url)
            .await
            .with_context(|| format!("preload of {} failed", image.id))?;
        debug!(id = %image.id, size = bytes.len(), "preloaded image");
        Ok(())
    }
}

/// Display surface for running without a screen; it only remembers the
/// requested fullscreen state.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    fullscreen: AtomicBool,
}

impl HeadlessSurface {
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }
}

impl DisplaySurface for HeadlessSurface {
    fn set_fullscreen(&self, fullscreen: bool) -> Result<bool> {
        info!(fullscreen, "headless display fullscreen request");
        self.fullscreen.store(fullscreen, Ordering::SeqCst);
        Ok(fullscreen)
    }
}
