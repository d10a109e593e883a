use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::store::UploadLimits;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Address the HTTP server listens on.
    pub bind_address: SocketAddr,
    /// Directory holding the uploaded images. Created on startup if missing.
    pub uploads_path: PathBuf,
    /// URL prefix binary image content is served under.
    pub public_prefix: String,
    /// Per-request upload ceilings.
    pub upload: UploadOptions,
    /// Timing and gesture options for the slideshow client.
    pub slideshow: SlideshowOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.uploads_path.as_os_str().is_empty(),
            "uploads-path must not be empty"
        );
        ensure!(
            self.public_prefix.starts_with('/') && !self.public_prefix.ends_with('/'),
            "public-prefix must start with '/' and must not end with '/'"
        );
        ensure!(
            !self.public_prefix.starts_with("/api"),
            "public-prefix must not live under /api"
        );
        self.upload.validate()?;
        self.slideshow.validate()?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5000)),
            uploads_path: PathBuf::from("public/uploads"),
            public_prefix: "/uploads".to_string(),
            upload: UploadOptions::default(),
            slideshow: SlideshowOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UploadOptions {
    /// Largest accepted single file, in bytes.
    pub max_file_bytes: usize,
    /// Most files accepted in one upload request.
    pub max_files: usize,
}

impl UploadOptions {
    const fn default_max_file_bytes() -> usize {
        25 * 1024 * 1024
    }

    const fn default_max_files() -> usize {
        5
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_file_bytes > 0,
            "upload.max-file-bytes must be greater than zero"
        );
        ensure!(
            self.max_files > 0,
            "upload.max-files must be greater than zero"
        );
        Ok(())
    }

    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_bytes: self.max_file_bytes,
            max_files: self.max_files,
        }
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: Self::default_max_file_bytes(),
            max_files: Self::default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SlideshowOptions {
    /// Base URL of the server the slideshow fetches from.
    pub server_url: String,
    /// Time each image stays on screen before auto-advance.
    #[serde(with = "humantime_serde")]
    pub rotation_interval: Duration,
    /// How often the image list is re-fetched.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Horizontal travel, in pixels, a touch must exceed to count as a swipe.
    pub swipe_min_distance: f32,
    /// How long the swipe direction indicator stays visible.
    #[serde(with = "humantime_serde")]
    pub swipe_indicator: Duration,
    /// Pointer inactivity after which on-screen controls hide.
    #[serde(with = "humantime_serde")]
    pub controls_hide_after: Duration,
    /// Delay before skipping an image that failed to render.
    #[serde(with = "humantime_serde")]
    pub error_advance_delay: Duration,
}

impl SlideshowOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.rotation_interval.is_zero(),
            "slideshow.rotation-interval must be positive"
        );
        ensure!(
            !self.refresh_interval.is_zero(),
            "slideshow.refresh-interval must be positive"
        );
        ensure!(
            self.swipe_min_distance >= 0.0,
            "slideshow.swipe-min-distance must not be negative"
        );
        ensure!(
            !self.controls_hide_after.is_zero(),
            "slideshow.controls-hide-after must be positive"
        );
        Ok(())
    }
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            rotation_interval: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(60),
            swipe_min_distance: 50.0,
            swipe_indicator: Duration::from_millis(500),
            controls_hide_after: Duration::from_secs(3),
            error_advance_delay: Duration::from_secs(2),
        }
    }
}
