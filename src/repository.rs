//! Physical storage and naming of image files.
//!
//! The storage directory is the only record of which images exist. Nothing
//! outside this module touches it.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RepositoryError;

mod memory;

pub use memory::MemoryRepository;

/// Lower-case extensions accepted for storage and listing.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

const DEFAULT_EXTENSION: &str = "jpg";

pub trait ImageRepository: Send + Sync {
    /// Create the storage directory (and parents) if it is missing.
    fn ensure_ready(&self) -> Result<(), RepositoryError>;

    /// Stored filenames with a supported extension, in enumeration order.
    fn list_files(&self) -> Result<Vec<String>, RepositoryError>;

    /// Store `bytes` under a freshly generated name and return that name.
    fn save_upload(&self, bytes: &[u8], original_name: &str) -> Result<String, RepositoryError>;

    /// Remove the image whose name without extension equals `id`. Returns the
    /// removed filename.
    fn delete_by_id(&self, id: &str) -> Result<String, RepositoryError>;

    /// Remove a stored file by its exact name. Used to undo a failed upload,
    /// so it must not depend on listing the directory.
    fn remove(&self, name: &str) -> Result<(), RepositoryError>;

    /// Size in bytes of a stored file, `None` when it does not exist.
    fn stat(&self, name: &str) -> Result<Option<u64>, RepositoryError>;

    /// Contents of a stored image.
    fn read(&self, name: &str) -> Result<Vec<u8>, RepositoryError>;
}

#[inline]
pub fn is_supported_image(name: &str) -> bool {
    matches!(
        extension_of(name),
        Some(ref e) if SUPPORTED_EXTENSIONS.contains(&e.as_str())
    )
}

/// Lower-cased extension of `name`, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase())
}

/// Filename without its extension; this is the public image id.
pub fn id_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(pos) => &name[..pos],
    }
}

/// Extension a stored upload receives: the original one lower-cased, or
/// `jpg` when absent or not a plain alphanumeric suffix.
pub fn upload_extension(original_name: &str) -> String {
    match extension_of(original_name) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// `<uuid-v4>.<ext>`; the random token is the image id.
pub fn generate_filename(original_name: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), upload_extension(original_name))
}

/// Among `names`, the lexicographically first whose id equals `id`.
pub(crate) fn find_by_id<'a, I>(names: I, id: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    names
        .into_iter()
        .map(String::as_str)
        .filter(|name| id_of(name) == id)
        .min()
}

/// Rejects anything that could escape the storage directory.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name))
}

/// Image repository rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}.part"))
    }
}

impl ImageRepository for FsRepository {
    fn ensure_ready(&self) -> Result<(), RepositoryError> {
        if self.root.is_dir() {
            debug!(root = %self.root.display(), "storage directory present");
            return Ok(());
        }
        fs::create_dir_all(&self.root)?;
        info!(root = %self.root.display(), "created storage directory");
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>, RepositoryError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "list: skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') && is_supported_image(&name) {
                names.push(name);
            }
        }
        debug!(count = names.len(), "list: enumerated storage directory");
        Ok(names)
    }

    fn save_upload(&self, bytes: &[u8], original_name: &str) -> Result<String, RepositoryError> {
        let name = generate_filename(original_name);
        let temp = self.temp_path(&name);
        let target = self.root.join(&name);
        debug!(original = original_name, %name, size = bytes.len(), "save: writing upload");

        // Hidden temp file first so listers never observe a half-written image.
        if let Err(err) = fs::write(&temp, bytes).and_then(|_| fs::rename(&temp, &target)) {
            if let Err(cleanup) = fs::remove_file(&temp)
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(path = %temp.display(), error = %cleanup, "save: failed to clean up temp file");
            }
            return Err(err.into());
        }
        Ok(name)
    }

    fn delete_by_id(&self, id: &str) -> Result<String, RepositoryError> {
        let names = self.list_files()?;
        let Some(name) = find_by_id(&names, id) else {
            debug!(id, "delete: no match");
            return Err(RepositoryError::NotFound(id.to_string()));
        };
        let path = self.root.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "delete: removed");
                Ok(name.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "delete: file vanished during remove");
                Err(RepositoryError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, name: &str) -> Result<(), RepositoryError> {
        if !is_plain_filename(name) {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => {
                debug!(name, "remove: removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RepositoryError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stat(&self, name: &str) -> Result<Option<u64>, RepositoryError> {
        if !is_plain_filename(name) {
            return Ok(None);
        }
        match fs::metadata(self.root.join(name)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, RepositoryError> {
        if !is_plain_filename(name) || !is_supported_image(name) {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RepositoryError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
