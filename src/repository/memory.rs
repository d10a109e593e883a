use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ImageRepository, find_by_id, generate_filename, is_supported_image};
use crate::error::RepositoryError;

/// In-memory repository for tests. Keeps insertion order, and can be told to
/// fail reads or to silently drop writes.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    fail_reads: AtomicBool,
    drop_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file under an exact name, bypassing name generation.
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.lock().push((name.into(), bytes.into()));
    }

    /// Make every subsequent read-side call fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Report successful saves without storing anything.
    pub fn set_drop_writes(&self, drop: bool) {
        self.drop_writes.store(drop, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Vec<u8>)>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_readable(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("storage unreadable").into());
        }
        Ok(())
    }
}

impl ImageRepository for MemoryRepository {
    fn ensure_ready(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>, RepositoryError> {
        self.check_readable()?;
        Ok(self
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| is_supported_image(name))
            .collect())
    }

    fn save_upload(&self, bytes: &[u8], original_name: &str) -> Result<String, RepositoryError> {
        let name = generate_filename(original_name);
        if !self.drop_writes.load(Ordering::SeqCst) {
            self.lock().push((name.clone(), bytes.to_vec()));
        }
        Ok(name)
    }

    fn delete_by_id(&self, id: &str) -> Result<String, RepositoryError> {
        let names = self.list_files()?;
        let name = find_by_id(&names, id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .to_string();
        self.lock().retain(|(stored, _)| *stored != name);
        Ok(name)
    }

    fn remove(&self, name: &str) -> Result<(), RepositoryError> {
        let mut files = self.lock();
        let before = files.len();
        files.retain(|(stored, _)| stored != name);
        if files.len() == before {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn stat(&self, name: &str) -> Result<Option<u64>, RepositoryError> {
        self.check_readable()?;
        Ok(self
            .lock()
            .iter()
            .find(|(stored, _)| stored == name)
            .map(|(_, bytes)| bytes.len() as u64))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, RepositoryError> {
        self.check_readable()?;
        self.lock()
            .iter()
            .find(|(stored, _)| stored == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
    }
}
