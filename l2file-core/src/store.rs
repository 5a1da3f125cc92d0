//! File store seam: the server looks files up through this trait; the host supplies the
//! real filesystem.

use std::collections::BTreeMap;
use std::io::Read;

use crate::listing::ListingEntry;

/// Read-only file access used by the dispatcher.
pub trait FileStore {
    /// Size of the file at `path` in bytes.
    fn size(&self, path: &str) -> Result<u64, StoreError>;
    /// Open the file at `path` for sequential reading. The host pulls it in chunk-sized
    /// pieces, so a file is never held in memory whole.
    fn open<'a>(&'a self, path: &str) -> Result<Box<dyn Read + 'a>, StoreError>;
    /// Entries of the directory at `path`, in listing order.
    fn list(&self, path: &str) -> Result<Vec<ListingEntry>, StoreError>;
}

impl<S: FileStore + ?Sized> FileStore for &S {
    fn size(&self, path: &str) -> Result<u64, StoreError> {
        (**self).size(path)
    }
    fn open<'a>(&'a self, path: &str) -> Result<Box<dyn Read + 'a>, StoreError> {
        (**self).open(path)
    }
    fn list(&self, path: &str) -> Result<Vec<ListingEntry>, StoreError> {
        (**self).list(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{path} ended after {read} of {expected} bytes")]
    ShortRead {
        path: String,
        read: u64,
        expected: u64,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate a path payload: UTF-8, non-empty, no NUL byte, no `..` component.
pub fn validate_path(payload: &[u8]) -> Result<&str, StoreError> {
    let path = std::str::from_utf8(payload)
        .map_err(|_| StoreError::InvalidPath(String::from_utf8_lossy(payload).into_owned()))?;
    if path.is_empty() || path.contains('\0') || path.split('/').any(|c| c == "..") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

/// In-memory store keyed by absolute-style paths (`/dir/name`). Directories are implied by
/// the files under them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    fn dir_prefix(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        format!("{}/", trimmed)
    }
}

impl FileStore for MemoryStore {
    fn size(&self, path: &str) -> Result<u64, StoreError> {
        self.files
            .get(path)
            .map(|f| f.len() as u64)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn open<'a>(&'a self, path: &str) -> Result<Box<dyn Read + 'a>, StoreError> {
        let data = self
            .files
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(Box::new(data.as_slice()))
    }

    fn list(&self, path: &str) -> Result<Vec<ListingEntry>, StoreError> {
        let prefix = Self::dir_prefix(path);
        let entries: Vec<ListingEntry> = self
            .files
            .iter()
            .filter_map(|(p, data)| {
                let rest = p.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/'))
                    .then(|| ListingEntry::new(data.len() as u64, rest))
            })
            .collect();
        let is_dir = self.files.keys().any(|p| p.starts_with(&prefix));
        if !is_dir {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(entries)
    }
}
