//! Filesystem-backed file store. Request paths are resolved under a root directory.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use l2file_core::{FileStore, ListingEntry, StoreError};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `/tmp/demo/x` under root `r` is `r/tmp/demo/x`. `..` components are rejected, and a
    /// path whose symlinks lead outside the root is invalid.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let path = l2file_core::store::validate_path(path.as_bytes())?;
        let root = fs::canonicalize(&self.root).map_err(|e| store_error(path, e))?;
        let full = fs::canonicalize(root.join(path.trim_start_matches('/')))
            .map_err(|e| store_error(path, e))?;
        if !full.starts_with(&root) {
            warn!(path, resolved = %full.display(), "path leaves the store root");
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(full)
    }
}

fn store_error(path: &str, e: io::Error) -> StoreError {
    match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
        _ => {
            warn!(path, "store: {}", e);
            StoreError::Io(e)
        }
    }
}

impl FileStore for FsStore {
    fn size(&self, path: &str) -> Result<u64, StoreError> {
        let meta = fs::metadata(self.resolve(path)?).map_err(|e| store_error(path, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(meta.len())
    }

    fn open<'a>(&'a self, path: &str) -> Result<Box<dyn Read + 'a>, StoreError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let file = fs::File::open(full).map_err(|e| store_error(path, e))?;
        Ok(Box::new(file))
    }

    fn list(&self, path: &str) -> Result<Vec<ListingEntry>, StoreError> {
        let dir = fs::read_dir(self.resolve(path)?).map_err(|e| store_error(path, e))?;
        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| store_error(path, e))?;
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path, "skipping entry: {}", e);
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let item = ListingEntry::new(meta.len(), name);
            if item.is_encodable() {
                entries.push(item);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
