use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use toolgate_core::VirtualFsConfig;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("File limit reached ({max} files per sandbox)")]
    TooManyFiles { max: usize },

    #[error("File too large: {size} bytes exceeds {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
}

/// Ephemeral scratch storage, one namespace per sandbox id.
pub struct VirtualFileSystem {
    scopes: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    max_files: usize,
    max_file_size: u64,
}

impl VirtualFileSystem {
    pub fn new(max_files: usize, max_file_size: u64) -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
            max_files,
            max_file_size,
        }
    }

    pub fn from_config(config: &VirtualFsConfig) -> Self {
        Self::new(config.max_files, config.max_file_size_bytes())
    }

    /// Overwriting an existing path does not count against the file limit.
    pub fn write(
        &self,
        sandbox_id: &str,
        path: &str,
        contents: impl Into<Vec<u8>>,
    ) -> Result<(), VfsError> {
        let contents = contents.into();
        let size = contents.len() as u64;
        if size > self.max_file_size {
            return Err(VfsError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let mut scopes = self.scopes.lock();
        let files = scopes.entry(sandbox_id.to_string()).or_default();
        if !files.contains_key(path) && files.len() >= self.max_files {
            return Err(VfsError::TooManyFiles {
                max: self.max_files,
            });
        }

        files.insert(path.to_string(), contents);
        Ok(())
    }

    pub fn read(&self, sandbox_id: &str, path: &str) -> Option<Vec<u8>> {
        self.scopes
            .lock()
            .get(sandbox_id)
            .and_then(|files| files.get(path).cloned())
    }

    pub fn delete(&self, sandbox_id: &str, path: &str) -> bool {
        self.scopes
            .lock()
            .get_mut(sandbox_id)
            .is_some_and(|files| files.remove(path).is_some())
    }

    pub fn list(&self, sandbox_id: &str) -> Vec<String> {
        let mut paths: Vec<_> = self
            .scopes
            .lock()
            .get(sandbox_id)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Drops the whole namespace; returns how many files it held.
    pub fn clear(&self, sandbox_id: &str) -> usize {
        let removed = self
            .scopes
            .lock()
            .remove(sandbox_id)
            .map_or(0, |files| files.len());
        if removed > 0 {
            debug!("Cleared {} virtual files for sandbox {}", removed, sandbox_id);
        }
        removed
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.lock().len()
    }
}
