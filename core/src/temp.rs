//! Temporary file allocation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::ActionError;

#[async_trait]
pub trait TempFileAllocator: Send + Sync {
    /// Create an empty file and return its absolute path. `keep` files
    /// outlive the allocator; the others are removed with it.
    async fn create_temp_file(
        &self,
        keep: bool,
        extension: Option<&str>,
    ) -> Result<PathBuf, ActionError>;
}

/// Allocator backed by a private temporary directory.
#[derive(Debug)]
pub struct TempPathsRegistry {
    dir: TempDir,
}

impl TempPathsRegistry {
    /// # Errors
    /// Fails when the temporary directory cannot be created.
    pub fn new() -> Result<Self, ActionError> {
        let dir = TempDir::new().map_err(|e| ActionError::io(&std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

fn file_name(extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", Uuid::new_v4(), ext.trim_start_matches('.')),
        _ => Uuid::new_v4().to_string(),
    }
}

#[async_trait]
impl TempFileAllocator for TempPathsRegistry {
    async fn create_temp_file(
        &self,
        keep: bool,
        extension: Option<&str>,
    ) -> Result<PathBuf, ActionError> {
        let base = if keep {
            std::env::temp_dir()
        } else {
            self.dir.path().to_path_buf()
        };
        let path = base.join(file_name(extension));
        tokio::fs::File::create(&path)
            .await
            .map_err(|e| ActionError::io(&path, e))?;
        tracing::debug!(path = %path.display(), keep, "allocated temp file");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_empty_files_with_extension() {
        let registry = TempPathsRegistry::new().unwrap();
        let path = registry.create_temp_file(false, Some(".json")).await.unwrap();
        assert!(path.starts_with(registry.dir()));
        assert_eq!(path.extension().unwrap(), "json");
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn scratch_files_are_removed_with_registry() {
        let registry = TempPathsRegistry::new().unwrap();
        let path = registry.create_temp_file(false, None).await.unwrap();
        drop(registry);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn kept_files_survive_registry() {
        let registry = TempPathsRegistry::new().unwrap();
        let path = registry.create_temp_file(true, Some("txt")).await.unwrap();
        drop(registry);
        assert!(path.exists());
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
