//! Filesystem port used by the lifecycle controller.
//!
//! The controller only needs a handful of directory operations to create and
//! delete servers and to locate a server jar. They sit behind the
//! [`FileManager`] trait so a host application can route them through its own
//! file service, and tests can substitute a mock.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;

/// Directory operations consumed by the controller
#[async_trait]
pub trait FileManager: Send + Sync {
    /// Creates `path` and any missing parents
    async fn create_directory(&self, path: &Path) -> Result<()>;

    /// Removes `path` and everything below it. Absent paths are not an error.
    async fn remove_tree(&self, path: &Path) -> Result<()>;

    /// File and directory names directly inside `path`
    async fn list_entries(&self, path: &Path) -> Result<Vec<String>>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Creates or truncates `path` with `contents`
    async fn write_file(&self, path: &Path, contents: &str) -> Result<()>;

    /// Marks `path` as executable where the platform has such a bit
    async fn set_executable(&self, path: &Path) -> Result<()>;
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// [`FileManager`] backed by the local filesystem through `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileManager;

impl LocalFileManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileManager for LocalFileManager {
    async fn create_directory(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| io_error("create directory", path, e))
    }

    async fn remove_tree(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, e)),
        }
    }

    async fn list_entries(&self, path: &Path) -> Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_error("list", path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list", path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| io_error("inspect", path, e))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| io_error("write", path, e))
    }

    #[cfg(unix)]
    async fn set_executable(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| io_error("chmod", path, e))
    }

    #[cfg(not(unix))]
    async fn set_executable(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
