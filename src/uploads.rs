// src/uploads.rs - G-code files attached to tasks
use crate::catalog::GcodeFile;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Invalid file name '{0}'")]
    InvalidName(String),
    #[error("Stored file '{0}' is missing")]
    Missing(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat directory of uploaded G-code, stored under generated names.
#[derive(Debug, Clone)]
pub struct GcodeStore {
    dir: PathBuf,
}

impl GcodeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `contents` under a fresh uuid name, keeping the client's name for display.
    pub async fn save(&self, original_name: &str, contents: &[u8]) -> Result<GcodeFile, UploadError> {
        if contents.is_empty() {
            return Err(UploadError::Empty);
        }
        let display_name = Path::new(original_name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| UploadError::InvalidName(original_name.to_string()))?
            .to_string();
        let extension = Path::new(&display_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "gcode".to_string());
        let stored_name = format!("{}.{}", uuid::Uuid::new_v4(), extension);

        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&stored_name);
        tracing::info!("Storing G-code '{}' as {}", display_name, path.display());
        fs::write(&path, contents).await?;

        Ok(GcodeFile {
            stored_name,
            original_name: display_name,
            size: contents.len() as u64,
            uploaded_at: Utc::now(),
        })
    }

    pub async fn read(&self, file: &GcodeFile) -> Result<Vec<u8>, UploadError> {
        let path = self.path_of(file)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UploadError::Missing(file.stored_name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a stored file; an already missing file is not an error.
    pub async fn remove(&self, file: &GcodeFile) -> Result<(), UploadError> {
        let path = self.path_of(file)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Removed G-code {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // Stored names come from the catalog file, which may have been edited by hand.
    fn path_of(&self, file: &GcodeFile) -> Result<PathBuf, UploadError> {
        let name = &file.stored_name;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(UploadError::InvalidName(name.clone()));
        }
        Ok(self.dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn save_read_remove() {
        let dir = tempdir().unwrap();
        let store = GcodeStore::new(dir.path().join("uploads"));
        let file = store.save("parts/bracket.GCODE", b"G28\nG1 X10\n").await.unwrap();
        assert_eq!(file.original_name, "bracket.GCODE");
        assert!(file.stored_name.ends_with(".gcode"));
        assert_eq!(file.size, 11);
        assert_eq!(store.read(&file).await.unwrap(), b"G28\nG1 X10\n");

        assert_ok!(store.remove(&file).await);
        assert!(matches!(store.read(&file).await, Err(UploadError::Missing(_))));
        // second removal is a no-op
        assert_ok!(store.remove(&file).await);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let dir = tempdir().unwrap();
        let store = GcodeStore::new(dir.path());
        assert!(matches!(store.save("a.gcode", b"").await, Err(UploadError::Empty)));
        assert!(matches!(store.save("  ", b"G28").await, Err(UploadError::InvalidName(_))));
    }

    #[tokio::test]
    async fn stored_names_cannot_escape_the_directory() {
        let dir = tempdir().unwrap();
        let store = GcodeStore::new(dir.path());
        let file = GcodeFile {
            stored_name: "../catalog.json".to_string(),
            original_name: "x.gcode".to_string(),
            size: 1,
            uploaded_at: Utc::now(),
        };
        assert!(matches!(store.read(&file).await, Err(UploadError::InvalidName(_))));
        assert_err!(store.remove(&file).await);
    }
}
