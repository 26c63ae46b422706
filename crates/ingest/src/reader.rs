use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::DocumentError;

/// Extensions the reader accepts as already-decoded plain text.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

pub struct FileReader;

impl FileReader {
    pub fn is_text_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub async fn read_file(path: &Path) -> Result<String, DocumentError> {
        if !Self::is_text_file(path) {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            return Err(DocumentError::Unsupported(extension.to_string()));
        }

        fs::read_to_string(path)
            .await
            .map_err(|source| DocumentError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// List the readable text files directly inside `dir`.
    pub async fn list_directory(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
        let io_err = |source| DocumentError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(io_err)?;

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.is_file() && Self::is_text_file(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}
