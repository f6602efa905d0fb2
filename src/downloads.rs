use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;

/// Local stand-in for a browser download: files land in one output folder.
#[derive(Debug, Clone)]
pub struct Downloads {
    dir: PathBuf,
}

impl Downloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pretty-printed JSON, two-space indent.
    pub fn save_json<T: Serialize + ?Sized>(&self, filename: &str, payload: &T) -> Result<PathBuf, DownloadError> {
        let text = serde_json::to_string_pretty(payload)?;
        self.save_text(filename, &text)
    }

    pub fn save_text(&self, filename: &str, text: &str) -> Result<PathBuf, DownloadError> {
        fs::create_dir_all(&self.dir)?;
        // Only the final component is honoured, so "../x.json" stays inside the folder.
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        let path = self.dir.join(name);
        fs::write(&path, text)?;
        tracing::debug!(path = %path.display(), "download written");
        Ok(path)
    }
}
