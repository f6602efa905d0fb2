use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;
use crate::storage::{FileStorage, RecordStore};

pub const DEFAULT_DATA_ROOT: &str = "~/Documents/InvoiceConsole";
const STORE_FILE: &str = "store.json";
const DOWNLOADS_DIR: &str = "downloads";

/// Contents of `settings.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub data_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: DEFAULT_DATA_ROOT.to_string(),
        }
    }
}

impl Settings {
    /// Settings from the platform config dir, or defaults when missing or unreadable.
    pub fn load() -> Self {
        Self::load_from(&config_path()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                None
            }
        }
    }

    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(expand_home_dir(&self.data_root))
    }

    pub fn store_path(&self) -> PathBuf {
        self.root().join(STORE_FILE)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root().join(DOWNLOADS_DIR)
    }

    /// Record store under the data root, detached when the root cannot be created.
    pub fn open_store(&self) -> RecordStore {
        let root = self.root();
        match fs::create_dir_all(&root) {
            Ok(()) => RecordStore::attached(FileStorage::new(self.store_path())),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "data root unavailable, nothing will be saved");
                RecordStore::detached()
            }
        }
    }
}

pub fn config_path() -> PathBuf {
    match ProjectDirs::from("com", "invoice-console", "app") {
        Some(dirs) => dirs.config_dir().join("settings.toml"),
        None => PathBuf::from("settings.toml"),
    }
}

fn expand_home_dir(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(base_dirs) = BaseDirs::new() {
            return format!("{}{}", base_dirs.home_dir().to_string_lossy(), rest);
        }
    }
    path.to_string()
}
