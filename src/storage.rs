//! Local record store.
//!
//! A flat string key-value store holding the client roster, the receipt log
//! and the connection settings. Reads never fail: missing or corrupt entries
//! yield the caller's fallback. Writes never fail either; backend errors are
//! logged and dropped.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::StorageError;
use crate::model::{AppConfig, AppMode, Client, Receipt};

pub mod keys {
    pub const CLIENTS: &str = "mova_clients_v0";
    pub const RECEIPTS: &str = "mova_receipts_demo_v0";
    pub const MODE: &str = "mova_mode";
    pub const ACCESS_KEY: &str = "mova_access_key";
    pub const GATEWAY_BASE_URL: &str = "mova_gateway_base_url";
    pub const MEMORY_BASE_URL: &str = "mova_memory_base_url";
    pub const MEMORY_TOKEN: &str = "mova_memory_token";
    /// Token slot used only by the operator console.
    pub const CONSOLE_TOKEN: &str = "mova_gateway_token";
}

pub const MAX_RECEIPTS: usize = 20;

/// Storage medium behind the record store.
pub trait Storage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ==========================================
// Backends
// ==========================================

/// All entries in one JSON object file, rewritten on every write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.read_all();
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: std::sync::Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}

// ==========================================
// Record store
// ==========================================

pub struct RecordStore {
    backend: Option<Box<dyn Storage>>,
}

impl RecordStore {
    pub fn attached(backend: impl Storage + 'static) -> Self {
        Self { backend: Some(Box::new(backend)) }
    }

    /// No storage medium: reads return fallbacks, writes are dropped.
    pub fn detached() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.backend.as_ref()?.get(key)
    }

    pub fn set_raw(&self, key: &str, value: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set(key, value) {
                tracing::warn!(key, error = %e, "failed to write record");
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove(key) {
                tracing::warn!(key, error = %e, "failed to remove record");
            }
        }
    }

    /// Stores `value` when non-empty, otherwise deletes the entry.
    pub fn set_or_remove(&self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove(key);
        } else {
            self.set_raw(key, value);
        }
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.get_raw(key) {
            Some(raw) if !raw.is_empty() => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(key, error = %e, "corrupt record, using fallback");
                    fallback
                }
            },
            _ => fallback,
        }
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if !self.is_available() {
            return;
        }
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, &raw),
            Err(e) => tracing::warn!(key, error = %e, "failed to serialize record"),
        }
    }

    // --- Clients ---

    pub fn load_clients(&self) -> Vec<Client> {
        self.load(keys::CLIENTS, Vec::new())
    }

    pub fn save_clients(&self, clients: &[Client]) {
        self.save(keys::CLIENTS, clients);
    }

    // --- Receipts ---

    pub fn load_receipts(&self) -> Vec<Receipt> {
        self.load(keys::RECEIPTS, Vec::new())
    }

    pub fn save_receipts(&self, receipts: &[Receipt]) {
        let end = receipts.len().min(MAX_RECEIPTS);
        self.save(keys::RECEIPTS, &receipts[..end]);
    }

    /// Prepends `receipt` and truncates the log to the newest entries.
    pub fn add_receipt(&self, receipt: Receipt) {
        if !self.is_available() {
            return;
        }
        let mut receipts = self.load_receipts();
        receipts.insert(0, receipt);
        receipts.truncate(MAX_RECEIPTS);
        self.save_receipts(&receipts);
    }

    // --- Config ---

    pub fn load_config(&self) -> AppConfig {
        if !self.is_available() {
            return AppConfig::default();
        }
        AppConfig {
            mode: AppMode::from_stored(self.get_raw(keys::MODE).as_deref()),
            access_key: self.get_raw(keys::ACCESS_KEY).unwrap_or_default(),
            gateway_base_url: self.get_raw(keys::GATEWAY_BASE_URL).unwrap_or_default(),
            memory_base_url: self.get_raw(keys::MEMORY_BASE_URL).unwrap_or_default(),
            memory_token: self.get_raw(keys::MEMORY_TOKEN).unwrap_or_default(),
        }
    }

    pub fn save_config(&self, config: &AppConfig) {
        self.set_raw(keys::MODE, config.mode.as_str());
        self.set_or_remove(keys::ACCESS_KEY, &config.access_key);
        self.set_or_remove(keys::GATEWAY_BASE_URL, &config.gateway_base_url);
        self.set_or_remove(keys::MEMORY_BASE_URL, &config.memory_base_url);
        self.set_or_remove(keys::MEMORY_TOKEN, &config.memory_token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReceiptStatus;

    fn receipt(n: usize) -> Receipt {
        Receipt {
            ts: format!("2026-01-01T00:00:{:02}.000Z", n % 60),
            action: "create_send".into(),
            status: ReceiptStatus::Ok,
            request_id: Some(format!("demo_{}", n)),
            client_name: None,
            amount: None,
        }
    }

    #[test]
    fn receipt_log_is_capped_newest_first() {
        let store = RecordStore::attached(MemoryStorage::new());
        for n in 0..45 {
            store.add_receipt(receipt(n));
            let receipts = store.load_receipts();
            assert_eq!(receipts.len(), (n + 1).min(MAX_RECEIPTS));
            assert_eq!(receipts[0].request_id.as_deref(), Some(format!("demo_{}", n).as_str()));
        }
    }

    #[test]
    fn corrupt_record_returns_fallback() {
        let backend = MemoryStorage::new();
        backend.set(keys::CLIENTS, "{not json").unwrap();
        let store = RecordStore::attached(backend);
        assert!(store.load_clients().is_empty());
    }

    #[test]
    fn cleared_config_field_is_removed_not_kept() {
        let store = RecordStore::attached(MemoryStorage::new());
        let mut config = AppConfig {
            mode: AppMode::Connected,
            access_key: "secret".into(),
            gateway_base_url: "https://gw.example".into(),
            memory_base_url: "https://mem.example".into(),
            memory_token: "mem".into(),
        };
        store.save_config(&config);
        assert_eq!(store.load_config(), config);

        config.access_key.clear();
        config.memory_token.clear();
        store.save_config(&config);
        assert_eq!(store.get_raw(keys::ACCESS_KEY), None);
        let loaded = store.load_config();
        assert_eq!(loaded.access_key, "");
        assert_eq!(loaded.memory_token, "");
        assert_eq!(loaded, config);
    }

    #[test]
    fn stored_mode_outside_enum_loads_as_demo() {
        let store = RecordStore::attached(MemoryStorage::new());
        store.set_raw(keys::MODE, "turbo");
        assert_eq!(store.load_config().mode, AppMode::Demo);
    }

    #[test]
    fn detached_store_reads_fallbacks_and_drops_writes() {
        let store = RecordStore::detached();
        store.add_receipt(receipt(1));
        store.save_clients(&[Client {
            id: "client_1".into(),
            name: "A".into(),
            email: "a@example.com".into(),
            default_amount: None,
        }]);
        assert!(store.load_receipts().is_empty());
        assert!(store.load_clients().is_empty());
        assert_eq!(store.load_config(), AppConfig::default());
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = RecordStore::attached(FileStorage::new(&path));
        store.add_receipt(receipt(7));
        store.set_or_remove(keys::ACCESS_KEY, "abc");
        store.set_or_remove(keys::ACCESS_KEY, "");

        let reopened = RecordStore::attached(FileStorage::new(&path));
        assert_eq!(reopened.load_receipts().len(), 1);
        assert_eq!(reopened.get_raw(keys::ACCESS_KEY), None);
    }

    #[test]
    fn file_storage_with_garbage_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "garbage").unwrap();

        let store = RecordStore::attached(FileStorage::new(&path));
        assert!(store.load_receipts().is_empty());
        store.add_receipt(receipt(1));
        assert_eq!(store.load_receipts().len(), 1);
    }
}
