//! Configuration storage and the cached config store.
//!
//! Storage is abstracted so the same store logic runs on every platform:
//! - Host: [`FileConfigStorage`] (a JSON file)
//! - ESP32: the same file storage on a mounted flash partition
//! - Tests: [`MemoryConfigStorage`]
//!
//! [`ConfigStore`] caches the document after the first successful load and
//! owns the save-with-rollback contract: a mutation is applied to the cache,
//! persisted, and undone in memory if persisting fails.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{PanelError, PanelResult};
use crate::model::Config;

/// Errors that can occur during configuration storage operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No document has been stored yet.
    #[error("Configuration not found: {0}")]
    NotFound(String),
    /// Failed to read the document.
    #[error("Read error: {0}")]
    ReadError(String),
    /// Failed to write the document.
    #[error("Write error: {0}")]
    WriteError(String),
    /// The stored document is not valid JSON for [`Config`].
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Storage is not available.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Abstract document storage.
///
/// All methods are synchronous to support embedded platforms.
pub trait ConfigStorage: Send + Sync {
    /// Read the raw document.
    fn read(&self) -> Result<String, ConfigError>;

    /// Replace the raw document.
    fn write(&self, document: &str) -> Result<(), ConfigError>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

impl<T: ConfigStorage + ?Sized> ConfigStorage for Arc<T> {
    fn read(&self) -> Result<String, ConfigError> {
        (**self).read()
    }

    fn write(&self, document: &str) -> Result<(), ConfigError> {
        (**self).write(document)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// JSON file storage.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a failed write never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn read(&self) -> Result<String, ConfigError> {
        fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(self.path.display().to_string()),
            _ => ConfigError::ReadError(format!("{}: {}", self.path.display(), e)),
        })
    }

    fn write(&self, document: &str) -> Result<(), ConfigError> {
        let temp = self.temp_path();
        fs::write(&temp, document)
            .and_then(|_| fs::rename(&temp, &self.path))
            .map_err(|e| {
                let _ = fs::remove_file(&temp);
                ConfigError::WriteError(format!("{}: {}", self.path.display(), e))
            })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory storage, optionally failing writes on demand.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    document: Mutex<Option<String>>,
    fail_writes: Mutex<bool>,
    writes: Mutex<usize>,
}

impl MemoryConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: &str) -> Self {
        let storage = Self::default();
        *lock(&storage.document) = Some(document.to_string());
        storage
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *lock(&self.writes)
    }

    pub fn document(&self) -> Option<String> {
        lock(&self.document).clone()
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn read(&self) -> Result<String, ConfigError> {
        lock(&self.document)
            .clone()
            .ok_or_else(|| ConfigError::NotFound("memory".to_string()))
    }

    fn write(&self, document: &str) -> Result<(), ConfigError> {
        if *lock(&self.fail_writes) {
            return Err(ConfigError::WriteError("simulated storage failure".to_string()));
        }
        *lock(&self.document) = Some(document.to_string());
        *lock(&self.writes) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Lock a mutex, recovering the value if a previous holder panicked.
///
/// Every record behind these locks is replaced whole, so a poisoned guard
/// still holds a complete value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached configuration document with save-with-rollback.
pub struct ConfigStore {
    storage: Box<dyn ConfigStorage>,
    defaults: Box<dyn Fn() -> Config + Send + Sync>,
    cache: Mutex<Option<Config>>,
}

impl ConfigStore {
    /// Create a store. `defaults` builds the document used when none is stored.
    pub fn new(
        storage: impl ConfigStorage + 'static,
        defaults: impl Fn() -> Config + Send + Sync + 'static,
    ) -> Self {
        Self {
            storage: Box::new(storage),
            defaults: Box::new(defaults),
            cache: Mutex::new(None),
        }
    }

    /// Return the cached document, loading it on first use.
    ///
    /// A missing document is replaced by the defaults and written back.
    /// Read or parse failures return [`PanelError::Unavailable`] and are
    /// retried on the next call.
    pub fn load(&self) -> PanelResult<Config> {
        let mut cache = lock(&self.cache);
        if let Some(config) = cache.as_ref() {
            return Ok(config.clone());
        }

        let config = match self.storage.read() {
            Ok(text) => serde_json::from_str::<Config>(&text).map_err(|e| {
                warn!("Configuration at {} is invalid: {}", self.storage.describe(), e);
                PanelError::Unavailable(ConfigError::InvalidData(e.to_string()).to_string())
            })?,
            Err(ConfigError::NotFound(_)) => {
                info!(
                    "No configuration at {}, writing defaults",
                    self.storage.describe()
                );
                let config = (self.defaults)();
                if let Err(e) = self.persist(&config) {
                    warn!("Failed to write default configuration: {}", e);
                }
                config
            }
            Err(e) => {
                warn!("Failed to load configuration: {}", e);
                return Err(PanelError::Unavailable(e.to_string()));
            }
        };

        for issue in config.check() {
            warn!("Configuration issue: {}", issue);
        }
        debug!(
            "Loaded configuration with {} functions",
            config.function_list.len()
        );
        *cache = Some(config.clone());
        Ok(config)
    }

    /// Persist `config` and make it the cached document.
    pub fn save(&self, config: Config) -> PanelResult<()> {
        let mut cache = lock(&self.cache);
        self.persist(&config).map_err(|e| PanelError::Persistence {
            reason: e.to_string(),
            rolled_back: false,
        })?;
        *cache = Some(config);
        Ok(())
    }

    /// Apply `mutate` to the document under save-with-rollback.
    ///
    /// `mutate` computes the new value on a working copy and may reject the
    /// change with an error, in which case nothing is written. Otherwise the
    /// new value replaces the cache and is persisted; if persisting fails the
    /// previous value is restored and a `Persistence` error with
    /// `rolled_back: true` is returned.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut Config) -> PanelResult<T>) -> PanelResult<T> {
        // Loads first so an uncached store still participates in rollback.
        let previous = self.load()?;
        let mut cache = lock(&self.cache);
        let mut next = cache.clone().unwrap_or(previous);
        let pre_image = next.clone();

        let outcome = mutate(&mut next)?;
        let persisted = self.persist(&next);
        *cache = Some(next);

        if let Err(e) = persisted {
            *cache = Some(pre_image);
            warn!("Save failed, restored previous configuration: {}", e);
            return Err(PanelError::Persistence {
                reason: e.to_string(),
                rolled_back: true,
            });
        }
        Ok(outcome)
    }

    fn persist(&self, config: &Config) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        self.storage.write(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FunctionDecl, PresentationType};
    use pretty_assertions::assert_eq;

    fn sample() -> Config {
        let mut config = Config::default();
        config.declare("a", FunctionDecl::new("A", PresentationType::Function, ""));
        config.declare("b", FunctionDecl::new("B", PresentationType::Show, ""));
        config
    }

    #[test]
    fn test_missing_document_writes_defaults() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let store = ConfigStore::new(storage.clone(), sample);

        let config = store.load().unwrap();
        assert_eq!(config.function_list, vec!["a", "b"]);
        assert_eq!(storage.write_count(), 1);

        let stored: Config = serde_json::from_str(&storage.document().unwrap()).unwrap();
        assert_eq!(stored, config);
    }

    #[test]
    fn test_load_is_cached() {
        let storage = Arc::new(MemoryConfigStorage::with_document(
            &serde_json::to_string(&sample()).unwrap(),
        ));
        let store = ConfigStore::new(storage.clone(), Config::default);
        store.load().unwrap();

        // Changing storage behind the store's back does not affect the cache.
        storage.write("{}").unwrap();
        assert_eq!(store.load().unwrap().function_list, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_document_is_unavailable() {
        let store = ConfigStore::new(MemoryConfigStorage::with_document("{not json"), sample);
        assert!(matches!(store.load(), Err(PanelError::Unavailable(_))));
    }

    #[test]
    fn test_update_persists() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let store = ConfigStore::new(storage.clone(), sample);

        store
            .update(|config| {
                config.function_list.reverse();
                Ok(())
            })
            .unwrap();

        assert_eq!(store.load().unwrap().function_list, vec!["b", "a"]);
        let stored: Config = serde_json::from_str(&storage.document().unwrap()).unwrap();
        assert_eq!(stored.function_list, vec!["b", "a"]);
    }

    #[test]
    fn test_update_rolls_back_on_write_failure() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let store = ConfigStore::new(storage.clone(), sample);
        store.load().unwrap();
        storage.set_fail_writes(true);

        let err = store
            .update(|config| {
                config.function_list.clear();
                config.functions.clear();
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            PanelError::Persistence {
                rolled_back: true,
                ..
            }
        ));
        assert!(err.to_string().contains("rolled back"));
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_rejected_mutation_writes_nothing() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let store = ConfigStore::new(storage.clone(), sample);
        store.load().unwrap();
        let writes = storage.write_count();

        let result: PanelResult<()> = store.update(|config| {
            config.function_list.clear();
            Err(PanelError::validation("nope"))
        });

        assert!(result.is_err());
        assert_eq!(storage.write_count(), writes);
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let storage = FileConfigStorage::new(&path);

        assert!(matches!(storage.read(), Err(ConfigError::NotFound(_))));

        let store = ConfigStore::new(storage.clone(), sample);
        store.load().unwrap();
        assert!(path.exists());
        assert!(!storage.temp_path().exists());

        let reloaded = ConfigStore::new(FileConfigStorage::new(&path), Config::default);
        assert_eq!(reloaded.load().unwrap(), sample());
    }

    #[test]
    fn test_file_storage_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileConfigStorage::new(dir.path().join("missing").join("config.json"));
        assert!(matches!(storage.write("{}"), Err(ConfigError::WriteError(_))));
    }
}
