//! NVS (Non-Volatile Storage) configuration for ESP32.
//!
//! The whole document is one blob entry. NVS commits an entry atomically,
//! so a power cut mid-write leaves the previous document readable.

use std::sync::Mutex;

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use panel_core::{ConfigError, ConfigStorage};

const KEY: &str = "config";

pub struct NvsConfigStorage {
    nvs: Mutex<EspNvs<NvsDefault>>,
    namespace: String,
}

impl NvsConfigStorage {
    pub fn new(partition: EspDefaultNvsPartition, namespace: &str) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, namespace, true)?;
        Ok(Self {
            nvs: Mutex::new(nvs),
            namespace: namespace.to_string(),
        })
    }
}

impl ConfigStorage for NvsConfigStorage {
    fn read(&self) -> Result<String, ConfigError> {
        let nvs = self
            .nvs
            .lock()
            .map_err(|_| ConfigError::StorageUnavailable("nvs lock poisoned".to_string()))?;
        let len = nvs
            .blob_len(KEY)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .ok_or_else(|| ConfigError::NotFound(self.describe()))?;
        let mut buf = vec![0u8; len];
        let bytes = nvs
            .get_blob(KEY, &mut buf)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .ok_or_else(|| ConfigError::NotFound(self.describe()))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn write(&self, document: &str) -> Result<(), ConfigError> {
        self.nvs
            .lock()
            .map_err(|_| ConfigError::StorageUnavailable("nvs lock poisoned".to_string()))?
            .set_blob(KEY, document.as_bytes())
            .map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("nvs:{}/{}", self.namespace, KEY)
    }
}
