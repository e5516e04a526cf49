//! WiFi station, scan and access point control.
//!
//! Connect attempts and scans are long-running, so [`WifiManager`] runs each
//! on a named worker thread and keeps one state record per kind. Starting
//! either is a check-and-set on its record under a single lock acquisition:
//! a second request while one is running is rejected with a conflict.
//!
//! Lock order, where locks nest: connection state, then scan state, then
//! the driver.

pub mod driver;
mod scan;
mod station;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use panel_core::credentials;
use panel_core::validate::{validate_ap_password, validate_ssid};
use panel_core::{
    ApSettings, ConfigStore, ConnectionState, ConnectionStatus, Encryption, PanelError,
    PanelResult, ScanState, ScanStatus,
};

use crate::lock;

pub use driver::{AccessPoint, DriverError, LinkInfo, WifiDriver};
pub use scan::format_scan;

/// Driver shared between the HTTP thread and the workers.
pub type SharedDriver = Arc<Mutex<Box<dyn WifiDriver>>>;

/// Delays used by the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiTiming {
    /// Wait after powering the interface up.
    pub settle_delay: Duration,
    /// Interval between association checks.
    pub poll_interval: Duration,
    /// Total budget for one connect attempt.
    pub connect_timeout: Duration,
}

impl Default for WifiTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(400),
            poll_interval: Duration::from_millis(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WifiManager {
    driver: SharedDriver,
    store: Arc<ConfigStore>,
    timing: WifiTiming,
    connection: Arc<Mutex<ConnectionState>>,
    scan: Arc<Mutex<ScanState>>,
}

impl WifiManager {
    pub fn new(driver: Box<dyn WifiDriver>, store: Arc<ConfigStore>, timing: WifiTiming) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            store,
            timing,
            connection: Arc::new(Mutex::new(ConnectionState::idle())),
            scan: Arc::new(Mutex::new(ScanState::default())),
        }
    }

    pub fn timing(&self) -> WifiTiming {
        self.timing
    }

    /// Snapshot of the station record.
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.connection).clone()
    }

    /// Snapshot of the scan record.
    pub fn scan_state(&self) -> ScanState {
        lock(&self.scan).clone()
    }

    /// Connect with the first stored credential, if there is one.
    pub fn boot_connect(&self) {
        let first = match credentials::list(&self.store) {
            Ok(list) => list.into_iter().next(),
            Err(e) => {
                warn!("Boot connect skipped, configuration unavailable: {}", e);
                return;
            }
        };
        match first {
            Some(entry) => {
                if let Err(e) = self.connect(&entry.ssid, &entry.password) {
                    warn!("Boot connect to '{}' not started: {}", entry.ssid, e);
                }
            }
            None => info!("No stored networks, staying offline"),
        }
    }

    /// Leave the current network and power the station interface down.
    ///
    /// Rejected while a connect attempt or a scan is in progress.
    pub fn disconnect(&self) -> PanelResult<String> {
        let mut state = lock(&self.connection);
        if state.status == ConnectionStatus::Connecting {
            return Err(PanelError::conflict(format!(
                "a connection attempt to '{}' is in progress",
                state.ssid.as_deref().unwrap_or("")
            )));
        }
        let scan = lock(&self.scan);
        if scan.status == ScanStatus::Scanning {
            return Err(PanelError::conflict("a scan is in progress"));
        }

        let result = {
            let mut driver = lock(&self.driver);
            let left = if state.status == ConnectionStatus::Connected {
                driver.disconnect()
            } else {
                Ok(())
            };
            left.and_then(|()| driver.set_active(false))
        };
        drop(scan);

        match result {
            Ok(()) => {
                if let Some(ssid) = &state.ssid {
                    info!("Disconnected from '{}'", ssid);
                }
                *state = ConnectionState::idle();
                Ok("disconnected".to_string())
            }
            Err(e) => {
                *state = ConnectionState::failed(None, e.to_string());
                Err(PanelError::connection(e.to_string()))
            }
        }
    }

    /// Validate, persist and apply access point settings.
    ///
    /// Rejected while a scan is in progress, before anything is saved.
    pub fn start_ap(&self, ssid: &str, encryption: &str, password: &str) -> PanelResult<String> {
        validate_ssid(ssid)?;
        let encryption: Encryption = encryption.parse().map_err(PanelError::Validation)?;
        validate_ap_password(password, encryption)?;

        let scan = lock(&self.scan);
        if scan.status == ScanStatus::Scanning {
            return Err(PanelError::conflict("a scan is in progress"));
        }

        let settings = ApSettings {
            ssid: ssid.to_string(),
            password: password.to_string(),
            encryption,
        };
        self.store.update(|config| {
            config.wifi.ap = settings.clone();
            Ok(())
        })?;

        lock(&self.driver)
            .start_ap(&settings)
            .map_err(|e| PanelError::connection(e.to_string()))?;
        drop(scan);

        info!("Access point '{}' started ({})", ssid, encryption);
        Ok(format!("access point '{}' started ({})", ssid, encryption))
    }
}
