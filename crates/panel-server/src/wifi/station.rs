//! Station connect attempts.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use panel_core::credentials;
use panel_core::validate::{validate_password, validate_ssid};
use panel_core::{
    ConfigStore, ConnectionState, ConnectionStatus, PanelError, PanelResult, ScanState, ScanStatus,
};

use super::{LinkInfo, SharedDriver, WifiManager, WifiTiming};
use crate::lock;

impl WifiManager {
    /// Start a connect attempt on a worker thread.
    ///
    /// Returns once the attempt is running; the outcome is published in the
    /// connection record. The password is moved into the worker and never
    /// stored.
    pub fn connect(&self, ssid: &str, password: &str) -> PanelResult<String> {
        validate_ssid(ssid)?;
        validate_password(password)?;

        {
            let mut state = lock(&self.connection);
            match state.status {
                ConnectionStatus::Connecting => {
                    return Err(PanelError::conflict(format!(
                        "already connecting to '{}'",
                        state.ssid.as_deref().unwrap_or("")
                    )));
                }
                ConnectionStatus::Connected => {
                    return Err(PanelError::conflict(format!(
                        "already connected to '{}'; disconnect first",
                        state.ssid.as_deref().unwrap_or("")
                    )));
                }
                ConnectionStatus::Idle | ConnectionStatus::Error => {}
            }
            *state = ConnectionState::connecting(ssid);
        }

        let job = ConnectJob {
            driver: self.driver.clone(),
            store: self.store.clone(),
            state: self.connection.clone(),
            scan: self.scan.clone(),
            timing: self.timing,
        };
        let target = ssid.to_string();
        let password = password.to_string();
        let spawned = thread::Builder::new()
            .name("wifi-connect".to_string())
            .spawn(move || job.run(target, password));

        if let Err(e) = spawned {
            error!("Failed to spawn connect worker: {}", e);
            *lock(&self.connection) =
                ConnectionState::failed(Some(ssid), format!("could not start connect worker: {}", e));
            return Err(PanelError::connection(format!(
                "could not start connect worker: {}",
                e
            )));
        }

        info!("Connecting to '{}'", ssid);
        Ok(format!("connecting to '{}'", ssid))
    }
}

struct ConnectJob {
    driver: SharedDriver,
    store: Arc<ConfigStore>,
    state: Arc<Mutex<ConnectionState>>,
    scan: Arc<Mutex<ScanState>>,
    timing: WifiTiming,
}

impl ConnectJob {
    fn run(self, ssid: String, password: String) {
        let outcome = self.attempt(&ssid, &password);
        drop(password);

        match outcome {
            Ok(link) => {
                info!(
                    "Connected to '{}' (ip {}, rssi {:?})",
                    ssid,
                    link.ip.as_deref().unwrap_or("unknown"),
                    link.rssi
                );
                *lock(&self.state) = ConnectionState::connected(&ssid, link.ip, link.rssi);
                match credentials::touch(&self.store, &ssid, Utc::now()) {
                    Ok(true) => debug!("Recorded connection time for '{}'", ssid),
                    Ok(false) => {}
                    Err(e) => warn!("Could not record connection time for '{}': {}", ssid, e),
                }
            }
            Err(message) => {
                warn!("Connect to '{}' failed: {}", ssid, message);
                let mut state = lock(&self.state);
                // a running scan restores the interface when it finishes
                if lock(&self.scan).status == ScanStatus::Scanning {
                    debug!("Scan in progress, leaving the interface up");
                } else if let Err(e) = lock(&self.driver).set_active(false) {
                    warn!("Failed to deactivate station interface: {}", e);
                }
                *state = ConnectionState::failed(Some(&ssid), message);
            }
        }
    }

    fn attempt(&self, ssid: &str, password: &str) -> Result<LinkInfo, String> {
        let inactive = !lock(&self.driver).is_active();
        if inactive {
            lock(&self.driver)
                .set_active(true)
                .map_err(|e| e.to_string())?;
            thread::sleep(self.timing.settle_delay);
        }

        lock(&self.driver)
            .connect(ssid, password)
            .map_err(|e| e.to_string())?;

        let started = Instant::now();
        loop {
            if lock(&self.driver).is_connected() {
                return Ok(lock(&self.driver).link_info());
            }
            if started.elapsed() >= self.timing.connect_timeout {
                return Err(format!(
                    "timed out after {:.1}s waiting for '{}'",
                    self.timing.connect_timeout.as_secs_f32(),
                    ssid
                ));
            }
            thread::sleep(self.timing.poll_interval);
        }
    }
}
