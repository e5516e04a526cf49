//! Background network scans.

use std::cmp::Reverse;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use panel_core::ssid::decode_ssid;
use panel_core::{ConnectionState, PanelError, PanelResult, ScanState, ScanStatus};

use super::{AccessPoint, SharedDriver, WifiManager, WifiTiming};
use crate::lock;

impl WifiManager {
    /// Start a scan on a worker thread. Read the outcome from
    /// [`WifiManager::scan_state`].
    pub fn scan(&self) -> PanelResult<String> {
        {
            let mut scan = lock(&self.scan);
            if scan.status == ScanStatus::Scanning {
                return Err(PanelError::conflict("a scan is already in progress"));
            }
            *scan = ScanState::scanning();
        }

        let was_active = lock(&self.driver).is_active();
        let job = ScanJob {
            driver: self.driver.clone(),
            connection: self.connection.clone(),
            scan: self.scan.clone(),
            timing: self.timing,
        };
        let spawned = thread::Builder::new()
            .name("wifi-scan".to_string())
            .spawn(move || job.run(was_active));

        if let Err(e) = spawned {
            error!("Failed to spawn scan worker: {}", e);
            *lock(&self.scan) = ScanState::failed(format!("could not start scan worker: {}", e));
            return Err(PanelError::connection(format!(
                "could not start scan worker: {}",
                e
            )));
        }
        Ok("scan started".to_string())
    }
}

struct ScanJob {
    driver: SharedDriver,
    connection: Arc<Mutex<ConnectionState>>,
    scan: Arc<Mutex<ScanState>>,
    timing: WifiTiming,
}

impl ScanJob {
    fn run(self, was_active: bool) {
        let started = Instant::now();
        let outcome = self.scan_networks(was_active);
        let elapsed = started.elapsed();

        let next = match outcome {
            Ok(networks) => {
                debug!("Scan found {} networks in {:?}", networks.len(), elapsed);
                ScanState::ready(format_scan(networks, elapsed))
            }
            Err(message) => {
                warn!("Scan failed: {}", message);
                ScanState::failed(message)
            }
        };
        // restore and publish under one hold of both records
        let connection = lock(&self.connection);
        let mut scan = lock(&self.scan);
        self.restore(was_active, connection.status.is_busy());
        *scan = next;
    }

    fn scan_networks(&self, was_active: bool) -> Result<Vec<AccessPoint>, String> {
        if !was_active {
            lock(&self.driver)
                .set_active(true)
                .map_err(|e| e.to_string())?;
            thread::sleep(self.timing.settle_delay);
        }
        lock(&self.driver).scan().map_err(|e| e.to_string())
    }

    /// Put the interface back the way the scan found it, unless a station
    /// attempt has claimed it in the meantime.
    fn restore(&self, was_active: bool, station_busy: bool) {
        if was_active {
            return;
        }
        if station_busy {
            debug!("Station is using the interface, leaving it up after scan");
            return;
        }
        if let Err(e) = lock(&self.driver).set_active(false) {
            warn!("Failed to deactivate interface after scan: {}", e);
        }
    }
}

/// Numbered scan listing, strongest signal first.
pub fn format_scan(mut networks: Vec<AccessPoint>, elapsed: Duration) -> String {
    if networks.is_empty() {
        return "no networks found".to_string();
    }
    networks.sort_by_key(|ap| Reverse(ap.rssi));

    let mut lines = vec![format!(
        "{} {} found in {:.1}s",
        networks.len(),
        if networks.len() == 1 { "network" } else { "networks" },
        elapsed.as_secs_f32()
    )];
    lines.extend(networks.iter().enumerate().map(|(i, ap)| {
        format!(
            "{}. {} ({} dBm, ch {}, {})",
            i + 1,
            decode_ssid(&ap.ssid),
            ap.rssi,
            ap.channel,
            ap.auth
        )
    }));
    lines.join("\n")
}
