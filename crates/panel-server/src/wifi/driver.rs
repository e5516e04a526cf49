//! Radio driver abstraction.
//!
//! Implementations:
//! - ESP32: `panel-esp32::EspWifiDriver` over esp-idf-svc
//! - Host and tests: [`crate::sim::SimulatedWifi`]

use panel_core::ApSettings;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("interface error: {0}")]
    Interface(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("access point error: {0}")]
    AccessPoint(String),
}

/// One network seen by a scan. `ssid` is raw bytes; see
/// [`panel_core::ssid::decode_ssid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: Vec<u8>,
    pub rssi: i8,
    pub channel: u8,
    /// Authentication mode label, e.g. `OPEN` or `WPA2`.
    pub auth: String,
}

/// Address and signal of the current station link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub ip: Option<String>,
    pub rssi: Option<i8>,
}

/// Blocking station and access point control.
///
/// Calls are made from worker threads with the driver locked, so each call
/// should return promptly; waiting for association happens in the caller's
/// poll loop, not inside [`WifiDriver::connect`].
pub trait WifiDriver: Send {
    /// Whether the station interface is powered up.
    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool) -> Result<(), DriverError>;

    /// Start associating with a network.
    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), DriverError>;

    fn is_connected(&mut self) -> bool;

    fn link_info(&mut self) -> LinkInfo;

    fn disconnect(&mut self) -> Result<(), DriverError>;

    /// Blocking scan. The interface must be active.
    fn scan(&mut self) -> Result<Vec<AccessPoint>, DriverError>;

    /// (Re)start the access point with `settings`.
    fn start_ap(&mut self, settings: &ApSettings) -> Result<(), DriverError>;
}
