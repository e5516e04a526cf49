//! ESP32 components for the device control panel.
//!
//! - [`wifi::EspWifiDriver`]: station and access point control over
//!   `BlockingWifi<EspWifi>`
//! - [`board::EspBoard`]: status LED, on-chip temperature sensor, restart
//! - [`storage::NvsConfigStorage`]: the configuration document in NVS
//!
//! The binary (`panel-server-esp32`) wires these into a
//! [`panel_server::PanelContext`]; everything above the traits is the
//! same code that runs on Linux.

pub mod board;
pub mod storage;
pub mod wifi;

pub use board::EspBoard;
pub use storage::NvsConfigStorage;
pub use wifi::EspWifiDriver;
