//! Control panel firmware for ESP32.
//!
//! This binary requires the ESP32 Rust toolchain.
//! It will not compile with the standard Rust toolchain.
//!
//! Differences from the Linux binary are confined to the trait
//! implementations from `panel-esp32`: NVS storage instead of a JSON file,
//! the esp-idf radio instead of the simulated one. The accept loop, router
//! and registry are shared.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::prelude::Peripherals;
use esp_idf_svc::hal::reset;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

use panel_esp32::{EspBoard, EspWifiDriver, NvsConfigStorage};
use panel_server::{PanelContext, PanelServer, ServerConfig, WifiTiming};

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("Control panel starting...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let storage = NvsConfigStorage::new(nvs.clone(), "panel").context("opening NVS")?;
    let driver = EspWifiDriver::new(peripherals.modem, sysloop, Some(nvs))?;
    let board = EspBoard::new(peripherals.pins.gpio2.into(), peripherals.temp_sensor)?;

    let context = PanelContext::new(
        storage,
        Box::new(driver),
        Arc::new(board),
        WifiTiming::default(),
    );
    context.start();

    match context.store().load() {
        Ok(config) => {
            let ap = config.wifi.ap;
            if let Err(e) = context
                .wifi()
                .start_ap(&ap.ssid, ap.encryption.as_str(), &ap.password)
            {
                warn!("Access point not started: {}", e);
            }
        }
        Err(e) => warn!("Access point not started: {}", e),
    }

    let server = PanelServer::new(ServerConfig::default(), context);
    if let Err(e) = server.run() {
        // last resort
        error!("Server stopped: {}", e);
        thread::sleep(Duration::from_secs(1));
        reset::restart();
    }
    Ok(())
}
