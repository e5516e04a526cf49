//! The shared panel context.
//!
//! Created once at startup and shared by `Arc` between the accept loop and
//! the built-in function targets.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use panel_core::{ConfigStorage, ConfigStore, Dispatcher, PanelStatus};

use crate::board::Board;
use crate::functions;
use crate::wifi::{WifiDriver, WifiManager, WifiTiming};

pub struct PanelContext {
    store: Arc<ConfigStore>,
    dispatcher: Dispatcher,
    wifi: WifiManager,
    board: Arc<dyn Board>,
}

impl PanelContext {
    /// Wire the store, dispatcher and WiFi manager together.
    ///
    /// When `storage` holds no document, the default one is generated from
    /// the built-in table on first load.
    pub fn new(
        storage: impl ConfigStorage + 'static,
        driver: Box<dyn WifiDriver>,
        board: Arc<dyn Board>,
        timing: WifiTiming,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<PanelContext>| {
            let table = Arc::new(functions::builtin_table(weak.clone()));
            let defaults = table.default_config();
            let store = Arc::new(ConfigStore::new(storage, move || defaults.clone()));
            Self {
                dispatcher: Dispatcher::new(store.clone(), table),
                wifi: WifiManager::new(driver, store.clone(), timing),
                store,
                board,
            }
        })
    }

    /// Load the document and start the boot connect.
    pub fn start(&self) {
        match self.store.load() {
            Ok(config) => info!(
                "Configuration loaded: {} functions, {} stored networks",
                config.function_list.len(),
                config.wifi.sta.iter().filter(|e| !e.is_placeholder()).count()
            ),
            Err(e) => warn!("Starting without configuration: {}", e),
        }
        self.wifi.boot_connect();
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn wifi(&self) -> &WifiManager {
        &self.wifi
    }

    pub fn board(&self) -> &dyn Board {
        self.board.as_ref()
    }

    /// Snapshot for the page header.
    pub fn status(&self) -> PanelStatus {
        PanelStatus {
            connection: self.wifi.connection_state(),
            scan: self.wifi.scan_state(),
            ap_ssid: self.store.load().ok().map(|c| c.wifi.ap.ssid),
        }
    }
}
