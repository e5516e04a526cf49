//! Simulated radio and board for host runs and tests.
//!
//! Both are cheap handles over shared state: keep a clone to script
//! behaviour and observe effects after handing one to the server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::info;

use panel_core::ApSettings;

use crate::board::{Board, BoardError};
use crate::lock;
use crate::wifi::{AccessPoint, DriverError, LinkInfo, WifiDriver};

#[derive(Debug, Clone)]
struct SimNetwork {
    ap: AccessPoint,
    /// `None` for open networks.
    password: Option<String>,
}

#[derive(Debug)]
struct Association {
    ssid: String,
    accepted: bool,
    polls: u32,
}

#[derive(Debug, Default)]
struct SimState {
    active: bool,
    networks: Vec<SimNetwork>,
    association: Option<Association>,
    connected: Option<String>,
    polls_to_connect: u32,
    connect_error: Option<String>,
    scan_error: Option<String>,
    scan_delay: Duration,
    ap: Option<ApSettings>,
    connect_calls: usize,
    scan_calls: usize,
}

/// In-memory [`WifiDriver`].
///
/// A connect succeeds after `polls_to_connect` association checks when the
/// network is known and the password matches; otherwise the station never
/// associates.
#[derive(Debug, Clone, Default)]
pub struct SimulatedWifi {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(
        self,
        ssid: &[u8],
        rssi: i8,
        channel: u8,
        auth: &str,
        password: Option<&str>,
    ) -> Self {
        lock(&self.inner).networks.push(SimNetwork {
            ap: AccessPoint {
                ssid: ssid.to_vec(),
                rssi,
                channel,
                auth: auth.to_string(),
            },
            password: password.map(str::to_string),
        });
        self
    }

    pub fn with_active(self, active: bool) -> Self {
        lock(&self.inner).active = active;
        self
    }

    pub fn set_polls_to_connect(&self, polls: u32) {
        lock(&self.inner).polls_to_connect = polls;
    }

    pub fn set_connect_error(&self, error: Option<&str>) {
        lock(&self.inner).connect_error = error.map(str::to_string);
    }

    pub fn set_scan_error(&self, error: Option<&str>) {
        lock(&self.inner).scan_error = error.map(str::to_string);
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        lock(&self.inner).scan_delay = delay;
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).active
    }

    pub fn connected_ssid(&self) -> Option<String> {
        lock(&self.inner).connected.clone()
    }

    pub fn ap_settings(&self) -> Option<ApSettings> {
        lock(&self.inner).ap.clone()
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.inner).connect_calls
    }

    pub fn scan_calls(&self) -> usize {
        lock(&self.inner).scan_calls
    }
}

impl WifiDriver for SimulatedWifi {
    fn is_active(&self) -> bool {
        lock(&self.inner).active
    }

    fn set_active(&mut self, active: bool) -> Result<(), DriverError> {
        let mut state = lock(&self.inner);
        state.active = active;
        if !active {
            state.association = None;
            state.connected = None;
        }
        Ok(())
    }

    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), DriverError> {
        let mut state = lock(&self.inner);
        state.connect_calls += 1;
        if let Some(e) = &state.connect_error {
            return Err(DriverError::Connect(e.clone()));
        }
        if !state.active {
            return Err(DriverError::Interface("station interface is down".to_string()));
        }
        let accepted = state.networks.iter().any(|n| {
            n.ap.ssid == ssid.as_bytes() && n.password.as_deref().unwrap_or("") == password
        });
        state.association = Some(Association {
            ssid: ssid.to_string(),
            accepted,
            polls: 0,
        });
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let mut state = lock(&self.inner);
        if state.connected.is_some() {
            return true;
        }
        let threshold = state.polls_to_connect;
        let Some(association) = state.association.as_mut() else {
            return false;
        };
        if !association.accepted {
            return false;
        }
        if association.polls < threshold {
            association.polls += 1;
            return false;
        }
        let ssid = association.ssid.clone();
        state.association = None;
        state.connected = Some(ssid);
        true
    }

    fn link_info(&mut self) -> LinkInfo {
        let state = lock(&self.inner);
        let Some(ssid) = &state.connected else {
            return LinkInfo::default();
        };
        LinkInfo {
            ip: Some("192.168.1.42".to_string()),
            rssi: state
                .networks
                .iter()
                .find(|n| n.ap.ssid == ssid.as_bytes())
                .map(|n| n.ap.rssi),
        }
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.inner);
        state.association = None;
        state.connected = None;
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<AccessPoint>, DriverError> {
        let delay = {
            let mut state = lock(&self.inner);
            state.scan_calls += 1;
            if !state.active {
                return Err(DriverError::Scan("interface is down".to_string()));
            }
            if let Some(e) = &state.scan_error {
                return Err(DriverError::Scan(e.clone()));
            }
            state.scan_delay
        };
        thread::sleep(delay);
        Ok(lock(&self.inner)
            .networks
            .iter()
            .map(|n| n.ap.clone())
            .collect())
    }

    fn start_ap(&mut self, settings: &ApSettings) -> Result<(), DriverError> {
        info!(
            "Simulated access point '{}' up ({})",
            settings.ssid, settings.encryption
        );
        lock(&self.inner).ap = Some(settings.clone());
        Ok(())
    }
}

type RestartHook = Box<dyn Fn() + Send + Sync>;

/// In-memory [`Board`].
pub struct SimulatedBoard {
    led: Mutex<bool>,
    temperature: Mutex<Option<f32>>,
    restarts: AtomicUsize,
    on_restart: Option<RestartHook>,
}

impl SimulatedBoard {
    pub fn new(temperature_c: f32) -> Self {
        Self {
            led: Mutex::new(false),
            temperature: Mutex::new(Some(temperature_c)),
            restarts: AtomicUsize::new(0),
            on_restart: None,
        }
    }

    /// Run `hook` on every restart request, after it is counted.
    pub fn with_restart_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_restart = Some(Box::new(hook));
        self
    }

    /// `None` makes the sensor fail.
    pub fn set_temperature(&self, temperature_c: Option<f32>) {
        *lock(&self.temperature) = temperature_c;
    }

    pub fn led_on(&self) -> bool {
        *lock(&self.led)
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Board for SimulatedBoard {
    fn set_led(&self, on: bool) -> Result<(), BoardError> {
        *lock(&self.led) = on;
        Ok(())
    }

    fn temperature_c(&self) -> Result<f32, BoardError> {
        lock(&self.temperature).ok_or_else(|| BoardError("sensor not responding".to_string()))
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        info!("Restart requested");
        if let Some(hook) = &self.on_restart {
            hook();
        }
    }
}
