//! WiFi driver for ESP32.
//!
//! Holds the station and access point configurations and re-applies the
//! combined mode (client, access point or mixed) whenever either changes,
//! so powering the station down leaves a running access point alone.

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi,
};
use log::{debug, info, warn};

use panel_core::{ApSettings, Encryption};
use panel_server::wifi::{AccessPoint, DriverError, LinkInfo, WifiDriver};

pub struct EspWifiDriver {
    wifi: BlockingWifi<EspWifi<'static>>,
    client: ClientConfiguration,
    ap: Option<AccessPointConfiguration>,
    active: bool,
}

impl EspWifiDriver {
    pub fn new(
        modem: impl Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            ap: None,
            active: false,
        })
    }

    fn configuration(&self) -> Configuration {
        match (&self.ap, self.active) {
            (Some(ap), true) => Configuration::Mixed(self.client.clone(), ap.clone()),
            (Some(ap), false) => Configuration::AccessPoint(ap.clone()),
            (None, _) => Configuration::Client(self.client.clone()),
        }
    }

    fn apply(&mut self) -> Result<(), EspError> {
        let configuration = self.configuration();
        self.wifi.set_configuration(&configuration)?;
        let wanted = self.active || self.ap.is_some();
        let started = self.wifi.is_started()?;
        if wanted && !started {
            self.wifi.start()?;
        } else if !wanted && started {
            self.wifi.stop()?;
        }
        debug!("WiFi mode applied (station {})", if self.active { "up" } else { "down" });
        Ok(())
    }
}

fn interface(e: EspError) -> DriverError {
    DriverError::Interface(e.to_string())
}

fn auth_label(method: Option<AuthMethod>) -> String {
    match method {
        Some(AuthMethod::None) => "OPEN".to_string(),
        Some(AuthMethod::WEP) => "WEP".to_string(),
        Some(AuthMethod::WPA) => "WPA".to_string(),
        Some(AuthMethod::WPA2Personal) => "WPA2".to_string(),
        Some(AuthMethod::WPAWPA2Personal) => "WPA/WPA2".to_string(),
        Some(AuthMethod::WPA3Personal) => "WPA3".to_string(),
        Some(AuthMethod::WPA2WPA3Personal) => "WPA2/WPA3".to_string(),
        Some(other) => format!("{:?}", other),
        None => "UNKNOWN".to_string(),
    }
}

fn ap_auth(encryption: Encryption) -> AuthMethod {
    match encryption {
        Encryption::Open => AuthMethod::None,
        Encryption::Wpa2 => AuthMethod::WPA2Personal,
        Encryption::WpaWpa2 => AuthMethod::WPAWPA2Personal,
        Encryption::Wpa3 => AuthMethod::WPA3Personal,
    }
}

impl WifiDriver for EspWifiDriver {
    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) -> Result<(), DriverError> {
        if !active && self.wifi.is_connected().unwrap_or(false) {
            if let Err(e) = self.wifi.disconnect() {
                warn!("Disconnect before power-down failed: {}", e);
            }
        }
        self.active = active;
        self.apply().map_err(interface)
    }

    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), DriverError> {
        self.client = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| DriverError::Connect(format!("ssid {:?} is too long", ssid)))?,
            password: password
                .try_into()
                .map_err(|_| DriverError::Connect("password is too long".to_string()))?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        self.apply().map_err(interface)?;
        info!("Associating with '{}'", ssid);
        // non-blocking: the caller polls is_connected
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(|e| DriverError::Connect(e.to_string()))
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.wifi().sta_netif().is_up().unwrap_or(false)
    }

    fn link_info(&mut self) -> LinkInfo {
        LinkInfo {
            ip: self
                .wifi
                .wifi()
                .sta_netif()
                .get_ip_info()
                .ok()
                .map(|info| info.ip.to_string()),
            rssi: self
                .wifi
                .wifi()
                .driver()
                .get_rssi()
                .ok()
                .and_then(|rssi| i8::try_from(rssi).ok()),
        }
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        self.wifi
            .disconnect()
            .map_err(|e| DriverError::Connect(e.to_string()))
    }

    fn scan(&mut self) -> Result<Vec<AccessPoint>, DriverError> {
        let found = self
            .wifi
            .scan()
            .map_err(|e| DriverError::Scan(e.to_string()))?;
        Ok(found
            .into_iter()
            .map(|info| AccessPoint {
                ssid: info.ssid.as_bytes().to_vec(),
                rssi: info.signal_strength,
                channel: info.channel,
                auth: auth_label(info.auth_method),
            })
            .collect())
    }

    fn start_ap(&mut self, settings: &ApSettings) -> Result<(), DriverError> {
        let fail = |what: &str| DriverError::AccessPoint(format!("{} is too long", what));
        self.ap = Some(AccessPointConfiguration {
            ssid: settings.ssid.as_str().try_into().map_err(|_| fail("ssid"))?,
            password: settings
                .password
                .as_str()
                .try_into()
                .map_err(|_| fail("password"))?,
            auth_method: ap_auth(settings.encryption),
            channel: 1,
            ..Default::default()
        });
        self.apply()
            .map_err(|e| DriverError::AccessPoint(e.to_string()))?;
        info!("Access point '{}' up ({})", settings.ssid, settings.encryption);
        Ok(())
    }
}
