//! Snapshots of the station and scan state machines.
//!
//! Both records are replaced whole on every transition, so any clone a
//! reader holds is internally consistent.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Station connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    /// A station in this phase owns the interface.
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

/// The single station record.
///
/// Holds no password. The password travels into the connect worker by value
/// and is dropped there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub message: String,
    pub ssid: Option<String>,
    pub ip: Option<String>,
    pub rssi: Option<i8>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::idle()
    }
}

impl ConnectionState {
    pub fn idle() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            message: "not connected".to_string(),
            ssid: None,
            ip: None,
            rssi: None,
            updated_at: Utc::now(),
        }
    }

    pub fn connecting(ssid: &str) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            message: format!("connecting to '{}'", ssid),
            ssid: Some(ssid.to_string()),
            ip: None,
            rssi: None,
            updated_at: Utc::now(),
        }
    }

    pub fn connected(ssid: &str, ip: Option<String>, rssi: Option<i8>) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            message: format!("connected to '{}'", ssid),
            ssid: Some(ssid.to_string()),
            ip,
            rssi,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(ssid: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Error,
            message: message.into(),
            ssid: ssid.map(str::to_string),
            ip: None,
            rssi: None,
            updated_at: Utc::now(),
        }
    }

    /// One-line text for the status panel.
    pub fn describe(&self) -> String {
        match self.status {
            ConnectionStatus::Idle => "idle: not connected".to_string(),
            ConnectionStatus::Connecting => format!("connecting: {}", self.message),
            ConnectionStatus::Connected => {
                let mut text = format!("connected: {}", self.ssid.as_deref().unwrap_or(""));
                if let Some(ip) = &self.ip {
                    text.push_str(&format!(", ip {}", ip));
                }
                if let Some(rssi) = self.rssi {
                    text.push_str(&format!(", {} dBm", rssi));
                }
                text
            }
            ConnectionStatus::Error => format!("error: {}", self.message),
        }
    }
}

/// Scan phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Scanning,
    Ready,
    Error,
}

/// The single scan record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanState {
    pub status: ScanStatus,
    /// Formatted result list, or the failure message.
    pub result: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            status: ScanStatus::Idle,
            result: String::new(),
            updated_at: None,
        }
    }
}

impl ScanState {
    pub fn scanning() -> Self {
        Self {
            status: ScanStatus::Scanning,
            result: String::new(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn ready(result: String) -> Self {
        Self {
            status: ScanStatus::Ready,
            result,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Error,
            result: message.into(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn describe(&self) -> String {
        match self.status {
            ScanStatus::Idle => "no scan has been run".to_string(),
            ScanStatus::Scanning => "scan in progress".to_string(),
            ScanStatus::Ready => self.result.clone(),
            ScanStatus::Error => format!("scan failed: {}", self.result),
        }
    }
}

/// Everything the page header shows about the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelStatus {
    pub connection: ConnectionState,
    pub scan: ScanState,
    pub ap_ssid: Option<String>,
}
