//! Persisted control panel document.
//!
//! The whole device configuration is one JSON document:
//!
//! ```json
//! {
//!   "function_list": ["led", "get_temperature"],
//!   "functions": {
//!     "led": { "name": "LED", "type": "function", "doc": "...", "parameters": [...] }
//!   },
//!   "wifi": {
//!     "ap":  { "ssid": "espap", "password": "00000000", "encryption": "WPA2" },
//!     "sta": [{ "ssid": "", "password": "" }]
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How a function is presented on the panel and how its HTTP response is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationType {
    /// Plain form; the response redirects back to the panel.
    Function,
    /// Live output panel polled from `/show/<id>`.
    Show,
    /// Asynchronous form whose result text is written next to it.
    Rut,
}

impl PresentationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentationType::Function => "function",
            PresentationType::Show => "show",
            PresentationType::Rut => "rut",
        }
    }
}

/// Declared type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    String,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::String => "string",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ParamType::Int | ParamType::Float)
    }
}

/// One declared parameter of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Either `[min, max]` for numeric parameters, a list of choices, or empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<serde_json::Value>,
}

impl ParamDecl {
    pub fn new(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            data: Vec::new(),
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.data = vec![serde_json::json!(min), serde_json::json!(max)];
        self
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.data = choices.iter().map(|c| serde_json::json!(c)).collect();
        self
    }

    /// Interpret `data` according to the declared type.
    pub fn domain(&self) -> ParamDomain {
        if self.param_type.is_numeric() && self.data.len() == 2 {
            if let (Some(min), Some(max)) = (self.data[0].as_f64(), self.data[1].as_f64()) {
                return ParamDomain::Range { min, max };
            }
        }
        if self.data.is_empty() {
            return ParamDomain::Free;
        }
        ParamDomain::Choices(
            self.data
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )
    }
}

/// Allowed values of a parameter, derived from its `data` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDomain {
    Free,
    Range { min: f64, max: f64 },
    Choices(Vec<String>),
}

/// Declaration of one function group in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: PresentationType,

    #[serde(default)]
    pub doc: String,

    #[serde(default)]
    pub parameters: Vec<ParamDecl>,
}

impl FunctionDecl {
    pub fn new(name: &str, kind: PresentationType, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            doc: doc.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamDecl) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Access point encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encryption {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "WPA2")]
    Wpa2,
    #[serde(rename = "WPA/WPA2")]
    WpaWpa2,
    #[serde(rename = "WPA3")]
    Wpa3,
}

impl Encryption {
    pub const ALL: [Encryption; 4] = [
        Encryption::Open,
        Encryption::Wpa2,
        Encryption::WpaWpa2,
        Encryption::Wpa3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::Open => "OPEN",
            Encryption::Wpa2 => "WPA2",
            Encryption::WpaWpa2 => "WPA/WPA2",
            Encryption::Wpa3 => "WPA3",
        }
    }

    pub fn requires_password(&self) -> bool {
        !matches!(self, Encryption::Open)
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encryption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Encryption::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "unknown encryption {:?} (expected one of OPEN, WPA2, WPA/WPA2, WPA3)",
                    s
                )
            })
    }
}

/// Access point settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApSettings {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    pub encryption: Encryption,
}

impl Default for ApSettings {
    fn default() -> Self {
        Self {
            ssid: "espap".to_string(),
            password: "00000000".to_string(),
            encryption: Encryption::Wpa2,
        }
    }
}

/// One stored station credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

impl CredentialEntry {
    pub fn new(ssid: &str, password: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            password: password.to_string(),
            last_connected: None,
        }
    }

    /// The blank entry that keeps the list non-empty.
    pub fn placeholder() -> Self {
        Self::new("", "")
    }

    pub fn is_placeholder(&self) -> bool {
        self.ssid.is_empty()
    }
}

/// WiFi section of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiSettings {
    #[serde(default)]
    pub ap: ApSettings,

    #[serde(default = "default_sta")]
    pub sta: Vec<CredentialEntry>,
}

fn default_sta() -> Vec<CredentialEntry> {
    vec![CredentialEntry::placeholder()]
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            ap: ApSettings::default(),
            sta: default_sta(),
        }
    }
}

/// The aggregate document root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub function_list: Vec<String>,

    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDecl>,

    #[serde(default)]
    pub wifi: WifiSettings,
}

/// A violation of the document invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// Listed in `function_list` but not declared in `functions`.
    Undeclared(String),
    /// Declared in `functions` but missing from `function_list`.
    Unlisted(String),
    /// Listed more than once.
    Duplicate(String),
    /// `wifi.sta` has no entries.
    EmptyCredentials,
    /// Two credentials share an ssid.
    DuplicateCredential(String),
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::Undeclared(id) => write!(f, "'{}' is listed but not declared", id),
            ConsistencyIssue::Unlisted(id) => write!(f, "'{}' is declared but not listed", id),
            ConsistencyIssue::Duplicate(id) => write!(f, "'{}' is listed more than once", id),
            ConsistencyIssue::EmptyCredentials => write!(f, "credential list is empty"),
            ConsistencyIssue::DuplicateCredential(ssid) => {
                write!(f, "credential '{}' is stored more than once", ssid)
            }
        }
    }
}

impl Config {
    /// Add a declared function at the end of the order.
    pub fn declare(&mut self, id: &str, decl: FunctionDecl) {
        if !self.functions.contains_key(id) {
            self.function_list.push(id.to_string());
        }
        self.functions.insert(id.to_string(), decl);
    }

    /// Check `function_list` against `functions` and the credential invariants.
    pub fn check(&self) -> Vec<ConsistencyIssue> {
        let mut issues = Vec::new();
        let mut seen = BTreeSet::new();
        for id in &self.function_list {
            if !seen.insert(id.as_str()) {
                issues.push(ConsistencyIssue::Duplicate(id.clone()));
            } else if !self.functions.contains_key(id) {
                issues.push(ConsistencyIssue::Undeclared(id.clone()));
            }
        }
        for id in self.functions.keys() {
            if !seen.contains(id.as_str()) {
                issues.push(ConsistencyIssue::Unlisted(id.clone()));
            }
        }

        if self.wifi.sta.is_empty() {
            issues.push(ConsistencyIssue::EmptyCredentials);
        }
        let mut ssids = BTreeSet::new();
        for entry in self.wifi.sta.iter().filter(|e| !e.ssid.is_empty()) {
            if !ssids.insert(entry.ssid.as_str()) {
                issues.push(ConsistencyIssue::DuplicateCredential(entry.ssid.clone()));
            }
        }
        issues
    }

    pub fn is_consistent(&self) -> bool {
        self.check().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_document() {
        let json = r#"{
            "function_list": ["led", "get_temperature"],
            "functions": {
                "led": {
                    "name": "LED",
                    "type": "function",
                    "doc": "Switch the LED",
                    "parameters": [{"name": "state", "type": "string", "data": ["on", "off"]}]
                },
                "get_temperature": {"name": "Temperature", "type": "show"}
            },
            "wifi": {
                "ap": {"ssid": "espap", "password": "00000000", "encryption": "WPA/WPA2"},
                "sta": [{"ssid": "home", "password": "secret123", "last_connected": "2024-01-17T10:30:00Z"}]
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.function_list, vec!["led", "get_temperature"]);
        assert_eq!(config.functions["led"].kind, PresentationType::Function);
        assert_eq!(config.functions["get_temperature"].parameters.len(), 0);
        assert_eq!(config.wifi.ap.encryption, Encryption::WpaWpa2);
        assert!(config.wifi.sta[0].last_connected.is_some());
        assert!(config.is_consistent());
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.function_list.is_empty());
        assert_eq!(config.wifi.ap.ssid, "espap");
        assert_eq!(config.wifi.sta, vec![CredentialEntry::placeholder()]);
    }

    #[test]
    fn test_param_domain() {
        let range = ParamDecl::new("level", ParamType::Int).with_range(0.0, 100.0);
        assert_eq!(range.domain(), ParamDomain::Range { min: 0.0, max: 100.0 });

        let choices = ParamDecl::new("mode", ParamType::String).with_choices(&["asc", "desc"]);
        assert_eq!(
            choices.domain(),
            ParamDomain::Choices(vec!["asc".to_string(), "desc".to_string()])
        );

        // A two-element list on a string parameter is a choice list, not a range.
        let pair = ParamDecl::new("side", ParamType::String).with_choices(&["left", "right"]);
        assert!(matches!(pair.domain(), ParamDomain::Choices(_)));

        assert_eq!(ParamDecl::new("name", ParamType::String).domain(), ParamDomain::Free);
    }

    #[test]
    fn test_encryption_from_str() {
        assert_eq!("open".parse::<Encryption>().unwrap(), Encryption::Open);
        assert_eq!("WPA/wpa2".parse::<Encryption>().unwrap(), Encryption::WpaWpa2);
        assert!("WEP".parse::<Encryption>().is_err());
    }

    #[test]
    fn test_check_reports_issues() {
        let mut config = Config::default();
        config.declare("a", FunctionDecl::new("A", PresentationType::Function, ""));
        config.function_list.push("ghost".to_string());
        config.function_list.push("a".to_string());
        config
            .functions
            .insert("orphan".to_string(), FunctionDecl::new("O", PresentationType::Rut, ""));
        config.wifi.sta = vec![CredentialEntry::new("x", "12345678"), CredentialEntry::new("x", "87654321")];

        let issues = config.check();
        assert!(issues.contains(&ConsistencyIssue::Undeclared("ghost".to_string())));
        assert!(issues.contains(&ConsistencyIssue::Duplicate("a".to_string())));
        assert!(issues.contains(&ConsistencyIssue::Unlisted("orphan".to_string())));
        assert!(issues.contains(&ConsistencyIssue::DuplicateCredential("x".to_string())));
    }
}
