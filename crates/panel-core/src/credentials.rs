//! Stored station credentials.
//!
//! The list lives in `wifi.sta` of the document. Two invariants hold after
//! every operation: no two entries share a non-empty SSID, and the list is
//! never empty (a blank placeholder stands in when nothing real is stored).

use std::cmp::Reverse;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::ConfigStore;
use crate::error::{PanelError, PanelResult};
use crate::model::CredentialEntry;
use crate::validate::{validate_password, validate_ssid};

/// Sort orders accepted by [`sort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Most recently connected first; never-connected entries last.
    Connection,
    /// Case-insensitive SSID ascending.
    Asc,
    /// Case-insensitive SSID descending.
    Desc,
}

impl FromStr for SortMode {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" => Ok(SortMode::Connection),
            "asc" => Ok(SortMode::Asc),
            "desc" => Ok(SortMode::Desc),
            other => Err(PanelError::validation(format!(
                "unknown sort mode {:?} (expected connection, asc or desc)",
                other
            ))),
        }
    }
}

/// Restore the non-empty invariant.
fn ensure_placeholder(list: &mut Vec<CredentialEntry>) {
    if list.is_empty() {
        list.push(CredentialEntry::placeholder());
    }
}

/// Real (non-placeholder) entries.
pub fn list(store: &ConfigStore) -> PanelResult<Vec<CredentialEntry>> {
    Ok(store
        .load()?
        .wifi
        .sta
        .into_iter()
        .filter(|e| !e.is_placeholder())
        .collect())
}

/// The stored password for `ssid`, if any.
pub fn password_for(store: &ConfigStore, ssid: &str) -> PanelResult<Option<String>> {
    Ok(list(store)?
        .into_iter()
        .find(|e| e.ssid == ssid)
        .map(|e| e.password))
}

/// Numbered listing without passwords.
pub fn describe(entries: &[CredentialEntry]) -> String {
    if entries.is_empty() {
        return "no saved networks".to_string();
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| match e.last_connected {
            Some(at) => format!(
                "{}. {} (last connected {})",
                i + 1,
                e.ssid,
                at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => format!("{}. {} (never connected)", i + 1, e.ssid),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Store a new credential. Rejects an SSID that is already stored.
pub fn add(store: &ConfigStore, ssid: &str, password: &str) -> PanelResult<String> {
    validate_ssid(ssid)?;
    validate_password(password)?;

    let count = store.update(|config| {
        let list = &mut config.wifi.sta;
        if list.iter().any(|e| e.ssid == ssid) {
            return Err(PanelError::validation(format!(
                "a credential for '{}' already exists",
                ssid
            )));
        }
        list.retain(|e| !e.is_placeholder());
        list.push(CredentialEntry::new(ssid, password));
        Ok(list.len())
    })?;

    info!("Stored credential for '{}'", ssid);
    Ok(format!("saved '{}'; {} networks stored", ssid, count))
}

/// Replace the password of a stored credential.
pub fn update(store: &ConfigStore, ssid: &str, password: &str) -> PanelResult<String> {
    validate_password(password)?;
    store.update(|config| {
        let entry = config
            .wifi
            .sta
            .iter_mut()
            .find(|e| !e.is_placeholder() && e.ssid == ssid)
            .ok_or_else(|| PanelError::validation(format!("no credential for '{}'", ssid)))?;
        entry.password = password.to_string();
        Ok(())
    })?;
    Ok(format!("updated '{}'", ssid))
}

/// Remove a stored credential, leaving a placeholder if it was the last one.
pub fn delete(store: &ConfigStore, ssid: &str) -> PanelResult<String> {
    if ssid.is_empty() {
        return Err(PanelError::validation("SSID must not be empty"));
    }
    let remaining = store.update(|config| {
        let list = &mut config.wifi.sta;
        let before = list.len();
        list.retain(|e| e.ssid != ssid);
        if list.len() == before {
            return Err(PanelError::validation(format!("no credential for '{}'", ssid)));
        }
        let remaining = list.len();
        ensure_placeholder(list);
        Ok(remaining)
    })?;

    info!("Deleted credential for '{}'", ssid);
    Ok(format!("deleted '{}'; {} networks stored", ssid, remaining))
}

/// Reorder the stored credentials.
pub fn sort(store: &ConfigStore, mode: SortMode) -> PanelResult<String> {
    store.update(|config| {
        let list = &mut config.wifi.sta;
        match mode {
            SortMode::Connection => list.sort_by_key(|e| Reverse(e.last_connected)),
            SortMode::Asc => list.sort_by_cached_key(|e| e.ssid.to_lowercase()),
            SortMode::Desc => list.sort_by_cached_key(|e| Reverse(e.ssid.to_lowercase())),
        }
        Ok(())
    })?;
    Ok(describe(&list(store)?))
}

/// Record a successful connection to `ssid`. Unknown SSIDs are ignored.
pub fn touch(store: &ConfigStore, ssid: &str, at: DateTime<Utc>) -> PanelResult<bool> {
    if !list(store)?.iter().any(|e| e.ssid == ssid) {
        return Ok(false);
    }
    store.update(|config| {
        if let Some(entry) = config.wifi.sta.iter_mut().find(|e| e.ssid == ssid) {
            entry.last_connected = Some(at);
        }
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStorage;
    use crate::model::Config;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn store() -> ConfigStore {
        ConfigStore::new(MemoryConfigStorage::new(), Config::default)
    }

    fn ssids(store: &ConfigStore) -> Vec<String> {
        store.load().unwrap().wifi.sta.into_iter().map(|e| e.ssid).collect()
    }

    #[test]
    fn test_add_replaces_placeholder() {
        let store = store();
        assert_eq!(ssids(&store), vec![""]);

        add(&store, "home", "password1").unwrap();
        assert_eq!(ssids(&store), vec!["home"]);
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let store = store();
        add(&store, "home", "password1").unwrap();
        let err = add(&store, "home", "password2").unwrap_err();
        assert!(matches!(err, PanelError::Validation(_)));
        assert_eq!(ssids(&store), vec!["home"]);
    }

    #[test]
    fn test_add_validates_input() {
        let store = store();
        assert!(add(&store, "", "password1").is_err());
        assert!(add(&store, "home", "short").is_err());
        assert_eq!(ssids(&store), vec![""]);
    }

    #[test]
    fn test_delete_keeps_placeholder() {
        let store = store();
        add(&store, "home", "password1").unwrap();
        add(&store, "work", "password2").unwrap();

        delete(&store, "home").unwrap();
        assert_eq!(ssids(&store), vec!["work"]);

        delete(&store, "work").unwrap();
        assert_eq!(ssids(&store), vec![""]);
        assert!(store.load().unwrap().wifi.sta[0].is_placeholder());

        assert!(delete(&store, "work").is_err());
        assert_eq!(store.load().unwrap().wifi.sta.len(), 1);
    }

    #[test]
    fn test_sort_by_connection() {
        let store = store();
        add(&store, "old", "password1").unwrap();
        add(&store, "never", "password2").unwrap();
        add(&store, "recent", "password3").unwrap();
        touch(&store, "old", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).unwrap();
        touch(&store, "recent", Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()).unwrap();

        sort(&store, SortMode::Connection).unwrap();
        assert_eq!(ssids(&store), vec!["recent", "old", "never"]);
    }

    #[test]
    fn test_sort_alphabetical_ignores_case() {
        let store = store();
        add(&store, "beta", "password1").unwrap();
        add(&store, "Alpha", "password2").unwrap();
        add(&store, "gamma", "password3").unwrap();

        sort(&store, "asc".parse().unwrap()).unwrap();
        assert_eq!(ssids(&store), vec!["Alpha", "beta", "gamma"]);

        sort(&store, SortMode::Desc).unwrap();
        assert_eq!(ssids(&store), vec!["gamma", "beta", "Alpha"]);
    }

    #[test]
    fn test_unknown_sort_mode() {
        assert!("random".parse::<SortMode>().is_err());
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let storage = std::sync::Arc::new(MemoryConfigStorage::new());
        let store = ConfigStore::new(storage.clone(), Config::default);
        add(&store, "home", "password1").unwrap();

        storage.set_fail_writes(true);
        let err = delete(&store, "home").unwrap_err();
        assert!(err.to_string().contains("rolled back"));
        assert_eq!(ssids(&store), vec!["home"]);
    }

    #[test]
    fn test_password_lookup_and_update() {
        let store = store();
        add(&store, "home", "password1").unwrap();
        assert_eq!(password_for(&store, "home").unwrap().as_deref(), Some("password1"));

        update(&store, "home", "password9").unwrap();
        assert_eq!(password_for(&store, "home").unwrap().as_deref(), Some("password9"));
        assert!(update(&store, "away", "password9").is_err());
        assert_eq!(password_for(&store, "away").unwrap(), None);
    }

    #[test]
    fn test_describe_hides_passwords() {
        let store = store();
        add(&store, "home", "password1").unwrap();
        let text = describe(&list(&store).unwrap());
        assert_eq!(text, "1. home (never connected)");
        assert!(!text.contains("password1"));
    }
}
