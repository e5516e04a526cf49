//! Input validation for WiFi credentials and AP settings.

use crate::error::{PanelError, PanelResult};
use crate::model::Encryption;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 63;

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// An SSID is 1 to 32 printable ASCII characters.
pub fn validate_ssid(ssid: &str) -> PanelResult<()> {
    if ssid.is_empty() {
        return Err(PanelError::validation("SSID must not be empty"));
    }
    if !is_printable_ascii(ssid) {
        return Err(PanelError::validation(
            "SSID must contain only printable ASCII characters",
        ));
    }
    if ssid.len() > SSID_MAX_LEN {
        return Err(PanelError::validation(format!(
            "SSID is {} characters long, maximum is {}",
            ssid.len(),
            SSID_MAX_LEN
        )));
    }
    Ok(())
}

/// A WPA passphrase is 8 to 63 printable ASCII characters.
pub fn validate_password(password: &str) -> PanelResult<()> {
    if !is_printable_ascii(password) {
        return Err(PanelError::validation(
            "password must contain only printable ASCII characters",
        ));
    }
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.len()) {
        return Err(PanelError::validation(format!(
            "password must be {} to {} characters long, got {}",
            PASSWORD_MIN_LEN,
            PASSWORD_MAX_LEN,
            password.len()
        )));
    }
    Ok(())
}

/// Password policy for an access point: open networks take no password,
/// every other mode takes a WPA passphrase.
pub fn validate_ap_password(password: &str, encryption: Encryption) -> PanelResult<()> {
    if encryption.requires_password() {
        validate_password(password)
    } else if password.is_empty() {
        Ok(())
    } else {
        Err(PanelError::validation(
            "an OPEN access point must not have a password",
        ))
    }
}
