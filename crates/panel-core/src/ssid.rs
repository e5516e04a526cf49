//! SSID decoding for scan results.
//!
//! SSIDs are up to 32 raw bytes with no declared encoding. Decoders are tried
//! in a fixed order and the first that accepts the bytes wins:
//!
//! 1. UTF-8
//! 2. GBK (common on routers sold with Chinese firmware)
//! 3. Latin-1, which maps every byte and therefore always succeeds
//!
//! Because Latin-1 never fails, "undecodable" is decided on the result
//! instead: text containing control characters is shown as hex.

use encoding_rs::GBK;

/// Shown for networks that broadcast an empty SSID.
pub const HIDDEN_SSID: &str = "<hidden>";

/// Decode an SSID for display. Never fails, never returns an empty string.
pub fn decode_ssid(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let bytes = &raw[..end];
    if bytes.is_empty() {
        return HIDDEN_SSID.to_string();
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => match GBK.decode_without_bom_handling_and_without_replacement(bytes) {
            Some(s) => s.into_owned(),
            None => bytes.iter().map(|&b| char::from(b)).collect(),
        },
    };

    if text.chars().any(char::is_control) {
        to_hex(bytes)
    } else {
        text
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8() {
        assert_eq!(decode_ssid(b"HomeNet"), "HomeNet");
        assert_eq!(decode_ssid("Café ☕".as_bytes()), "Café ☕");
    }

    #[test]
    fn test_gbk() {
        // "你好" in GBK, which is not valid UTF-8.
        assert_eq!(decode_ssid(&[0xc4, 0xe3, 0xba, 0xc3]), "你好");
    }

    #[test]
    fn test_latin1_fallback() {
        // 0xff is not a GBK lead byte.
        assert_eq!(decode_ssid(&[0x41, 0xff]), "Aÿ");
    }

    #[test]
    fn test_control_characters_become_hex() {
        assert_eq!(decode_ssid(&[0x01, 0x02, 0x41]), "0x010241");
        // Decodes as Latin-1 into a C1 control character.
        assert_eq!(decode_ssid(&[0xff, 0x85]), "0xff85");
    }

    #[test]
    fn test_hidden_and_padding() {
        assert_eq!(decode_ssid(&[]), HIDDEN_SSID);
        assert_eq!(decode_ssid(&[0, 0, 0]), HIDDEN_SSID);
        assert_eq!(decode_ssid(b"abc\0\0"), "abc");
    }

    #[test]
    fn test_never_empty_for_any_byte() {
        for b in 0u8..=255 {
            for len in 1..=3 {
                let bytes = vec![b; len];
                assert!(!decode_ssid(&bytes).is_empty(), "bytes {:?}", bytes);
            }
        }
    }
}
