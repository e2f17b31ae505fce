//! Format checks for the two values a remote node submits: its hostname
//! and its fastd public key.

use std::sync::OnceLock;

use regex::Regex;

/// Length of a decoded fastd public key.
pub const KEY_LEN: usize = 32;

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 35xxx-xxxxx_Xxxxx; ASCII only because the hostname becomes a file name.
    RE.get_or_init(|| Regex::new(r"(?i-u)^35[0-9]{3}-[\w-]+$").expect("static regex"))
}

/// Returns true if `hostname` is a site number followed by a non-empty suffix.
pub fn validate_hostname(hostname: &str) -> bool {
    hostname_regex().is_match(hostname)
}

/// Returns true if `key` is hex that decodes to exactly [`KEY_LEN`] bytes.
pub fn validate_key(key: &str) -> bool {
    match hex::decode(key) {
        Ok(bytes) => bytes.len() == KEY_LEN,
        Err(_) => false,
    }
}

/// Lowercases a key that already passed [`validate_key`] so that the same
/// key in a different case is recognised by the registry scan.
pub fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase()
}
