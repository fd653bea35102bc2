/// API key primitives
///
/// API keys authenticate integrations. A key maps directly to one tenant and
/// is not bound to a user; what it may touch is limited by its scopes.
///
/// # Key Format
///
/// `tg_` followed by 32 base62 characters (35 chars total). Only the
/// SHA-256 hex digest is stored; the plaintext is shown once at creation.
///
/// # Scopes
///
/// Scopes name modules and optionally an action:
///
/// - `*`: every module and action
/// - `patients`, `patients:*`: every action on `patients`
/// - `patients:view`: only viewing `patients`
///
/// # Example
///
/// ```
/// use tenantgate_shared::auth::api_key::{generate_api_key, hash_api_key, validate_api_key_format};
///
/// let (key, hash) = generate_api_key();
/// assert!(key.starts_with("tg_"));
/// assert!(validate_api_key_format(&key));
/// assert_eq!(hash, hash_api_key(&key));
/// ```

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of the random part of the key
const KEY_RANDOM_LENGTH: usize = 32;

/// API key prefix
pub const KEY_PREFIX: &str = "tg_";

/// Total length of an API key
pub const API_KEY_LENGTH: usize = KEY_PREFIX.len() + KEY_RANDOM_LENGTH;

/// Generates a new key, returning `(plaintext, sha256_hex)`
pub fn generate_api_key() -> (String, String) {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    let random_part: String = (0..KEY_RANDOM_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();

    let key = format!("{}{}", KEY_PREFIX, random_part);
    let hash = hash_api_key(&key);
    (key, hash)
}

/// Hex-encoded SHA-256 of a key
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Checks prefix, length and alphabet without touching storage
///
/// Malformed keys are rejected before any lookup.
pub fn validate_api_key_format(key: &str) -> bool {
    key.len() == API_KEY_LENGTH
        && key
            .strip_prefix(KEY_PREFIX)
            .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Compares a key against a stored hash in constant time
pub fn verify_api_key(key: &str, stored_hash: &str) -> bool {
    constant_time_compare(&hash_api_key(key), stored_hash)
}

/// Constant-time string comparison
///
/// Runs over the full length so timing does not reveal the first mismatch.
/// Strings of different length compare unequal immediately; the length of a
/// SHA-256 digest is public.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Parses a comma-separated scope list
pub fn parse_scopes(scopes_str: &str) -> Vec<String> {
    scopes_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `scopes` allow `action` on `module`
pub fn has_scope(scopes: &[String], module: &str, action: &str) -> bool {
    scopes.iter().any(|scope| match scope.split_once(':') {
        None => scope == "*" || scope == module,
        Some((m, a)) => m == module && (a == "*" || a == action),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key() {
        let (key1, hash1) = generate_api_key();
        let (key2, hash2) = generate_api_key();

        assert!(key1.starts_with("tg_"));
        assert_eq!(key1.len(), API_KEY_LENGTH);
        assert_ne!(key1, key2);
        assert_ne!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_api_key_known_value() {
        // sha256("abc")
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_validate_api_key_format() {
        assert!(validate_api_key_format("tg_abcdefghijklmnopqrstuvwxyz123456"));
        assert!(!validate_api_key_format("xx_abcdefghijklmnopqrstuvwxyz123456"));
        assert!(!validate_api_key_format("tg_short"));
        assert!(!validate_api_key_format("tg_abcdefghijklmnopqrstuvwxyz12345!"));
        assert!(!validate_api_key_format("tg_abcdefghijklmnopqrstuvwxyz1234567"));
    }

    #[test]
    fn test_verify_api_key() {
        let (key, hash) = generate_api_key();
        assert!(verify_api_key(&key, &hash));
        assert!(!verify_api_key("tg_wrongkey123456789012345678901", &hash));
        assert!(!verify_api_key("", &hash));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(constant_time_compare("", ""));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("short", "longer"));
    }

    #[test]
    fn test_parse_scopes() {
        assert_eq!(
            parse_scopes("patients:view, appointments ,"),
            vec!["patients:view", "appointments"]
        );
        assert!(parse_scopes("").is_empty());
    }

    #[test]
    fn test_has_scope() {
        let scopes = vec!["patients:view".to_string(), "appointments".to_string()];
        assert!(has_scope(&scopes, "patients", "view"));
        assert!(!has_scope(&scopes, "patients", "delete"));
        assert!(has_scope(&scopes, "appointments", "delete"));
        assert!(!has_scope(&scopes, "payments", "view"));

        let wildcard = vec!["payments:*".to_string()];
        assert!(has_scope(&wildcard, "payments", "edit"));
        assert!(!has_scope(&wildcard, "patients", "edit"));

        assert!(has_scope(&["*".to_string()], "anything", "delete"));
    }
}
