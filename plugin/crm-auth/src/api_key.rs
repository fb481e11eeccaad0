//! API key generation and hashing.
//!
//! A key is `<prefix><secret>`. Only `hash_token(secret)` is persisted.

use crate::token::{hash_token, random_secret};

/// Length of the random part of an API key
pub const API_KEY_SECRET_LEN: usize = 40;

/// A freshly generated key: the plaintext to hand out and the hash to store
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub key_hash: String,
}

/// Generate a new API key under `prefix`
pub fn generate(prefix: &str) -> GeneratedApiKey {
    let secret = random_secret(API_KEY_SECRET_LEN);
    GeneratedApiKey {
        plaintext: format!("{}{}", prefix, secret),
        key_hash: hash_token(&secret),
    }
}

/// Strip the scheme marker and hash the remainder
///
/// Returns `None` when the key does not carry `prefix` or has nothing after it.
pub fn hash_presented(prefix: &str, presented: &str) -> Option<String> {
    let secret = presented.strip_prefix(prefix)?;
    if secret.is_empty() {
        return None;
    }
    Some(hash_token(secret))
}

/// Whether `value` looks like an API key rather than a JWT
pub fn has_prefix(prefix: &str, value: &str) -> bool {
    value.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let key = generate("crm_");
        assert!(key.plaintext.starts_with("crm_"));
        assert_eq!(key.plaintext.len(), 4 + API_KEY_SECRET_LEN);
        assert!(key.plaintext[4..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!key.key_hash.contains(&key.plaintext[4..]));
    }

    #[test]
    fn test_presented_key_hashes_to_stored() {
        let key = generate("crm_");
        assert_eq!(hash_presented("crm_", &key.plaintext), Some(key.key_hash));
    }

    #[test]
    fn test_altered_key_hashes_differently() {
        let key = generate("crm_");
        let mut altered = key.plaintext.clone();
        let last = altered.pop().unwrap();
        altered.push(if last == 'x' { 'y' } else { 'x' });

        assert_ne!(hash_presented("crm_", &altered), Some(key.key_hash));
    }

    #[test]
    fn test_missing_prefix() {
        assert_eq!(hash_presented("crm_", "sk_abcdef"), None);
        assert_eq!(hash_presented("crm_", "crm_"), None);
        assert!(!has_prefix("crm_", "eyJhbGciOiJIUzI1NiJ9"));
    }
}
