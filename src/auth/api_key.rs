//! API key format and secret checks.

use sha2::{Digest, Sha256};

use crate::auth::StoredApiKey;
use crate::status::RdrsError;

/// Length of the key prefix in bytes.
pub const API_KEY_PREFIX_LEN: usize = 16;

/// Split an API key into prefix and secret, rejecting malformed keys.
pub fn parse_api_key(api_key: &str) -> Result<(&str, &str), RdrsError> {
    let mut parts = api_key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(secret), None)
            if prefix.len() == API_KEY_PREFIX_LEN && !secret.is_empty() =>
        {
            Ok((prefix, secret))
        }
        _ => Err(RdrsError::Unauthorized(
            "the apikey has an incorrect format".to_string(),
        )),
    }
}

/// Hex encoded `sha256(secret + salt)`.
pub fn hash_secret(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a client secret against the stored key.
pub fn verify_secret(client_secret: &str, stored: &StoredApiKey) -> bool {
    hash_secret(client_secret, &stored.salt) == stored.secret
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "bkYjEz6OTZyevbqT.ocHajJhnE0ytBh8zbYj3IXupyMqeMZp8PW464eTxzxqP5afBjodEQUgY0lmL33ub";

    #[test]
    fn test_parse_valid_key() {
        let (prefix, secret) = parse_api_key(KEY).unwrap();
        assert_eq!(prefix, "bkYjEz6OTZyevbqT");
        assert!(secret.starts_with("ocHaj"));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(parse_api_key("bkYjEz6OTZyevbqT.").is_err());
        assert!(parse_api_key("bkYjEz6OTZyevbq.secret").is_err());
        assert!(parse_api_key("bkYjEz6OTZyevbqT").is_err());
        assert!(parse_api_key("bkYjEz6OTZyevbqT.a.b").is_err());
        assert!(parse_api_key("").is_err());
    }

    #[test]
    fn test_hash_secret() {
        // sha256("abc")
        assert_eq!(
            hash_secret("ab", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_secret() {
        let stored = StoredApiKey {
            secret: hash_secret("s3cret", "salt"),
            salt: "salt".into(),
            name: "test".into(),
            user_id: 1,
        };
        assert!(verify_secret("s3cret", &stored));
        assert!(!verify_secret("wrong", &stored));
    }
}
