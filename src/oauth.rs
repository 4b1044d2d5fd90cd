//! OAUTHBEARER credentials handed back to the native client.
//!
//! Token construction belongs to the application. This module only checks
//! that a token is well-formed before it reaches the native library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Error, Result};

/// Extension key reserved by the SASL/OAUTHBEARER protocol.
const RESERVED_EXTENSION_KEY: &str = "auth";

/// An OAUTHBEARER token and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthBearerToken {
    /// Token value, usually a JWS compact serialization.
    pub token_value: String,
    pub expiration: DateTime<Utc>,
    pub principal: String,
    /// SASL extensions sent to the broker.
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

impl OAuthBearerToken {
    pub fn validate(&self) -> Result<()> {
        self.validate_at(Utc::now())
    }

    /// Validate against an explicit clock.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.token_value.is_empty() {
            return Err(Error::auth_config("token value must not be empty"));
        }
        if self.principal.is_empty() {
            return Err(Error::auth_config("principal must not be empty"));
        }
        if self.expiration <= now {
            return Err(Error::auth_config(format!(
                "token already expired at {}",
                self.expiration.to_rfc3339()
            )));
        }

        for (key, value) in &self.extensions {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(Error::auth_config(format!(
                    "extension key must be alphabetic: {:?}",
                    key
                )));
            }
            if key == RESERVED_EXTENSION_KEY {
                return Err(Error::auth_config("extension key \"auth\" is reserved"));
            }
            if !value.bytes().all(is_extension_value_byte) {
                return Err(Error::auth_config(format!(
                    "extension value for {} contains invalid characters",
                    key
                )));
            }
        }
        Ok(())
    }
}

// RFC 7628: VCHAR / SP / HTAB / CR / LF
fn is_extension_value_byte(b: u8) -> bool {
    matches!(b, 0x21..=0x7E | b' ' | b'\t' | b'\r' | b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token() -> OAuthBearerToken {
        OAuthBearerToken {
            token_value: "eyJhbGciOiJub25lIn0.eyJzdWIiOiJhbGljZSJ9.".to_string(),
            expiration: Utc::now() + Duration::hours(1),
            principal: "alice".to_string(),
            extensions: HashMap::new(),
        }
    }

    #[test]
    fn test_valid_token() {
        let mut t = token();
        t.extensions.insert("traceId".to_string(), "abc 123".to_string());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut t = token();
        t.token_value.clear();
        assert!(matches!(t.validate(), Err(Error::AuthConfig(_))));

        let mut t = token();
        t.principal.clear();
        assert!(t.validate().unwrap_err().to_string().contains("principal"));
    }

    #[test]
    fn test_expired_rejected() {
        let t = token();
        let later = t.expiration + Duration::seconds(1);
        assert!(t.validate_at(later).is_err());
    }

    #[test]
    fn test_bad_extensions_rejected() {
        let mut t = token();
        t.extensions.insert("auth".to_string(), "x".to_string());
        assert!(t.validate().unwrap_err().to_string().contains("reserved"));

        let mut t = token();
        t.extensions.insert("key1".to_string(), "x".to_string());
        assert!(t.validate().is_err());

        let mut t = token();
        t.extensions.insert("key".to_string(), "bell\u{7}".to_string());
        assert!(t.validate().is_err());
    }
}
