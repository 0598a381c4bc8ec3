//! Credential issuance/verification and password hashing.
//!
//! Credentials are HS256 JWTs carrying the tenant identity, the
//! administrative flag, and a 30-day expiry. Verification is stateless — no
//! store lookup. Passwords are hashed with Argon2id (PHC string format); a
//! legacy `sha256$<hex>` scheme from earlier deployments is still accepted on
//! verify.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Claims embedded in every issued credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — tenant identity (account email).
    pub sub: String,
    /// Administrative flag.
    pub admin: bool,
    /// Issued-at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Issue a signed credential for a tenant.
pub fn issue_credential(identity: &str, is_admin: bool, config: &AuthConfig) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity.to_string(),
        admin: is_admin,
        iat: now,
        exp: now + config.token_ttl_days * 86_400,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| Error::Auth(format!("credential encode: {e}")))
}

/// Decode and verify a credential (signature + expiry).
pub fn verify_credential(token: &str, config: &AuthConfig) -> Result<Claims> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            Error::Auth("credential expired".to_string())
        }
        _ => Error::Auth(format!("invalid credential: {e}")),
    })
}

/// Hash a password with Argon2id, returning a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Auth(format!("password hashing: {e}")))
}

/// Verify a plaintext password against a stored hash.
///
/// Accepts Argon2 PHC strings and the legacy `sha256$<hex>` scheme. Returns
/// `Ok(false)` on mismatch; a malformed stored hash is an error.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    if let Some(hex_digest) = stored.strip_prefix("sha256$") {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let computed = hex::encode(hasher.finalize());
        return Ok(computed == hex_digest.to_lowercase());
    }

    let parsed = argon2::PasswordHash::new(stored)
        .map_err(|e| Error::Auth(format!("invalid stored password hash: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Auth(format!("password verify: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            secret: "unit-test-secret".to_string(),
            token_ttl_days: 30,
        }
    }

    #[test]
    fn test_credential_roundtrip() {
        let config = test_config();
        let token = issue_credential("a@x.com", true, &config).unwrap();
        let claims = verify_credential(&token, &config).unwrap();
        assert_eq!(claims.sub, "a@x.com");
        assert!(claims.admin);
        assert_eq!(claims.exp - claims.iat, 30 * 86_400);
    }

    #[test]
    fn test_tampered_credential_rejected() {
        let config = test_config();
        let token = issue_credential("a@x.com", false, &config).unwrap();
        let other = AuthConfig {
            secret: "different".to_string(),
            ..test_config()
        };
        assert!(matches!(
            verify_credential(&token, &other).unwrap_err(),
            Error::Auth(_)
        ));
    }

    #[test]
    fn test_expired_credential_rejected() {
        let config = AuthConfig {
            token_ttl_days: -2,
            ..test_config()
        };
        let token = issue_credential("a@x.com", false, &config).unwrap();
        let err = verify_credential(&token, &test_config()).unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg.contains("expired")));
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_legacy_sha256_scheme_accepted() {
        // sha256("hunter2")
        let stored = "sha256$f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";
        assert!(verify_password("hunter2", stored).unwrap());
        assert!(!verify_password("wrong", stored).unwrap());
    }

    #[test]
    fn test_malformed_stored_hash_is_error() {
        assert!(verify_password("pw", "not-a-hash").is_err());
    }
}
