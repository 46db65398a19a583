//! Credential loading and per-request signing
//!
//! Every request proves authenticity and recency by signing
//! `{timestamp_ms}{METHOD}{path}` with the account's RSA private key using
//! PSS padding (salt length equal to the SHA-256 digest length). The query
//! string is never part of the signed message even though it is sent on the
//! wire. Because there is no session token, the timestamp is read fresh at
//! call time; a cached timestamp would get the request rejected as expired.
//!
//! # Source
//! - API keys: https://trading-api.readme.io/reference/api-keys

use std::path::Path;

use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;

use crate::error::{KalshiError, Result};

/// Access-key header name
pub const ACCESS_KEY_HEADER: &str = "KALSHI-ACCESS-KEY";

/// Base64 signature header name
pub const ACCESS_SIGNATURE_HEADER: &str = "KALSHI-ACCESS-SIGNATURE";

/// Millisecond timestamp header name
pub const ACCESS_TIMESTAMP_HEADER: &str = "KALSHI-ACCESS-TIMESTAMP";

/// API credentials: opaque key id plus the RSA private key it belongs to.
/// Immutable for the process lifetime; never persisted by the adapter.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    private_key: RsaPrivateKey,
}

impl Credentials {
    /// Wrap already-loaded key material.
    pub fn new(key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self { key_id: key_id.into(), private_key }
    }

    /// Parse a PEM-encoded private key (PKCS#8, falling back to PKCS#1).
    pub fn from_pem_str(key_id: impl Into<String>, pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KalshiError::Key(e.to_string()))?;
        Ok(Self::new(key_id, private_key))
    }

    /// Load a PEM-encoded private key from disk.
    pub fn from_pem_file(key_id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem_str(key_id, &pem)
    }

    /// Load credentials from the environment.
    ///
    /// Expected env vars:
    /// - KALSHI_KEY_ID
    /// - KALSHI_PRIVATE_KEY_PATH (PEM file)
    pub fn from_env() -> Result<Self> {
        let key_id = std::env::var("KALSHI_KEY_ID")
            .map_err(|_| KalshiError::Validation("KALSHI_KEY_ID not set".to_string()))?;
        let key_path = std::env::var("KALSHI_PRIVATE_KEY_PATH")
            .map_err(|_| KalshiError::Validation("KALSHI_PRIVATE_KEY_PATH not set".to_string()))?;
        Self::from_pem_file(key_id, key_path)
    }

    /// The opaque key identifier sent in the access-key header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &format!("{}...", self.key_id.chars().take(8).collect::<String>()))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Header values produced for one signed request.
#[derive(Clone, Debug)]
pub struct AuthHeaders {
    pub key_id: String,
    pub signature: String,
    pub timestamp: String,
}

/// Per-request signer. Stateless apart from the credentials; reading the
/// wall clock is its only side effect.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Sign `method + path` at the current wall-clock time.
    pub fn sign(&self, method: &str, path: &str) -> Result<AuthHeaders> {
        self.sign_at(Utc::now().timestamp_millis(), method, path)
    }

    /// Sign at an explicit millisecond timestamp. The query string, if any,
    /// is stripped from `path` before signing.
    pub fn sign_at(&self, timestamp_ms: i64, method: &str, path: &str) -> Result<AuthHeaders> {
        let timestamp = timestamp_ms.to_string();
        let bare_path = path.split('?').next().unwrap_or(path);
        let message = format!("{timestamp}{method}{bare_path}");

        let signing_key = SigningKey::<Sha256>::new(self.credentials.private_key().clone());
        let signature = signing_key.try_sign_with_rng(&mut rand::thread_rng(), message.as_bytes())?;

        Ok(AuthHeaders {
            key_id: self.credentials.key_id().to_string(),
            signature: BASE64_STANDARD.encode(signature.to_bytes()),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::pss::{Signature, VerifyingKey};
    use rsa::signature::Verifier;
    use rsa::RsaPublicKey;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap()
    }

    fn verify(key: &RsaPublicKey, message: &str, signature_b64: &str) -> bool {
        let bytes = BASE64_STANDARD.decode(signature_b64).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        VerifyingKey::<Sha256>::new(key.clone()).verify(message.as_bytes(), &signature).is_ok()
    }

    #[test]
    fn test_signature_verifies_against_signed_message() {
        let key = test_key();
        let public = RsaPublicKey::from(&key);
        let signer = RequestSigner::new(Credentials::new("kid", key));

        let headers = signer.sign_at(1_716_000_000_000, "GET", "/trade-api/v2/markets").unwrap();
        assert_eq!(headers.key_id, "kid");
        assert_eq!(headers.timestamp, "1716000000000");
        assert!(verify(&public, "1716000000000GET/trade-api/v2/markets", &headers.signature));
    }

    #[test]
    fn test_query_string_is_excluded_from_signed_message() {
        let key = test_key();
        let public = RsaPublicKey::from(&key);
        let signer = RequestSigner::new(Credentials::new("kid", key));

        // Both paths must sign the same message, even though PSS output is
        // randomized and the raw signatures differ.
        let with_query =
            signer.sign_at(1_716_000_000_000, "GET", "/trade-api/v2/markets?limit=10").unwrap();
        let without_query =
            signer.sign_at(1_716_000_000_000, "GET", "/trade-api/v2/markets").unwrap();

        let message = "1716000000000GET/trade-api/v2/markets";
        assert!(verify(&public, message, &with_query.signature));
        assert!(verify(&public, message, &without_query.signature));
    }

    #[test]
    fn test_tampered_message_fails_verification() {
        let key = test_key();
        let public = RsaPublicKey::from(&key);
        let signer = RequestSigner::new(Credentials::new("kid", key));

        let headers = signer.sign_at(1_716_000_000_000, "GET", "/trade-api/v2/markets").unwrap();
        // Wrong timestamp, wrong method, wrong path
        assert!(!verify(&public, "1716000000001GET/trade-api/v2/markets", &headers.signature));
        assert!(!verify(&public, "1716000000000POST/trade-api/v2/markets", &headers.signature));
        assert!(!verify(&public, "1716000000000GET/trade-api/v2/events", &headers.signature));
    }

    #[test]
    fn test_pem_round_trip_loading() {
        let key = test_key();
        let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        let creds = Credentials::from_pem_str("kid", &pem).unwrap();
        assert_eq!(creds.key_id(), "kid");

        let bad = Credentials::from_pem_str("kid", "not a pem");
        assert!(matches!(bad, Err(KalshiError::Key(_))));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let creds = Credentials::new("test-key-id-12345", test_key());
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("test-key"));
        assert!(!debug_str.contains("12345"));
    }
}
