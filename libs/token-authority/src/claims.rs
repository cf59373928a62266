//! Identity claims carried inside a token
//!
//! Claims are constructed immediately before signing and never
//! mutated afterwards. The `payload_id` field is a deterministic
//! hash of (subject, issuer, token id); it is recomputed at
//! verification time to detect substitution of fields that are
//! reconstructible rather than directly signed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity payload embedded in a signed token
///
/// Fields are public for direct access (no getter boilerplate),
/// matching the registered JWT claim names on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject (optional; service tokens may carry none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    ///
    /// Optional in the wire shape so a token missing it can be
    /// decoded and rejected explicitly instead of failing as an
    /// opaque parse error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not before (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Unique token identifier
    pub jti: String,
    /// Deterministic hash of (subject, issuer, jti)
    pub payload_id: String,
    /// Free-form extension data bound to the token by `payload_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<HashMap<String, serde_json::Value>>,
}

/// Optional claim fields applied at construction
#[derive(Debug, Clone, Default)]
pub struct ClaimsOptions {
    pub subject: Option<String>,
    pub audience: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub extension: Option<HashMap<String, serde_json::Value>>,
}

impl ClaimsOptions {
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Add one extension entry, creating the map on first use
    pub fn extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extension
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

impl Claims {
    /// Build fresh claims for the given issuer and lifetime
    ///
    /// Generates a random token id, stamps `iat`/`exp`, applies the
    /// optional fields and computes `payload_id` last. Construction
    /// cannot fail.
    pub fn new(issuer: &str, lifetime: Duration, opts: &ClaimsOptions) -> Self {
        let now = Utc::now();
        let jti = generate_token_id();
        let payload_id = Self::derive_payload_id(opts.subject.as_deref(), issuer, &jti);

        Claims {
            iss: issuer.to_string(),
            sub: opts.subject.clone(),
            iat: now.timestamp(),
            exp: Some((now + lifetime).timestamp()),
            nbf: opts.not_before.map(|t| t.timestamp()),
            aud: opts.audience.clone(),
            jti,
            payload_id,
            ext: opts.extension.clone(),
        }
    }

    /// Deterministic payload id for (subject, issuer, token id)
    ///
    /// Same inputs always yield the same output; a missing subject
    /// hashes as the empty string.
    pub fn derive_payload_id(subject: Option<&str>, issuer: &str, token_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subject.unwrap_or_default().as_bytes());
        hasher.update(b":");
        hasher.update(issuer.as_bytes());
        hasher.update(b":");
        hasher.update(token_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Generate a cryptographically random token id
///
/// Falls back to the thread-local generator if the OS generator
/// fails; its seeded state keeps producing ids independently of the
/// OS entropy path. Never falls back to a fixed value.
fn generate_token_id() -> String {
    let mut buf = [0u8; 16];
    if let Err(err) = OsRng.try_fill_bytes(&mut buf) {
        tracing::warn!(error = %err, "OS random generator failed, using thread-local generator");
        rand::thread_rng().fill_bytes(&mut buf);
    }
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_claims_sets_identity_fields() {
        let opts = ClaimsOptions::default().subject("user-1").audience("api");
        let claims = Claims::new("svc-a", Duration::hours(1), &opts);

        assert_eq!(claims.iss, "svc-a");
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.aud.as_deref(), Some("api"));
        assert_eq!(claims.jti.len(), 32); // 16 random bytes, hex
        assert!(claims.exp.unwrap() > claims.iat);
    }

    #[test]
    fn test_payload_id_is_deterministic() {
        let a = Claims::derive_payload_id(Some("user-1"), "svc-a", "tok-1");
        let b = Claims::derive_payload_id(Some("user-1"), "svc-a", "tok-1");
        assert_eq!(a, b);

        let c = Claims::derive_payload_id(Some("user-2"), "svc-a", "tok-1");
        assert_ne!(a, c);

        let d = Claims::derive_payload_id(None, "svc-a", "tok-1");
        assert_ne!(a, d);
    }

    #[test]
    fn test_payload_id_matches_construction() {
        let opts = ClaimsOptions::default().subject("user-1");
        let claims = Claims::new("svc-a", Duration::minutes(5), &opts);

        let expected = Claims::derive_payload_id(claims.sub.as_deref(), &claims.iss, &claims.jti);
        assert_eq!(claims.payload_id, expected);
    }

    #[test]
    fn test_token_id_is_lowercase_hex() {
        let claims = Claims::new("svc-a", Duration::hours(1), &ClaimsOptions::default());
        assert_eq!(claims.jti.len(), 32);
        assert!(claims
            .jti
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_token_ids_are_unique() {
        let opts = ClaimsOptions::default();
        let a = Claims::new("svc-a", Duration::hours(1), &opts);
        let b = Claims::new("svc-a", Duration::hours(1), &opts);
        assert_ne!(a.jti, b.jti);
        assert_ne!(a.payload_id, b.payload_id);
    }

    #[test]
    fn test_extension_data_round_trips_through_serde() {
        let opts = ClaimsOptions::default()
            .subject("user-1")
            .extension("role", json!("admin"))
            .extension("tier", json!(2));
        let claims = Claims::new("svc-a", Duration::hours(1), &opts);

        let encoded = serde_json::to_string(&claims).unwrap();
        let decoded: Claims = serde_json::from_str(&encoded).unwrap();

        let ext = decoded.ext.unwrap();
        assert_eq!(ext.get("role"), Some(&json!("admin")));
        assert_eq!(ext.get("tier"), Some(&json!(2)));
    }

    #[test]
    fn test_optional_fields_omitted_from_wire_shape() {
        let claims = Claims::new("svc-a", Duration::hours(1), &ClaimsOptions::default());
        let encoded = serde_json::to_string(&claims).unwrap();

        assert!(!encoded.contains("\"sub\""));
        assert!(!encoded.contains("\"aud\""));
        assert!(!encoded.contains("\"nbf\""));
        assert!(!encoded.contains("\"ext\""));
    }
}
