//! Signing and verification of claims
//!
//! One authority owns one key pair and one issuer name. It is
//! stateless: safe for unlimited concurrent callers, with keys
//! immutable after construction.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::{Claims, ClaimsOptions};
use crate::error::AuthError;
use crate::ClaimsPredicate;

/// Token algorithm - MUST stay RS256 to prevent confusion attacks
const TOKEN_ALGORITHM: Algorithm = Algorithm::RS256;

const DEFAULT_ACCESS_TTL_HOURS: i64 = 1;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;
const DEFAULT_BASIC_TTL_HOURS: i64 = 2;

/// Selects which configured lifetime a new token gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Basic,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Basic => "basic",
        }
    }
}

/// An issued token plus the metadata a transport caller needs
///
/// The serialized token is opaque: unparseable without the
/// verification key. Nothing is retained server-side.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub token_id: String,
}

/// Construction-time configuration for a [`TokenAuthority`]
///
/// Owned exclusively by one authority instance; immutable after
/// construction.
#[derive(Clone)]
pub struct AuthorityConfig {
    /// RSA private key in PEM format (for signing)
    pub signing_key_pem: String,
    /// RSA public key in PEM format (for verification)
    pub verification_key_pem: String,
    /// Issuer stamped into every token and required at verification
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub basic_ttl: Duration,
}

impl AuthorityConfig {
    /// Config with the default lifetimes per token kind
    pub fn new(
        signing_key_pem: impl Into<String>,
        verification_key_pem: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            signing_key_pem: signing_key_pem.into(),
            verification_key_pem: verification_key_pem.into(),
            issuer: issuer.into(),
            access_ttl: Duration::hours(DEFAULT_ACCESS_TTL_HOURS),
            refresh_ttl: Duration::days(DEFAULT_REFRESH_TTL_DAYS),
            basic_ttl: Duration::hours(DEFAULT_BASIC_TTL_HOURS),
        }
    }

    pub fn with_lifetimes(mut self, access: Duration, refresh: Duration, basic: Duration) -> Self {
        self.access_ttl = access;
        self.refresh_ttl = refresh;
        self.basic_ttl = basic;
        self
    }
}

/// Issues and verifies signed, time-bounded tokens
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    basic_ttl: Duration,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("basic_ttl", &self.basic_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Parse the configured PEM keys and build an authority
    pub fn new(config: AuthorityConfig) -> Result<Self, AuthError> {
        let encoding = EncodingKey::from_rsa_pem(config.signing_key_pem.as_bytes())
            .map_err(AuthError::InvalidKey)?;
        let decoding = DecodingKey::from_rsa_pem(config.verification_key_pem.as_bytes())
            .map_err(AuthError::InvalidKey)?;

        tracing::info!(issuer = %config.issuer, "token authority initialized with RS256");

        Ok(Self {
            encoding,
            decoding,
            issuer: config.issuer,
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            basic_ttl: config.basic_ttl,
        })
    }

    /// Issue a signed token of the given kind
    ///
    /// Builds fresh claims with the kind's configured lifetime and
    /// signs them. Fails with [`AuthError::TokenCreationFailed`] if
    /// signing fails.
    pub fn issue(&self, kind: TokenKind, opts: &ClaimsOptions) -> Result<SignedToken, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Basic => self.basic_ttl,
        };

        let claims = Claims::new(&self.issuer, ttl, opts);
        let token = encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding)
            .map_err(AuthError::TokenCreationFailed)?;

        let expires_at = claims
            .exp
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        tracing::debug!(
            kind = kind.as_str(),
            token_id = %claims.jti,
            expires_at = %expires_at,
            "token issued"
        );

        Ok(SignedToken {
            token,
            expires_at,
            token_id: claims.jti,
        })
    }

    /// Verify a token back into claims
    ///
    /// Signature and structure are checked first
    /// ([`AuthError::MalformedToken`] on any failure), then in
    /// order: issuer equality, expiry presence, expiry not in the
    /// past. The optional predicate runs last; its error is wrapped
    /// as [`AuthError::ValidationFailed`].
    pub fn verify(
        &self,
        token: &str,
        extra: Option<&ClaimsPredicate>,
    ) -> Result<Claims, AuthError> {
        // Expiry and issuer are checked manually below so each
        // failure maps to its own error variant.
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::MalformedToken)?;
        let claims = data.claims;

        if claims.iss != self.issuer {
            return Err(AuthError::UntrustedIssuer);
        }

        let exp = claims.exp.ok_or(AuthError::MalformedToken)?;
        if exp <= Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }

        if let Some(predicate) = extra {
            predicate(&claims).map_err(AuthError::ValidationFailed)?;
        }

        Ok(claims)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Standard extra predicate: re-derive `payload_id` and reject
/// mismatch or absence
///
/// This detects substitution of the reconstructible claim fields and
/// must stay in place wherever essential-claims validation is
/// requested.
pub fn essential_claims_check(claims: &Claims) -> Result<(), String> {
    if claims.payload_id.is_empty() {
        return Err("missing payload id".to_string());
    }
    let expected = Claims::derive_payload_id(claims.sub.as_deref(), &claims.iss, &claims.jti);
    if claims.payload_id != expected {
        return Err("payload id mismatch".to_string());
    }
    Ok(())
}
