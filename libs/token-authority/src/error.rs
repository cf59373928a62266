//! Token authority error types
//!
//! Messages are safe to return to callers: no key material and no
//! token contents ever appear in them.

use thiserror::Error;

/// Errors produced by token issuance and verification
#[derive(Debug, Error)]
pub enum AuthError {
    /// Signing the serialized claims failed
    #[error("failed to create token")]
    TokenCreationFailed(#[source] jsonwebtoken::errors::Error),

    /// Signature or structure invalid, or a required claim is absent
    #[error("malformed token")]
    MalformedToken,

    /// Token issuer does not match the configured issuer
    #[error("untrusted token issuer")]
    UntrustedIssuer,

    /// Token expiry is in the past
    #[error("token expired")]
    TokenExpired,

    /// A caller-supplied claims predicate rejected the token
    #[error("claims validation failed: {0}")]
    ValidationFailed(String),

    /// Key material could not be parsed at construction
    #[error("invalid key material")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),
}
