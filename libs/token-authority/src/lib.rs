//! Stateless token issuance and verification
//!
//! **Security Design**:
//! - RS256 ONLY: no symmetric algorithms, no algorithm confusion
//! - Keys parsed once at construction, immutable thereafter
//! - Unique token id (jti) on every token
//! - Payload id binds extension data to the token's own identity
//!
//! Tokens are never stored server-side; verification is a pure
//! function of the token string, the verification key and the clock.

mod authority;
mod claims;
mod error;

pub use authority::{
    essential_claims_check, AuthorityConfig, SignedToken, TokenAuthority, TokenKind,
};
pub use claims::{Claims, ClaimsOptions};
pub use error::AuthError;

/// Predicate invoked with parsed claims after the built-in checks.
///
/// Any returned error is surfaced as [`AuthError::ValidationFailed`].
pub type ClaimsPredicate = dyn Fn(&Claims) -> Result<(), String> + Send + Sync;
