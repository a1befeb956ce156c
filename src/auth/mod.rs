//! Token issuance, rotation and request authentication.
//!
//! Leaves first: `token` (claims, fingerprints) → `issuer` (sign, verify,
//! persist) → `rotation` (single-use redemption, theft response) →
//! `coordinator` (per-token deduplication) → `gate` (request extraction).

pub mod coordinator;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod issuer;
pub mod rotation;
pub mod service;
pub mod token;

pub use coordinator::{RefreshCoordinator, Rotated};
pub use gate::{require_role, AuthenticatedUser, MaybeAuthenticated};
pub use identity::{HttpIdentityVerifier, IdentityError, IdentityVerifier, VerifiedIdentity};
pub use issuer::{TokenIssuer, TokenTtls};
pub use rotation::RotationProtocol;
pub use service::{AuthService, LoginOutcome};
pub use token::{fingerprint, AccessTokenClaims, RefreshTokenClaims, TokenClaims, TokenPair};
