//! JWT validation: signing key cache, type-state token and validator.

pub mod claims;
pub mod keyset;
pub mod token;
pub mod validator;

pub use claims::Claims;
pub use keyset::{HttpKeySetSource, Jwk, Jwks, KeySetCache, KeySetSource, SigningKey, SigningKeySet};
pub use token::{ClaimRules, SignatureValidated, Token, TokenState, Unvalidated, Validated};
pub use validator::TokenValidator;
