//! Authentication module
//!
//! Supports: API Key, Basic, Bearer, OAuth2 client credentials, Session
//! login, signed JWT, Custom Headers
//!
//! The `Authenticator` handles all auth types and caches tokens for the
//! types that need refreshing.

mod authenticator;
mod types;

pub use authenticator::{extract_jsonpath, generate_jwt, Authenticator};
pub use types::{AuthConfig, CachedToken, CredentialPlacement, JwtParams, Location};

#[cfg(test)]
mod tests;
