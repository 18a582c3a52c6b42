//! Auth configuration types

use crate::types::JwtAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Location for API key placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Place in HTTP header
    #[default]
    Header,
    /// Place in query parameter
    Query,
}

/// Where OAuth2 client credentials go on the token request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialPlacement {
    /// `client_id` / `client_secret` form fields
    #[default]
    Form,
    /// HTTP basic auth header (Reddit)
    BasicAuth,
}

/// Claims and key material for a signed JWT
#[derive(Debug, Clone, Default)]
pub struct JwtParams {
    /// Token issuer (iss claim)
    pub issuer: String,
    /// Token subject (sub claim, optional)
    pub subject: Option<String>,
    /// Token audience (aud claim)
    pub audience: String,
    /// Private key for signing (PEM)
    pub private_key: String,
    /// Signing algorithm
    pub algorithm: JwtAlgorithm,
    /// `kid` header
    pub key_id: Option<String>,
    /// Token lifetime in seconds
    pub lifetime_seconds: u64,
    /// Additional string claims
    pub claims: HashMap<String, String>,
}

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// API Key authentication (header or query)
    ApiKey {
        /// Where to place the API key
        location: Location,
        /// Header name (for header location)
        header_name: Option<String>,
        /// Query parameter name (for query location)
        query_param: Option<String>,
        /// Prefix to add before the value (e.g., "Bot ")
        prefix: Option<String>,
        /// The API key value
        value: String,
    },

    /// HTTP Basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },

    /// Bearer token authentication
    Bearer {
        /// The bearer token
        token: String,
    },

    /// OAuth2 Client Credentials flow
    Oauth2ClientCredentials {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scopes
        scopes: Vec<String>,
        /// Additional token request form parameters
        token_body: HashMap<String, String>,
        /// How the client credentials are sent
        credentials: CredentialPlacement,
    },

    /// Session-based authentication (login endpoint)
    Session {
        /// Login endpoint URL
        login_url: String,
        /// JSON login body
        login_body: Value,
        /// Dotted path to the token in the login response
        token_path: String,
        /// Header name to use for the token
        token_header: String,
        /// Prefix for token value (e.g., "Bearer ")
        token_prefix: Option<String>,
        /// Dotted path to expires-in seconds
        expires_in_path: Option<String>,
    },

    /// Self-signed JWT sent as a bearer token
    Jwt(JwtParams),

    /// Custom headers
    CustomHeaders {
        /// Headers to add to each request
        headers: HashMap<String, String>,
    },
}

impl AuthConfig {
    /// Bearer token shortcut
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Header API key shortcut
    pub fn header_key(
        header: impl Into<String>,
        prefix: Option<&str>,
        value: impl Into<String>,
    ) -> Self {
        Self::ApiKey {
            location: Location::Header,
            header_name: Some(header.into()),
            query_param: None,
            prefix: prefix.map(String::from),
            value: value.into(),
        }
    }

    /// Query API key shortcut
    pub fn query_key(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ApiKey {
            location: Location::Query,
            header_name: None,
            query_param: Some(param.into()),
            prefix: None,
            value: value.into(),
        }
    }
}

/// Cached token with expiration
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The access token
    pub token: String,
    /// When the token expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Create a new cached token
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
        Self {
            token,
            expires_at: Some(expires_at),
        }
    }

    /// Check if the token is expired (with 30 second buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(30);
                Utc::now() + buffer >= expires_at
            }
            None => false,
        }
    }
}
