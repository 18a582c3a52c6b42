//! Authenticator implementation
//!
//! Applies authentication to requests and manages token refresh.

use super::types::{AuthConfig, CachedToken, CredentialPlacement, JwtParams, Location};
use crate::error::{Error, Result};
use crate::types::{value_at, value_to_string};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Authenticator handles applying authentication to HTTP requests
pub struct Authenticator {
    config: AuthConfig,
    /// Cached token for OAuth2/Session/JWT auth
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    /// HTTP client for token requests
    http_client: Client,
}

impl Authenticator {
    /// Create a new authenticator with the given config
    pub fn new(config: AuthConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create an authenticator with a custom HTTP client
    pub fn with_client(config: AuthConfig, http_client: Client) -> Self {
        Self {
            config,
            cached_token: Arc::new(RwLock::new(None)),
            http_client,
        }
    }

    /// Apply authentication to a request builder
    pub async fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match &self.config {
            AuthConfig::None => Ok(req),

            AuthConfig::ApiKey {
                location,
                header_name,
                query_param,
                prefix,
                value,
            } => {
                let val = format!("{}{}", prefix.as_deref().unwrap_or(""), value);
                match location {
                    Location::Header => {
                        let header = header_name.as_deref().unwrap_or("Authorization");
                        Ok(req.header(header, val))
                    }
                    Location::Query => {
                        let param = query_param.as_deref().unwrap_or("api_key");
                        Ok(req.query(&[(param, val)]))
                    }
                }
            }

            AuthConfig::Basic { username, password } => {
                Ok(req.basic_auth(username, Some(password)))
            }

            AuthConfig::Bearer { token } => Ok(req.bearer_auth(token)),

            AuthConfig::Session {
                token_header,
                token_prefix,
                ..
            } => {
                let token = self.get_or_refresh_token().await?;
                let value = format!("{}{}", token_prefix.as_deref().unwrap_or(""), token);
                Ok(req.header(token_header.as_str(), value))
            }

            AuthConfig::Oauth2ClientCredentials { .. } | AuthConfig::Jwt(_) => {
                let token = self.get_or_refresh_token().await?;
                Ok(req.bearer_auth(token))
            }

            AuthConfig::CustomHeaders { headers } => {
                let mut req = req;
                for (key, value) in headers {
                    req = req.header(key.as_str(), value.as_str());
                }
                Ok(req)
            }
        }
    }

    /// Obtain a token without sending a request.
    ///
    /// Only token-based schemes (OAuth2, session, JWT) have one.
    pub async fn token(&self) -> Result<String> {
        self.get_or_refresh_token().await
    }

    /// Get a valid token, refreshing if necessary
    async fn get_or_refresh_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired() {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.cached_token.write().await;

        // Another task may have refreshed while we waited for the write lock
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
        }

        let new_token = self.fetch_new_token().await?;
        let token_str = new_token.token.clone();
        *cached = Some(new_token);

        Ok(token_str)
    }

    /// Fetch a new token based on auth type
    async fn fetch_new_token(&self) -> Result<CachedToken> {
        match &self.config {
            AuthConfig::Oauth2ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scopes,
                token_body,
                credentials,
            } => {
                self.fetch_oauth2_client_credentials(
                    token_url,
                    client_id,
                    client_secret,
                    scopes,
                    token_body,
                    *credentials,
                )
                .await
            }

            AuthConfig::Session {
                login_url,
                login_body,
                token_path,
                expires_in_path,
                ..
            } => {
                self.fetch_session_token(login_url, login_body, token_path, expires_in_path.as_deref())
                    .await
            }

            AuthConfig::Jwt(params) => {
                let jwt = generate_jwt(params)?;
                Ok(CachedToken::expires_in(jwt, params.lifetime_seconds as i64))
            }

            _ => Err(Error::auth("Token refresh not supported for this auth type")),
        }
    }

    /// Fetch OAuth2 token using client credentials flow
    async fn fetch_oauth2_client_credentials(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scopes: &[String],
        extra_body: &HashMap<String, String>,
        placement: CredentialPlacement,
    ) -> Result<CachedToken> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if placement == CredentialPlacement::Form {
            form.push(("client_id", client_id.to_string()));
            form.push(("client_secret", client_secret.to_string()));
        }
        if !scopes.is_empty() {
            form.push(("scope", scopes.join(" ")));
        }
        for (key, value) in extra_body {
            form.push((key.as_str(), value.clone()));
        }

        let mut req = self.http_client.post(token_url).form(&form);
        if placement == CredentialPlacement::BasicAuth {
            req = req.basic_auth(client_id, Some(client_secret));
        }

        let response = req.send().await.map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRefresh {
                message: format!("Token request failed with status {status}: {body}"),
            });
        }

        let token_response: TokenResponse = response.json().await.map_err(Error::Http)?;
        debug!("Obtained client-credentials token from {}", token_url);
        Ok(token_response.into_cached_token())
    }

    /// Fetch session token by logging in
    async fn fetch_session_token(
        &self,
        login_url: &str,
        login_body: &Value,
        token_path: &str,
        expires_in_path: Option<&str>,
    ) -> Result<CachedToken> {
        let response = self
            .http_client
            .post(login_url)
            .json(login_body)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::auth(format!(
                "Login request failed with status {status}: {body}"
            )));
        }

        let body: Value = response.json().await.map_err(Error::Http)?;

        let token = extract_jsonpath(&body, token_path).ok_or_else(|| {
            Error::auth(format!("Could not extract token from path: {token_path}"))
        })?;

        let expires_at = expires_in_path
            .and_then(|path| extract_jsonpath(&body, path))
            .and_then(|v| v.parse::<i64>().ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Ok(CachedToken::new(token, expires_at))
    }

    /// Clear the cached token
    pub async fn clear_cache(&self) {
        let mut cached = self.cached_token.write().await;
        *cached = None;
    }

    /// Get the current auth config
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

/// Sign a JWT with the configured key.
///
/// RS* algorithms take an RSA PEM, ES* take a PKCS#8 EC PEM (App Store
/// Connect `.p8` files).
pub fn generate_jwt(params: &JwtParams) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        iss: params.issuer.clone(),
        sub: params.subject.clone(),
        aud: params.audience.clone(),
        iat: now,
        nbf: now,
        exp: now + params.lifetime_seconds as i64,
        extra: params.claims.clone(),
    };

    let mut header = Header::new(params.algorithm.into());
    header.kid.clone_from(&params.key_id);

    let pem = params.private_key.as_bytes();
    let encoding_key = if params.algorithm.is_ecdsa() {
        EncodingKey::from_ec_pem(pem)
    } else if matches!(params.algorithm, crate::types::JwtAlgorithm::HS256) {
        Ok(EncodingKey::from_secret(pem))
    } else {
        EncodingKey::from_rsa_pem(pem)
    }
    .map_err(|e| Error::JwtGeneration {
        message: format!("Invalid private key: {e}"),
    })?;

    encode(&header, &claims, &encoding_key).map_err(|e| Error::JwtGeneration {
        message: format!("Failed to encode JWT: {e}"),
    })
}

/// OAuth2 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_cached_token(self) -> CachedToken {
        match self.expires_in {
            Some(secs) => CachedToken::expires_in(self.access_token, secs),
            None => CachedToken::new(self.access_token, None),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwtClaims {
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub: Option<String>,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

/// Extract a scalar from JSON with a dotted path like `$.data.token`
pub fn extract_jsonpath(value: &Value, path: &str) -> Option<String> {
    match value_at(value, path)? {
        v @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => value_to_string(v),
        _ => None,
    }
}
