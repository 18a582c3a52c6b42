//! Tests for the auth module

use super::*;
use crate::types::JwtAlgorithm;
use base64::Engine;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EC_PRIVATE: &str = include_str!("../../tests/fixtures/es256_private.pem");
const EC_PUBLIC: &str = include_str!("../../tests/fixtures/es256_public.pem");

async fn built(auth: &Authenticator) -> reqwest::Request {
    let client = reqwest::Client::new();
    let req = client.get("https://example.com/api");
    auth.apply(req).await.unwrap().build().unwrap()
}

fn client_credentials(token_url: String, credentials: CredentialPlacement) -> AuthConfig {
    AuthConfig::Oauth2ClientCredentials {
        token_url,
        client_id: "my-client".to_string(),
        client_secret: "my-secret".to_string(),
        scopes: vec![],
        token_body: HashMap::new(),
        credentials,
    }
}

#[tokio::test]
async fn test_no_auth() {
    let auth = Authenticator::new(AuthConfig::None);
    let req = built(&auth).await;
    assert!(req.headers().get("Authorization").is_none());
}

#[tokio::test]
async fn test_api_key_header_with_bot_prefix() {
    let auth = Authenticator::new(AuthConfig::header_key(
        "Authorization",
        Some("Bot "),
        "discord-token",
    ));

    let req = built(&auth).await;
    assert_eq!(
        req.headers().get("Authorization").unwrap(),
        "Bot discord-token"
    );
}

#[tokio::test]
async fn test_api_key_plain_header() {
    let auth = Authenticator::new(AuthConfig::header_key("x-luma-api-key", None, "luma-key"));

    let req = built(&auth).await;
    assert_eq!(req.headers().get("x-luma-api-key").unwrap(), "luma-key");
}

#[tokio::test]
async fn test_api_key_query() {
    let auth = Authenticator::new(AuthConfig::query_key("key", "yt-key"));

    let req = built(&auth).await;
    assert!(req.url().query().unwrap().contains("key=yt-key"));
}

#[tokio::test]
async fn test_basic_auth() {
    let auth = Authenticator::new(AuthConfig::Basic {
        username: "user".to_string(),
        password: "pass".to_string(),
    });

    let req = built(&auth).await;
    let auth_header = req
        .headers()
        .get("Authorization")
        .unwrap()
        .to_str()
        .unwrap();
    let encoded = auth_header.strip_prefix("Basic ").unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), "user:pass");
}

#[tokio::test]
async fn test_bearer_auth() {
    let auth = Authenticator::new(AuthConfig::bearer("my-bearer-token"));

    let req = built(&auth).await;
    assert_eq!(
        req.headers().get("Authorization").unwrap(),
        "Bearer my-bearer-token"
    );
}

#[tokio::test]
async fn test_custom_headers() {
    let mut headers = HashMap::new();
    headers.insert("Api-Key".to_string(), "k".to_string());
    headers.insert("Api-Username".to_string(), "system".to_string());

    let auth = Authenticator::new(AuthConfig::CustomHeaders { headers });

    let req = built(&auth).await;
    assert_eq!(req.headers().get("Api-Key").unwrap(), "k");
    assert_eq!(req.headers().get("Api-Username").unwrap(), "system");
}

#[tokio::test]
async fn test_oauth2_client_credentials_form() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=my-client"))
        .and(body_string_contains("client_secret=my-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "oauth-token-123",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(client_credentials(
        format!("{}/oauth/token", mock_server.uri()),
        CredentialPlacement::Form,
    ));

    let req = built(&auth).await;
    assert_eq!(
        req.headers().get("Authorization").unwrap(),
        "Bearer oauth-token-123"
    );
}

#[tokio::test]
async fn test_oauth2_client_credentials_basic_auth() {
    let mock_server = MockServer::start().await;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("my-client:my-secret")
    );

    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(header("Authorization", expected.as_str()))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "reddit-token",
            "expires_in": 86400
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(client_credentials(
        format!("{}/api/v1/access_token", mock_server.uri()),
        CredentialPlacement::BasicAuth,
    ));

    let req = built(&auth).await;
    assert_eq!(
        req.headers().get("Authorization").unwrap(),
        "Bearer reddit-token"
    );
}

#[tokio::test]
async fn test_oauth2_token_caching() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "cached-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(client_credentials(
        format!("{}/oauth/token", mock_server.uri()),
        CredentialPlacement::Form,
    ));

    for _ in 0..3 {
        let _ = built(&auth).await;
    }
}

#[tokio::test]
async fn test_clear_cache_forces_refresh() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(client_credentials(
        format!("{}/oauth/token", mock_server.uri()),
        CredentialPlacement::Form,
    ));

    let _ = built(&auth).await;
    auth.clear_cache().await;
    let _ = built(&auth).await;
}

#[tokio::test]
async fn test_oauth2_error_handling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client"
        })))
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(client_credentials(
        format!("{}/oauth/token", mock_server.uri()),
        CredentialPlacement::Form,
    ));

    let client = reqwest::Client::new();
    let err = auth
        .apply(client.get("https://example.com/api"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_session_auth_uses_token_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .and(body_json(json!({"identifier": "me.bsky.social", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessJwt": "session-token-xyz",
            "did": "did:plc:abc"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(AuthConfig::Session {
        login_url: format!(
            "{}/xrpc/com.atproto.server.createSession",
            mock_server.uri()
        ),
        login_body: json!({"identifier": "me.bsky.social", "password": "pw"}),
        token_path: "accessJwt".to_string(),
        token_header: "X-Session".to_string(),
        token_prefix: Some("Token ".to_string()),
        expires_in_path: None,
    });

    let req = built(&auth).await;
    assert_eq!(
        req.headers().get("X-Session").unwrap(),
        "Token session-token-xyz"
    );
    assert!(req.headers().get("Authorization").is_none());
}

#[tokio::test]
async fn test_session_auth_missing_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"other": 1})))
        .mount(&mock_server)
        .await;

    let auth = Authenticator::new(AuthConfig::Session {
        login_url: format!("{}/login", mock_server.uri()),
        login_body: json!({}),
        token_path: "accessJwt".to_string(),
        token_header: "Authorization".to_string(),
        token_prefix: None,
        expires_in_path: None,
    });

    let client = reqwest::Client::new();
    let err = auth
        .apply(client.get("https://example.com/api"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("accessJwt"));
}

fn es256_params() -> JwtParams {
    JwtParams {
        issuer: "issuer-uuid".to_string(),
        subject: None,
        audience: "appstoreconnect-v1".to_string(),
        private_key: EC_PRIVATE.to_string(),
        algorithm: JwtAlgorithm::ES256,
        key_id: Some("KEY123".to_string()),
        lifetime_seconds: 1200,
        claims: HashMap::new(),
    }
}

#[test]
fn test_generate_es256_jwt() {
    let token = generate_jwt(&es256_params()).unwrap();

    let header = decode_header(&token).unwrap();
    assert_eq!(header.alg, jsonwebtoken::Algorithm::ES256);
    assert_eq!(header.kid.as_deref(), Some("KEY123"));

    let mut validation = Validation::new(jsonwebtoken::Algorithm::ES256);
    validation.set_audience(&["appstoreconnect-v1"]);
    let key = DecodingKey::from_ec_pem(EC_PUBLIC.as_bytes()).unwrap();
    let data = decode::<authenticator::JwtClaims>(&token, &key, &validation).unwrap();
    assert_eq!(data.claims.iss, "issuer-uuid");
    assert_eq!(data.claims.exp - data.claims.iat, 1200);
    assert_eq!(data.claims.nbf, data.claims.iat);
}

#[test]
fn test_generate_jwt_rejects_bad_key() {
    let mut params = es256_params();
    params.private_key = "not a pem".to_string();
    let err = generate_jwt(&params).unwrap_err();
    assert!(err.to_string().contains("Invalid private key"));
}

#[tokio::test]
async fn test_jwt_applied_as_bearer() {
    let auth = Authenticator::new(AuthConfig::Jwt(es256_params()));
    let req = built(&auth).await;
    let value = req
        .headers()
        .get("Authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(value.starts_with("Bearer ey"));
}

#[test]
fn test_extract_jsonpath() {
    let data = json!({
        "data": {
            "token": "abc123",
            "count": 42,
            "nested": {"a": 1}
        }
    });

    assert_eq!(
        extract_jsonpath(&data, "$.data.token"),
        Some("abc123".to_string())
    );
    assert_eq!(
        extract_jsonpath(&data, "data.token"),
        Some("abc123".to_string())
    );
    assert_eq!(
        extract_jsonpath(&data, "$.data.count"),
        Some("42".to_string())
    );
    assert_eq!(extract_jsonpath(&data, "$.data.nested"), None);
    assert_eq!(extract_jsonpath(&data, "$.missing"), None);
}
