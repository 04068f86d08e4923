use crate::error::AuthError;
use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh a cached token this long before it expires
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Source of bearer tokens for the Sheets API
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fixed token, for tests and pre-issued tokens
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// The fields we need from a Google service-account JSON key file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::Credential(e.to_string()))
    }
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Parse a PEM-encoded PKCS#8 RSA private key
pub fn load_rsa_key(private_key_pem: &str) -> anyhow::Result<RsaKeyPair> {
    let pem = pem::parse(private_key_pem.trim())
        .map_err(|e| anyhow::anyhow!("Failed to parse PEM: {e}"))?;

    if !pem.tag().ends_with("PRIVATE KEY") {
        anyhow::bail!("PEM does not contain a private key");
    }

    RsaKeyPair::from_pkcs8(pem.contents())
        .map_err(|e| anyhow::anyhow!("Failed to decode RSA private key: {e}"))
}

/// RSA PKCS#1 v1.5 SHA-256 signature over `data`
pub fn rs256_sign(key_pair: &RsaKeyPair, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(&RSA_PKCS1_SHA256, &rng, data, &mut signature)
        .map_err(|_| anyhow::anyhow!("Failed to generate RSA signature"))?;
    Ok(signature)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let bytes = serde_json::to_vec(value).map_err(|e| AuthError::Credential(e.to_string()))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Exchanges a signed JWT assertion for an OAuth access token and caches it
pub struct ServiceAccountAuth {
    client: Client,
    client_email: String,
    token_uri: String,
    scope: String,
    key_pair: RsaKeyPair,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, scope: &str) -> Result<Self, AuthError> {
        let key_pair = load_rsa_key(&key.private_key).map_err(AuthError::Signing)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            client_email: key.client_email,
            token_uri: key.token_uri,
            scope: scope.to_string(),
            key_pair,
            cached: Mutex::new(None),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        Self::new(ServiceAccountKey::from_file(path)?, SHEETS_READONLY_SCOPE)
    }

    /// Build the signed `header.claims.signature` assertion
    pub fn assertion(&self, issued_at: DateTime<Utc>) -> Result<String, AuthError> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
        };
        let claims = JwtClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: issued_at.timestamp(),
            exp: issued_at.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let signing_input = format!(
            "{}.{}",
            encode_segment(&header)?,
            encode_segment(&claims)?
        );
        let signature =
            rs256_sign(&self.key_pair, signing_input.as_bytes()).map_err(AuthError::Signing)?;

        Ok(format!(
            "{}.{}",
            signing_input,
            BASE64_URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    async fn request_token(&self) -> Result<CachedToken, AuthError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!("Obtained access token valid for {}s", token.expires_in);

        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};

    const FIXTURE: &str = include_str!("../../tests/fixtures/service_account.json");

    fn fixture_key(token_uri: &str) -> ServiceAccountKey {
        let mut key = ServiceAccountKey::from_json(FIXTURE).unwrap();
        key.token_uri = token_uri.to_string();
        key
    }

    #[test]
    fn test_parse_service_account_key() {
        let key = ServiceAccountKey::from_json(FIXTURE).unwrap();
        assert_eq!(
            key.client_email,
            "ordersync@ordersync-test.iam.gserviceaccount.com"
        );
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn test_invalid_credential_json() {
        let result = ServiceAccountKey::from_json("{\"client_email\": 1}");
        assert!(matches!(result, Err(AuthError::Credential(_))));
    }

    #[test]
    fn test_missing_credential_file() {
        let result = ServiceAccountKey::from_file("/nonexistent/cred.json");
        assert!(matches!(result, Err(AuthError::Read { .. })));
    }

    #[test]
    fn test_rejects_non_key_pem() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(load_rsa_key(pem).is_err());
    }

    #[test]
    fn test_assertion_is_verifiable() {
        let auth = ServiceAccountAuth::new(
            fixture_key("https://oauth2.example/token"),
            SHEETS_READONLY_SCOPE,
        )
        .unwrap();
        let issued_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        let assertion = auth.assertion(issued_at).unwrap();
        let parts: Vec<&str> = assertion.split('.').collect();
        assert_eq!(parts.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://oauth2.example/token");
        assert_eq!(claims["scope"], SHEETS_READONLY_SCOPE);
        assert_eq!(claims["iat"], 1_700_000_000);
        assert_eq!(claims["exp"], 1_700_003_600);

        let signature = BASE64_URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let public_key = UnparsedPublicKey::new(
            &RSA_PKCS1_2048_8192_SHA256,
            auth.key_pair.public().as_ref(),
        );
        let signed = format!("{}.{}", parts[0], parts[1]);
        assert!(public_key.verify(signed.as_bytes(), &signature).is_ok());
    }

    #[tokio::test]
    async fn test_token_is_fetched_once_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                JWT_BEARER_GRANT.into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.test","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = ServiceAccountAuth::new(
            fixture_key(&format!("{}/token", server.url())),
            SHEETS_READONLY_SCOPE,
        )
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "ya29.test");
        assert_eq!(auth.access_token().await.unwrap(), "ya29.test");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let auth = ServiceAccountAuth::new(
            fixture_key(&format!("{}/token", server.url())),
            SHEETS_READONLY_SCOPE,
        )
        .unwrap();

        match auth.access_token().await {
            Err(AuthError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
