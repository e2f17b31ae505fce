//! Authentication of the deploy webhook.
//!
//! Exactly one [`AuthStrategy`] is active per deployment.  Authentication
//! is a pure gate: it never touches the registry and runs without the
//! store lock.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Source of the CI provider's current public key.
#[async_trait]
pub trait TrustAnchor: Send + Sync {
    /// PEM encoded RSA public key (SPKI or PKCS#1).
    async fn public_key_pem(&self) -> Result<String, AuthError>;
}

/// Fetches the key over HTTP on every call.
pub struct HttpTrustAnchor {
    client: reqwest::Client,
    url: String,
    json_pointer: Option<String>,
}

impl HttpTrustAnchor {
    pub fn new(
        url: String,
        json_pointer: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            json_pointer,
        })
    }
}

#[async_trait]
impl TrustAnchor for HttpTrustAnchor {
    async fn public_key_pem(&self) -> Result<String, AuthError> {
        debug!("fetching trust anchor key from {}", self.url);
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::TrustAnchor(e.to_string()))?
            .text()
            .await
            .map_err(|e| AuthError::TrustAnchor(e.to_string()))?;
        extract_pem(&body, self.json_pointer.as_deref())
    }
}

/// Pulls the PEM out of a trust anchor response: either the whole body or
/// the string found at `pointer` in a JSON document.
fn extract_pem(body: &str, pointer: Option<&str>) -> Result<String, AuthError> {
    match pointer {
        None => Ok(body.trim().to_string()),
        Some(pointer) => {
            let doc: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| AuthError::TrustAnchor(format!("response is not JSON: {e}")))?;
            doc.pointer(pointer)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .ok_or_else(|| AuthError::TrustAnchor(format!("no key at {pointer}")))
        }
    }
}

pub enum AuthStrategy {
    /// Token in the `Authorization` header equals a configured secret.
    SharedSecret { secret: String },
    /// `Signature` header is a base64 RSA PKCS#1 v1.5 SHA-256 signature
    /// over the payload, checked against a freshly fetched key.
    SignatureCheck { anchor: Box<dyn TrustAnchor> },
    /// `Authorization` is hex SHA-256 of `repo_slug || token`.  Deprecated:
    /// anyone who has seen one request can replay it forever.
    LegacyDigest { repo_slug: String, token: String },
}

impl AuthStrategy {
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let strategy = match config {
            AuthConfig::SharedSecret { secret } => AuthStrategy::SharedSecret {
                secret: secret.clone(),
            },
            AuthConfig::Signature {
                public_key_url,
                json_pointer,
                timeout_secs,
            } => {
                let anchor = HttpTrustAnchor::new(
                    public_key_url.clone(),
                    json_pointer.clone().filter(|p| !p.is_empty()),
                    Duration::from_secs(*timeout_secs),
                )
                .map_err(|e| anyhow::anyhow!("Failed to build trust anchor client: {}", e))?;
                AuthStrategy::SignatureCheck {
                    anchor: Box::new(anchor),
                }
            }
            AuthConfig::LegacyDigest { repo_slug, token } => {
                warn!(
                    "legacy digest authentication is deprecated, \
                     prefer signature or shared-secret"
                );
                AuthStrategy::LegacyDigest {
                    repo_slug: repo_slug.clone(),
                    token: token.clone(),
                }
            }
        };
        Ok(strategy)
    }

    /// Checks the request; `payload` is the exact byte string the CI
    /// provider signed.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<(), AuthError> {
        match self {
            AuthStrategy::SharedSecret { secret } => {
                let token = authorization(headers)?;
                let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
                constant_time_eq(token.as_bytes(), secret.as_bytes())
            }
            AuthStrategy::SignatureCheck { anchor } => {
                let signature = headers
                    .get("Signature")
                    .and_then(|v| v.to_str().ok())
                    .ok_or(AuthError::MissingHeader("Signature"))?;
                let pem = anchor.public_key_pem().await?;
                verify_signature(&pem, signature, payload)
            }
            AuthStrategy::LegacyDigest { repo_slug, token } => {
                let presented = authorization(headers)?;
                let expected = legacy_digest(repo_slug, token);
                let presented = presented.trim().to_ascii_lowercase();
                constant_time_eq(presented.as_bytes(), expected.as_bytes())
            }
        }
    }
}

fn authorization(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader("Authorization"))
}

fn constant_time_eq(presented: &[u8], expected: &[u8]) -> Result<(), AuthError> {
    if presented.len() != expected.len() {
        return Err(AuthError::Mismatch);
    }
    if presented.ct_eq(expected).into() {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

pub fn legacy_digest(repo_slug: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_slug.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, AuthError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthError::TrustAnchor(format!("unusable public key: {e}")))
}

fn verify_signature(pem: &str, signature_b64: &str, payload: &[u8]) -> Result<(), AuthError> {
    let key = parse_public_key(pem)?;
    let raw = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
    VerifyingKey::<Sha256>::new(key)
        .verify(payload, &signature)
        .map_err(|_| AuthError::BadSignature)
}
