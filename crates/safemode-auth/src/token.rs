//! Session token issuance
//!
//! Tokens carry the same claims as the normal login path so downstream
//! middleware cannot tell how a session was established.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use safemode_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity a token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: String,
    pub wallet_address: Option<String>,
    pub role: String,
}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies bearer tokens
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, subject: &Subject) -> Result<String>;

    fn verify(&self, token: &str) -> Result<SessionClaims>;
}

/// HS256 JSON Web Tokens with a fixed validity window
pub struct JwtTokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for JwtTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtTokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Configuration("session token secret is empty".to_string()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, subject: &Subject) -> Result<String> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).map_err(|e| Error::Configuration(e.to_string()))?;
        let claims = SessionClaims {
            sub: subject.user_id.clone(),
            wallet_address: subject.wallet_address.clone(),
            role: subject.role.clone(),
            iat,
            exp: iat + ttl,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Token(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<SessionClaims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Token(e.to_string()))
    }
}
