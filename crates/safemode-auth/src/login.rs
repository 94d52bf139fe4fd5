//! Failover login
//!
//! While the primary store is healthy every login goes through the normal
//! path untouched. Otherwise the user is authenticated against the profile
//! recovered from the latest backup and receives the same token a normal
//! login would issue, plus a session flagged as safe mode.

use crate::password::{BcryptVerifier, PasswordVerifier};
use crate::session::{SessionManager, SessionRecord};
use crate::token::{SessionClaims, Subject, TokenIssuer};
use chrono::Utc;
use safemode_backup::ResultCache;
use safemode_common::config::LoginConfig;
use safemode_common::{Error, Profile, Result};
use safemode_router::HealthMonitor;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Login result returned by both the normal and the failover path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    /// Profile with secrets stripped
    pub user: Profile,
    pub safe_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct FailoverLogin {
    health: Arc<HealthMonitor>,
    profiles: Arc<ResultCache>,
    verifier: Arc<dyn PasswordVerifier>,
    tokens: Arc<dyn TokenIssuer>,
    sessions: SessionManager,
    config: LoginConfig,
}

impl FailoverLogin {
    pub fn new(
        health: Arc<HealthMonitor>,
        profiles: Arc<ResultCache>,
        tokens: Arc<dyn TokenIssuer>,
        sessions: SessionManager,
        config: LoginConfig,
    ) -> Self {
        Self {
            health,
            profiles,
            verifier: Arc::new(BcryptVerifier),
            tokens,
            sessions,
            config,
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn PasswordVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Authenticate, falling back to the backup when the primary store is down
    ///
    /// `identifier` is a wallet address, or an email when it contains `@`.
    /// Unknown accounts, inactive accounts and wrong passwords all fail
    /// with the same `InvalidCredentials`.
    pub async fn login<F, Fut>(&self, identifier: &str, password: &str, normal_login: F) -> Result<LoginResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoginResponse>>,
    {
        if self.health.is_healthy().await {
            debug!("primary store healthy, using normal login");
            return normal_login().await;
        }

        warn!("primary store unavailable, attempting safe-mode login");
        let result = self.failover_login(identifier, password).await;
        match &result {
            Ok(response) => {
                let user_id = response.user.id().unwrap_or_default();
                info!(user_id = %user_id, "safe-mode login succeeded");
            }
            Err(e) => warn!(error = %e, "safe-mode login failed"),
        }
        result
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<Profile>> {
        if identifier.contains('@') {
            self.profiles.by_email(identifier).await
        } else {
            self.profiles.by_wallet(identifier).await
        }
    }

    async fn failover_login(&self, identifier: &str, password: &str) -> Result<LoginResponse> {
        let profile = self
            .lookup(identifier)
            .await?
            .filter(Profile::is_active)
            .ok_or(Error::InvalidCredentials)?;
        let hash = profile.password_hash().ok_or(Error::InvalidCredentials)?;
        let user_id = profile.id().ok_or(Error::InvalidCredentials)?;

        let verifier = Arc::clone(&self.verifier);
        let (password, hash) = (password.to_string(), hash.to_string());
        let matched = tokio::task::spawn_blocking(move || verifier.verify(&password, &hash))
            .await
            .map_err(|e| Error::internal(format!("password verification task failed: {e}")))?;
        if !matched {
            return Err(Error::InvalidCredentials);
        }

        let subject = Subject {
            user_id: user_id.clone(),
            wallet_address: profile.wallet_address().map(str::to_string),
            role: profile.role().to_string(),
        };
        let token = self.tokens.issue(&subject)?;
        self.sessions
            .create(&SessionRecord {
                user_id,
                role: subject.role,
                wallet_address: subject.wallet_address,
                email: profile.email().map(str::to_string),
                login_at: Utc::now(),
                safe_mode: true,
            })
            .await?;

        Ok(LoginResponse {
            token,
            user: profile.sanitized(),
            safe_mode: true,
            warning: Some(self.config.warning.clone()),
        })
    }

    /// Decode a token issued by either login path
    pub fn verify_session_token(&self, token: &str) -> Result<SessionClaims> {
        self.tokens.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::JwtTokenIssuer;
    use async_trait::async_trait;
    use safemode_backup::{BackupSource, KvCache, MemoryKvCache};
    use safemode_common::config::{CacheConfig, HealthConfig};
    use safemode_common::ExtractedUserBundle;
    use safemode_router::{ConnectionState, MemoryPrimaryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct BackupProfiles {
        calls: AtomicUsize,
        profile: Profile,
    }

    impl BackupProfiles {
        fn new(status: &str) -> Self {
            let hash = bcrypt::hash("correct horse", 4).unwrap();
            let doc = json!({
                "_id": "u1",
                "walletAddress": "0xAbC",
                "email": "a@x.io",
                "role": "supplier",
                "status": status,
                "password": hash,
            });
            Self {
                calls: AtomicUsize::new(0),
                profile: Profile::new(doc.as_object().cloned().unwrap()),
            }
        }
    }

    #[async_trait]
    impl BackupSource for BackupProfiles {
        async fn extract_user(&self, _user_id: &str, _limit: usize) -> Result<ExtractedUserBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NoBackupAvailable)
        }

        async fn find_user_by_wallet(&self, address: &str) -> Result<Option<Profile>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(address
                .eq_ignore_ascii_case("0xabc")
                .then(|| self.profile.clone()))
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((email == "a@x.io").then(|| self.profile.clone()))
        }
    }

    struct Harness {
        primary: Arc<MemoryPrimaryStore>,
        source: Arc<BackupProfiles>,
        sessions: Arc<MemoryKvCache>,
        login: FailoverLogin,
    }

    fn harness(status: &str) -> Harness {
        let primary = Arc::new(MemoryPrimaryStore::new());
        let source = Arc::new(BackupProfiles::new(status));
        let sessions = Arc::new(MemoryKvCache::new());
        let health = Arc::new(HealthMonitor::new(primary.clone(), HealthConfig::default()));
        let profiles = Arc::new(ResultCache::new(
            source.clone(),
            Arc::new(MemoryKvCache::new()),
            CacheConfig::default(),
        ));
        let tokens = Arc::new(JwtTokenIssuer::new("test-secret", Duration::from_secs(86_400)).unwrap());
        let login = FailoverLogin::new(
            health,
            profiles,
            tokens,
            SessionManager::new(sessions.clone(), Duration::from_secs(86_400)),
            LoginConfig::default(),
        );
        Harness {
            primary,
            source,
            sessions,
            login,
        }
    }

    async fn normal_login() -> Result<LoginResponse> {
        Ok(LoginResponse {
            token: "normal-token".to_string(),
            user: Profile::new(serde_json::Map::new()),
            safe_mode: false,
            warning: None,
        })
    }

    #[tokio::test]
    async fn test_healthy_primary_uses_normal_login() {
        let h = harness("active");
        let response = h.login.login("0xabc", "correct horse", normal_login).await.unwrap();
        assert!(!response.safe_mode);
        assert_eq!(response.token, "normal-token");
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
        assert!(h.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_wallet_is_invalid_credentials() {
        let h = harness("active");
        h.primary.set_state(ConnectionState::Disconnected);
        let err = h.login.login("0xdef", "correct horse", normal_login).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
        assert!(h.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_is_invalid_credentials() {
        let h = harness("active");
        h.primary.set_state(ConnectionState::Disconnected);
        let err = h.login.login("0xabc", "wrong", normal_login).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
        assert_eq!(err.user_message(), "Invalid credentials");
        assert!(h.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_suspended_account_is_rejected() {
        let h = harness("suspended");
        h.primary.set_state(ConnectionState::Disconnected);
        let err = h.login.login("0xabc", "correct horse", normal_login).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_failover_login_issues_token_and_session() {
        let h = harness("active");
        h.primary.set_state(ConnectionState::Disconnected);
        let response = h.login.login("0xABC", "correct horse", normal_login).await.unwrap();

        assert!(response.safe_mode);
        assert!(response.warning.is_some());
        assert!(response.user.password_hash().is_none());
        assert_eq!(response.user.id().as_deref(), Some("u1"));

        let claims = h.login.verify_session_token(&response.token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, "supplier");
        assert_eq!(claims.wallet_address.as_deref(), Some("0xAbC"));

        let raw = h.sessions.get(&SessionManager::key("u1")).await.unwrap().unwrap();
        let session: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert!(session.safe_mode);
        assert_eq!(session.email.as_deref(), Some("a@x.io"));
    }

    #[tokio::test]
    async fn test_email_identifier_uses_email_lookup() {
        let h = harness("active");
        h.primary.set_state(ConnectionState::Disconnected);
        let response = h.login.login("a@x.io", "correct horse", normal_login).await.unwrap();
        assert!(response.safe_mode);
    }
}
