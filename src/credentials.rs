use crate::ebay::auth::{AuthError, refresh_access_token};
use crate::store::CredentialStore;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

/// Stored OAuth state for one connected account.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub ebay_username: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Tokens are refreshed this long before they actually expire, so a call
/// made with a just-returned token cannot race the expiry.
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

pub fn needs_refresh(credential: &Credential, now: DateTime<Utc>) -> bool {
    credential.expires_at - now < Duration::minutes(REFRESH_THRESHOLD_MINUTES)
}

/// Owns the credential lifecycle: hands out valid access tokens and
/// refreshes expiring ones through the store, one writer per account.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    http: Client,
    refresh_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, http: Client) -> Self {
        Self {
            store,
            http,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns an access token guaranteed to outlive the refresh
    /// threshold. Refreshes and persists the credential when needed.
    pub async fn valid_access_token(&self, account_id: &str) -> Result<String, AuthError> {
        let credential = self.load(account_id).await?;
        if !needs_refresh(&credential, Utc::now()) {
            return Ok(credential.access_token);
        }

        let lock = self.refresh_lock(account_id).await;
        let _guard = lock.lock().await;

        // Whoever held the lock before us may have refreshed already.
        let credential = self.load(account_id).await?;
        if !needs_refresh(&credential, Utc::now()) {
            return Ok(credential.access_token);
        }

        let grant = refresh_access_token(&self.http, &credential.refresh_token).await?;
        let now = Utc::now();
        let updated = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or(credential.refresh_token),
            expires_at: now + Duration::seconds(grant.expires_in),
            updated_at: now,
            ..credential
        };
        self.store
            .put(&updated)
            .await
            .map_err(|err| AuthError::Store(err.to_string()))?;
        info!(
            target = "sync.ebay",
            account_id = %updated.account_id,
            expires_at = %updated.expires_at,
            "access_token_refreshed"
        );
        Ok(updated.access_token)
    }

    async fn load(&self, account_id: &str) -> Result<Credential, AuthError> {
        self.store
            .get(account_id)
            .await
            .map_err(|err| AuthError::Store(err.to_string()))?
            .ok_or(AuthError::NotConnected)
    }

    async fn refresh_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut guard = self.refresh_locks.lock().await;
        guard
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
