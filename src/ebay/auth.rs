use crate::ebay::config::{APP_ID, APP_SECRET, OAUTH_TOKEN_URL};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("account is not connected")]
    NotConnected,
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("credential store: {0}")]
    Store(String),
}

/// Scopes requested on refresh. The grant can only narrow what the user
/// consented to, so asking for the full seller set is safe.
const USER_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/sell.inventory.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.account.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.account",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
];

/// Raw payload of a successful token exchange. `refresh_token` is only
/// present when the marketplace rotates it; callers keep the stored one
/// otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Exchanges a long-lived refresh token for a fresh access token via the
/// OAuth endpoint, authenticating with the app's basic credentials.
pub async fn refresh_access_token(
    http: &Client,
    refresh_token: &str,
) -> Result<TokenGrant, AuthError> {
    if APP_ID.is_empty() || APP_SECRET.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    let scope = USER_SCOPES.join(" ");
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("scope", &scope),
    ];

    let response = http
        .post(OAUTH_TOKEN_URL.as_str())
        .basic_auth(APP_ID.as_str(), Some(APP_SECRET.as_str()))
        .form(&params)
        .send()
        .await
        .map_err(|err| AuthError::RefreshFailed(err.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("HTTP {status}: {body}")));
    }

    response
        .json()
        .await
        .map_err(|err| AuthError::RefreshFailed(err.to_string()))
}
