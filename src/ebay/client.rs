use crate::credentials::TokenManager;
use crate::ebay::auth::AuthError;
use crate::ebay::config::{COMPATIBILITY_LEVEL, MARKETPLACE_ID, ROOT, SITE_ID, TRADING_API_URL};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("transient upstream failure (HTTP {status}): {body}")]
    Transient { status: u16, body: String },
    #[error("upstream refused the call (HTTP {status}): {body}")]
    Fatal { status: u16, body: String },
    #[error("call rejected: {0}")]
    Rejected(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl ProtocolError {
    /// Transport failures and throttling are worth retrying. Auth problems
    /// and explicit rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Request(_))
    }
}

fn classify_status(status: u16, body: String) -> ProtocolError {
    if status == 429 || status >= 500 {
        ProtocolError::Transient { status, body }
    } else {
        ProtocolError::Fatal { status, body }
    }
}

/// The slice of the eBay surface the sync engine talks to. A trait so the
/// fetch loop can run against a scripted stand-in.
#[async_trait]
pub trait TradingApi: Send + Sync {
    /// Executes a Trading API call and returns the raw response XML.
    async fn trading(
        &self,
        account_id: &str,
        call_name: &str,
        body: String,
    ) -> Result<String, ProtocolError>;

    /// Executes a REST Sell API call and returns the decoded JSON body.
    async fn rest(
        &self,
        account_id: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ProtocolError>;
}

#[derive(Clone)]
pub struct EbayClient {
    http: Client,
    tokens: Arc<TokenManager>,
}

impl EbayClient {
    pub fn new(http: Client, tokens: Arc<TokenManager>) -> Self {
        Self { http, tokens }
    }
}

#[async_trait]
impl TradingApi for EbayClient {
    async fn trading(
        &self,
        account_id: &str,
        call_name: &str,
        body: String,
    ) -> Result<String, ProtocolError> {
        let token = self.tokens.valid_access_token(account_id).await?;
        debug!(target = "sync.ebay", call_name, "trading_call");
        let response = self
            .http
            .post(TRADING_API_URL.as_str())
            .header("Content-Type", "text/xml;charset=UTF-8")
            .header("X-EBAY-API-COMPATIBILITY-LEVEL", COMPATIBILITY_LEVEL)
            .header("X-EBAY-API-CALL-NAME", call_name)
            .header("X-EBAY-API-SITEID", SITE_ID)
            .header("X-EBAY-API-IAF-TOKEN", token)
            .body(body)
            .send()
            .await
            .map_err(|err| ProtocolError::Request(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), text));
        }
        Ok(text)
    }

    async fn rest(
        &self,
        account_id: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        let token = self.tokens.valid_access_token(account_id).await?;
        let url = format!("{}{}", *ROOT, path);
        debug!(target = "sync.ebay", %method, path, "rest_call");
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .header("Accept-Language", "en-US");
        if method != Method::GET {
            request = request
                .header("Content-Type", "application/json")
                .header("Content-Language", "en-US")
                .header("X-EBAY-C-MARKETPLACE-ID", MARKETPLACE_ID)
                .json(&body.unwrap_or_else(|| serde_json::json!({})));
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProtocolError::Request(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| ProtocolError::Request(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(classify_status(429, String::new()).is_transient());
        assert!(classify_status(500, String::new()).is_transient());
        assert!(classify_status(503, String::new()).is_transient());
        assert!(!classify_status(400, String::new()).is_transient());
        assert!(!classify_status(401, String::new()).is_transient());
        assert!(!classify_status(404, String::new()).is_transient());
    }

    #[test]
    fn rejections_and_auth_failures_stop_retries() {
        assert!(!ProtocolError::Rejected("ack failure".to_string()).is_transient());
        assert!(!ProtocolError::Auth(AuthError::NotConnected).is_transient());
        assert!(ProtocolError::Request("connection reset".to_string()).is_transient());
    }
}
