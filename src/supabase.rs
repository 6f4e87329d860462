use crate::credentials::Credential;
use crate::http::build_client;
use crate::models::InventoryRecord;
use crate::store::{CredentialStore, ItemStore, StoreError, WriteOp};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::info;

const ITEMS_TABLE: &str = "inventory_items";
const CREDENTIALS_TABLE: &str = "ebay_credentials";

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

async fn request_failed(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        StoreError::Request(format!("HTTP {status}"))
    } else {
        StoreError::Request(format!("HTTP {status}: {body}"))
    }
}

/// Inventory records in the `inventory_items` table, one row per record,
/// upserted on the record id.
pub struct SupabaseItemStore {
    client: SupabaseClient,
}

impl SupabaseItemStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemStore for SupabaseItemStore {
    async fn query(&self, account_id: &str) -> Result<Vec<InventoryRecord>, StoreError> {
        let url = format!(
            "{}?account_id=eq.{}&select=*",
            self.client.table_url(ITEMS_TABLE),
            urlencoding::encode(account_id)
        );
        let response = self
            .client
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn batch_write(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let rows: Vec<&InventoryRecord> = ops.iter().map(WriteOp::record).collect();
        let response = self
            .client
            .request(Method::POST, self.client.table_url(ITEMS_TABLE))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        Ok(())
    }

    async fn delete_all(&self, account_id: &str) -> Result<u64, StoreError> {
        let url = format!(
            "{}?account_id=eq.{}&select=id",
            self.client.table_url(ITEMS_TABLE),
            urlencoding::encode(account_id)
        );
        let response = self
            .client
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        let removed: Vec<Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        info!(
            target = "sync.store",
            account_id,
            removed = removed.len(),
            "records_deleted"
        );
        Ok(removed.len() as u64)
    }
}

/// OAuth credentials in the `ebay_credentials` table, keyed by account id.
pub struct SupabaseCredentialStore {
    client: SupabaseClient,
}

impl SupabaseCredentialStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for SupabaseCredentialStore {
    async fn get(&self, account_id: &str) -> Result<Option<Credential>, StoreError> {
        let url = format!(
            "{}?account_id=eq.{}&select=*&limit=1",
            self.client.table_url(CREDENTIALS_TABLE),
            urlencoding::encode(account_id)
        );
        let response = self
            .client
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        let mut payload: Vec<Credential> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(payload.pop())
    }

    async fn put(&self, credential: &Credential) -> Result<(), StoreError> {
        let response = self
            .client
            .request(Method::POST, self.client.table_url(CREDENTIALS_TABLE))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[credential])
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<(), StoreError> {
        let url = format!(
            "{}?account_id=eq.{}",
            self.client.table_url(CREDENTIALS_TABLE),
            urlencoding::encode(account_id)
        );
        let response = self
            .client
            .request(Method::DELETE, url)
            .header("Prefer", "return=minimal")
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }
        Ok(())
    }
}
