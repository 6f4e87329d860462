use crate::credentials::Credential;
use crate::models::InventoryRecord;
use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;

/// Hard cap on ops per persistence batch. One batch is one commit point.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// A buffered write the reconciler wants committed. Updates carry the
/// full post-update row so a batch of mixed creates and updates can land
/// as a single upsert.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create(InventoryRecord),
    Update(InventoryRecord),
}

impl WriteOp {
    pub fn record(&self) -> &InventoryRecord {
        match self {
            WriteOp::Create(record) | WriteOp::Update(record) => record,
        }
    }

    /// Identifier used in per-item error reports: the marketplace listing
    /// id when the record has one, otherwise the store id.
    pub fn item_ref(&self) -> &str {
        let record = self.record();
        record.external_listing_id.as_deref().unwrap_or(&record.id)
    }

    pub fn is_create(&self) -> bool {
        matches!(self, WriteOp::Create(_))
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, account_id: &str) -> Result<Option<Credential>, StoreError>;
    async fn put(&self, credential: &Credential) -> Result<(), StoreError>;
    async fn delete(&self, account_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All records for one account.
    async fn query(&self, account_id: &str) -> Result<Vec<InventoryRecord>, StoreError>;
    /// Commits every op or fails as a unit. Callers chunk to
    /// `MAX_BATCH_OPS`.
    async fn batch_write(&self, ops: &[WriteOp]) -> Result<(), StoreError>;
    /// Removes the account's records, returning how many went away.
    async fn delete_all(&self, account_id: &str) -> Result<u64, StoreError>;
}

/// Keeps everything in process memory. Backs tests and demo mode when no
/// database is configured.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    records: Arc<Mutex<BTreeMap<String, InventoryRecord>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn query(&self, account_id: &str) -> Result<Vec<InventoryRecord>, StoreError> {
        let guard = self.records.lock().await;
        Ok(guard
            .values()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn batch_write(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut guard = self.records.lock().await;
        for op in ops {
            let record = op.record().clone();
            guard.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn delete_all(&self, account_id: &str) -> Result<u64, StoreError> {
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|_, record| record.account_id != account_id);
        Ok((before - guard.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<Mutex<BTreeMap<String, Credential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, account_id: &str) -> Result<Option<Credential>, StoreError> {
        let guard = self.credentials.lock().await;
        Ok(guard.get(account_id).cloned())
    }

    async fn put(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut guard = self.credentials.lock().await;
        guard.insert(credential.account_id.clone(), credential.clone());
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<(), StoreError> {
        let mut guard = self.credentials.lock().await;
        guard.remove(account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, account_id: &str, title: &str) -> InventoryRecord {
        InventoryRecord {
            id: id.to_string(),
            account_id: account_id.to_string(),
            title: title.to_string(),
            size: String::new(),
            status: "IN_STOCK".to_string(),
            tags: vec![],
            image_urls: vec![],
            price_cents: 0,
            brand: "Unknown".to_string(),
            category: "Clothing".to_string(),
            notes: String::new(),
            barcode: String::new(),
            external_listing_id: None,
            listing_url: String::new(),
            sku: String::new(),
            marketplace_detail: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn batch_write_upserts_by_id() {
        let store = MemoryItemStore::new();
        store
            .batch_write(&[WriteOp::Create(record("r1", "acct", "Tee"))])
            .await
            .expect("create");
        let mut updated = record("r1", "acct", "Tee (renamed)");
        updated.price_cents = 999;
        store
            .batch_write(&[WriteOp::Update(updated)])
            .await
            .expect("update");

        let rows = store.query("acct").await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Tee (renamed)");
        assert_eq!(rows[0].price_cents, 999);
    }

    #[tokio::test]
    async fn query_filters_by_account() {
        let store = MemoryItemStore::new();
        store
            .batch_write(&[
                WriteOp::Create(record("r1", "a", "One")),
                WriteOp::Create(record("r2", "b", "Two")),
            ])
            .await
            .expect("write");
        assert_eq!(store.query("a").await.expect("query").len(), 1);
        assert_eq!(store.delete_all("a").await.expect("delete"), 1);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn item_ref_prefers_external_id() {
        let mut with_external = record("r1", "a", "Tee");
        with_external.external_listing_id = Some("110042".to_string());
        assert_eq!(WriteOp::Create(with_external).item_ref(), "110042");
        assert_eq!(WriteOp::Create(record("r2", "a", "Tee")).item_ref(), "r2");
    }
}
