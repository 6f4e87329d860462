use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// One active listing as fetched from the marketplace, field-extracted
/// but otherwise untouched. Only fetch code builds these; everything
/// downstream is marketplace-agnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RawListing {
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub quantity: i64,
    pub listing_type: String,
    pub listing_url: String,
    pub image_urls: Vec<String>,
    pub sku: String,
    pub condition: String,
    pub condition_id: String,
    pub category_id: String,
    pub category_name: String,
    pub item_specifics: BTreeMap<String, String>,
}

/// A row in the inventory store.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: String,
    pub account_id: String,
    pub title: String,
    #[serde(default)]
    pub size: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub barcode: String,
    pub external_listing_id: Option<String>,
    #[serde(default)]
    pub listing_url: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub marketplace_detail: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> String {
    "IN_STOCK".to_string()
}

/// Which marketplace surface a sync run reads from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingSurface {
    /// Trading API `GetSellerList`, the surface with full item detail.
    #[default]
    Trading,
    /// REST Sell inventory items, offset-paged.
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub account_id: String,
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Clear the account's records first and treat every listing as new.
    #[serde(default)]
    pub delete_existing: bool,
    /// Title matching against unclaimed records; disable to key on
    /// external ids only.
    #[serde(default = "default_true")]
    pub fuzzy_match: bool,
    #[serde(default)]
    pub surface: ListingSurface,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageSyncRequest {
    pub account_id: String,
    pub page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorDetail {
    pub item_ref: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub account_id: String,
    pub total_fetched: u64,
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<SyncErrorDetail>,
    pub pages_fetched: u32,
    /// `TotalNumberOfEntries` as reported by the marketplace on page 1.
    pub total_reported: u64,
    /// True when the page safety bound cut the fetch short.
    pub truncated: bool,
    /// Set when the run aborted mid-fetch; counts cover the partial work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    pub account_id: String,
    pub page: u32,
    pub total_pages: u64,
    pub total_entries: u64,
    pub has_more: bool,
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<SyncErrorDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ebay_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Display-only listing row for the preview endpoint; nothing here is
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewRow {
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub quantity: i64,
    pub image_url: String,
    pub condition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewPage {
    pub listings: Vec<PreviewRow>,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_request_defaults() {
        let request: SyncRequest =
            serde_json::from_str(r#"{"account_id":"acct-1"}"#).expect("parse");
        assert_eq!(request.account_id, "acct-1");
        assert_eq!(request.page_size, None);
        assert!(!request.delete_existing);
        assert!(request.fuzzy_match);
        assert_eq!(request.surface, ListingSurface::Trading);
    }

    #[test]
    fn sync_request_surface_parses() {
        let request: SyncRequest =
            serde_json::from_str(r#"{"account_id":"acct-1","surface":"rest"}"#).expect("parse");
        assert_eq!(request.surface, ListingSurface::Rest);
    }

    #[test]
    fn record_roundtrip_omits_absent_external_id() {
        let record = InventoryRecord {
            id: "rec-1".to_string(),
            account_id: "acct-1".to_string(),
            title: "Vintage Tee".to_string(),
            size: "M".to_string(),
            status: default_status(),
            tags: vec!["T-shirts".to_string()],
            image_urls: vec![],
            price_cents: 1500,
            brand: "Unknown".to_string(),
            category: "Clothing".to_string(),
            notes: String::new(),
            barcode: String::new(),
            external_listing_id: None,
            listing_url: String::new(),
            sku: String::new(),
            marketplace_detail: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("external_listing_id").is_none());
        let back: InventoryRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.external_listing_id, None);
        assert_eq!(back.status, "IN_STOCK");
    }
}
