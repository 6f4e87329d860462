use crate::credentials::TokenManager;
use crate::ebay::auth::AuthError;
use crate::ebay::client::{EbayClient, ProtocolError, TradingApi};
use crate::ebay::fetch::{DEFAULT_PAGE_SIZE, Fetcher, MAX_PAGE_SIZE};
use crate::http::build_client;
use crate::models::{
    ListingSurface, PageSummary, PageSyncRequest, PreviewPage, PreviewRow, StageReport,
    StatusReport, SyncRequest, SyncSummary,
};
use crate::normalize::{NormalizedListing, normalize};
use crate::reconcile::{ReconcileOptions, reconcile};
use crate::store::{CredentialStore, ItemStore, MemoryCredentialStore, MemoryItemStore};
use crate::supabase::{SupabaseClient, SupabaseCredentialStore, SupabaseItemStore};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::{env, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

pub const PREVIEW_DEFAULT_PAGE_SIZE: u32 = 25;
pub const PREVIEW_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("a sync is already running for account {0}")]
    AlreadyRunning(String),
    #[error("account is not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(ProtocolError),
    #[error("sync aborted: {0}")]
    Aborted(String),
    #[error("store failure: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Auth(AuthError::NotConnected) => SyncError::NotConnected,
            other => SyncError::Protocol(other),
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        SyncError::from(ProtocolError::Auth(err))
    }
}

impl From<crate::store::StoreError> for SyncError {
    fn from(err: crate::store::StoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

/// Orchestrates a sync run: credentials, fetch, normalize, reconcile, each
/// captured into the summary's stage transcript.
#[derive(Clone)]
pub struct SyncService {
    credentials: Arc<dyn CredentialStore>,
    items: Arc<dyn ItemStore>,
    tokens: Arc<TokenManager>,
    fetcher: Fetcher,
    running: Arc<StdMutex<HashSet<String>>>,
}

impl SyncService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        items: Arc<dyn ItemStore>,
        http: reqwest::Client,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(credentials.clone(), http.clone()));
        let api: Arc<dyn TradingApi> = Arc::new(EbayClient::new(http, tokens.clone()));
        Self::with_api(credentials, items, tokens, api)
    }

    pub fn with_api(
        credentials: Arc<dyn CredentialStore>,
        items: Arc<dyn ItemStore>,
        tokens: Arc<TokenManager>,
        api: Arc<dyn TradingApi>,
    ) -> Self {
        Self {
            credentials,
            items,
            tokens,
            fetcher: Fetcher::new(api),
            running: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Wires the service against Supabase when configured, or in-memory
    /// stores otherwise so the whole pipeline still runs in demo setups.
    pub fn from_env() -> Self {
        let http = build_client();
        match SupabaseClient::from_env() {
            Some(supabase) => Self::new(
                Arc::new(SupabaseCredentialStore::new(supabase.clone())),
                Arc::new(SupabaseItemStore::new(supabase)),
                http,
            ),
            None => {
                warn!(
                    target = "sync.store",
                    "SUPABASE_URL not set; using in-memory stores"
                );
                Self::new(
                    Arc::new(MemoryCredentialStore::new()),
                    Arc::new(MemoryItemStore::new()),
                    http,
                )
            }
        }
    }

    /// Full-account sync.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncSummary, SyncError> {
        let account_id = request.account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(SyncError::InvalidRequest(
                "account_id is required".to_string(),
            ));
        }
        let _guard = self.try_begin(&account_id)?;
        let started = Instant::now();
        let mut stages: Vec<StageReport> = Vec::new();

        self.capture_stage("credentials", &mut stages, async {
            let token = self.tokens.valid_access_token(&account_id).await?;
            Ok(StageOutcome::new(
                (),
                json!({
                    "connected": true,
                    "token_preview": preview_token(&token),
                }),
            ))
        })
        .await?;

        if request.delete_existing {
            self.capture_stage("delete-existing", &mut stages, async {
                let removed = self.items.delete_all(&account_id).await?;
                Ok(StageOutcome::new(removed, json!({ "deleted": removed })))
            })
            .await?;
        }

        let deadline = tokio::time::Instant::now() + run_timeout();
        let report = self
            .capture_stage("fetch", &mut stages, async {
                let report = match request.surface {
                    ListingSurface::Trading => {
                        self.fetcher
                            .fetch_active_listings(&account_id, request.page_size, deadline)
                            .await?
                    }
                    ListingSurface::Rest => {
                        self.fetcher.fetch_all_inventory_items(&account_id).await?
                    }
                };
                let output = json!({
                    "listings": report.listings.len(),
                    "pages": report.pages_fetched,
                    "total_reported": report.total_reported,
                    "truncated": report.truncated,
                    "aborted": report.aborted,
                });
                Ok(StageOutcome::new(report, output))
            })
            .await?;

        if let Some(reason) = &report.aborted
            && !keep_partials()
        {
            return Err(SyncError::Aborted(reason.clone()));
        }

        let normalized = self
            .capture_stage("normalize", &mut stages, async {
                let normalized: Vec<NormalizedListing> =
                    report.listings.iter().map(normalize).collect();
                let output = json!({
                    "listings": normalized.len(),
                    "tags": tag_histogram(&normalized),
                });
                Ok(StageOutcome::new(normalized, output))
            })
            .await?;

        let outcome = self
            .capture_stage("reconcile", &mut stages, async {
                let existing = if request.delete_existing {
                    Vec::new()
                } else {
                    self.items.query(&account_id).await?
                };
                let options = ReconcileOptions {
                    fuzzy_match: request.fuzzy_match,
                    barcode_base: 0,
                };
                let outcome = reconcile(
                    self.items.as_ref(),
                    &account_id,
                    &normalized,
                    &existing,
                    &options,
                )
                .await;
                let output = json!({
                    "imported": outcome.imported,
                    "updated": outcome.updated,
                    "skipped": outcome.skipped,
                    "errors": outcome.errors.len(),
                });
                Ok(StageOutcome::new(outcome, output))
            })
            .await?;

        let summary = SyncSummary {
            account_id: account_id.clone(),
            total_fetched: report.listings.len() as u64,
            imported: outcome.imported,
            updated: outcome.updated,
            skipped: outcome.skipped,
            errors: outcome.errors,
            pages_fetched: report.pages_fetched,
            total_reported: report.total_reported,
            truncated: report.truncated,
            aborted: report.aborted,
            stages,
        };
        crate::metrics::record_sync(&summary);
        info!(
            target = "sync.api",
            account_id,
            imported = summary.imported,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync_complete"
        );
        Ok(summary)
    }

    /// Imports a single page. Barcode numbering is offset by the page's
    /// position so successive page imports stay unique.
    pub async fn run_page(&self, request: PageSyncRequest) -> Result<PageSummary, SyncError> {
        let account_id = request.account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(SyncError::InvalidRequest(
                "account_id is required".to_string(),
            ));
        }
        if request.page == 0 {
            return Err(SyncError::InvalidRequest("page starts at 1".to_string()));
        }
        let _guard = self.try_begin(&account_id)?;

        self.tokens.valid_access_token(&account_id).await?;
        let page = self
            .fetcher
            .fetch_page(&account_id, request.page, request.page_size)
            .await?;
        let normalized: Vec<NormalizedListing> = page.listings.iter().map(normalize).collect();
        let existing = self.items.query(&account_id).await?;

        let effective_page_size = request
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let options = ReconcileOptions {
            fuzzy_match: true,
            barcode_base: u64::from(request.page - 1) * u64::from(effective_page_size),
        };
        let outcome = reconcile(
            self.items.as_ref(),
            &account_id,
            &normalized,
            &existing,
            &options,
        )
        .await;

        info!(
            target = "sync.api",
            account_id,
            page = page.page,
            imported = outcome.imported,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "page_sync_complete"
        );
        Ok(PageSummary {
            account_id,
            page: page.page,
            total_pages: page.total_pages,
            total_entries: page.total_entries,
            has_more: page.has_more,
            imported: outcome.imported,
            updated: outcome.updated,
            skipped: outcome.skipped,
            errors: outcome.errors,
        })
    }

    /// Connection probe. A stored credential means connected; the username
    /// check degrades quietly when the marketplace call fails.
    pub async fn status(&self, account_id: &str) -> Result<StatusReport, SyncError> {
        let Some(credential) = self.credentials.get(account_id).await? else {
            return Ok(StatusReport {
                connected: false,
                ebay_username: None,
                token_expiry: None,
                is_expired: None,
                last_sync: None,
            });
        };
        let ebay_username = match self.fetcher.verify_user(account_id).await {
            Ok(name) => name.or_else(|| credential.ebay_username.clone()),
            Err(err) => {
                warn!(
                    target = "sync.ebay",
                    account_id,
                    error = %err,
                    "status_probe_failed"
                );
                credential.ebay_username.clone()
            }
        };
        Ok(StatusReport {
            connected: true,
            ebay_username,
            token_expiry: Some(credential.expires_at),
            is_expired: Some(credential.expires_at < Utc::now()),
            last_sync: Some(credential.updated_at),
        })
    }

    /// Removes the stored credential. Returns whether one existed.
    pub async fn disconnect(&self, account_id: &str) -> Result<bool, SyncError> {
        let existed = self.credentials.get(account_id).await?.is_some();
        if existed {
            self.credentials.delete(account_id).await?;
            info!(target = "sync.api", account_id, "credentials_removed");
        }
        Ok(existed)
    }

    pub async fn listing_count(&self, account_id: &str) -> Result<u64, SyncError> {
        Ok(self.fetcher.fetch_listing_count(account_id).await?)
    }

    /// Display-only page of listings; nothing is written.
    pub async fn preview(
        &self,
        account_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PreviewPage, SyncError> {
        let page_size = page_size.clamp(1, PREVIEW_MAX_PAGE_SIZE);
        let fetched = self
            .fetcher
            .fetch_page(account_id, page.max(1), Some(page_size))
            .await?;
        let listings = fetched
            .listings
            .iter()
            .map(|listing| PreviewRow {
                external_id: listing.external_id.clone(),
                title: listing.title.clone(),
                price: listing.price,
                currency: listing.currency.clone(),
                quantity: listing.quantity,
                image_url: listing.image_urls.first().cloned().unwrap_or_default(),
                condition: listing.condition.clone(),
            })
            .collect();
        Ok(PreviewPage {
            listings,
            page: fetched.page,
            page_size,
            total_pages: fetched.total_pages,
            total: fetched.total_entries,
            has_more: fetched.has_more,
        })
    }

    fn try_begin(&self, account_id: &str) -> Result<RunGuard, SyncError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| SyncError::Internal("run registry poisoned".to_string()))?;
        if !running.insert(account_id.to_string()) {
            return Err(SyncError::AlreadyRunning(account_id.to_string()));
        }
        Ok(RunGuard {
            running: self.running.clone(),
            account_id: account_id.to_string(),
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, SyncError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, SyncError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug)]
struct RunGuard {
    running: Arc<StdMutex<HashSet<String>>>,
    account_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.account_id);
        }
    }
}

fn run_timeout() -> tokio::time::Duration {
    let secs = env::var("SYNC_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(540);
    tokio::time::Duration::from_secs(secs)
}

fn keep_partials() -> bool {
    match env::var("KEEP_PARTIAL_RESULTS") {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => true,
    }
}

fn preview_token(token: &str) -> String {
    token.chars().take(6).collect::<String>() + "…"
}

fn tag_histogram(listings: &[NormalizedListing]) -> BTreeMap<&'static str, usize> {
    let mut histogram = BTreeMap::new();
    for listing in listings {
        *histogram.entry(listing.tag.as_str()).or_insert(0) += 1;
    }
    histogram
}
