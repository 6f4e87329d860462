use crate::ebay::client::{ProtocolError, TradingApi};
use crate::ebay::config::COMPATIBILITY_LEVEL;
use crate::ebay::xml;
use crate::models::RawListing;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

pub const DEFAULT_PAGE_SIZE: u32 = 200;
/// GetSellerList caps EntriesPerPage at 200.
pub const MAX_PAGE_SIZE: u32 = 200;
/// Hard ceiling on pagination; the report is marked truncated beyond it.
pub const MAX_PAGES: u32 = 100;
/// Active fixed-price listings renew within this window, so filtering on
/// end time covers everything currently live.
const WINDOW_DAYS: i64 = 120;
const MAX_FETCH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_JITTER_MS: u64 = 250;
const REST_PAGE_LIMIT: u64 = 100;
const MAX_INVENTORY_ITEMS: u64 = 10_000;

const OUTPUT_SELECTORS: [&str; 15] = [
    "ItemID",
    "Title",
    "SellingStatus.CurrentPrice",
    "Quantity",
    "ListingType",
    "ViewItemURL",
    "PictureDetails.PictureURL",
    "SKU",
    "ConditionDisplayName",
    "ConditionID",
    "PrimaryCategory",
    "ItemSpecifics",
    "HasMoreItems",
    "TotalNumberOfEntries",
    "PageNumber",
];

/// Outcome of a full pagination run. `aborted` carries the reason when the
/// run stopped early; everything fetched before the stop is kept.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub listings: Vec<RawListing>,
    pub pages_fetched: u32,
    pub total_reported: u64,
    pub truncated: bool,
    pub aborted: Option<String>,
}

/// One page of listings plus the pagination facts the caller needs to ask
/// for the next one.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub listings: Vec<RawListing>,
    pub page: u32,
    pub total_pages: u64,
    pub total_entries: u64,
    pub has_more: bool,
}

#[derive(Debug)]
pub struct InventoryPage {
    pub listings: Vec<RawListing>,
    pub total: u64,
}

#[derive(Debug)]
struct ParsedPage {
    listings: Vec<RawListing>,
    has_more: bool,
    total_entries: u64,
}

/// Drives GetSellerList and REST inventory pagination against anything
/// that implements [`TradingApi`].
#[derive(Clone)]
pub struct Fetcher {
    api: Arc<dyn TradingApi>,
}

impl Fetcher {
    pub fn new(api: Arc<dyn TradingApi>) -> Self {
        Self { api }
    }

    /// Pulls every active listing for the account, page by page, until the
    /// marketplace reports no more, the page bound trips, or the deadline
    /// passes. A failure on page 1 is an error; a failure later folds into
    /// the report so the caller can keep the partial result.
    pub async fn fetch_active_listings(
        &self,
        account_id: &str,
        page_size: Option<u32>,
        deadline: Instant,
    ) -> Result<FetchReport, ProtocolError> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        // The window is pinned once so listings cannot drift between pages.
        let (end_from, end_to) = seller_list_window();
        let mut report = FetchReport::default();
        let mut page = 1u32;
        loop {
            if Instant::now() >= deadline {
                report.aborted = Some(format!(
                    "fetch timed out after {} pages",
                    report.pages_fetched
                ));
                break;
            }
            let outcome = self
                .call_with_retry(account_id, "GetSellerList", || {
                    seller_list_body(&end_from, &end_to, page, page_size)
                })
                .await
                .and_then(|body| parse_page(&body));
            let parsed = match outcome {
                Ok(parsed) => parsed,
                Err(err) if report.pages_fetched == 0 => return Err(err),
                Err(err) => {
                    report.aborted = Some(format!("page {page} failed: {err}"));
                    break;
                }
            };
            if page == 1 {
                report.total_reported = parsed.total_entries;
            }
            report.pages_fetched += 1;
            report.listings.extend(parsed.listings);
            if !parsed.has_more {
                break;
            }
            if page >= MAX_PAGES {
                report.truncated = true;
                warn!(
                    target = "sync.ebay",
                    account_id,
                    pages = page,
                    "pagination_bound_reached"
                );
                break;
            }
            page += 1;
            sleep(page_delay()).await;
        }
        info!(
            target = "sync.ebay",
            account_id,
            listings = report.listings.len(),
            pages = report.pages_fetched,
            total_reported = report.total_reported,
            "listings_fetched"
        );
        Ok(report)
    }

    /// One page, no loop. Powers the page-at-a-time import and the preview.
    pub async fn fetch_page(
        &self,
        account_id: &str,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<FetchedPage, ProtocolError> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let (end_from, end_to) = seller_list_window();
        let body = self
            .call_with_retry(account_id, "GetSellerList", || {
                seller_list_body(&end_from, &end_to, page, page_size)
            })
            .await?;
        let parsed = parse_page(&body)?;
        Ok(FetchedPage {
            page,
            total_pages: parsed.total_entries.div_ceil(u64::from(page_size)),
            total_entries: parsed.total_entries,
            has_more: parsed.has_more,
            listings: parsed.listings,
        })
    }

    /// Count probe: EntriesPerPage=1 with only the totals selected, so the
    /// response is a few hundred bytes no matter how large the account is.
    pub async fn fetch_listing_count(&self, account_id: &str) -> Result<u64, ProtocolError> {
        let (end_from, end_to) = seller_list_window();
        let body = self
            .call_with_retry(account_id, "GetSellerList", || {
                listing_count_body(&end_from, &end_to)
            })
            .await?;
        ensure_ack(&body)?;
        Ok(xml::text(&body, "TotalNumberOfEntries").parse().unwrap_or(0))
    }

    /// GetUser round trip; returns the seller's username when present.
    pub async fn verify_user(&self, account_id: &str) -> Result<Option<String>, ProtocolError> {
        let body = self
            .call_with_retry(account_id, "GetUser", user_body)
            .await?;
        ensure_ack(&body)?;
        let user_id = xml::text(&body, "UserID");
        Ok((!user_id.is_empty()).then_some(user_id))
    }

    /// One REST inventory page.
    pub async fn fetch_inventory_items(
        &self,
        account_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<InventoryPage, ProtocolError> {
        let path = format!("/sell/inventory/v1/inventory_item?limit={limit}&offset={offset}");
        let payload = self.rest_get_with_retry(account_id, &path).await?;
        let listings: Vec<RawListing> = payload["inventoryItems"]
            .as_array()
            .map(|items| items.iter().map(parse_rest_item).collect())
            .unwrap_or_default();
        let total = payload["total"].as_u64().unwrap_or(listings.len() as u64);
        Ok(InventoryPage { listings, total })
    }

    /// Pages the REST inventory by offset while full pages keep coming,
    /// bounded at 10 000 items.
    pub async fn fetch_all_inventory_items(
        &self,
        account_id: &str,
    ) -> Result<FetchReport, ProtocolError> {
        let mut report = FetchReport::default();
        let mut offset = 0u64;
        loop {
            let page = match self
                .fetch_inventory_items(account_id, REST_PAGE_LIMIT, offset)
                .await
            {
                Ok(page) => page,
                Err(err) if report.pages_fetched == 0 => return Err(err),
                Err(err) => {
                    report.aborted =
                        Some(format!("inventory page at offset {offset} failed: {err}"));
                    break;
                }
            };
            if report.pages_fetched == 0 {
                report.total_reported = page.total;
            }
            report.pages_fetched += 1;
            let count = page.listings.len() as u64;
            report.listings.extend(page.listings);
            if count < REST_PAGE_LIMIT {
                break;
            }
            offset += REST_PAGE_LIMIT;
            if offset >= MAX_INVENTORY_ITEMS {
                report.truncated = true;
                warn!(
                    target = "sync.ebay",
                    account_id, offset, "inventory_pagination_bound_reached"
                );
                break;
            }
        }
        info!(
            target = "sync.ebay",
            account_id,
            listings = report.listings.len(),
            pages = report.pages_fetched,
            "inventory_items_fetched"
        );
        Ok(report)
    }

    async fn call_with_retry<F>(
        &self,
        account_id: &str,
        call_name: &str,
        body: F,
    ) -> Result<String, ProtocolError>
    where
        F: Fn() -> String,
    {
        let mut attempt = 1u32;
        loop {
            match self.api.trading(account_id, call_name, body()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < MAX_FETCH_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        target = "sync.ebay",
                        call_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient_failure_retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn rest_get_with_retry(
        &self,
        account_id: &str,
        path: &str,
    ) -> Result<Value, ProtocolError> {
        let mut attempt = 1u32;
        loop {
            match self.api.rest(account_id, Method::GET, path, None).await {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_transient() && attempt < MAX_FETCH_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        target = "sync.ebay",
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient_failure_retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..RETRY_JITTER_MS);
    Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1) + jitter)
}

fn page_delay() -> Duration {
    let millis = std::env::var("PAGE_DELAY_MS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(250);
    Duration::from_millis(millis)
}

fn seller_list_window() -> (String, String) {
    let now = Utc::now();
    let from = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let to = (now + chrono::Duration::days(WINDOW_DAYS)).to_rfc3339_opts(SecondsFormat::Millis, true);
    (from, to)
}

fn seller_list_body(end_from: &str, end_to: &str, page: u32, page_size: u32) -> String {
    let selectors: String = OUTPUT_SELECTORS
        .iter()
        .map(|field| format!("  <OutputSelector>{field}</OutputSelector>\n"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<GetSellerListRequest xmlns="urn:ebay:apis:eBLBaseComponents">
  <Version>{COMPATIBILITY_LEVEL}</Version>
  <EndTimeFrom>{end_from}</EndTimeFrom>
  <EndTimeTo>{end_to}</EndTimeTo>
  <Pagination>
    <EntriesPerPage>{page_size}</EntriesPerPage>
    <PageNumber>{page}</PageNumber>
  </Pagination>
  <IncludeWatchCount>false</IncludeWatchCount>
{selectors}</GetSellerListRequest>"#
    )
}

fn listing_count_body(end_from: &str, end_to: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<GetSellerListRequest xmlns="urn:ebay:apis:eBLBaseComponents">
  <Version>{COMPATIBILITY_LEVEL}</Version>
  <EndTimeFrom>{end_from}</EndTimeFrom>
  <EndTimeTo>{end_to}</EndTimeTo>
  <Pagination>
    <EntriesPerPage>1</EntriesPerPage>
    <PageNumber>1</PageNumber>
  </Pagination>
  <OutputSelector>TotalNumberOfEntries</OutputSelector>
  <OutputSelector>TotalNumberOfPages</OutputSelector>
</GetSellerListRequest>"#
    )
}

fn user_body() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<GetUserRequest xmlns="urn:ebay:apis:eBLBaseComponents">
  <Version>{COMPATIBILITY_LEVEL}</Version>
</GetUserRequest>"#
    )
}

fn ensure_ack(body: &str) -> Result<(), ProtocolError> {
    if xml::text(body, "Ack") == "Failure" {
        let message = xml::text(body, "LongMessage");
        let message = if message.is_empty() {
            "marketplace returned Ack=Failure".to_string()
        } else {
            message
        };
        return Err(ProtocolError::Rejected(message));
    }
    Ok(())
}

fn parse_page(body: &str) -> Result<ParsedPage, ProtocolError> {
    ensure_ack(body)?;
    Ok(ParsedPage {
        listings: xml::blocks(body, "Item").into_iter().map(parse_item).collect(),
        has_more: xml::text(body, "HasMoreItems") == "true",
        total_entries: xml::text(body, "TotalNumberOfEntries").parse().unwrap_or(0),
    })
}

fn parse_item(item: &str) -> RawListing {
    let external_id = xml::text(item, "ItemID");

    let mut price = 0.0;
    let mut currency = "USD".to_string();
    if let Some(selling_status) = xml::blocks(item, "SellingStatus").first() {
        if let Ok(parsed) = xml::text(selling_status, "CurrentPrice").parse::<f64>() {
            price = parsed;
        }
        if let Some(code) = xml::attr(selling_status, "CurrentPrice", "currencyID") {
            currency = code;
        }
    }

    let mut category_id = String::new();
    let mut category_name = String::new();
    if let Some(primary) = xml::blocks(item, "PrimaryCategory").first() {
        category_id = xml::text(primary, "CategoryID");
        category_name = xml::text(primary, "CategoryName");
    }

    let mut item_specifics = BTreeMap::new();
    for pair in xml::blocks(item, "NameValueList") {
        let name = xml::text(pair, "Name");
        let value = xml::text(pair, "Value");
        if !name.is_empty() && !value.is_empty() {
            item_specifics.insert(name, value);
        }
    }

    let sku = xml::text(item, "SKU");
    let condition = xml::text(item, "ConditionDisplayName");
    RawListing {
        title: xml::text(item, "Title"),
        price,
        currency,
        quantity: xml::text(item, "Quantity").parse().unwrap_or(0),
        listing_type: xml::text(item, "ListingType"),
        listing_url: xml::text(item, "ViewItemURL"),
        image_urls: xml::text_all(item, "PictureURL"),
        sku: if sku.is_empty() { external_id.clone() } else { sku },
        condition: if condition.is_empty() {
            "Not Specified".to_string()
        } else {
            condition
        },
        condition_id: xml::text(item, "ConditionID"),
        category_id,
        category_name,
        item_specifics,
        external_id,
    }
}

fn parse_rest_item(item: &Value) -> RawListing {
    let sku = item["sku"].as_str().unwrap_or_default().to_string();
    let listing_id = item["listingId"].as_str().unwrap_or_default().to_string();
    let external_id = if listing_id.is_empty() {
        sku.clone()
    } else {
        listing_id.clone()
    };
    let product = &item["product"];

    let title = product["title"]
        .as_str()
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .or_else(|| (!sku.is_empty()).then(|| sku.clone()))
        .unwrap_or_else(|| "Untitled".to_string());

    let price = product["aspects"]["Price"][0]
        .as_str()
        .or_else(|| item["offers"][0]["price"]["value"].as_str())
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(0.0);
    let currency = item["offers"][0]["price"]["currency"]
        .as_str()
        .unwrap_or("USD")
        .to_string();

    let mut item_specifics = BTreeMap::new();
    if let Some(aspects) = product["aspects"].as_object() {
        for (name, values) in aspects {
            if let Some(value) = values[0].as_str()
                && !value.is_empty()
            {
                item_specifics.insert(name.clone(), value.to_string());
            }
        }
    }

    RawListing {
        title,
        price,
        currency,
        quantity: item["availability"]["shipToLocationAvailability"]["quantity"]
            .as_i64()
            .unwrap_or(0),
        listing_type: String::new(),
        listing_url: if listing_id.is_empty() {
            String::new()
        } else {
            format!("https://www.ebay.com/itm/{listing_id}")
        },
        image_urls: product["imageUrls"]
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        sku,
        condition: item["condition"]
            .as_str()
            .unwrap_or("Not Specified")
            .to_string(),
        condition_id: String::new(),
        category_id: String::new(),
        category_name: String::new(),
        item_specifics,
        external_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedApi {
        trading_responses: Mutex<VecDeque<Result<String, ProtocolError>>>,
        trading_bodies: Mutex<Vec<String>>,
        rest_responses: Mutex<VecDeque<Result<Value, ProtocolError>>>,
        rest_paths: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn with_trading(script: Vec<Result<String, ProtocolError>>) -> Arc<Self> {
            Arc::new(Self {
                trading_responses: Mutex::new(script.into()),
                trading_bodies: Mutex::new(Vec::new()),
                rest_responses: Mutex::new(VecDeque::new()),
                rest_paths: Mutex::new(Vec::new()),
            })
        }

        fn with_rest(script: Vec<Result<Value, ProtocolError>>) -> Arc<Self> {
            Arc::new(Self {
                trading_responses: Mutex::new(VecDeque::new()),
                trading_bodies: Mutex::new(Vec::new()),
                rest_responses: Mutex::new(script.into()),
                rest_paths: Mutex::new(Vec::new()),
            })
        }

        fn trading_calls(&self) -> Vec<String> {
            self.trading_bodies.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl TradingApi for ScriptedApi {
        async fn trading(
            &self,
            _account_id: &str,
            _call_name: &str,
            body: String,
        ) -> Result<String, ProtocolError> {
            self.trading_bodies.lock().expect("lock").push(body);
            self.trading_responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("trading script exhausted")
        }

        async fn rest(
            &self,
            _account_id: &str,
            _method: Method,
            path: &str,
            _body: Option<Value>,
        ) -> Result<Value, ProtocolError> {
            self.rest_paths.lock().expect("lock").push(path.to_string());
            self.rest_responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("rest script exhausted")
        }
    }

    fn page_xml(ids: &[&str], has_more: bool, total: u64) -> String {
        let items: String = ids
            .iter()
            .map(|id| {
                format!(
                    "<Item><ItemID>{id}</ItemID><Title>Listing {id}</Title><Quantity>1</Quantity>\
                     <SellingStatus><CurrentPrice currencyID=\"USD\">12.50</CurrentPrice></SellingStatus></Item>"
                )
            })
            .collect();
        format!(
            "<GetSellerListResponse><Ack>Success</Ack>\
             <TotalNumberOfEntries>{total}</TotalNumberOfEntries>\
             <HasMoreItems>{has_more}</HasMoreItems>{items}</GetSellerListResponse>"
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn transient() -> ProtocolError {
        ProtocolError::Transient {
            status: 503,
            body: "slow down".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_until_has_more_clears() {
        let api = ScriptedApi::with_trading(vec![
            Ok(page_xml(&["1", "2"], true, 6)),
            Ok(page_xml(&["3", "4"], true, 6)),
            Ok(page_xml(&["5", "6"], false, 6)),
        ]);
        let fetcher = Fetcher::new(api.clone());
        let report = fetcher
            .fetch_active_listings("acct", None, far_deadline())
            .await
            .expect("report");
        assert_eq!(report.listings.len(), 6);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.total_reported, 6);
        assert!(!report.truncated);
        assert!(report.aborted.is_none());

        let bodies = api.trading_calls();
        assert!(bodies[0].contains("<EntriesPerPage>200</EntriesPerPage>"));
        assert!(bodies[0].contains("<OutputSelector>ItemSpecifics</OutputSelector>"));
        assert!(bodies[1].contains("<PageNumber>2</PageNumber>"));
        assert!(bodies[2].contains("<PageNumber>3</PageNumber>"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_the_same_page() {
        let api = ScriptedApi::with_trading(vec![
            Err(transient()),
            Err(ProtocolError::Request("connection reset".to_string())),
            Ok(page_xml(&["1"], false, 1)),
        ]);
        let fetcher = Fetcher::new(api.clone());
        let report = fetcher
            .fetch_active_listings("acct", None, far_deadline())
            .await
            .expect("report");
        assert_eq!(report.listings.len(), 1);
        assert_eq!(api.trading_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_partial_results() {
        let api = ScriptedApi::with_trading(vec![
            Ok(page_xml(&["1", "2"], true, 4)),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let fetcher = Fetcher::new(api.clone());
        let report = fetcher
            .fetch_active_listings("acct", None, far_deadline())
            .await
            .expect("report");
        assert_eq!(report.listings.len(), 2);
        assert_eq!(report.pages_fetched, 1);
        let aborted = report.aborted.expect("aborted");
        assert!(aborted.contains("page 2 failed"));
        assert_eq!(api.trading_calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_page_fatal_failure_is_an_error() {
        let api = ScriptedApi::with_trading(vec![Err(ProtocolError::Fatal {
            status: 400,
            body: "bad request".to_string(),
        })]);
        let fetcher = Fetcher::new(api.clone());
        let err = fetcher
            .fetch_active_listings("acct", None, far_deadline())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProtocolError::Fatal { status: 400, .. }));
        assert_eq!(api.trading_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_stops_at_the_page_bound() {
        let script = (0..MAX_PAGES)
            .map(|page| Ok(page_xml(&[&format!("{page}")], true, 50_000)))
            .collect();
        let fetcher = Fetcher::new(ScriptedApi::with_trading(script));
        let report = fetcher
            .fetch_active_listings("acct", None, far_deadline())
            .await
            .expect("report");
        assert!(report.truncated);
        assert_eq!(report.pages_fetched, MAX_PAGES);
        assert_eq!(report.listings.len(), MAX_PAGES as usize);
        assert!(report.aborted.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_between_pages() {
        let api = ScriptedApi::with_trading(vec![
            Ok(page_xml(&["1"], true, 3)),
            Ok(page_xml(&["2"], true, 3)),
        ]);
        let fetcher = Fetcher::new(api);
        let deadline = Instant::now() + Duration::from_millis(300);
        let report = fetcher
            .fetch_active_listings("acct", None, deadline)
            .await
            .expect("report");
        assert_eq!(report.pages_fetched, 2);
        let aborted = report.aborted.expect("aborted");
        assert!(aborted.contains("timed out after 2 pages"));
    }

    #[tokio::test(start_paused = true)]
    async fn count_probe_asks_for_a_single_entry() {
        let api = ScriptedApi::with_trading(vec![Ok(
            "<GetSellerListResponse><Ack>Success</Ack>\
             <TotalNumberOfEntries>5842</TotalNumberOfEntries></GetSellerListResponse>"
                .to_string(),
        )]);
        let fetcher = Fetcher::new(api.clone());
        let total = fetcher.fetch_listing_count("acct").await.expect("count");
        assert_eq!(total, 5842);
        let bodies = api.trading_calls();
        assert!(bodies[0].contains("<EntriesPerPage>1</EntriesPerPage>"));
        assert!(bodies[0].contains("<OutputSelector>TotalNumberOfEntries</OutputSelector>"));
    }

    #[tokio::test(start_paused = true)]
    async fn verify_user_returns_the_username() {
        let api = ScriptedApi::with_trading(vec![Ok(
            "<GetUserResponse><Ack>Success</Ack><User><UserID>closetseller</UserID></User>\
             </GetUserResponse>"
                .to_string(),
        )]);
        let fetcher = Fetcher::new(api);
        let username = fetcher.verify_user("acct").await.expect("user");
        assert_eq!(username.as_deref(), Some("closetseller"));
    }

    #[tokio::test(start_paused = true)]
    async fn rest_inventory_pages_by_offset() {
        let full_page: Vec<Value> = (0..REST_PAGE_LIMIT)
            .map(|i| {
                json!({
                    "sku": format!("SKU-{i}"),
                    "product": {"title": format!("Listing {i}")},
                    "availability": {"shipToLocationAvailability": {"quantity": 1}},
                })
            })
            .collect();
        let short_page: Vec<Value> = (0..3)
            .map(|i| json!({"sku": format!("TAIL-{i}"), "product": {"title": "Tail"}}))
            .collect();
        let api = ScriptedApi::with_rest(vec![
            Ok(json!({"total": 103, "inventoryItems": full_page})),
            Ok(json!({"total": 103, "inventoryItems": short_page})),
        ]);
        let fetcher = Fetcher::new(api.clone());
        let report = fetcher
            .fetch_all_inventory_items("acct")
            .await
            .expect("report");
        assert_eq!(report.listings.len(), 103);
        assert_eq!(report.total_reported, 103);
        assert!(!report.truncated);

        let paths = api.rest_paths.lock().expect("lock").clone();
        assert!(paths[0].ends_with("limit=100&offset=0"));
        assert!(paths[1].ends_with("limit=100&offset=100"));
    }

    #[test]
    fn parses_every_item_field() {
        let item = r#"
            <ItemID>110553260057</ItemID>
            <Title>Nike Tech Fleece Hoodie &amp; Joggers</Title>
            <Quantity>3</Quantity>
            <ListingType>FixedPriceItem</ListingType>
            <ViewItemURL>https://www.ebay.com/itm/110553260057</ViewItemURL>
            <SellingStatus><CurrentPrice currencyID="GBP">45.99</CurrentPrice></SellingStatus>
            <PrimaryCategory>
              <CategoryID>57990</CategoryID>
              <CategoryName>Clothing, Shoes &amp; Accessories</CategoryName>
            </PrimaryCategory>
            <PictureDetails>
              <PictureURL>https://i.ebayimg.com/1.jpg</PictureURL>
              <PictureURL>https://i.ebayimg.com/2.jpg</PictureURL>
            </PictureDetails>
            <ConditionID>1000</ConditionID>
            <ItemSpecifics>
              <NameValueList><Name>Brand</Name><Value>Nike</Value></NameValueList>
              <NameValueList><Name>Size</Name><Value>L</Value></NameValueList>
              <NameValueList><Name></Name><Value>orphan</Value></NameValueList>
            </ItemSpecifics>
        "#;
        let listing = parse_item(item);
        assert_eq!(listing.external_id, "110553260057");
        assert_eq!(listing.title, "Nike Tech Fleece Hoodie & Joggers");
        assert_eq!(listing.price, 45.99);
        assert_eq!(listing.currency, "GBP");
        assert_eq!(listing.quantity, 3);
        assert_eq!(listing.sku, "110553260057");
        assert_eq!(listing.condition, "Not Specified");
        assert_eq!(listing.condition_id, "1000");
        assert_eq!(listing.category_id, "57990");
        assert_eq!(listing.category_name, "Clothing, Shoes & Accessories");
        assert_eq!(listing.image_urls.len(), 2);
        assert_eq!(listing.item_specifics.len(), 2);
        assert_eq!(listing.item_specifics["Brand"], "Nike");
    }

    #[test]
    fn ack_failure_surfaces_the_long_message() {
        let body = "<GetSellerListResponse><Ack>Failure</Ack>\
                    <Errors><LongMessage>Invalid IAF token.</LongMessage></Errors>\
                    </GetSellerListResponse>";
        let err = parse_page(body).expect_err("should reject");
        match err {
            ProtocolError::Rejected(message) => assert_eq!(message, "Invalid IAF token."),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rest_item_maps_aspects_and_listing_id() {
        let item = json!({
            "sku": "SKU-9",
            "listingId": "110777",
            "product": {
                "title": "Vintage Starter Jacket",
                "aspects": {"Brand": ["Starter"], "Size": ["XL"], "Price": ["34.99"]},
                "imageUrls": ["https://i.ebayimg.com/9.jpg"],
            },
            "availability": {"shipToLocationAvailability": {"quantity": 2}},
        });
        let listing = parse_rest_item(&item);
        assert_eq!(listing.external_id, "110777");
        assert_eq!(listing.listing_url, "https://www.ebay.com/itm/110777");
        assert_eq!(listing.price, 34.99);
        assert_eq!(listing.quantity, 2);
        assert_eq!(listing.item_specifics["Brand"], "Starter");
        assert_eq!(listing.sku, "SKU-9");
    }
}
