use crate::matching::{MatchCandidate, find_best_match};
use crate::models::{InventoryRecord, SyncErrorDetail};
use crate::normalize::NormalizedListing;
use crate::store::{ItemStore, MAX_BATCH_OPS, WriteOp};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fuzzy score at which a record without an external id gets the listing's
/// id attached instead of creating a duplicate.
pub const ATTACH_THRESHOLD: f64 = 0.8;
/// Fuzzy score at which a record that already belongs to another listing
/// is treated as the same physical item and the incoming listing skipped.
pub const STRONG_MATCH_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub fuzzy_match: bool,
    /// Barcode sequence numbers start at `barcode_base + 1`; page imports
    /// offset this by the page's position so numbers stay account-unique.
    pub barcode_base: u64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            fuzzy_match: true,
            barcode_base: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<SyncErrorDetail>,
}

struct Plan {
    ops: Vec<WriteOp>,
    skipped: u64,
}

/// Applies the fetched listings to the account's inventory. Writes are
/// flushed in batches of [`MAX_BATCH_OPS`]; a failed batch turns into one
/// error entry per op and the remaining batches still commit, so counters
/// only ever cover committed work.
pub async fn reconcile(
    store: &dyn ItemStore,
    account_id: &str,
    listings: &[NormalizedListing],
    existing: &[InventoryRecord],
    options: &ReconcileOptions,
) -> ReconcileOutcome {
    let plan = plan(account_id, listings, existing, options);
    let mut outcome = ReconcileOutcome {
        skipped: plan.skipped,
        ..ReconcileOutcome::default()
    };
    for batch in plan.ops.chunks(MAX_BATCH_OPS) {
        match store.batch_write(batch).await {
            Ok(()) => {
                for op in batch {
                    if op.is_create() {
                        outcome.imported += 1;
                    } else {
                        outcome.updated += 1;
                    }
                }
            }
            Err(err) => {
                warn!(
                    target = "sync.store",
                    account_id,
                    ops = batch.len(),
                    error = %err,
                    "batch_write_failed"
                );
                for op in batch {
                    outcome.errors.push(SyncErrorDetail {
                        item_ref: op.item_ref().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
    info!(
        target = "sync.store",
        account_id,
        imported = outcome.imported,
        updated = outcome.updated,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "reconcile_complete"
    );
    outcome
}

/// Decides create/update/skip per listing. Records claimed by one listing
/// are off the table for later ones, so two similar listings cannot both
/// land on the same record.
fn plan(
    account_id: &str,
    listings: &[NormalizedListing],
    existing: &[InventoryRecord],
    options: &ReconcileOptions,
) -> Plan {
    let mut by_external_id: HashMap<&str, usize> = HashMap::new();
    for (idx, record) in existing.iter().enumerate() {
        if let Some(id) = record.external_listing_id.as_deref()
            && !id.is_empty()
        {
            by_external_id.insert(id, idx);
        }
    }

    let now = Utc::now();
    let date_str = now.format("%Y%m%d").to_string();
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut ops = Vec::new();
    let mut skipped = 0u64;
    let mut barcode_seq = options.barcode_base;

    for listing in listings {
        if listing.external_id.is_empty() {
            skipped += 1;
            continue;
        }

        if let Some(&idx) = by_external_id.get(listing.external_id.as_str()) {
            claimed.insert(idx);
            let record = &existing[idx];
            let refreshed = refresh_record(record, listing, now);
            if watched_fields_changed(record, &refreshed) {
                ops.push(WriteOp::Update(refreshed));
            } else {
                skipped += 1;
            }
            continue;
        }

        if options.fuzzy_match
            && let Some((idx, similarity)) = best_unclaimed_match(&listing.title, existing, &claimed)
        {
            let record = &existing[idx];
            match record
                .external_listing_id
                .as_deref()
                .filter(|id| !id.is_empty())
            {
                None => {
                    claimed.insert(idx);
                    debug!(
                        target = "sync.store",
                        record_id = %record.id,
                        external_id = %listing.external_id,
                        similarity,
                        "attach_external_id"
                    );
                    ops.push(WriteOp::Update(refresh_record(record, listing, now)));
                    continue;
                }
                Some(_) if similarity >= STRONG_MATCH_THRESHOLD => {
                    claimed.insert(idx);
                    skipped += 1;
                    continue;
                }
                // Similar to a record that belongs to another listing, but
                // not similar enough to call it the same item.
                Some(_) => {}
            }
        }

        barcode_seq += 1;
        ops.push(WriteOp::Create(new_record(
            account_id,
            listing,
            &date_str,
            barcode_seq,
            now,
        )));
    }

    Plan { ops, skipped }
}

fn best_unclaimed_match(
    title: &str,
    existing: &[InventoryRecord],
    claimed: &HashSet<usize>,
) -> Option<(usize, f64)> {
    let mut index_by_id: HashMap<&str, usize> = HashMap::new();
    let mut candidates = Vec::new();
    for (idx, record) in existing.iter().enumerate() {
        if claimed.contains(&idx) {
            continue;
        }
        index_by_id.insert(record.id.as_str(), idx);
        candidates.push(MatchCandidate {
            id: &record.id,
            title: &record.title,
        });
    }
    let matched = find_best_match(title, &candidates, ATTACH_THRESHOLD)?;
    let idx = *index_by_id.get(matched.record_id.as_str())?;
    Some((idx, matched.similarity))
}

fn notes_line(listing: &NormalizedListing) -> String {
    format!(
        "Brand: {}. Condition: {}",
        listing.brand, listing.condition
    )
}

fn refresh_record(
    record: &InventoryRecord,
    listing: &NormalizedListing,
    now: DateTime<Utc>,
) -> InventoryRecord {
    InventoryRecord {
        title: listing.title.clone(),
        size: listing.size.clone(),
        tags: vec![listing.tag.as_str().to_string()],
        image_urls: listing.image_urls.clone(),
        price_cents: listing.price_cents,
        brand: listing.brand.clone(),
        category: listing.category.clone(),
        notes: notes_line(listing),
        external_listing_id: Some(listing.external_id.clone()),
        listing_url: listing.listing_url.clone(),
        sku: listing.sku.clone(),
        marketplace_detail: listing.detail.clone(),
        updated_at: now,
        ..record.clone()
    }
}

/// A skip only happens when none of these moved; status and barcode are
/// deliberately not refreshed from the marketplace.
fn watched_fields_changed(current: &InventoryRecord, refreshed: &InventoryRecord) -> bool {
    current.title != refreshed.title
        || current.size != refreshed.size
        || current.tags != refreshed.tags
        || current.price_cents != refreshed.price_cents
        || current.image_urls != refreshed.image_urls
        || current.notes != refreshed.notes
        || current.listing_url != refreshed.listing_url
        || current.marketplace_detail != refreshed.marketplace_detail
}

fn new_record(
    account_id: &str,
    listing: &NormalizedListing,
    date_str: &str,
    sequence: u64,
    now: DateTime<Utc>,
) -> InventoryRecord {
    InventoryRecord {
        id: Uuid::new_v4().to_string(),
        account_id: account_id.to_string(),
        title: listing.title.clone(),
        size: listing.size.clone(),
        status: "IN_STOCK".to_string(),
        tags: vec![listing.tag.as_str().to_string()],
        image_urls: listing.image_urls.clone(),
        price_cents: listing.price_cents,
        brand: listing.brand.clone(),
        category: listing.category.clone(),
        notes: notes_line(listing),
        barcode: barcode(account_id, date_str, sequence),
        external_listing_id: Some(listing.external_id.clone()),
        listing_url: listing.listing_url.clone(),
        sku: listing.sku.clone(),
        marketplace_detail: listing.detail.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// `INV-{YYYYMMDD}-{PFX}-{NNNNN}` where PFX is the first three characters
/// of the account id, uppercased, non-alphanumerics replaced by `0`.
pub fn barcode(account_id: &str, date_str: &str, sequence: u64) -> String {
    let prefix: String = account_id
        .chars()
        .take(3)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '0'
            }
        })
        .collect();
    format!("INV-{date_str}-{prefix}-{sequence:05}")
}
