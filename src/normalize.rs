use crate::models::RawListing;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The internal tag taxonomy. Every normalized listing lands on exactly
/// one of these; titles that match no rule default to `TShirts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Jersey,
    Hoodie,
    Polo,
    #[serde(rename = "Pullover/Jackets")]
    PulloverJackets,
    #[serde(rename = "T-shirts")]
    TShirts,
    Bottoms,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Jersey => "Jersey",
            Tag::Hoodie => "Hoodie",
            Tag::Polo => "Polo",
            Tag::PulloverJackets => "Pullover/Jackets",
            Tag::TShirts => "T-shirts",
            Tag::Bottoms => "Bottoms",
        }
    }
}

/// A raw listing after normalization, ready for reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedListing {
    pub external_id: String,
    pub title: String,
    pub tag: Tag,
    pub size: String,
    pub brand: String,
    pub price_cents: i64,
    pub quantity: i64,
    pub condition: String,
    pub category: String,
    pub image_urls: Vec<String>,
    pub listing_url: String,
    pub sku: String,
    /// Marketplace detail kept verbatim for later relisting.
    pub detail: serde_json::Value,
}

/// Maps a listing title onto the taxonomy. Rules are checked in priority
/// order and the first hit wins; `jersey` outranks everything because
/// jerseys are routinely titled "hoodie style" or "polo style".
pub fn classify_title(title: &str) -> Tag {
    let t = title.to_lowercase();
    let has = |needle: &str| t.contains(needle);

    if has("jersey") {
        return Tag::Jersey;
    }
    if has("hoodie") || has("hoody") || (has("sweatshirt") && !has("crewneck")) {
        return Tag::Hoodie;
    }
    if (has("polo") && has("shirt"))
        || (has("polo") && !has("ralph lauren") && !has("pullover"))
        || (has("lacoste") && !has("jacket"))
    {
        return Tag::Polo;
    }
    if has("jacket")
        || has("windbreaker")
        || has("bomber")
        || has("coat")
        || has("1/4 zip")
        || has("quarter zip")
        || has("quarter-zip")
        || has("fleece")
        || (has("pullover") && !has("hoodie"))
        || has("crewneck")
        || has("sweater")
    {
        return Tag::PulloverJackets;
    }
    if has("pant") || has("short") || has("jeans") || has("trouser") || has("bottom") {
        return Tag::Bottoms;
    }
    if has("t-shirt") || has("tshirt") || has("tee") || (has("shirt") && !has("polo")) {
        return Tag::TShirts;
    }
    Tag::TShirts
}

static SIZE_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\b(xxs|xs|small|medium|large|x-large|xx-large|xxx-large)\b")
            .expect("spelled size pattern"),
        Regex::new(r"(?i)\b(2xs|3xs|4xs|s|m|l|xl|2xl|3xl|4xl|xxl|xxxl|xxxxl)\b")
            .expect("abbreviated size pattern"),
        Regex::new(r"(?i)\bsize\s*(\w+)\b").expect("size prefix pattern"),
        Regex::new(r"(?i)\bmens?\s*(xxs|xs|s|m|l|xl|xxl|xxxl|2xl|3xl|4xl)\b")
            .expect("mens size pattern"),
    ]
});

/// Pulls a garment size out of a title. The cascade prefers spelled-out
/// sizes over bare letters so that "Small" beats the stray "s" of some
/// other word, then falls back to "Size 12" style and "Mens XL" style.
pub fn extract_size(title: &str) -> Option<String> {
    for pattern in SIZE_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(title) {
            let raw = captures.get(1)?.as_str();
            return Some(canonical_size(raw));
        }
    }
    None
}

fn canonical_size(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "small" => "S".to_string(),
        "medium" => "M".to_string(),
        "large" => "L".to_string(),
        "x-large" => "XL".to_string(),
        "xx-large" => "XXL".to_string(),
        "xxx-large" => "XXXL".to_string(),
        other => other.to_uppercase(),
    }
}

/// Raw listing -> normalized record fields. Total: missing fields take
/// documented defaults rather than failing the listing.
pub fn normalize(raw: &RawListing) -> NormalizedListing {
    let tag = classify_title(&raw.title);
    let size = extract_size(&raw.title)
        .or_else(|| raw.item_specifics.get("Size").cloned())
        .unwrap_or_default();
    let brand = raw
        .item_specifics
        .get("Brand")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let category = if raw.category_name.is_empty() {
        "Clothing".to_string()
    } else {
        raw.category_name.clone()
    };
    let listing_url = if raw.listing_url.is_empty() {
        format!("https://www.ebay.com/itm/{}", raw.external_id)
    } else {
        raw.listing_url.clone()
    };

    NormalizedListing {
        external_id: raw.external_id.clone(),
        title: raw.title.clone(),
        tag,
        size,
        brand,
        price_cents: (raw.price * 100.0).round() as i64,
        quantity: raw.quantity,
        condition: raw.condition.clone(),
        category,
        image_urls: raw.image_urls.clone(),
        listing_url,
        sku: raw.sku.clone(),
        detail: json!({
            "condition": raw.condition,
            "condition_id": raw.condition_id,
            "category_id": raw.category_id,
            "category_name": raw.category_name,
            "item_specifics": raw.item_specifics,
            "currency": raw.currency,
            "quantity": raw.quantity,
            "listing_type": raw.listing_type,
        }),
    }
}
