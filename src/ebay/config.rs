use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static APP_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_APP_ID_PRODUCTION").unwrap_or_default());

pub static APP_SECRET: Lazy<String> =
    Lazy::new(|| env::var("EBAY_CERT_ID_PRODUCTION").unwrap_or_default());

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if is_production() {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

pub static TRADING_API_URL: Lazy<String> = Lazy::new(|| {
    if is_production() {
        "https://api.ebay.com/ws/api.dll".to_string()
    } else {
        "https://api.sandbox.ebay.com/ws/api.dll".to_string()
    }
});

/// Trading API schema version sent as `X-EBAY-API-COMPATIBILITY-LEVEL`
/// and as `<Version>` in request bodies.
pub const COMPATIBILITY_LEVEL: &str = "1209";

/// Site 0 is ebay.com.
pub const SITE_ID: &str = "0";

pub const MARKETPLACE_ID: &str = "EBAY_US";

fn is_production() -> bool {
    EBAY_ENV.as_str().eq_ignore_ascii_case("PROD")
}
