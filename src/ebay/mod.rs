pub mod auth;
pub mod client;
pub mod config;
pub mod fetch;
pub mod xml;

pub use client::{EbayClient, ProtocolError, TradingApi};
pub use fetch::{FetchReport, Fetcher};
