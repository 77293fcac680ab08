use crate::filter_utils::matches_filters;
use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
pub struct ExchangeInfo {
    pub symbols: Vec<Map<String, Value>>,
}

/// Fetch spot exchange info and return the base assets quoted in `quote_currency`
/// that match `filters`.
pub async fn fetch_base_assets(
    rest_base_url: &str,
    quote_currency: &str,
    filters: &HashMap<String, String>,
) -> anyhow::Result<Vec<String>> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/v3/exchangeInfo", rest_base_url.trim_end_matches('/'));
    let info: ExchangeInfo = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("failed to parse exchange info")?;

    let assets = base_assets(&info, quote_currency, filters);
    tracing::info!(
        count = assets.len(),
        quote = quote_currency,
        "Discovered symbols from exchange info"
    );
    Ok(assets)
}

fn base_assets(
    info: &ExchangeInfo,
    quote_currency: &str,
    filters: &HashMap<String, String>,
) -> Vec<String> {
    let mut filters = filters.clone();
    filters.insert("quoteAsset".to_string(), quote_currency.to_ascii_uppercase());

    info.symbols
        .iter()
        .filter(|s| matches_filters(s, &filters))
        .filter_map(|s| s.get("baseAsset").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
