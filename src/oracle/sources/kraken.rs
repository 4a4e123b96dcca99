//! Kraken public ticker

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use super::{parse_price, PriceProvider};

const KRAKEN_REST_URL: &str = "https://api.kraken.com/0/public/Ticker";

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, TickerInfo>,
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    /// Last trade closed: [price, lot volume]
    c: Vec<String>,
}

pub struct KrakenProvider {
    client: reqwest::Client,
    pair: String,
}

impl KrakenProvider {
    pub fn new(client: reqwest::Client, pair: &str) -> Self {
        Self {
            client,
            pair: pair.to_uppercase(),
        }
    }

    /// Kraken keys the result by its own pair name (e.g. XXRPZUSD), and only
    /// one pair is requested, so take the single entry.
    fn parse_body(body: &str) -> Result<Decimal> {
        let response: TickerResponse =
            serde_json::from_str(body).context("Failed to parse Kraken ticker")?;
        if !response.error.is_empty() {
            bail!("Kraken API error: {}", response.error.join(", "));
        }
        let info = response
            .result
            .values()
            .next()
            .context("Kraken ticker result is empty")?;
        let last = info.c.first().context("Kraken ticker has no close price")?;
        parse_price(last)
    }
}

#[async_trait]
impl PriceProvider for KrakenProvider {
    fn name(&self) -> &str {
        "kraken"
    }

    async fn fetch(&self) -> Result<Decimal> {
        let response = self
            .client
            .get(KRAKEN_REST_URL)
            .query(&[("pair", self.pair.as_str())])
            .send()
            .await
            .context("Failed to fetch Kraken ticker")?;

        if !response.status().is_success() {
            bail!("Kraken API returned error: {}", response.status());
        }

        let body = response.text().await?;
        Self::parse_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_close_price() {
        let body = r#"{"error":[],"result":{"XXRPZUSD":{"a":["0.52","1","1.0"],"c":["0.51990000","12.5"]}}}"#;
        assert_eq!(KrakenProvider::parse_body(body).unwrap(), dec!(0.5199));
    }

    #[test]
    fn api_errors_are_failures() {
        let body = r#"{"error":["EQuery:Unknown asset pair"]}"#;
        assert!(KrakenProvider::parse_body(body).is_err());
    }

    #[test]
    fn empty_result_is_a_failure() {
        assert!(KrakenProvider::parse_body(r#"{"error":[],"result":{}}"#).is_err());
    }
}
