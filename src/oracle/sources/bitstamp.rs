//! Bitstamp v2 ticker

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{parse_price, PriceProvider};

const BITSTAMP_REST_URL: &str = "https://www.bitstamp.net/api/v2/ticker";

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
}

pub struct BitstampProvider {
    client: reqwest::Client,
    pair: String,
}

impl BitstampProvider {
    pub fn new(client: reqwest::Client, pair: &str) -> Self {
        Self {
            client,
            pair: pair.to_lowercase(),
        }
    }

    fn parse_body(body: &str) -> Result<Decimal> {
        let ticker: Ticker =
            serde_json::from_str(body).context("Failed to parse Bitstamp ticker")?;
        parse_price(&ticker.last)
    }
}

#[async_trait]
impl PriceProvider for BitstampProvider {
    fn name(&self) -> &str {
        "bitstamp"
    }

    async fn fetch(&self) -> Result<Decimal> {
        let url = format!("{}/{}/", BITSTAMP_REST_URL, self.pair);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch Bitstamp ticker")?;

        if !response.status().is_success() {
            bail!("Bitstamp API returned error: {}", response.status());
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
    fn parses_last_trade() {
        let body = r#"{"high":"0.53","last":"0.51872","timestamp":"1700000000","volume":"1"}"#;
        assert_eq!(BitstampProvider::parse_body(body).unwrap(), dec!(0.51872));
    }

    #[test]
    fn missing_last_is_a_failure() {
        assert!(BitstampProvider::parse_body(r#"{"high":"0.53"}"#).is_err());
    }
}
