//! Binance spot ticker

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{parse_price, PriceProvider};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3/ticker/price";

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

pub struct BinanceProvider {
    client: reqwest::Client,
    symbol: String,
}

impl BinanceProvider {
    pub fn new(client: reqwest::Client, symbol: &str) -> Self {
        Self {
            client,
            symbol: symbol.to_uppercase(),
        }
    }

    fn parse_body(body: &str) -> Result<Decimal> {
        let ticker: TickerPrice =
            serde_json::from_str(body).context("Failed to parse Binance ticker")?;
        parse_price(&ticker.price)
    }
}

#[async_trait]
impl PriceProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch(&self) -> Result<Decimal> {
        let response = self
            .client
            .get(BINANCE_REST_URL)
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await
            .context("Failed to fetch Binance ticker")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
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
    fn parses_ticker_price() {
        let body = r#"{"symbol":"XRPUSDT","price":"0.52140000"}"#;
        assert_eq!(BinanceProvider::parse_body(body).unwrap(), dec!(0.5214));
    }

    #[test]
    fn error_payload_is_a_failure() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        assert!(BinanceProvider::parse_body(body).is_err());
    }
}
