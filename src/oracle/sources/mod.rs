//! Price provider implementations (Binance, Bitstamp, Kraken)

mod binance;
mod bitstamp;
mod kraken;

pub use binance::BinanceProvider;
pub use bitstamp::BitstampProvider;
pub use kraken::KrakenProvider;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OracleConfig;

/// A single external price source
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Provider name, used as the quote's provenance key
    fn name(&self) -> &str;

    /// Fetch the current price. Errors are absorbed by the pool.
    async fn fetch(&self) -> Result<Decimal>;
}

/// Build the configured providers by name
pub fn registry(config: &OracleConfig) -> Result<Vec<Arc<dyn PriceProvider>>> {
    let client = http_client(Duration::from_millis(config.provider_timeout_ms))?;

    config
        .providers
        .iter()
        .map(|name| -> Result<Arc<dyn PriceProvider>> {
            match name.to_lowercase().as_str() {
                "binance" => Ok(Arc::new(BinanceProvider::new(
                    client.clone(),
                    &config.binance_symbol,
                ))),
                "bitstamp" => Ok(Arc::new(BitstampProvider::new(
                    client.clone(),
                    &config.bitstamp_pair,
                ))),
                "kraken" => Ok(Arc::new(KrakenProvider::new(
                    client.clone(),
                    &config.kraken_pair,
                ))),
                other => bail!("Unknown price provider '{}'", other),
            }
        })
        .collect()
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Parse a provider's price string; only positive values count as quotes
/// Quotes above this are treated as feed errors
pub(crate) const MAX_QUOTE: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

pub(crate) fn parse_price(raw: &str) -> Result<Decimal> {
    let value = Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .with_context(|| format!("unparsable price '{}'", raw))?;
    if value <= Decimal::ZERO {
        bail!("non-positive price {}", value);
    }
    if value > MAX_QUOTE {
        bail!("implausible price {}", value);
    }
    Ok(value)
}
