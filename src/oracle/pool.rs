//! Concurrent provider fan-out with per-provider failure isolation

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::oracle::sources::PriceProvider;
use crate::types::Quote;

pub struct ProviderPool {
    providers: Vec<Arc<dyn PriceProvider>>,
    timeout: Duration,
}

impl ProviderPool {
    pub fn new(providers: Vec<Arc<dyn PriceProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fetch every provider at once. One quote per provider, in configured
    /// order; failures and timeouts come back absent and are never retried.
    pub async fn fetch_all(&self) -> Vec<Quote> {
        let fetches = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let timeout = self.timeout;
            async move {
                let name = provider.name().to_string();
                match tokio::time::timeout(timeout, provider.fetch()).await {
                    Ok(Ok(value)) => {
                        tracing::debug!(provider = %name, price = %value, "Quote received");
                        Quote::present(name, value)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(provider = %name, error = %e, "Provider failed, quote absent");
                        Quote::absent(name)
                    }
                    Err(_) => {
                        tracing::warn!(
                            provider = %name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Provider timed out, quote absent"
                        );
                        Quote::absent(name)
                    }
                }
            }
        });

        let quotes = join_all(fetches).await;
        tracing::info!(
            present = quotes.iter().filter(|q| q.is_present()).count(),
            total = quotes.len(),
            "📥 Provider quotes collected"
        );
        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixed(&'static str, Decimal);

    #[async_trait]
    impl PriceProvider for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        async fn fetch(&self) -> Result<Decimal> {
            Ok(self.1)
        }
    }

    struct Broken;

    #[async_trait]
    impl PriceProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn fetch(&self) -> Result<Decimal> {
            bail!("malformed response")
        }
    }

    struct Stalled;

    #[async_trait]
    impl PriceProvider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn fetch(&self) -> Result<Decimal> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(dec!(1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_become_absent_without_aborting_the_batch() {
        let pool = ProviderPool::new(
            vec![
                Arc::new(Fixed("a", dec!(0.51))),
                Arc::new(Broken),
                Arc::new(Stalled),
                Arc::new(Fixed("b", dec!(0.50))),
            ],
            Duration::from_millis(500),
        );

        let quotes = pool.fetch_all().await;
        assert_eq!(quotes.len(), 4);
        assert_eq!(quotes[0], Quote::present("a", dec!(0.51)));
        assert_eq!(quotes[1], Quote::absent("broken"));
        assert_eq!(quotes[2], Quote::absent("stalled"));
        assert_eq!(quotes[3], Quote::present("b", dec!(0.50)));
    }

    #[tokio::test(start_paused = true)]
    async fn providers_run_concurrently() {
        let pool = ProviderPool::new(
            vec![Arc::new(Stalled), Arc::new(Stalled), Arc::new(Stalled)],
            Duration::from_millis(500),
        );
        let start = tokio::time::Instant::now();
        pool.fetch_all().await;
        assert!(start.elapsed() < Duration::from_millis(1000));
    }
}
