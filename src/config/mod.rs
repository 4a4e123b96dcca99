//! Configuration management for the oracle peer
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub oracle: OracleConfig,
    pub consensus: ConsensusConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Public identifier of this peer, used to name its key file
    pub public_id: String,
    /// Directory for the signing key, kept outside any replicated state
    pub key_dir: String,
    /// Directory for the cycle journal
    pub data_dir: String,
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Active providers by name (binance, bitstamp, kraken)
    pub providers: Vec<String>,
    /// Per-provider fetch timeout in milliseconds
    pub provider_timeout_ms: u64,
    pub binance_symbol: String,
    pub bitstamp_pair: String,
    pub kraken_pair: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Local UDP address for cohort traffic
    pub bind_addr: String,
    /// Every cohort member's UDP address, this peer included
    pub peers: Vec<String>,
    /// Cohort round time in milliseconds
    pub round_time_ms: u64,
    /// Seconds between oracle cycles
    pub cycle_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of a ledger node
    pub endpoint: String,
    /// Multi-signed account the price update is issued from
    pub source_account: String,
    /// Issuer account of the trust line
    pub destination_account: String,
    pub currency: String,
    /// Base fee in drops, scaled by cohort size + 1
    pub base_fee: u64,
    pub submit_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Node defaults
            .set_default("node.public_id", "peer-0")?
            .set_default("node.key_dir", "..")?
            .set_default("node.data_dir", "./data")?
            .set_default("node.log_level", "info")?
            .set_default("node.log_json", false)?
            // Oracle defaults
            .set_default("oracle.providers", vec!["bitstamp", "kraken", "binance"])?
            .set_default("oracle.provider_timeout_ms", 3000)?
            .set_default("oracle.binance_symbol", "XRPUSDT")?
            .set_default("oracle.bitstamp_pair", "xrpusd")?
            .set_default("oracle.kraken_pair", "XRPUSD")?
            // Consensus defaults
            .set_default("consensus.bind_addr", "0.0.0.0:8601")?
            .set_default("consensus.peers", Vec::<String>::new())?
            .set_default("consensus.round_time_ms", 2000)?
            .set_default("consensus.cycle_interval_secs", 60)?
            // Ledger defaults
            .set_default("ledger.endpoint", "https://s.altnet.rippletest.net:51234")?
            .set_default("ledger.source_account", "")?
            .set_default("ledger.destination_account", "")?
            .set_default("ledger.currency", "USD")?
            .set_default("ledger.base_fee", 10)?
            .set_default("ledger.submit_timeout_ms", 10000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE_*)
            .add_source(
                Environment::with_prefix("ORACLE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("oracle.providers")
                    .with_list_parse_key("consensus.peers")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations a cycle could never succeed with
    pub fn validate(&self) -> Result<()> {
        if self.consensus.peers.is_empty() {
            bail!("consensus.peers must list every cohort member");
        }
        if self.oracle.providers.is_empty() {
            bail!("oracle.providers must name at least one provider");
        }
        if self.consensus.round_time_ms == 0 {
            bail!("consensus.round_time_ms must be positive");
        }
        if self.consensus.cycle_interval_secs == 0 {
            bail!("consensus.cycle_interval_secs must be positive");
        }
        if self.ledger.source_account.trim().is_empty() {
            bail!("ledger.source_account is not set");
        }
        if self.ledger.destination_account.trim().is_empty() {
            bail!("ledger.destination_account is not set");
        }
        Ok(())
    }

    /// Cohort size is the number of configured peers
    pub fn cohort_size(&self) -> usize {
        self.consensus.peers.len()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.consensus
            .bind_addr
            .parse()
            .with_context(|| format!("invalid consensus.bind_addr '{}'", self.consensus.bind_addr))
    }

    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.consensus
            .peers
            .iter()
            .map(|p| {
                p.parse()
                    .with_context(|| format!("invalid peer address '{}'", p))
            })
            .collect()
    }

    pub fn round_time(&self) -> Duration {
        Duration::from_millis(self.consensus.round_time_ms)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "peer={} cohort={} providers={:?} round_time_ms={} interval_secs={} account={}",
            self.node.public_id,
            self.cohort_size(),
            self.oracle.providers,
            self.consensus.round_time_ms,
            self.consensus.cycle_interval_secs,
            self.ledger.source_account
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
