//! Peer signing identity
//!
//! A secp256k1 key generated on first start and kept in a key file outside
//! any replicated state. Stable for the life of the process.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ledger::{SignedBlob, TransactionPayload, TransactionSigner};
use crate::types::PeerAddress;

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    secret: String,
}

/// Cohort address form: `0x` + 40 lowercase hex digits
pub fn format_address(address: &Address) -> PeerAddress {
    PeerAddress::new(format!("0x{}", hex::encode(address.as_bytes())))
}

pub struct PeerIdentity {
    wallet: LocalWallet,
    address: PeerAddress,
}

impl PeerIdentity {
    /// Fresh random key
    pub fn generate() -> Self {
        Self::from_wallet(LocalWallet::new(&mut rand::thread_rng()))
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
            .context("Key secret is not valid hex")?;
        let wallet = LocalWallet::from_bytes(&bytes).context("Key secret is not a valid key")?;
        Ok(Self::from_wallet(wallet))
    }

    fn from_wallet(wallet: LocalWallet) -> Self {
        let address = format_address(&wallet.address());
        Self { wallet, address }
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.wallet.signer().to_bytes())
    }

    /// `<key_dir>/<public_id>-key.json`
    pub fn key_path(key_dir: &Path, public_id: &str) -> PathBuf {
        key_dir.join(format!("{}-key.json", public_id))
    }

    /// Load this peer's key, creating it on first use
    pub fn load_or_generate(key_dir: &Path, public_id: &str) -> Result<Self> {
        let path = Self::key_path(key_dir, public_id);

        if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read key file {}", path.display()))?;
            let key: KeyFile = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed key file {}", path.display()))?;
            let identity = Self::from_secret_hex(&key.secret)?;
            tracing::info!(address = %identity.address, path = %path.display(), "🔑 Signing identity loaded");
            return Ok(identity);
        }

        fs::create_dir_all(key_dir)
            .with_context(|| format!("Failed to create key directory {}", key_dir.display()))?;
        let identity = Self::generate();
        let key = KeyFile {
            secret: identity.secret_hex(),
        };
        fs::write(&path, serde_json::to_string(&key)?)
            .with_context(|| format!("Failed to write key file {}", path.display()))?;

        tracing::info!(address = %identity.address, path = %path.display(), "🔑 New signing identity generated");
        Ok(identity)
    }

    fn sign_digest(&self, digest: [u8; 32]) -> Result<String> {
        let signature = self
            .wallet
            .sign_hash(H256::from(digest))
            .context("Failed to sign digest")?;
        Ok(hex::encode(signature.to_vec()))
    }
}

impl TransactionSigner for PeerIdentity {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    fn sign(&self, payload: &TransactionPayload) -> Result<SignedBlob> {
        Ok(SignedBlob {
            signer: self.address.clone(),
            acting_account: self.address.to_string(),
            payload_digest: payload.digest_hex()?,
            signature: self.sign_digest(payload.signing_digest()?)?,
        })
    }

    fn sign_as(&self, payload: &TransactionPayload, account: &str) -> Result<SignedBlob> {
        Ok(SignedBlob {
            signer: self.address.clone(),
            acting_account: account.to_string(),
            payload_digest: payload.digest_hex()?,
            signature: self.sign_digest(payload.multisign_digest(account)?)?,
        })
    }
}

impl std::fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("cohort-oracle-{}-{}-{}", tag, std::process::id(), nanos))
    }

    #[test]
    fn address_is_lowercase_hex() {
        let id = PeerIdentity::generate();
        let addr = id.address().as_str();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
        assert_eq!(addr, addr.to_lowercase());
    }

    #[test]
    fn secret_round_trips_to_same_address() {
        let id = PeerIdentity::generate();
        let restored = PeerIdentity::from_secret_hex(&id.secret_hex()).unwrap();
        assert_eq!(restored.address(), id.address());
    }

    #[test]
    fn key_file_is_created_once_and_reused() {
        let dir = scratch_dir("identity");
        let first = PeerIdentity::load_or_generate(&dir, "peer-a").unwrap();
        assert!(PeerIdentity::key_path(&dir, "peer-a").exists());

        let second = PeerIdentity::load_or_generate(&dir, "peer-a").unwrap();
        assert_eq!(first.address(), second.address());

        let other = PeerIdentity::load_or_generate(&dir, "peer-b").unwrap();
        assert_ne!(first.address(), other.address());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = scratch_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(PeerIdentity::key_path(&dir, "peer-x"), "not json").unwrap();
        assert!(PeerIdentity::load_or_generate(&dir, "peer-x").is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
