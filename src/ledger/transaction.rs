//! Transaction assembler
//!
//! Builds the unsigned trust-line price update from agreed values only.
//! Peers holding the same agreed inputs produce byte-identical payloads,
//! which is what lets their independent signatures combine.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;

use crate::types::{fixed8, PeerAddress};

pub const TRANSACTION_TYPE: &str = "TrustSet";
/// tfSetNoRipple
pub const TRUST_SET_FLAGS: u32 = 131_072;
pub const MEMO_FORMAT: &str = "text/csv";

const SINGLE_SIGN_PREFIX: [u8; 4] = *b"STX\0";
const MULTI_SIGN_PREFIX: [u8; 4] = *b"SMT\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignerEntry {
    pub account: String,
    pub signer_weight: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEntryWrapper {
    #[serde(rename = "SignerEntry")]
    pub signer_entry: SignerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitAmount {
    pub currency: String,
    pub issuer: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Memo {
    pub memo_data: String,
    pub memo_format: String,
    pub memo_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoWrapper {
    #[serde(rename = "Memo")]
    pub memo: Memo,
}

/// Unsigned transaction body. Field order is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionPayload {
    pub transaction_type: String,
    pub account: String,
    pub fee: String,
    pub flags: u32,
    pub sequence: u32,
    pub signer_quorum: u32,
    pub signer_entries: Vec<SignerEntryWrapper>,
    pub limit_amount: LimitAmount,
    pub memos: Vec<MemoWrapper>,
    /// Empty for multi-signed transactions
    pub signing_pub_key: String,
}

impl TransactionPayload {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize transaction payload")
    }

    /// Identity of the payload, shared by every peer's share
    pub fn signing_digest(&self) -> Result<[u8; 32]> {
        Ok(sha512_half(&[
            &SINGLE_SIGN_PREFIX[..],
            &self.canonical_bytes()?[..],
        ]))
    }

    /// What one signer signs when acting for `account` in a multi-signature
    pub fn multisign_digest(&self, account: &str) -> Result<[u8; 32]> {
        Ok(sha512_half(&[
            &MULTI_SIGN_PREFIX[..],
            &self.canonical_bytes()?[..],
            account.as_bytes(),
        ]))
    }

    pub fn digest_hex(&self) -> Result<String> {
        Ok(hex::encode_upper(self.signing_digest()?))
    }

    pub fn signer_accounts(&self) -> impl Iterator<Item = &str> {
        self.signer_entries
            .iter()
            .map(|e| e.signer_entry.account.as_str())
    }
}

/// First 256 bits of SHA-512 over the concatenated parts
pub fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let full = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}

/// Static trust-line parameters from configuration
#[derive(Debug, Clone)]
pub struct TrustLineSettings {
    pub source_account: String,
    pub issuer: String,
    pub currency: String,
    pub base_fee: u64,
}

/// Agreed inputs of one cycle's transaction
#[derive(Debug, Clone)]
pub struct AgreedValues<'a> {
    pub price: Decimal,
    /// Filtered median per peer
    pub rates: &'a BTreeMap<PeerAddress, Decimal>,
    pub signers: &'a [PeerAddress],
    pub cohort_size: usize,
    pub sequence: u32,
}

pub struct TransactionAssembler {
    settings: TrustLineSettings,
}

impl TransactionAssembler {
    pub fn new(settings: TrustLineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrustLineSettings {
        &self.settings
    }

    /// Fee scales with signer count: `(cohort_size + 1) * base_fee`
    pub fn fee(&self, cohort_size: usize) -> u64 {
        (cohort_size as u64 + 1) * self.settings.base_fee
    }

    pub fn build(&self, agreed: &AgreedValues<'_>) -> Result<TransactionPayload> {
        let mut accounts: Vec<&PeerAddress> = agreed.signers.iter().collect();
        accounts.sort();
        accounts.dedup();

        let signer_entries = accounts
            .into_iter()
            .map(|account| SignerEntryWrapper {
                signer_entry: SignerEntry {
                    account: account.to_string(),
                    signer_weight: 1,
                },
            })
            .collect();

        let rates: BTreeMap<&PeerAddress, Decimal> = agreed
            .rates
            .iter()
            .map(|(peer, value)| (peer, fixed8(*value)))
            .collect();
        let ordered_rates: Vec<Decimal> = rates.values().copied().collect();

        let memo_data = serde_json::to_string(&rates).context("Failed to encode rate memo")?;
        let memo_type = format!(
            "rates:{}",
            serde_json::to_string(&ordered_rates).context("Failed to encode rate list")?
        );

        Ok(TransactionPayload {
            transaction_type: TRANSACTION_TYPE.to_string(),
            account: self.settings.source_account.clone(),
            fee: self.fee(agreed.cohort_size).to_string(),
            flags: TRUST_SET_FLAGS,
            sequence: agreed.sequence,
            signer_quorum: agreed.cohort_size as u32,
            signer_entries,
            limit_amount: LimitAmount {
                currency: self.settings.currency.clone(),
                issuer: self.settings.issuer.clone(),
                value: fixed8(agreed.price).to_string(),
            },
            memos: vec![MemoWrapper {
                memo: Memo {
                    memo_data: hex::encode_upper(memo_data.as_bytes()),
                    memo_format: hex::encode_upper(MEMO_FORMAT.as_bytes()),
                    memo_type: hex::encode_upper(memo_type.as_bytes()),
                },
            }],
            signing_pub_key: String::new(),
        })
    }
}
