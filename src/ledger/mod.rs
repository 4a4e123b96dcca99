//! Ledger module - transaction assembly, signing and submission
//!
//! The ledger itself is an external collaborator: this module only needs an
//! account sequence, a signing capability and a submit endpoint.

mod rpc;
mod signatures;
mod transaction;

pub use rpc::JsonRpcLedger;
pub use signatures::{
    verify_share, MultiSignedTransaction, SignatureQuorumCollector, SignatureShare, SignedBlob,
};
pub use transaction::{
    sha512_half, AgreedValues, LimitAmount, Memo, MemoWrapper, SignerEntry, SignerEntryWrapper,
    TransactionAssembler, TransactionPayload, TrustLineSettings, MEMO_FORMAT, TRANSACTION_TYPE,
    TRUST_SET_FLAGS,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::PeerAddress;

/// Engine response to a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub engine_result: String,
    pub engine_result_message: Option<String>,
    pub tx_hash: Option<String>,
}

impl SubmitResult {
    /// tesSUCCESS, or queued/held results the ledger may still apply
    pub fn is_accepted(&self) -> bool {
        self.engine_result == "tesSUCCESS" || self.engine_result.starts_with("ter")
    }
}

/// Ledger network access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Next sequence number of `account`
    async fn account_sequence(&self, account: &str) -> Result<u32>;

    /// Submit a fully multi-signed transaction
    async fn submit(&self, bundle: &MultiSignedTransaction) -> Result<SubmitResult>;
}

/// Local signing capability
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> &PeerAddress;

    /// Single-signature over the payload
    fn sign(&self, payload: &TransactionPayload) -> Result<SignedBlob>;

    /// Signature for a multi-signed transaction, acting for `account`
    fn sign_as(&self, payload: &TransactionPayload, account: &str) -> Result<SignedBlob>;
}
