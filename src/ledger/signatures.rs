//! Signature shares and the quorum collector
//!
//! The last round of a cycle exchanges each peer's signature over the
//! agreed payload. Every share must match our payload digest and recover to
//! its sender before the bundle is assembled in canonical signer order.

use ethers::types::{Signature, H256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

use super::transaction::TransactionPayload;
use crate::consensus::{RoundCoordinator, RoundId};
use crate::error::{OracleError, OracleResult};
use crate::identity::format_address;
use crate::types::PeerAddress;

/// One signer's multi-signature over a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlob {
    pub signer: PeerAddress,
    /// Account the signature acts for
    pub acting_account: String,
    /// Signing digest of the payload that was signed, upper hex
    pub payload_digest: String,
    /// 65-byte recoverable signature, lower hex
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureShare {
    pub sender: PeerAddress,
    pub blob: SignedBlob,
}

/// Check one share against the local payload
pub fn verify_share(
    payload: &TransactionPayload,
    expected_digest: &str,
    share: &SignatureShare,
) -> OracleResult<()> {
    let invalid = |reason: String| OracleError::InvalidShare {
        peer: share.sender.clone(),
        reason,
    };

    if share.blob.payload_digest != expected_digest {
        return Err(OracleError::DivergentPayload {
            peer: share.sender.clone(),
        });
    }
    if share.blob.signer != share.sender || share.blob.acting_account != share.sender.as_str() {
        return Err(invalid("share does not act for its sender".to_string()));
    }

    let digest = payload
        .multisign_digest(&share.blob.acting_account)
        .map_err(|e| invalid(e.to_string()))?;
    let bytes = hex::decode(share.blob.signature.trim_start_matches("0x"))
        .map_err(|e| invalid(format!("signature is not hex: {}", e)))?;
    let signature =
        Signature::try_from(bytes.as_slice()).map_err(|e| invalid(e.to_string()))?;
    let recovered = signature
        .recover(H256::from(digest))
        .map_err(|e| invalid(e.to_string()))?;

    if format_address(&recovered) != share.sender {
        return Err(invalid("signature does not recover to sender".to_string()));
    }
    Ok(())
}

/// Payload plus the full cohort's signatures, ready for submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignedTransaction {
    pub payload: TransactionPayload,
    /// Sorted by signer address
    pub shares: Vec<SignatureShare>,
}

impl MultiSignedTransaction {
    pub fn assemble(
        payload: TransactionPayload,
        shares: impl IntoIterator<Item = SignatureShare>,
    ) -> Self {
        let by_sender: BTreeMap<PeerAddress, SignatureShare> = shares
            .into_iter()
            .map(|share| (share.sender.clone(), share))
            .collect();
        Self {
            payload,
            shares: by_sender.into_values().collect(),
        }
    }

    /// Ledger JSON form with a `Signers` array
    pub fn to_tx_json(&self) -> anyhow::Result<serde_json::Value> {
        let mut tx = serde_json::to_value(&self.payload)?;
        let signers: Vec<serde_json::Value> = self
            .shares
            .iter()
            .map(|share| {
                serde_json::json!({
                    "Signer": {
                        "Account": share.blob.acting_account,
                        "TxnSignature": share.blob.signature.to_uppercase(),
                    }
                })
            })
            .collect();
        if let Some(obj) = tx.as_object_mut() {
            obj.insert("Signers".to_string(), serde_json::Value::Array(signers));
        }
        Ok(tx)
    }
}

/// Final round: exchange shares until exactly the cohort has signed
pub struct SignatureQuorumCollector<'a> {
    coordinator: &'a mut RoundCoordinator,
}

impl<'a> SignatureQuorumCollector<'a> {
    pub fn new(coordinator: &'a mut RoundCoordinator) -> Self {
        Self { coordinator }
    }

    pub async fn collect(
        &mut self,
        round: RoundId,
        payload: &TransactionPayload,
        local: &SignedBlob,
        cohort_size: usize,
        deadline: Instant,
    ) -> OracleResult<MultiSignedTransaction> {
        let expected = payload.digest_hex().map_err(OracleError::Ledger)?;

        let collected = self
            .coordinator
            .run_round(round, local, cohort_size, deadline)
            .await?
            .require_quorum()?;

        let shares: Vec<SignatureShare> = collected
            .into_iter()
            .map(|(sender, blob)| SignatureShare { sender, blob })
            .collect();

        for share in &shares {
            verify_share(payload, &expected, share)?;
        }

        tracing::info!(
            round = %round,
            shares = shares.len(),
            digest = %expected,
            "✍️ Signature quorum collected"
        );

        Ok(MultiSignedTransaction::assemble(payload.clone(), shares))
    }
}
