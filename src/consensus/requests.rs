//! User requests answered from the last completed cycle
//!
//! Requests arrive one JSON object per line; each gets one JSON line back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use super::oracle::CycleReport;
use crate::types::PeerAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key")]
pub enum UserRequest {
    /// Sorted proposals and the active submitter
    #[serde(rename = "fetch_contracts")]
    FetchContracts,
    /// Canonical signer entries of the last payload
    #[serde(rename = "sendClientsSigners")]
    SendClientsSigners,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub address: PeerAddress,
    pub value: u32,
}

impl UserRequest {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn answer(&self, report: Option<&CycleReport>) -> Value {
        let Some(report) = report else {
            return json!({ "error": "no completed cycle yet" });
        };

        match self {
            UserRequest::FetchContracts => {
                let contracts: Vec<ContractEntry> = report
                    .proposals
                    .iter()
                    .map(|(address, value)| ContractEntry {
                        address: address.clone(),
                        value: *value,
                    })
                    .collect();
                json!({
                    "cycle": report.cycle,
                    "contracts": contracts,
                    "active_contract": report.leader.leader,
                })
            }
            UserRequest::SendClientsSigners => json!({
                "cycle": report.cycle,
                "signers": report.signers,
            }),
        }
    }
}

/// Parse and answer one raw request; malformed input gets an error reply
pub fn respond(raw: &str, report: Option<&CycleReport>) -> Value {
    match UserRequest::parse(raw) {
        Ok(request) => request.answer(report),
        Err(e) => {
            tracing::debug!(error = %e, "Unrecognised user request");
            json!({ "error": format!("unrecognised request: {}", e) })
        }
    }
}

/// Answer line-delimited requests from `reader` until it closes, using
/// whatever report the scheduler published last
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    reports: watch::Receiver<Option<CycleReport>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = respond(&line, reports.borrow().as_ref());
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        writer.write_all(&out).await.context("Failed to write reply")?;
        writer.flush().await.context("Failed to flush reply")?;
    }
    Ok(())
}
