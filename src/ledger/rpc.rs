//! JSON-RPC ledger client
//!
//! Reads the account sequence with `account_info` and hands bundles to
//! `submit_multisigned`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Ledger, MultiSignedTransaction, SubmitResult};

pub struct JsonRpcLedger {
    client: Client,
    endpoint: String,
}

impl JsonRpcLedger {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "method": method, "params": [params] });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ledger request {} failed", method))?;

        if !response.status().is_success() {
            bail!("Ledger {} returned HTTP {}", method, response.status());
        }

        let reply: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse ledger {} response", method))?;
        extract_result(method, reply)
    }
}

fn extract_result(method: &str, reply: Value) -> Result<Value> {
    let result = reply
        .get("result")
        .cloned()
        .with_context(|| format!("Ledger {} response has no result", method))?;

    if result.get("status").and_then(Value::as_str) == Some("error") || result.get("error").is_some()
    {
        let error = result
            .get("error_message")
            .or_else(|| result.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Ledger {} error: {}", method, error);
    }
    Ok(result)
}

fn parse_sequence(result: &Value) -> Result<u32> {
    let sequence = result
        .pointer("/account_data/Sequence")
        .and_then(Value::as_u64)
        .context("account_info result has no Sequence")?;
    u32::try_from(sequence).context("account sequence out of range")
}

fn parse_submit(result: &Value) -> Result<SubmitResult> {
    let engine_result = result
        .get("engine_result")
        .and_then(Value::as_str)
        .context("submit result has no engine_result")?
        .to_string();
    Ok(SubmitResult {
        engine_result,
        engine_result_message: result
            .get("engine_result_message")
            .and_then(Value::as_str)
            .map(str::to_string),
        tx_hash: result
            .pointer("/tx_json/hash")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn account_sequence(&self, account: &str) -> Result<u32> {
        let result = self
            .call(
                "account_info",
                json!({ "account": account, "ledger_index": "current" }),
            )
            .await?;
        parse_sequence(&result)
    }

    async fn submit(&self, bundle: &MultiSignedTransaction) -> Result<SubmitResult> {
        let tx_json = bundle.to_tx_json()?;
        let result = self
            .call("submit_multisigned", json!({ "tx_json": tx_json }))
            .await?;
        parse_submit(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_read_from_account_data() {
        let reply = json!({
            "result": {
                "account_data": { "Account": "rSource", "Sequence": 4211 },
                "status": "success"
            }
        });
        let result = extract_result("account_info", reply).unwrap();
        assert_eq!(parse_sequence(&result).unwrap(), 4211);
    }

    #[test]
    fn error_results_are_reported() {
        let reply = json!({
            "result": {
                "error": "actNotFound",
                "error_message": "Account not found.",
                "status": "error"
            }
        });
        let err = extract_result("account_info", reply).unwrap_err();
        assert!(err.to_string().contains("Account not found."));
    }

    #[test]
    fn submit_result_is_parsed() {
        let result = json!({
            "engine_result": "tesSUCCESS",
            "engine_result_message": "The transaction was applied.",
            "tx_json": { "hash": "ABCDEF" }
        });
        let submit = parse_submit(&result).unwrap();
        assert!(submit.is_accepted());
        assert_eq!(submit.tx_hash.as_deref(), Some("ABCDEF"));
    }

    #[test]
    fn rejected_submission_is_not_accepted() {
        let result = json!({ "engine_result": "tefBAD_QUORUM" });
        assert!(!parse_submit(&result).unwrap().is_accepted());
    }
}
