//! HTTP indexing API client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{AccountStatus, ChainClient, ContractState, StackValue};
use crate::address::Address;
use crate::cell::{boc, Cell};
use crate::config::ChainRpcConfig;
use crate::error::{BridgeError, BridgeResult};

/// Client for a v3-style indexing API (`/account`, `/runGetMethod`, `/message`).
#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balance: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StackEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GetMethodResponse {
    exit_code: i32,
    #[serde(default)]
    stack: Vec<StackEntry>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_hash: String,
}

impl IndexerClient {
    pub fn new(config: &ChainRpcConfig) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.indexer_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn parse_body<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> BridgeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Rpc(format!("indexer returned {}: {}", status, text)));
        }
        Ok(response.json().await?)
    }
}

fn decode_cell(encoded: &str) -> BridgeResult<Arc<Cell>> {
    boc::deserialize_base64(encoded)
}

fn encode_stack(args: &[StackValue]) -> BridgeResult<Vec<StackEntry>> {
    args.iter()
        .map(|arg| {
            Ok(match arg {
                StackValue::Int(v) => StackEntry {
                    kind: "num".into(),
                    value: json!(format_int(*v)),
                },
                StackValue::Cell(c) => StackEntry {
                    kind: "cell".into(),
                    value: json!(boc::serialize_base64(c)?),
                },
                StackValue::Slice(c) => StackEntry {
                    kind: "slice".into(),
                    value: json!(boc::serialize_base64(c)?),
                },
                StackValue::Null => StackEntry {
                    kind: "null".into(),
                    value: serde_json::Value::Null,
                },
            })
        })
        .collect()
}

fn format_int(v: i128) -> String {
    if v < 0 {
        format!("-0x{:x}", v.unsigned_abs())
    } else {
        format!("0x{:x}", v)
    }
}

fn parse_int(raw: &str) -> BridgeResult<i128> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .map_err(|e| BridgeError::Rpc(format!("bad stack integer {}: {}", raw, e)))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn decode_stack(entries: Vec<StackEntry>) -> BridgeResult<Vec<StackValue>> {
    entries
        .into_iter()
        .map(|entry| {
            let text = entry.value.as_str().unwrap_or_default();
            match entry.kind.as_str() {
                "num" => Ok(StackValue::Int(parse_int(text)?)),
                "cell" => Ok(StackValue::Cell(decode_cell(text)?)),
                "slice" => Ok(StackValue::Slice(decode_cell(text)?)),
                "null" => Ok(StackValue::Null),
                other => Err(BridgeError::Rpc(format!("unsupported stack entry {}", other))),
            }
        })
        .collect()
}

#[async_trait]
impl ChainClient for IndexerClient {
    async fn contract_state(&self, address: &Address) -> BridgeResult<ContractState> {
        let response = self
            .authorize(self.http.get(self.url("account")))
            .query(&[("address", address.to_raw())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ContractState::nonexistent());
        }
        let account: AccountResponse = Self::parse_body(response).await?;

        let status = match account.status.as_deref() {
            Some("active") => AccountStatus::Active,
            Some("frozen") => AccountStatus::Frozen,
            Some("uninit") => AccountStatus::Uninit,
            _ => AccountStatus::Nonexist,
        };
        let code = match account.code.as_deref() {
            Some(c) if !c.is_empty() => Some(decode_cell(c)?),
            _ => None,
        };
        let data = match account.data.as_deref() {
            Some(d) if !d.is_empty() => Some(decode_cell(d)?),
            _ => None,
        };
        let balance = if account.balance.is_empty() {
            0
        } else {
            account
                .balance
                .parse()
                .map_err(|_| BridgeError::Rpc(format!("bad balance {}", account.balance)))?
        };

        debug!(%address, ?status, balance, "fetched account state");
        Ok(ContractState {
            balance,
            status,
            code,
            data,
        })
    }

    async fn run_get_method(
        &self,
        address: &Address,
        method: &str,
        args: &[StackValue],
    ) -> BridgeResult<Vec<StackValue>> {
        let body = json!({
            "address": address.to_raw(),
            "method": method,
            "stack": encode_stack(args)?,
        });
        let response = self
            .authorize(self.http.post(self.url("runGetMethod")))
            .json(&body)
            .send()
            .await?;
        let result: GetMethodResponse = Self::parse_body(response).await?;
        if result.exit_code != 0 && result.exit_code != 1 {
            warn!(%address, method, exit_code = result.exit_code, "get method failed");
            return Err(BridgeError::Rpc(format!(
                "{} on {} exited with {}",
                method, address, result.exit_code
            )));
        }
        decode_stack(result.stack)
    }

    async fn send_boc(&self, boc: &[u8]) -> BridgeResult<String> {
        let response = self
            .authorize(self.http.post(self.url("message")))
            .json(&json!({ "boc": STANDARD.encode(boc) }))
            .send()
            .await?;
        let sent: SendResponse = Self::parse_body(response).await?;
        debug!(hash = %sent.message_hash, "submitted external message");
        Ok(sent.message_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_formatting_round_trips() {
        for v in [0i128, 1, 255, -1, -4096, i64::MAX as i128] {
            assert_eq!(parse_int(&format_int(v)).unwrap(), v);
        }
        assert_eq!(parse_int("42").unwrap(), 42);
        assert!(parse_int("0xzz").is_err());
    }

    #[test]
    fn test_stack_decoding() {
        let cell = Arc::new(Cell::empty());
        let entries = encode_stack(&[
            StackValue::Int(7),
            StackValue::Slice(cell.clone()),
            StackValue::Null,
        ])
        .unwrap();
        let decoded = decode_stack(entries).unwrap();
        assert_eq!(decoded[0], StackValue::Int(7));
        assert_eq!(decoded[1], StackValue::Slice(cell));
        assert_eq!(decoded[2], StackValue::Null);
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = IndexerClient::new(&ChainRpcConfig {
            indexer_url: "https://indexer.local/api/v3/".into(),
            api_key: None,
            timeout_ms: 1_000,
        })
        .unwrap();
        assert_eq!(client.url("account"), "https://indexer.local/api/v3/account");
    }
}
