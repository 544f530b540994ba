//! Value types shared by the batching engine, senders and tracker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cell::Cell;
use crate::config::Network;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTBOUND MESSAGES
// ═══════════════════════════════════════════════════════════════════════════════

/// One internal message to be sent from a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    to: Address,
    value: u128,
    payload: Arc<Cell>,
    bounce: bool,
}

impl OutboundMessage {
    /// Bounceable message with the given payload.
    pub fn new(to: Address, value: u128, payload: Arc<Cell>) -> Self {
        Self {
            to,
            value,
            payload,
            bounce: true,
        }
    }

    /// Plain value transfer with an empty body.
    pub fn transfer(to: Address, value: u128) -> Self {
        Self::new(to, value, Arc::new(Cell::empty()))
    }

    pub fn with_bounce(mut self, bounce: bool) -> Self {
        self.bounce = bounce;
        self
    }

    pub fn to(&self) -> &Address {
        &self.to
    }

    /// Value in nanotons.
    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn payload(&self) -> &Arc<Cell> {
        &self.payload
    }

    pub fn bounce(&self) -> bool {
        self.bounce
    }
}

/// Messages submitted atomically by one logical call.
#[derive(Debug, Clone)]
pub struct ShardTransaction {
    pub messages: Vec<OutboundMessage>,
    /// Unix seconds after which the transaction must not be accepted.
    pub valid_until: u64,
    pub network: Network,
}

impl ShardTransaction {
    pub fn new(messages: Vec<OutboundMessage>, valid_until: u64, network: Network) -> Self {
        Self {
            messages,
            valid_until,
            network,
        }
    }

    /// Sum of attached values.
    pub fn total_value(&self) -> u128 {
        self.messages.iter().map(|m| m.value()).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEND RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw outcome of handing one or more groups to the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    /// Hex hashes of the external messages (or approver receipts) submitted.
    pub external_hashes: Vec<String>,
    /// Messages accepted by the transport.
    pub messages_sent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSACTION LINKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Link between a local submission and the remote operation it triggers.
///
/// Every field except `send_result` is visible on chain in the cross-chain
/// payload, so another process can rebuild the linker and resume tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLinker {
    caller: String,
    shard_count: u32,
    shards_key: String,
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    send_result: Option<SendOutcome>,
}

impl TransactionLinker {
    pub fn new(
        caller: &Address,
        shard_count: u32,
        shards_key: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            caller: caller.to_raw(),
            shard_count,
            shards_key: shards_key.into(),
            timestamp,
            send_result: None,
        }
    }

    /// Copy of this linker carrying a send result.
    pub fn with_send_result(&self, result: SendOutcome) -> Self {
        Self {
            send_result: Some(result),
            ..self.clone()
        }
    }

    /// Caller address in raw form.
    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shards_key(&self) -> &str {
        &self.shards_key
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn send_result(&self) -> Option<&SendOutcome> {
        self.send_result.as_ref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKING
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle issued by the tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// `None` for the empty string, which the service uses for "not yet known".
    pub fn from_response(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transaction reference inside a stage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRef {
    pub hash: String,
    #[serde(default)]
    pub blockchain_type: String,
}

/// Diagnostic note attached to a failed stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageNote {
    pub content: String,
    pub error_name: String,
    pub internal_msg: String,
    pub internal_bytes_error: String,
}

/// Data recorded for one execution stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageData {
    pub success: bool,
    pub timestamp: u64,
    pub transactions: Option<Vec<TransactionRef>>,
    pub note: Option<StageNote>,
}

/// Whether a stage was reached and what it recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageRecord {
    pub exists: bool,
    pub stage_data: Option<StageData>,
}

impl StageRecord {
    /// Reached and recorded as failed.
    pub fn failed(&self) -> bool {
        self.exists && self.stage_data.as_ref().map(|d| !d.success).unwrap_or(false)
    }
}

/// Kind of operation as classified by the tracking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Pending,
    EvmTvm,
    TvmEvm,
    TvmEvmTvm,
    Rollback,
    Unknown,
}

impl Default for OperationType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Stage profiling record of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionStages {
    pub operation_type: OperationType,
    #[serde(rename = "collectedInEVM")]
    pub collected_in_evm: StageRecord,
    #[serde(rename = "includedInEVMConsensus")]
    pub included_in_evm_consensus: StageRecord,
    #[serde(rename = "executedInEVM")]
    pub executed_in_evm: StageRecord,
    #[serde(rename = "collectedInTVM")]
    pub collected_in_tvm: StageRecord,
    #[serde(rename = "includedInTVMConsensus")]
    pub included_in_tvm_consensus: StageRecord,
    #[serde(rename = "executedInTVM")]
    pub executed_in_tvm: StageRecord,
}

impl ExecutionStages {
    /// Stages in execution order, with their wire names.
    pub fn stages(&self) -> [(&'static str, &StageRecord); 6] {
        [
            ("collectedInTVM", &self.collected_in_tvm),
            ("includedInEVMConsensus", &self.included_in_evm_consensus),
            ("executedInEVM", &self.executed_in_evm),
            ("collectedInEVM", &self.collected_in_evm),
            ("includedInTVMConsensus", &self.included_in_tvm_consensus),
            ("executedInTVM", &self.executed_in_tvm),
        ]
    }

    /// First stage recorded as failed, if any.
    pub fn first_failure(&self) -> Option<&'static str> {
        self.stages()
            .into_iter()
            .find(|(_, record)| record.failed())
            .map(|(name, _)| name)
    }
}

/// Current stage of an operation as returned by batch status queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusInfo {
    pub stage: String,
    pub success: bool,
    pub timestamp: u64,
    pub transactions: Option<Vec<TransactionRef>>,
    pub note: Option<StageNote>,
}

/// Status reduced for simple consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimplifiedStatus {
    Pending,
    Successful,
    Failed,
    OperationIdNotFound,
}

impl SimplifiedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

impl fmt::Display for SimplifiedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::OperationIdNotFound => "OPERATION_ID_NOT_FOUND",
        };
        f.write_str(s)
    }
}

/// Shard keys of one caller, resolved to operation ids.
pub type OperationIdsByShardsKey = HashMap<String, Option<OperationId>>;
