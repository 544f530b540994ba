//! Sender backed by an external signer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::wallet_balance;
use crate::address::{Address, FriendlyFlags};
use crate::batching::BatchSendReport;
use crate::cell::boc;
use crate::chain::ChainClient;
use crate::config::Network;
use crate::error::BridgeResult;
use crate::model::{OutboundMessage, SendOutcome, ShardTransaction};

/// One message as shown to the approving party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMessage {
    /// User-friendly destination.
    pub address: String,
    /// Nanotons, decimal.
    pub amount: String,
    /// Base64 BOC of the body; absent for plain transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ApprovalMessage {
    fn from_outbound(message: &OutboundMessage, network: Network) -> BridgeResult<Self> {
        let flags = FriendlyFlags {
            bounceable: message.bounce(),
            test_only: network.is_test_only(),
            url_safe: true,
        };
        let payload = if message.payload().is_empty() {
            None
        } else {
            Some(boc::serialize_base64(message.payload())?)
        };
        Ok(Self {
            address: message.to().to_friendly(flags),
            amount: message.value().to_string(),
            payload,
        })
    }
}

/// A shard transaction awaiting external approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub valid_until: u64,
    pub network: Network,
    pub messages: Vec<ApprovalMessage>,
}

impl ApprovalRequest {
    pub fn from_transaction(transaction: &ShardTransaction) -> BridgeResult<Self> {
        let messages = transaction
            .messages
            .iter()
            .map(|m| ApprovalMessage::from_outbound(m, transaction.network))
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(Self {
            valid_until: transaction.valid_until,
            network: transaction.network,
            messages,
        })
    }
}

/// Approver's receipt: the signed external message it broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Base64 BOC.
    pub boc: String,
}

/// Party holding the key; approves or rejects each request.
#[async_trait]
pub trait ExternalApprover: Send + Sync {
    /// Account the approver signs for.
    fn account(&self) -> Address;

    /// Ask for approval. Rejection is reported as
    /// [`BridgeError::ApprovalRejected`](crate::error::BridgeError::ApprovalRejected).
    async fn request_approval(&self, request: ApprovalRequest) -> BridgeResult<ApprovalResponse>;
}

/// Sender that forwards every shard transaction to an [`ExternalApprover`].
pub struct ExternalSender {
    approver: Arc<dyn ExternalApprover>,
    client: Arc<dyn ChainClient>,
    address: Address,
    network: Network,
}

impl ExternalSender {
    pub fn new(
        approver: Arc<dyn ExternalApprover>,
        client: Arc<dyn ChainClient>,
        network: Network,
    ) -> Self {
        let address = approver.account();
        Self {
            approver,
            client,
            address,
            network,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub async fn balance(&self) -> BridgeResult<u128> {
        wallet_balance(self.client.as_ref(), &self.address).await
    }

    async fn submit(&self, transaction: &ShardTransaction) -> BridgeResult<String> {
        let request = ApprovalRequest::from_transaction(transaction)?;
        let response = self.approver.request_approval(request).await?;
        let root = boc::deserialize_base64(&response.boc)?;
        Ok(root.hash_hex())
    }

    pub(super) async fn send_one(
        &mut self,
        transaction: ShardTransaction,
    ) -> BridgeResult<SendOutcome> {
        let count = transaction.messages.len();
        match self.submit(&transaction).await {
            Ok(hash) => {
                info!(account = %self.address, messages = count, %hash, "approved and sent");
                Ok(SendOutcome {
                    success: true,
                    external_hashes: vec![hash],
                    messages_sent: count,
                    error: None,
                })
            }
            Err(e) => {
                warn!(account = %self.address, error = %e, "approval failed");
                Ok(SendOutcome {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                })
            }
        }
    }

    /// One approval per transaction; the first failure halts the rest.
    pub(super) async fn send_many(
        &mut self,
        transactions: Vec<ShardTransaction>,
    ) -> BridgeResult<BatchSendReport> {
        let total = transactions.iter().map(|t| t.messages.len()).sum();
        let mut report = BatchSendReport::new(transactions.len(), total);
        let mut offset = 0;
        for transaction in &transactions {
            let range = offset..offset + transaction.messages.len();
            offset = range.end;
            match self.submit(transaction).await {
                Ok(hash) => report.record_sent(range, Some(hash)),
                Err(e) => {
                    warn!(account = %self.address, error = %e, "approval failed, halting");
                    report.record_failed(range, &e);
                    break;
                }
            }
        }
        Ok(report)
    }
}
