//! Sender abstraction.
//!
//! A sender hands shard transactions to the TVM chain. What it can do is
//! fixed by its wallet capability and chosen once by [`SenderFactory`]:
//!
//! - [`RawSender`] signs with a local key on a standard wallet (v3/v4/v5);
//!   groups go out one at a time, each waiting for the seqno to advance.
//! - [`HighloadSender`] signs with a local key on a highload v3 wallet;
//!   up to 254 messages per external, replay tokens instead of a seqno.
//! - [`ExternalSender`] delegates signing to an [`ExternalApprover`]; it has
//!   no batch primitive, so "send many" is repeated "send one".
//!
//! Senders are not internally synchronised. Every send takes `&mut self`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::address::Address;
use crate::batching::{pack_messages, BatchSendReport, PackingLimits};
use crate::cell::Cell;
use crate::chain::ChainClient;
use crate::config::{Network, WalletDefaults};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{OutboundMessage, SendOutcome, ShardTransaction};
use crate::wallet::{Wallet, WalletVersion};

pub mod external;
pub mod highload;
pub mod raw;

pub use external::{
    ApprovalMessage, ApprovalRequest, ApprovalResponse, ExternalApprover, ExternalSender,
};
pub use highload::HighloadSender;
pub use raw::RawSender;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// GROUP DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// A local-key sender that submits packed groups one by one.
#[async_trait]
trait GroupSender: Send {
    fn wallet(&self) -> &Wallet;

    /// Encoding used only to measure a candidate group.
    fn measure(&self, messages: &[OutboundMessage], valid_until: u64) -> BridgeResult<Cell>;

    /// Sign and submit one group, returning the external message hash.
    async fn send_group(
        &mut self,
        messages: &[OutboundMessage],
        valid_until: u64,
    ) -> BridgeResult<String>;
}

/// Pack `messages` under the wallet ceiling and send the groups in order,
/// stopping at the first failure.
async fn dispatch<S: GroupSender>(
    sender: &mut S,
    messages: Vec<OutboundMessage>,
    valid_until: u64,
) -> BridgeResult<BatchSendReport> {
    let limits = PackingLimits::with_max_messages(sender.wallet().version().max_messages());
    let groups = pack_messages(&messages, &limits, |slice| sender.measure(slice, valid_until))?;
    let mut report = BatchSendReport::new(groups.len(), messages.len());

    info!(
        wallet = %sender.wallet().address(),
        messages = messages.len(),
        groups = groups.len(),
        "dispatching message groups"
    );

    for (index, group) in groups.into_iter().enumerate() {
        match sender.send_group(&group.messages, valid_until).await {
            Ok(hash) => {
                info!(group = index, count = group.messages.len(), %hash, "group sent");
                report.record_sent(group.range, Some(hash));
            }
            Err(BridgeError::Unconfirmed { hash, reason }) => {
                warn!(group = index, %hash, %reason, "group submitted but unconfirmed, stopping");
                report.record_unconfirmed(group.range, hash, reason);
                break;
            }
            Err(e) => {
                warn!(group = index, error = %e, "group failed, remaining groups not attempted");
                report.record_failed(group.range, &e);
                break;
            }
        }
    }
    Ok(report)
}

/// Collapse a report into the outcome of a single logical send.
fn outcome_from_report(report: &BatchSendReport) -> SendOutcome {
    SendOutcome {
        success: report.is_complete(),
        external_hashes: report
            .groups
            .iter()
            .filter_map(|g| g.external_hash.clone())
            .collect(),
        messages_sent: report.messages_sent(),
        error: report.first_failure().and_then(|g| g.error.clone()),
    }
}

/// Flatten transactions in order; the earliest deadline bounds them all.
/// A `valid_until` of zero carries no deadline and never wins.
fn flatten(transactions: Vec<ShardTransaction>) -> (Vec<OutboundMessage>, u64) {
    let valid_until = transactions
        .iter()
        .map(|t| t.valid_until)
        .filter(|&v| v != 0)
        .min()
        .unwrap_or(0);
    let messages = transactions.into_iter().flat_map(|t| t.messages).collect();
    (messages, valid_until)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SENDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Capability of a sender, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    SingleOnly,
    BatchCapable,
    ExternallyApproved,
}

/// Sender of shard transactions.
pub enum Sender {
    SingleOnly(RawSender),
    BatchCapable(HighloadSender),
    ExternallyApproved(ExternalSender),
}

impl Sender {
    pub fn kind(&self) -> SenderKind {
        match self {
            Self::SingleOnly(_) => SenderKind::SingleOnly,
            Self::BatchCapable(_) => SenderKind::BatchCapable,
            Self::ExternallyApproved(_) => SenderKind::ExternallyApproved,
        }
    }

    /// Address of the wallet that signs for this sender.
    pub fn address(&self) -> &Address {
        match self {
            Self::SingleOnly(s) => s.address(),
            Self::BatchCapable(s) => s.address(),
            Self::ExternallyApproved(s) => s.address(),
        }
    }

    /// Wallet balance in nanotons.
    pub async fn balance(&self) -> BridgeResult<u128> {
        match self {
            Self::SingleOnly(s) => s.balance().await,
            Self::BatchCapable(s) => s.balance().await,
            Self::ExternallyApproved(s) => s.balance().await,
        }
    }

    /// Send one shard transaction.
    ///
    /// Errors before anything is submitted (packing, encoding) are returned
    /// as `Err`. Once dispatch starts, a failed group ends the send and the
    /// outcome reports how many messages went out.
    pub async fn send_shard_transaction(
        &mut self,
        transaction: ShardTransaction,
    ) -> BridgeResult<SendOutcome> {
        match self {
            Self::SingleOnly(s) => {
                let report = dispatch(s, transaction.messages, transaction.valid_until).await?;
                Ok(outcome_from_report(&report))
            }
            Self::BatchCapable(s) => {
                let report = dispatch(s, transaction.messages, transaction.valid_until).await?;
                Ok(outcome_from_report(&report))
            }
            Self::ExternallyApproved(s) => s.send_one(transaction).await,
        }
    }

    /// Send several shard transactions.
    ///
    /// Local-key senders flatten all messages and pack them into as few
    /// groups as the wallet allows. The external sender submits each
    /// transaction as its own group. Either way dispatch stops at the first
    /// failed group.
    pub async fn send_shard_transactions(
        &mut self,
        transactions: Vec<ShardTransaction>,
    ) -> BridgeResult<BatchSendReport> {
        match self {
            Self::SingleOnly(s) => {
                let (messages, valid_until) = flatten(transactions);
                dispatch(s, messages, valid_until).await
            }
            Self::BatchCapable(s) => {
                let (messages, valid_until) = flatten(transactions);
                dispatch(s, messages, valid_until).await
            }
            Self::ExternallyApproved(s) => s.send_many(transactions).await,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds senders against one chain client.
#[derive(Clone)]
pub struct SenderFactory {
    client: Arc<dyn ChainClient>,
    network: Network,
    defaults: WalletDefaults,
}

impl SenderFactory {
    pub fn new(client: Arc<dyn ChainClient>, network: Network, defaults: WalletDefaults) -> Self {
        Self {
            client,
            network,
            defaults,
        }
    }

    /// Local-key sender for the configured wallet version.
    pub fn local(&self, address: Address, secret_key: [u8; 32]) -> Sender {
        self.for_version(self.defaults.version, address, secret_key)
    }

    /// Local-key sender for a version tag such as `"v4r2"` or `"highload_v3"`.
    pub fn from_tag(
        &self,
        tag: &str,
        address: Address,
        secret_key: [u8; 32],
    ) -> BridgeResult<Sender> {
        let version: WalletVersion = tag.parse()?;
        Ok(self.for_version(version, address, secret_key))
    }

    pub fn for_version(
        &self,
        version: WalletVersion,
        address: Address,
        secret_key: [u8; 32],
    ) -> Sender {
        let mut wallet = Wallet::new(version, address, secret_key, self.network);
        if let Some(id) = self.defaults.subwallet_id {
            wallet = wallet.with_subwallet_id(id);
        }
        info!(%address, %version, subwallet_id = wallet.subwallet_id(), "opened local sender");
        if version.is_highload() {
            Sender::BatchCapable(HighloadSender::new(wallet, self.client.clone(), &self.defaults))
        } else {
            Sender::SingleOnly(RawSender::new(wallet, self.client.clone(), &self.defaults))
        }
    }

    /// Sender that forwards every transaction to `approver`.
    pub fn external(&self, approver: Arc<dyn ExternalApprover>) -> Sender {
        Sender::ExternallyApproved(ExternalSender::new(approver, self.client.clone(), self.network))
    }
}

/// Balance of `address`, zero when it does not exist yet.
async fn wallet_balance(client: &dyn ChainClient, address: &Address) -> BridgeResult<u128> {
    Ok(client.contract_state(address).await?.balance)
}

fn ensure_not_expired(valid_until: u64) -> BridgeResult<()> {
    if valid_until != 0 && valid_until < unix_now() {
        return Err(BridgeError::Config(format!(
            "transaction expired at {}",
            valid_until
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::wallet::WalletVersion;

    fn factory(version: WalletVersion) -> (Arc<MemoryChain>, SenderFactory) {
        let chain = Arc::new(MemoryChain::new());
        let defaults = WalletDefaults {
            version,
            seqno_poll_delay_ms: 1,
            ..Default::default()
        };
        (chain.clone(), SenderFactory::new(chain, Network::Testnet, defaults))
    }

    #[test]
    fn test_factory_picks_capability() {
        let (_, f) = factory(WalletVersion::V4R2);
        let addr = Address::new(0, [1; 32]);
        assert_eq!(f.local(addr, [7; 32]).kind(), SenderKind::SingleOnly);
        assert_eq!(
            f.from_tag("highload_v3", addr, [7; 32]).unwrap().kind(),
            SenderKind::BatchCapable
        );
        assert!(matches!(
            f.from_tag("v9", addr, [7; 32]),
            Err(BridgeError::UnknownWalletVersion(_))
        ));
    }

    #[test]
    fn test_flatten_keeps_order_and_earliest_deadline() {
        let a = Address::new(0, [1; 32]);
        let b = Address::new(0, [2; 32]);
        let (messages, valid_until) = flatten(vec![
            ShardTransaction::new(vec![OutboundMessage::transfer(a, 1)], 500, Network::Testnet),
            ShardTransaction::new(vec![OutboundMessage::transfer(b, 2)], 300, Network::Testnet),
        ]);
        assert_eq!(valid_until, 300);
        assert_eq!(messages[0].to(), &a);
        assert_eq!(messages[1].to(), &b);
    }

    #[test]
    fn test_flatten_ignores_transactions_without_deadline() {
        let a = Address::new(0, [1; 32]);
        let tx = |valid_until| {
            let messages = vec![OutboundMessage::transfer(a, 1)];
            ShardTransaction::new(messages, valid_until, Network::Testnet)
        };
        assert_eq!(flatten(vec![tx(0), tx(900), tx(0)]).1, 900);
        assert_eq!(flatten(vec![tx(0), tx(0)]).1, 0);
    }

    #[tokio::test]
    async fn test_balance_of_missing_wallet_is_zero() {
        let (_, f) = factory(WalletVersion::V4R2);
        let sender = f.local(Address::new(0, [9; 32]), [1; 32]);
        assert_eq!(sender.balance().await.unwrap(), 0);
    }
}
