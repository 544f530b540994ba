//! Standard-wallet sender.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ensure_not_expired, wallet_balance, GroupSender};
use crate::address::Address;
use crate::cell::Cell;
use crate::chain::{ChainClient, OpenedContract};
use crate::config::WalletDefaults;
use crate::error::{BridgeError, BridgeResult};
use crate::model::OutboundMessage;
use crate::query_id::SeqnoDiscipline;
use crate::wallet::{ReplayParams, Wallet};

/// Sender for v3/v4/v5 wallets.
///
/// Groups are strictly sequential: the next group is signed only after the
/// chain seqno has moved past the one just used.
pub struct RawSender {
    wallet: Wallet,
    client: Arc<dyn ChainClient>,
    seqno: SeqnoDiscipline,
    valid_for_secs: u64,
    poll_attempts: u32,
    poll_delay: Duration,
}

impl RawSender {
    pub fn new(wallet: Wallet, client: Arc<dyn ChainClient>, defaults: &WalletDefaults) -> Self {
        Self {
            wallet,
            client,
            seqno: SeqnoDiscipline::new(),
            valid_for_secs: defaults.valid_for_secs,
            poll_attempts: defaults.seqno_poll_attempts,
            poll_delay: Duration::from_millis(defaults.seqno_poll_delay_ms),
        }
    }

    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub async fn balance(&self) -> BridgeResult<u128> {
        wallet_balance(self.client.as_ref(), self.wallet.address()).await
    }

    fn contract(&self) -> OpenedContract {
        OpenedContract::new(self.client.clone(), *self.wallet.address())
    }

    fn effective_valid_until(&self, valid_until: u64) -> u32 {
        let deadline = if valid_until == 0 {
            super::unix_now() + self.valid_for_secs
        } else {
            valid_until
        };
        deadline.min(u32::MAX as u64) as u32
    }

    async fn wait_for_seqno(&self, contract: &OpenedContract, sent: u32) -> BridgeResult<()> {
        for attempt in 0..self.poll_attempts {
            match contract.seqno().await {
                Ok(current) if self.seqno.has_advanced(current) => {
                    debug!(sent, current, attempt, "seqno advanced");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!(attempt, error = %e, "seqno poll failed"),
            }
            tokio::time::sleep(self.poll_delay).await;
        }
        Err(BridgeError::TrackingTimeout {
            attempts: self.poll_attempts,
            waiting_for: format!("wallet seqno to pass {}", sent),
        })
    }
}

#[async_trait]
impl GroupSender for RawSender {
    fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    fn measure(&self, messages: &[OutboundMessage], valid_until: u64) -> BridgeResult<Cell> {
        self.wallet.build_external(
            messages,
            ReplayParams::Seqno {
                seqno: u32::MAX,
                valid_until: self.effective_valid_until(valid_until),
            },
        )
    }

    async fn send_group(
        &mut self,
        messages: &[OutboundMessage],
        valid_until: u64,
    ) -> BridgeResult<String> {
        ensure_not_expired(valid_until)?;
        let contract = self.contract();
        let seqno = self.seqno.check(contract.seqno().await?)?;
        let external = self.wallet.build_external(
            messages,
            ReplayParams::Seqno {
                seqno,
                valid_until: self.effective_valid_until(valid_until),
            },
        )?;

        let hash = self.client.send_boc(&external.to_boc()?).await?;
        self.seqno.commit(seqno);
        debug!(wallet = %self.wallet.address(), seqno, %hash, "submitted external message");

        if let Err(e) = self.wait_for_seqno(&contract, seqno).await {
            return Err(BridgeError::Unconfirmed {
                hash,
                reason: e.to_string(),
            });
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::BatchSendReport;
    use crate::cell::CellBuilder;
    use crate::chain::MemoryChain;
    use crate::config::Network;
    use crate::model::ShardTransaction;
    use crate::sender::{Sender, SenderFactory};
    use crate::wallet::WalletVersion;

    fn setup(version: WalletVersion) -> (Arc<MemoryChain>, Sender, Address) {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Address::new(0, [0xaa; 32]);
        let mut code = CellBuilder::new();
        code.store_uint(0xc0de, 16).unwrap();
        chain.deploy(wallet, Arc::new(code.build().unwrap()), 5_000_000_000);
        chain.set_seqno(wallet, 3);
        let defaults = WalletDefaults {
            version,
            seqno_poll_attempts: 3,
            seqno_poll_delay_ms: 1,
            ..Default::default()
        };
        let sender =
            SenderFactory::new(chain.clone(), Network::Testnet, defaults).local(wallet, [5; 32]);
        (chain, sender, wallet)
    }

    fn transfers(n: u8) -> Vec<OutboundMessage> {
        (0..n)
            .map(|i| OutboundMessage::transfer(Address::new(0, [i; 32]), 1_000 + i as u128))
            .collect()
    }

    #[tokio::test]
    async fn test_ten_messages_go_out_in_three_sequential_groups() {
        let (chain, mut sender, wallet) = setup(WalletVersion::V4R2);
        let report: BatchSendReport = sender
            .send_shard_transactions(vec![
                ShardTransaction::new(transfers(6), 0, Network::Testnet),
                ShardTransaction::new(transfers(4), 0, Network::Testnet),
            ])
            .await
            .unwrap();

        assert!(report.is_complete());
        let ranges: Vec<_> = report.groups.iter().map(|g| g.message_range.clone()).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(chain.sent().len(), 3);
        assert!(chain.sent().iter().all(|s| s.destination == wallet));
        assert_eq!(sender.balance().await.unwrap(), 5_000_000_000);
    }

    #[tokio::test]
    async fn test_failed_group_stops_dispatch() {
        let (chain, mut sender, _) = setup(WalletVersion::V3R2);
        chain.fail_send_attempt(1);

        let outcome = sender
            .send_shard_transaction(ShardTransaction::new(transfers(9), 0, Network::Testnet))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.messages_sent, 4);
        assert_eq!(outcome.external_hashes.len(), 1);
        assert!(outcome.error.is_some());
        assert_eq!(chain.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_v5_packs_everything_in_one_group() {
        let (chain, mut sender, _) = setup(WalletVersion::V5R1);
        let outcome = sender
            .send_shard_transaction(ShardTransaction::new(transfers(20), 0, Network::Testnet))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.messages_sent, 20);
        assert_eq!(chain.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_stuck_seqno_times_out() {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Address::new(0, [0xab; 32]);
        // Deployed without a seqno: sends are accepted but the seqno never moves.
        let mut code = CellBuilder::new();
        code.store_uint(1, 8).unwrap();
        chain.deploy(wallet, Arc::new(code.build().unwrap()), 0);
        chain.set_getter(wallet, "seqno", |_| Ok(vec![crate::chain::StackValue::Int(7)]));
        let defaults = WalletDefaults {
            seqno_poll_attempts: 2,
            seqno_poll_delay_ms: 1,
            ..Default::default()
        };
        let mut sender =
            SenderFactory::new(chain.clone(), Network::Testnet, defaults).local(wallet, [5; 32]);

        let outcome = sender
            .send_shard_transaction(ShardTransaction::new(transfers(1), 0, Network::Testnet))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(chain.sent().len(), 1);
        assert!(outcome.error.unwrap().contains("seqno"));
        // Submitted: the hash is reported and the message counts as sent.
        assert_eq!(outcome.external_hashes, vec![chain.sent()[0].hash.clone()]);
        assert_eq!(outcome.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_group_is_not_left_for_resend() {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Address::new(0, [0xac; 32]);
        let mut code = CellBuilder::new();
        code.store_uint(1, 8).unwrap();
        chain.deploy(wallet, Arc::new(code.build().unwrap()), 0);
        chain.set_getter(wallet, "seqno", |_| Ok(vec![crate::chain::StackValue::Int(7)]));
        let defaults = WalletDefaults {
            seqno_poll_attempts: 2,
            seqno_poll_delay_ms: 1,
            ..Default::default()
        };
        let mut sender =
            SenderFactory::new(chain.clone(), Network::Testnet, defaults).local(wallet, [5; 32]);

        let report = sender
            .send_shard_transactions(vec![ShardTransaction::new(transfers(6), 0, Network::Testnet)])
            .await
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert!(group.unconfirmed);
        assert_eq!(group.external_hash.as_deref(), Some(chain.sent()[0].hash.as_str()));
        assert_eq!(report.last_sent_message, Some(3));
        // Only the group after the unconfirmed one is left to send.
        assert_eq!(report.unsent_groups, 1);
        assert_eq!(chain.sent().len(), 1);
    }
}
