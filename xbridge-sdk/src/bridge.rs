//! TVM → EVM bridge orchestration
//!
//! Turns a [`CrossChainCall`] into one shard transaction: one message per
//! bridged asset (transfer to a proxy or burn, by origin) plus an optional
//! native-value message to the cross-chain layer. Every message carries the
//! same payload, keyed by a per-call nonce, so the tracker can later find the
//! remote operation from the returned [`TransactionLinker`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::address::Address;
use crate::assets::payload::cross_chain_message_payload;
use crate::assets::{
    aggregate_assets, Asset, AssetResolver, CrossChainPayload, EvmCall, FeeParams, NonceSource,
};
use crate::batching::BatchSendReport;
use crate::chain::ChainClient;
use crate::config::SdkConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::evm::{normalize_method_name, EvmAddress};
use crate::model::{OutboundMessage, SendOutcome, ShardTransaction, TransactionLinker};
use crate::sender::{unix_now, Sender};

// ═══════════════════════════════════════════════════════════════════════════════
// CALL DESCRIPTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-call overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOptions {
    /// Caller-supplied nonce; generated from the clock when absent.
    pub nonce: Option<u64>,

    /// Fees paid on the EVM side.
    pub fee_params: Option<FeeParams>,

    /// Lifetime of the signed transaction in seconds.
    pub valid_for_secs: Option<u64>,
}

/// What to execute on the EVM side and what to carry there.
#[derive(Debug, Clone)]
pub struct CrossChainCall {
    /// Target contract on the EVM side
    pub target: EvmAddress,

    /// Method name or full signature; empty for a plain bridge
    pub method_name: String,

    /// ABI-encoded call arguments
    pub arguments: Vec<u8>,

    /// Assets moved with the call
    pub assets: Vec<Asset>,

    /// Nanotons sent to the cross-chain layer
    pub native_value: u128,

    pub options: CallOptions,
}

impl CrossChainCall {
    /// Plain bridge of `assets` to `target`, no method call.
    pub fn bridge(target: EvmAddress, assets: Vec<Asset>) -> Self {
        Self {
            target,
            method_name: String::new(),
            arguments: Vec::new(),
            assets,
            native_value: 0,
            options: CallOptions::default(),
        }
    }

    pub fn with_method(mut self, method_name: impl Into<String>, arguments: Vec<u8>) -> Self {
        self.method_name = method_name.into();
        self.arguments = arguments;
        self
    }

    pub fn with_native_value(mut self, value: u128) -> Self {
        self.native_value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.options.nonce = Some(nonce);
        self
    }

    pub fn with_fee_params(mut self, fee_params: FeeParams) -> Self {
        self.options.fee_params = Some(fee_params);
        self
    }
}

/// A call turned into messages, ready to hand to a sender.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub shard_transaction: ShardTransaction,
    pub linker: TransactionLinker,
    pub payload: CrossChainPayload,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds and sends cross-chain transactions for one deployment.
#[derive(Clone)]
pub struct CrossChainBridge {
    config: SdkConfig,
    resolver: AssetResolver,
    nonce: NonceSource,
}

impl CrossChainBridge {
    pub fn new(config: SdkConfig, client: Arc<dyn ChainClient>) -> Self {
        let resolver = AssetResolver::new(client, config.codes.clone());
        let nonce = NonceSource::new(config.bridge.nonce_span);
        Self {
            config,
            resolver,
            nonce,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }

    /// Build the shard transaction and linker for `call` sent by `sender`.
    pub async fn prepare(
        &self,
        sender: &Address,
        call: CrossChainCall,
    ) -> BridgeResult<PreparedTransaction> {
        let now = unix_now();
        let method_name = normalize_method_name(&call.method_name)?;
        let assets = aggregate_assets(call.assets)?;
        if assets.is_empty() && call.native_value == 0 && method_name.is_empty() {
            return Err(BridgeError::InvalidAmount(
                "call carries no assets, no value and no method".into(),
            ));
        }

        let nonce = call.options.nonce.unwrap_or_else(|| self.nonce.next(now));
        // Every emitted message is one shard of the operation.
        let with_native = call.native_value > 0 || assets.is_empty();
        let shard_count = (assets.len() + usize::from(with_native)) as u32;
        let payload = CrossChainPayload {
            shards_key: nonce.to_string(),
            shard_count,
            evm_call: EvmCall::new(call.target, method_name, &call.arguments),
            fee_params: call.options.fee_params,
        };

        let mut messages = Vec::with_capacity(assets.len() + 1);
        for asset in &assets {
            messages.push(
                self.resolver
                    .asset_message(
                        asset,
                        sender,
                        nonce,
                        &payload,
                        &self.config.contracts,
                        &self.config.bridge,
                    )
                    .await?,
            );
        }
        if with_native {
            let body = cross_chain_message_payload(nonce, payload.to_cell()?)?;
            messages.push(OutboundMessage::new(
                self.config.contracts.cross_chain_layer,
                call.native_value + self.config.bridge.asset_message_value,
                Arc::new(body),
            ));
        }

        debug_assert_eq!(messages.len(), shard_count as usize);

        let valid_for = call
            .options
            .valid_for_secs
            .unwrap_or(self.config.wallet.valid_for_secs);
        let shard_transaction =
            ShardTransaction::new(messages, now + valid_for, self.config.network);
        let linker = TransactionLinker::new(sender, shard_count, payload.shards_key.clone(), now);

        info!(
            caller = %sender,
            shards_key = %payload.shards_key,
            assets = assets.len(),
            messages = shard_transaction.messages.len(),
            native_value = %call.native_value,
            "prepared cross-chain transaction"
        );
        Ok(PreparedTransaction {
            shard_transaction,
            linker,
            payload,
        })
    }

    /// Prepare and send one call; the linker carries the send outcome.
    pub async fn send_cross_chain_transaction(
        &self,
        sender: &mut Sender,
        call: CrossChainCall,
    ) -> BridgeResult<TransactionLinker> {
        let prepared = self.prepare(sender.address(), call).await?;
        let outcome = sender.send_shard_transaction(prepared.shard_transaction).await?;
        Ok(prepared.linker.with_send_result(outcome))
    }

    /// Prepare and send several calls as one batch.
    ///
    /// Each linker's outcome covers only its own messages, so a partial batch
    /// leaves earlier calls marked sent and later ones not.
    pub async fn send_cross_chain_transactions(
        &self,
        sender: &mut Sender,
        calls: Vec<CrossChainCall>,
    ) -> BridgeResult<(Vec<TransactionLinker>, BatchSendReport)> {
        let mut prepared = Vec::with_capacity(calls.len());
        for call in calls {
            prepared.push(self.prepare(sender.address(), call).await?);
        }

        let mut ranges = Vec::with_capacity(prepared.len());
        let mut offset = 0;
        for p in &prepared {
            let len = p.shard_transaction.messages.len();
            ranges.push(offset..offset + len);
            offset += len;
        }

        let transactions = prepared.iter().map(|p| p.shard_transaction.clone()).collect();
        let report = sender.send_shard_transactions(transactions).await?;

        let linkers = prepared
            .iter()
            .zip(ranges)
            .map(|(p, range)| p.linker.with_send_result(outcome_for_range(&report, range)))
            .collect();
        Ok((linkers, report))
    }
}

/// Outcome of the messages in `range` within a batch report.
fn outcome_for_range(report: &BatchSendReport, range: std::ops::Range<usize>) -> SendOutcome {
    let sent = match report.last_sent_message {
        Some(last) if last + 1 >= range.start => (last + 1).min(range.end) - range.start,
        _ => 0,
    };
    let overlapping = report
        .groups
        .iter()
        .filter(|g| g.message_range.start < range.end && range.start < g.message_range.end);
    let success = sent == range.len() && overlapping.clone().all(|g| g.success);
    SendOutcome {
        success,
        external_hashes: overlapping
            .clone()
            .filter_map(|g| g.external_hash.clone())
            .collect(),
        messages_sent: sent,
        error: if success {
            None
        } else {
            overlapping.filter_map(|g| g.error.clone()).next().or_else(|| {
                report
                    .first_failure()
                    .and_then(|g| g.error.clone())
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::payload::{OP_CROSS_CHAIN_MESSAGE, OP_JETTON_TRANSFER};
    use crate::cell::{Cell, CellBuilder};
    use crate::chain::{MemoryChain, StackValue};
    use crate::config::{CanonicalCodes, ContractsConfig, Network, WalletDefaults};
    use crate::sender::SenderFactory;

    fn code(tag: u64) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(tag, 32).unwrap();
        Arc::new(b.build().unwrap())
    }

    fn setup() -> (Arc<MemoryChain>, CrossChainBridge) {
        let chain = Arc::new(MemoryChain::new());
        let contracts = ContractsConfig {
            cross_chain_layer: Address::new(0, [0xc0; 32]),
            jetton_proxy: Address::new(0, [0xc1; 32]),
            nft_proxy: Address::new(0, [0xc2; 32]),
        };
        let codes = CanonicalCodes {
            mirrored_jetton_minter: code(1).hash(),
            mirrored_nft_item: code(2).hash(),
            mirrored_nft_collection: code(3).hash(),
        };
        let mut config = SdkConfig::new(Network::Testnet, contracts, codes).unwrap();
        config.wallet.seqno_poll_delay_ms = 1;
        (chain.clone(), CrossChainBridge::new(config, chain))
    }

    #[tokio::test]
    async fn test_prepare_shares_nonce_across_messages() {
        let (chain, bridge) = setup();
        let sender = Address::new(0, [0x50; 32]);
        let master = Address::new(0, [0x51; 32]);
        let jetton_wallet = Address::new(0, [0x52; 32]);
        chain.deploy(master, code(77), 0);
        chain.set_getter(master, "get_wallet_address", move |_| {
            Ok(vec![StackValue::address(&jetton_wallet)?])
        });

        let jetton = bridge.resolver().jetton(master).await.unwrap();
        let call = CrossChainCall::bridge(
            EvmAddress([0x11; 20]),
            vec![jetton.with_amount(3).unwrap(), jetton.with_amount(4).unwrap()],
        )
        .with_native_value(1_000)
        .with_nonce(42);

        let prepared = bridge.prepare(&sender, call).await.unwrap();
        let messages = &prepared.shard_transaction.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].to(), &jetton_wallet);
        assert_eq!(messages[1].to(), &bridge.config().contracts.cross_chain_layer);

        let mut s = messages[0].payload().parse();
        assert_eq!(s.load_uint(32).unwrap(), OP_JETTON_TRANSFER as u64);
        assert_eq!(s.load_uint(64).unwrap(), 42);
        assert_eq!(s.load_coins().unwrap(), 7);

        let mut s = messages[1].payload().parse();
        assert_eq!(s.load_uint(32).unwrap(), OP_CROSS_CHAIN_MESSAGE as u64);
        assert_eq!(s.load_uint(64).unwrap(), 42);
        let carried = CrossChainPayload::from_cell(s.load_ref().unwrap()).unwrap();
        assert_eq!(carried, prepared.payload);

        assert_eq!(prepared.linker.shards_key(), "42");
        assert_eq!(prepared.linker.shard_count(), 2);
        assert_eq!(prepared.payload.shard_count, 2);
        assert_eq!(prepared.linker.caller(), sender.to_raw());
        assert_eq!(prepared.payload.evm_call.method_name, "");
    }

    #[tokio::test]
    async fn test_shard_count_matches_emitted_messages() {
        let (chain, bridge) = setup();
        let sender = Address::new(0, [0x50; 32]);
        let mut jettons = Vec::new();
        for i in 0..2u8 {
            let master = Address::new(0, [0x70 + i; 32]);
            let jetton_wallet = Address::new(0, [0x80 + i; 32]);
            chain.deploy(master, code(77), 0);
            chain.set_getter(master, "get_wallet_address", move |_| {
                Ok(vec![StackValue::address(&jetton_wallet)?])
            });
            let jetton = bridge.resolver().jetton(master).await.unwrap();
            jettons.push(jetton.with_amount(5).unwrap());
        }

        let call = CrossChainCall::bridge(EvmAddress([0x11; 20]), jettons).with_native_value(1_000);
        let prepared = bridge.prepare(&sender, call).await.unwrap();

        assert_eq!(prepared.shard_transaction.messages.len(), 3);
        assert_eq!(prepared.linker.shard_count(), 3);
        for message in &prepared.shard_transaction.messages[..2] {
            let mut s = message.payload().parse();
            s.load_uint(32).unwrap();
            s.load_uint(64).unwrap();
            s.load_coins().unwrap();
            s.load_address().unwrap();
            s.load_address().unwrap();
            s.load_maybe_ref().unwrap();
            s.load_coins().unwrap();
            let forward = s.load_maybe_ref().unwrap().unwrap();
            let carried = CrossChainPayload::from_cell(forward).unwrap();
            assert_eq!(carried.shard_count, 3);
        }

        let plain =
            CrossChainCall::bridge(EvmAddress([0x11; 20]), vec![]).with_method("ping", vec![]);
        let prepared = bridge.prepare(&sender, plain).await.unwrap();
        assert_eq!(prepared.shard_transaction.messages.len(), 1);
        assert_eq!(prepared.linker.shard_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_call_is_rejected() {
        let (_, bridge) = setup();
        let call = CrossChainCall::bridge(EvmAddress([1; 20]), vec![]);
        assert!(matches!(
            bridge.prepare(&Address::new(0, [1; 32]), call).await,
            Err(BridgeError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_linkers_reflect_partial_send() {
        let (chain, bridge) = setup();
        let wallet = Address::new(0, [0x60; 32]);
        chain.deploy(wallet, code(9), 0);
        chain.set_seqno(wallet, 0);
        chain.fail_send_attempt(1);
        let factory = SenderFactory::new(
            chain.clone(),
            Network::Testnet,
            WalletDefaults {
                seqno_poll_delay_ms: 1,
                ..Default::default()
            },
        );
        let mut sender = factory.local(wallet, [8; 32]);

        let calls = (0..6)
            .map(|i| {
                CrossChainCall::bridge(EvmAddress([2; 20]), vec![])
                    .with_method("ping", vec![i])
                    .with_native_value(10)
            })
            .collect();
        let (linkers, report) = bridge
            .send_cross_chain_transactions(&mut sender, calls)
            .await
            .unwrap();

        assert_eq!(report.messages_sent(), 4);
        assert_eq!(linkers.len(), 6);
        assert!(linkers[..4].iter().all(|l| l.send_result().unwrap().success));
        assert!(linkers[4..].iter().all(|l| !l.send_result().unwrap().success));
        assert!(linkers[4].send_result().unwrap().error.is_some());
    }
}
