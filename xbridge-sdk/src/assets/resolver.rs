//! Origin classification and asset message assembly.

use std::sync::Arc;

use tracing::{debug, info};

use super::payload::{
    jetton_burn_payload, jetton_transfer_payload, nft_burn_payload, nft_transfer_payload,
    CrossChainPayload,
};
use super::{Asset, AssetOrigin, FungibleToken, NftItem};
use crate::address::Address;
use crate::chain::{ChainClient, OpenedContract, StackValue};
use crate::config::{BridgeDefaults, CanonicalCodes, ContractsConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::model::OutboundMessage;

/// Classifies assets by comparing deployed code against the canonical
/// mirrored images.
#[derive(Clone)]
pub struct AssetResolver {
    client: Arc<dyn ChainClient>,
    codes: CanonicalCodes,
}

impl AssetResolver {
    pub fn new(client: Arc<dyn ChainClient>, codes: CanonicalCodes) -> Self {
        Self { client, codes }
    }

    pub fn codes(&self) -> &CanonicalCodes {
        &self.codes
    }

    fn open(&self, address: Address) -> OpenedContract {
        OpenedContract::new(self.client.clone(), address)
    }

    /// Mirrored when the deployed code hash equals `mirrored_code`.
    /// An undeployed address is an error, never native.
    pub async fn classify(
        &self,
        address: &Address,
        mirrored_code: &[u8; 32],
    ) -> BridgeResult<AssetOrigin> {
        let code = self.open(*address).code().await?;
        let origin = if &code.hash() == mirrored_code {
            AssetOrigin::Mirrored
        } else {
            AssetOrigin::Native
        };
        debug!(%address, code_hash = %code.hash_hex(), ?origin, "classified asset");
        Ok(origin)
    }

    /// Jetton by master address, with amount 0.
    pub async fn jetton(&self, master: Address) -> BridgeResult<Asset> {
        let origin = self.classify(&master, &self.codes.mirrored_jetton_minter).await?;
        Ok(Asset::Jetton(FungibleToken::new(master, origin)))
    }

    /// NFT by item address.
    pub async fn nft_item(&self, item: Address) -> BridgeResult<Asset> {
        let origin = self.classify(&item, &self.codes.mirrored_nft_item).await?;
        Ok(Asset::Nft(NftItem::new(item, None, None, origin)))
    }

    /// NFT by `(collection, index)`; origin comes from the collection code.
    pub async fn nft_by_index(&self, collection: Address, index: u64) -> BridgeResult<Asset> {
        let origin = self
            .classify(&collection, &self.codes.mirrored_nft_collection)
            .await?;
        let stack = self
            .open(collection)
            .get("get_nft_address_by_index", &[StackValue::Int(index as i128)])
            .await?;
        let item = stack
            .first()
            .ok_or_else(|| {
                BridgeError::Rpc("get_nft_address_by_index returned empty stack".into())
            })?
            .as_address()?;
        Ok(Asset::Nft(NftItem::new(item, Some(collection), Some(index), origin)))
    }

    /// Jetton wallet of `owner` for `master`.
    pub async fn jetton_wallet(&self, master: &Address, owner: &Address) -> BridgeResult<Address> {
        let stack = self
            .open(*master)
            .get("get_wallet_address", &[StackValue::address(owner)?])
            .await?;
        stack
            .first()
            .ok_or_else(|| BridgeError::Rpc("get_wallet_address returned empty stack".into()))?
            .as_address()
    }

    /// Outbound message moving `asset` across the bridge from `sender`.
    ///
    /// Native assets go to the matching proxy with the payload as
    /// `forward_payload`; mirrored assets are burned with the payload as
    /// `custom_payload`.
    pub async fn asset_message(
        &self,
        asset: &Asset,
        sender: &Address,
        query_id: u64,
        payload: &CrossChainPayload,
        contracts: &ContractsConfig,
        defaults: &BridgeDefaults,
    ) -> BridgeResult<OutboundMessage> {
        let payload_cell = payload.to_cell()?;
        let message = match (asset, asset.origin()) {
            (Asset::Jetton(token), AssetOrigin::Native) => {
                let wallet = self.jetton_wallet(token.master(), sender).await?;
                let body = jetton_transfer_payload(
                    query_id,
                    token.amount(),
                    &contracts.jetton_proxy,
                    sender,
                    defaults.forward_amount,
                    Some(payload_cell),
                )?;
                OutboundMessage::new(
                    wallet,
                    defaults.asset_message_value + defaults.forward_amount,
                    Arc::new(body),
                )
            }
            (Asset::Jetton(token), AssetOrigin::Mirrored) => {
                let wallet = self.jetton_wallet(token.master(), sender).await?;
                let body =
                    jetton_burn_payload(query_id, token.amount(), sender, Some(payload_cell))?;
                OutboundMessage::new(wallet, defaults.asset_message_value, Arc::new(body))
            }
            (Asset::Nft(item), AssetOrigin::Native) => {
                let body = nft_transfer_payload(
                    query_id,
                    &contracts.nft_proxy,
                    sender,
                    defaults.forward_amount,
                    Some(payload_cell),
                )?;
                OutboundMessage::new(
                    *item.item(),
                    defaults.asset_message_value + defaults.forward_amount,
                    Arc::new(body),
                )
            }
            (Asset::Nft(item), AssetOrigin::Mirrored) => {
                let body = nft_burn_payload(query_id, sender, Some(payload_cell))?;
                OutboundMessage::new(*item.item(), defaults.asset_message_value, Arc::new(body))
            }
        };
        info!(
            asset = %asset.address(),
            operation = ?asset.operation(),
            amount = %asset.amount(),
            to = %message.to(),
            "built asset message"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::payload::{
        EvmCall, OP_JETTON_BURN, OP_JETTON_TRANSFER, OP_NFT_BURN, OP_NFT_TRANSFER,
    };
    use crate::assets::AssetOperation;
    use crate::cell::{Cell, CellBuilder};
    use crate::chain::MemoryChain;
    use crate::evm::EvmAddress;

    fn code(tag: u64) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(tag, 32).unwrap();
        Arc::new(b.build().unwrap())
    }

    struct Fixture {
        chain: Arc<MemoryChain>,
        resolver: AssetResolver,
        contracts: ContractsConfig,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MemoryChain::new());
        let codes = CanonicalCodes {
            mirrored_jetton_minter: code(1).hash(),
            mirrored_nft_item: code(2).hash(),
            mirrored_nft_collection: code(3).hash(),
        };
        let resolver = AssetResolver::new(chain.clone(), codes);
        let contracts = ContractsConfig {
            cross_chain_layer: Address::new(0, [0xc0; 32]),
            jetton_proxy: Address::new(0, [0xc1; 32]),
            nft_proxy: Address::new(0, [0xc2; 32]),
        };
        Fixture {
            chain,
            resolver,
            contracts,
        }
    }

    fn payload() -> CrossChainPayload {
        CrossChainPayload {
            shards_key: "1".into(),
            shard_count: 1,
            evm_call: EvmCall::new(EvmAddress([1; 20]), "", &[]),
            fee_params: None,
        }
    }

    #[tokio::test]
    async fn test_mirrored_code_selects_burn() {
        let f = fixture();
        let master = Address::new(0, [0x10; 32]);
        f.chain.deploy(master, code(1), 0);

        let asset = f.resolver.jetton(master).await.unwrap();
        assert_eq!(asset.origin(), AssetOrigin::Mirrored);
        assert_eq!(asset.operation(), AssetOperation::Burn);
    }

    #[tokio::test]
    async fn test_unrecognized_code_selects_transfer() {
        let f = fixture();
        let master = Address::new(0, [0x11; 32]);
        f.chain.deploy(master, code(99), 0);

        let asset = f.resolver.jetton(master).await.unwrap();
        assert_eq!(asset.origin(), AssetOrigin::Native);
        assert_eq!(asset.operation(), AssetOperation::Transfer);
    }

    #[tokio::test]
    async fn test_undeployed_address_is_an_error() {
        let f = fixture();
        let err = f.resolver.jetton(Address::new(0, [0x12; 32])).await.unwrap_err();
        assert!(matches!(err, BridgeError::ContractNotDeployed(_)));
    }

    #[tokio::test]
    async fn test_nft_by_index_uses_collection_code() {
        let f = fixture();
        let collection = Address::new(0, [0x20; 32]);
        let item = Address::new(0, [0x21; 32]);
        f.chain.deploy(collection, code(3), 0);
        f.chain.set_getter(collection, "get_nft_address_by_index", move |args| {
            assert_eq!(args, &[StackValue::Int(5)]);
            Ok(vec![StackValue::address(&item)?])
        });

        let asset = f.resolver.nft_by_index(collection, 5).await.unwrap();
        assert_eq!(asset.address(), &item);
        assert_eq!(asset.origin(), AssetOrigin::Mirrored);
        match asset {
            Asset::Nft(n) => {
                assert_eq!(n.collection(), Some(&collection));
                assert_eq!(n.index(), Some(5));
            }
            Asset::Jetton(_) => panic!("expected NFT"),
        }
    }

    #[tokio::test]
    async fn test_asset_messages_pick_wire_layout() {
        let f = fixture();
        let sender = Address::new(0, [0x30; 32]);
        let sender_jetton_wallet = Address::new(0, [0x31; 32]);
        let native_master = Address::new(0, [0x32; 32]);
        let native_item = Address::new(0, [0x33; 32]);
        let mirrored_item = Address::new(0, [0x34; 32]);
        f.chain.deploy(native_master, code(50), 0);
        f.chain.deploy(native_item, code(51), 0);
        f.chain.deploy(mirrored_item, code(2), 0);
        f.chain.set_getter(native_master, "get_wallet_address", move |_| {
            Ok(vec![StackValue::address(&sender_jetton_wallet)?])
        });
        let defaults = BridgeDefaults::default();

        let jetton = f.resolver.jetton(native_master).await.unwrap().with_amount(10).unwrap();
        let msg = f
            .resolver
            .asset_message(&jetton, &sender, 1, &payload(), &f.contracts, &defaults)
            .await
            .unwrap();
        assert_eq!(msg.to(), &sender_jetton_wallet);
        assert_eq!(msg.payload().parse().load_uint(32).unwrap(), OP_JETTON_TRANSFER as u64);

        let item = f.resolver.nft_item(native_item).await.unwrap();
        let msg = f
            .resolver
            .asset_message(&item, &sender, 1, &payload(), &f.contracts, &defaults)
            .await
            .unwrap();
        assert_eq!(msg.to(), &native_item);
        assert_eq!(msg.payload().parse().load_uint(32).unwrap(), OP_NFT_TRANSFER as u64);

        let item = f.resolver.nft_item(mirrored_item).await.unwrap();
        let msg = f
            .resolver
            .asset_message(&item, &sender, 1, &payload(), &f.contracts, &defaults)
            .await
            .unwrap();
        assert_eq!(msg.payload().parse().load_uint(32).unwrap(), OP_NFT_BURN as u64);
        assert_eq!(msg.value(), defaults.asset_message_value);
        assert_eq!(OP_NFT_BURN, OP_JETTON_BURN);
    }
}
