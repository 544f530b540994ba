//! Bridgeable assets.
//!
//! An asset's origin decides how it crosses the bridge: native assets are
//! transferred to a proxy and minted as mirrors on the EVM side; mirrored
//! assets are burned and released at their EVM origin. Origin is resolved
//! once by [`AssetResolver`] and never changes for an instance.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;
use crate::error::{BridgeError, BridgeResult};
use crate::evm::{EvmAddress, EvmReader};

pub mod payload;
pub mod resolver;

pub use payload::{CrossChainPayload, EvmCall, FeeParams, NonceSource};
pub use resolver::AssetResolver;

/// Where an asset's authoritative representation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOrigin {
    /// Native to the TVM chain.
    Native,
    /// Mirror of an EVM-native asset.
    Mirrored,
}

/// How an asset leaves the TVM chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOperation {
    Transfer,
    Burn,
}

impl AssetOrigin {
    pub fn operation(&self) -> AssetOperation {
        match self {
            Self::Native => AssetOperation::Transfer,
            Self::Mirrored => AssetOperation::Burn,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FUNGIBLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Jetton identified by its master contract.
#[derive(Debug, Clone)]
pub struct FungibleToken {
    master: Address,
    origin: AssetOrigin,
    amount: u128,
    evm_address: OnceCell<EvmAddress>,
}

impl FungibleToken {
    pub(crate) fn new(master: Address, origin: AssetOrigin) -> Self {
        Self {
            master,
            origin,
            amount: 0,
            evm_address: OnceCell::new(),
        }
    }

    pub fn master(&self) -> &Address {
        &self.master
    }

    pub fn origin(&self) -> AssetOrigin {
        self.origin
    }

    /// Raw amount in the token's smallest unit.
    pub fn amount(&self) -> u128 {
        self.amount
    }

    /// Copy with a different amount.
    pub fn with_amount(&self, amount: u128) -> Self {
        Self {
            amount,
            ..self.clone()
        }
    }

    /// Copy with `delta` added to the amount.
    pub fn add_amount(&self, delta: u128) -> BridgeResult<Self> {
        let amount = self.amount.checked_add(delta).ok_or_else(|| {
            BridgeError::InvalidAmount(format!("{} + {} overflows", self.amount, delta))
        })?;
        Ok(self.with_amount(amount))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NON-FUNGIBLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Single NFT item.
#[derive(Debug, Clone)]
pub struct NftItem {
    item: Address,
    collection: Option<Address>,
    index: Option<u64>,
    origin: AssetOrigin,
    evm_address: OnceCell<EvmAddress>,
}

impl NftItem {
    pub(crate) fn new(
        item: Address,
        collection: Option<Address>,
        index: Option<u64>,
        origin: AssetOrigin,
    ) -> Self {
        Self {
            item,
            collection,
            index,
            origin,
            evm_address: OnceCell::new(),
        }
    }

    pub fn item(&self) -> &Address {
        &self.item
    }

    pub fn collection(&self) -> Option<&Address> {
        self.collection.as_ref()
    }

    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn origin(&self) -> AssetOrigin {
        self.origin
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSET
// ═══════════════════════════════════════════════════════════════════════════════

/// Asset to be bridged.
#[derive(Debug, Clone)]
pub enum Asset {
    Jetton(FungibleToken),
    Nft(NftItem),
}

impl Asset {
    /// TVM address identifying the asset (jetton master or NFT item).
    pub fn address(&self) -> &Address {
        match self {
            Self::Jetton(t) => t.master(),
            Self::Nft(n) => n.item(),
        }
    }

    pub fn origin(&self) -> AssetOrigin {
        match self {
            Self::Jetton(t) => t.origin(),
            Self::Nft(n) => n.origin(),
        }
    }

    pub fn operation(&self) -> AssetOperation {
        self.origin().operation()
    }

    pub fn amount(&self) -> u128 {
        match self {
            Self::Jetton(t) => t.amount(),
            Self::Nft(_) => 1,
        }
    }

    /// Copy with a different amount. NFTs only accept 1.
    pub fn with_amount(&self, amount: u128) -> BridgeResult<Self> {
        match self {
            Self::Jetton(t) => Ok(Self::Jetton(t.with_amount(amount))),
            Self::Nft(n) if amount == 1 => Ok(Self::Nft(n.clone())),
            Self::Nft(n) => Err(BridgeError::InvalidAmount(format!(
                "NFT {} amount must be 1, got {}",
                n.item(),
                amount
            ))),
        }
    }

    /// Copy with `delta` added. NFTs cannot be added to.
    pub fn add_amount(&self, delta: u128) -> BridgeResult<Self> {
        match self {
            Self::Jetton(t) => Ok(Self::Jetton(t.add_amount(delta)?)),
            Self::Nft(n) => Err(BridgeError::InvalidAmount(format!(
                "cannot add to NFT {}",
                n.item()
            ))),
        }
    }

    /// EVM address of the asset, fetched once and cached.
    pub async fn evm_address(&self, reader: &dyn EvmReader) -> BridgeResult<EvmAddress> {
        let cache = match self {
            Self::Jetton(t) => &t.evm_address,
            Self::Nft(n) => &n.evm_address,
        };
        if let Some(addr) = cache.get() {
            return Ok(*addr);
        }
        let addr = match self {
            Self::Jetton(t) => reader.compute_token_address(t.master()).await?,
            Self::Nft(n) => {
                let collection = n.collection().unwrap_or(n.item());
                reader.compute_nft_collection_address(collection).await?
            }
        };
        debug!(tvm = %self.address(), evm = %addr, "resolved EVM address");
        Ok(*cache.get_or_init(|| addr))
    }
}

/// Merge same-address jettons (summing amounts, first appearance order) and
/// reject NFTs listed twice.
pub fn aggregate_assets(assets: Vec<Asset>) -> BridgeResult<Vec<Asset>> {
    let mut out: Vec<Asset> = Vec::with_capacity(assets.len());
    let mut positions: HashMap<Address, usize> = HashMap::new();

    for asset in assets {
        let key = *asset.address();
        match (positions.get(&key).copied(), &asset) {
            (Some(pos), Asset::Jetton(t)) => {
                out[pos] = out[pos].add_amount(t.amount())?;
            }
            (Some(_), Asset::Nft(n)) => {
                return Err(BridgeError::DuplicateAsset(n.item().to_raw()));
            }
            (None, _) => {
                positions.insert(key, out.len());
                out.push(asset);
            }
        }
    }
    Ok(out)
}
