//! Payload builders for asset and cross-chain messages.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cell::{Cell, CellBuilder};
use crate::error::BridgeResult;
use crate::evm::EvmAddress;

/// TEP-74 jetton transfer.
pub const OP_JETTON_TRANSFER: u32 = 0x0f8a7ea5;
/// TEP-74 jetton burn.
pub const OP_JETTON_BURN: u32 = 0x595f07bc;
/// TEP-62 NFT transfer.
pub const OP_NFT_TRANSFER: u32 = 0x5fcc3d14;
/// Burn accepted by mirrored NFT items (same tag as the jetton burn).
pub const OP_NFT_BURN: u32 = 0x595f07bc;
/// Native-value message to the cross-chain layer.
pub const OP_CROSS_CHAIN_MESSAGE: u32 = 0x6bd1_c1d7;

// ═══════════════════════════════════════════════════════════════════════════════
// CROSS-CHAIN PAYLOAD
// ═══════════════════════════════════════════════════════════════════════════════

/// Call to execute on the EVM side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmCall {
    pub target: EvmAddress,
    /// Normalized method signature, empty for a plain bridge.
    pub method_name: String,
    /// ABI-encoded arguments, `0x`-prefixed hex.
    pub arguments: String,
}

impl EvmCall {
    pub fn new(
        target: EvmAddress,
        method_name: impl Into<String>,
        encoded_arguments: &[u8],
    ) -> Self {
        Self {
            target,
            method_name: method_name.into(),
            arguments: format!("0x{}", hex::encode(encoded_arguments)),
        }
    }
}

/// Optional fee parameters paid on the EVM side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeParams {
    pub is_round_trip: bool,
    pub gas_limit: u64,
    #[serde(with = "u128_string")]
    pub protocol_fee: u128,
    #[serde(with = "u128_string")]
    pub evm_executor_fee: u128,
    #[serde(with = "u128_string")]
    pub tvm_executor_fee: u128,
}

/// JSON document carried (snake-encoded) by every message of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainPayload {
    pub shards_key: String,
    pub shard_count: u32,
    pub evm_call: EvmCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_params: Option<FeeParams>,
}

impl CrossChainPayload {
    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Snake-encoded JSON cell.
    pub fn to_cell(&self) -> BridgeResult<Cell> {
        let mut b = CellBuilder::new();
        b.store_string_tail(&self.to_json()?)?;
        b.build()
    }

    pub fn from_cell(cell: &Cell) -> BridgeResult<Self> {
        let json = cell.parse().load_string_tail()?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NONCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-call nonce: current time plus a uniform random offset.
///
/// Collisions are unlikely but possible; callers needing strict uniqueness
/// pass their own nonce instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceSource {
    span: u64,
}

impl NonceSource {
    pub fn new(span: u64) -> Self {
        Self { span }
    }

    pub fn span(&self) -> u64 {
        self.span
    }

    pub fn next(&self, now: u64) -> u64 {
        now + rand::thread_rng().gen_range(0..=self.span)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGE BODIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Jetton transfer to `destination`, forwarding `forward_payload` with the
/// transfer notification.
pub fn jetton_transfer_payload(
    query_id: u64,
    amount: u128,
    destination: &Address,
    response_destination: &Address,
    forward_amount: u128,
    forward_payload: Option<Cell>,
) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_JETTON_TRANSFER as u64, 32)?
        .store_uint(query_id, 64)?
        .store_coins(amount)?
        .store_address(Some(destination))?
        .store_address(Some(response_destination))?
        .store_maybe_ref(None)? // custom_payload
        .store_coins(forward_amount)?
        .store_maybe_ref(forward_payload.map(Arc::new))?;
    b.build()
}

/// Jetton burn; `custom_payload` travels to the minter with the burn.
pub fn jetton_burn_payload(
    query_id: u64,
    amount: u128,
    response_destination: &Address,
    custom_payload: Option<Cell>,
) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_JETTON_BURN as u64, 32)?
        .store_uint(query_id, 64)?
        .store_coins(amount)?
        .store_address(Some(response_destination))?
        .store_maybe_ref(custom_payload.map(Arc::new))?;
    b.build()
}

/// NFT ownership transfer to `new_owner`.
pub fn nft_transfer_payload(
    query_id: u64,
    new_owner: &Address,
    response_destination: &Address,
    forward_amount: u128,
    forward_payload: Option<Cell>,
) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_NFT_TRANSFER as u64, 32)?
        .store_uint(query_id, 64)?
        .store_address(Some(new_owner))?
        .store_address(Some(response_destination))?
        .store_bit(false)? // custom_payload
        .store_coins(forward_amount)?
        .store_maybe_ref(forward_payload.map(Arc::new))?;
    b.build()
}

/// Burn of a mirrored NFT item.
pub fn nft_burn_payload(
    query_id: u64,
    response_destination: &Address,
    custom_payload: Option<Cell>,
) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_NFT_BURN as u64, 32)?
        .store_uint(query_id, 64)?
        .store_address(Some(response_destination))?
        .store_maybe_ref(custom_payload.map(Arc::new))?;
    b.build()
}

/// Native-value cross-chain message body.
pub fn cross_chain_message_payload(query_id: u64, payload: Cell) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_CROSS_CHAIN_MESSAGE as u64, 32)?
        .store_uint(query_id, 64)?
        .store_ref(Arc::new(payload))?;
    b.build()
}

mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
