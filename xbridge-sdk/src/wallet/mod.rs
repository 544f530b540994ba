//! Wallet versions and their signed external-message framings.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cell::{Cell, CellBuilder};
use crate::config::Network;
use crate::error::{BridgeError, BridgeResult};
use crate::model::OutboundMessage;
use crate::query_id::ReplayToken;

pub mod message;

pub use message::{external_message, internal_message, out_action_list, DEFAULT_SEND_MODE};

/// Default subwallet id of v3/v4 wallets (plus workchain).
pub const DEFAULT_SUBWALLET_ID: u32 = 698_983_191;
/// Default subwallet id of highload v3 wallets.
pub const HIGHLOAD_DEFAULT_SUBWALLET_ID: u32 = 0x10ad;
/// Internal-transfer op used by highload v3 to run an out-action list.
pub const OP_HIGHLOAD_INTERNAL_TRANSFER: u32 = 0xae42e5a4;
/// v5 signed external request prefix.
pub const OP_V5_SIGNED_EXTERNAL: u32 = 0x7369_676e;
/// Value attached to the highload self-transfer carrying a batch.
pub const HIGHLOAD_INTERNAL_TRANSFER_VALUE: u128 = 100_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// VERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Supported wallet contract versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletVersion {
    #[serde(rename = "v3r2")]
    V3R2,
    #[serde(rename = "v4r2")]
    V4R2,
    #[serde(rename = "v5r1")]
    V5R1,
    #[serde(rename = "highload_v3")]
    HighloadV3,
}

impl WalletVersion {
    /// Messages one external call can carry.
    pub fn max_messages(&self) -> usize {
        match self {
            Self::V3R2 | Self::V4R2 => 4,
            Self::V5R1 => 255,
            Self::HighloadV3 => 254,
        }
    }

    /// Uses replay tokens instead of a seqno.
    pub fn is_highload(&self) -> bool {
        matches!(self, Self::HighloadV3)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::V3R2 => "v3r2",
            Self::V4R2 => "v4r2",
            Self::V5R1 => "v5r1",
            Self::HighloadV3 => "highload_v3",
        }
    }
}

impl FromStr for WalletVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect();
        match normalized.as_str() {
            "v3" | "v3r2" => Ok(Self::V3R2),
            "v4" | "v4r2" => Ok(Self::V4R2),
            "v5" | "v5r1" | "w5" => Ok(Self::V5R1),
            "highloadv3" | "hlv3" => Ok(Self::HighloadV3),
            _ => Err(BridgeError::UnknownWalletVersion(s.to_string())),
        }
    }
}

impl fmt::Display for WalletVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Replay protection values for one external message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayParams {
    Seqno { seqno: u32, valid_until: u32 },
    Highload { token: ReplayToken, timeout: u32 },
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET
// ═══════════════════════════════════════════════════════════════════════════════

/// A deployed wallet contract plus the key that controls it.
#[derive(Clone)]
pub struct Wallet {
    version: WalletVersion,
    address: Address,
    subwallet_id: u32,
    key: Arc<SigningKey>,
}

impl Wallet {
    /// Wallet with the version's default subwallet id for `network`.
    pub fn new(
        version: WalletVersion,
        address: Address,
        secret_key: [u8; 32],
        network: Network,
    ) -> Self {
        let subwallet_id = default_subwallet_id(version, address.workchain(), network);
        Self {
            version,
            address,
            subwallet_id,
            key: Arc::new(SigningKey::from_bytes(&secret_key)),
        }
    }

    /// Override the subwallet id (v5: the full wallet id).
    pub fn with_subwallet_id(mut self, subwallet_id: u32) -> Self {
        self.subwallet_id = subwallet_id;
        self
    }

    pub fn version(&self) -> WalletVersion {
        self.version
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn subwallet_id(&self) -> u32 {
        self.subwallet_id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, cell: &Cell) -> [u8; 64] {
        self.key.sign(&cell.hash()).to_bytes()
    }

    /// Signed external message sending `messages`, framed for this version.
    pub fn build_external(
        &self,
        messages: &[OutboundMessage],
        replay: ReplayParams,
    ) -> BridgeResult<Cell> {
        if messages.len() > self.version.max_messages() {
            return Err(BridgeError::CellOverflow(format!(
                "{} messages exceed {} ceiling of {}",
                messages.len(),
                self.version,
                self.version.max_messages()
            )));
        }
        let body = match (self.version, replay) {
            (
                WalletVersion::V3R2 | WalletVersion::V4R2,
                ReplayParams::Seqno { seqno, valid_until },
            ) => {
                self.seqno_body(messages, seqno, valid_until)?
            }
            (WalletVersion::V5R1, ReplayParams::Seqno { seqno, valid_until }) => {
                self.v5_body(messages, seqno, valid_until)?
            }
            (WalletVersion::HighloadV3, ReplayParams::Highload { token, timeout }) => {
                self.highload_body(messages, token, timeout)?
            }
            (version, replay) => {
                return Err(BridgeError::Config(format!(
                    "{} wallet cannot use {:?}",
                    version, replay
                )))
            }
        };
        external_message(&self.address, body)
    }

    fn seqno_body(
        &self,
        messages: &[OutboundMessage],
        seqno: u32,
        valid_until: u32,
    ) -> BridgeResult<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(self.subwallet_id as u64, 32)?
            .store_uint(valid_until as u64, 32)?
            .store_uint(seqno as u64, 32)?;
        if self.version == WalletVersion::V4R2 {
            b.store_uint(0, 8)?; // simple send
        }
        for msg in messages {
            b.store_uint(DEFAULT_SEND_MODE as u64, 8)?
                .store_ref(Arc::new(internal_message(msg)?))?;
        }
        let unsigned = b.build()?;

        let mut signed = CellBuilder::new();
        signed
            .store_bytes(&self.sign(&unsigned))?
            .store_cell_contents(&unsigned)?;
        signed.build()
    }

    fn v5_body(
        &self,
        messages: &[OutboundMessage],
        seqno: u32,
        valid_until: u32,
    ) -> BridgeResult<Cell> {
        let actions = if messages.is_empty() {
            None
        } else {
            Some(Arc::new(out_action_list(messages, DEFAULT_SEND_MODE)?))
        };
        let mut b = CellBuilder::new();
        b.store_uint(OP_V5_SIGNED_EXTERNAL as u64, 32)?
            .store_uint(self.subwallet_id as u64, 32)?
            .store_uint(valid_until as u64, 32)?
            .store_uint(seqno as u64, 32)?
            .store_maybe_ref(actions)?
            .store_bit(false)?; // no extended actions
        let unsigned = b.build()?;

        let mut signed = CellBuilder::new();
        signed
            .store_cell_contents(&unsigned)?
            .store_bytes(&self.sign(&unsigned))?;
        signed.build()
    }

    fn highload_body(
        &self,
        messages: &[OutboundMessage],
        token: ReplayToken,
        timeout: u32,
    ) -> BridgeResult<Cell> {
        let carried = match messages {
            [single] => internal_message(single)?,
            _ => {
                let mut transfer = CellBuilder::new();
                transfer
                    .store_uint(OP_HIGHLOAD_INTERNAL_TRANSFER as u64, 32)?
                    .store_uint(token.query_id.packed() as u64, 64)?
                    .store_ref(Arc::new(out_action_list(messages, DEFAULT_SEND_MODE)?))?;
                let wrapper = OutboundMessage::new(
                    self.address,
                    HIGHLOAD_INTERNAL_TRANSFER_VALUE,
                    Arc::new(transfer.build()?),
                );
                internal_message(&wrapper)?
            }
        };

        let mut inner = CellBuilder::new();
        inner
            .store_uint(self.subwallet_id as u64, 32)?
            .store_ref(Arc::new(carried))?
            .store_uint(DEFAULT_SEND_MODE as u64, 8)?
            .store_uint(token.query_id.packed() as u64, 23)?
            .store_uint(token.created_at, 64)?
            .store_uint(timeout as u64, 22)?;
        let inner = inner.build()?;

        let mut signed = CellBuilder::new();
        signed
            .store_bytes(&self.sign(&inner))?
            .store_ref(Arc::new(inner))?;
        signed.build()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("version", &self.version)
            .field("address", &self.address)
            .field("subwallet_id", &self.subwallet_id)
            .finish_non_exhaustive()
    }
}

/// Default subwallet (or v5 wallet) id.
pub fn default_subwallet_id(version: WalletVersion, workchain: i8, network: Network) -> u32 {
    match version {
        WalletVersion::V3R2 | WalletVersion::V4R2 => {
            DEFAULT_SUBWALLET_ID.wrapping_add(workchain as i32 as u32)
        }
        WalletVersion::V5R1 => {
            let context: u32 = (1 << 31) | ((workchain as u8 as u32) << 23);
            (network.global_id() as u32) ^ context
        }
        WalletVersion::HighloadV3 => HIGHLOAD_DEFAULT_SUBWALLET_ID,
    }
}
