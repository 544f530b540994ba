//! xbridge-sdk
//!
//! Client-side SDK for moving assets and calls from a TVM chain to an EVM
//! chain through a cross-chain messaging layer.
//!
//! # Overview
//!
//! A cross-chain call becomes a set of TVM messages: one per bridged asset
//! plus an optional native-value message to the cross-chain layer. Each
//! message carries the same JSON payload, keyed by a per-call nonce. The SDK
//! builds those messages, packs them into as few signed external messages as
//! the wallet allows, submits them, and then follows the remote operation
//! through the tracking service until it executes on the EVM side.
//!
//! # Pipeline
//!
//! | Stage            | Module       | Does                                             |
//! |------------------|--------------|--------------------------------------------------|
//! | Asset resolution | `assets`     | code-hash classification, burn vs transfer body  |
//! | Orchestration    | `bridge`     | call → shard transaction + transaction linker    |
//! | Batching         | `batching`   | maximal groups under count, size and depth caps  |
//! | Dispatch         | `sender`     | seqno or replay-token discipline per wallet      |
//! | Tracking         | `tracker`    | operation id lookup, failover, status reduction  |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ AssetResolver│──▶│CrossChainBr. │──▶│  pack_msgs   │──▶│    Sender    │
//! │ • code hash  │   │ • nonce      │   │ • halve      │   │ • Raw        │
//! │ • payloads   │   │ • linker     │   │ • search up  │   │ • Highload   │
//! └──────┬───────┘   └──────────────┘   └──────────────┘   │ • External   │
//!        │                                                 └──────┬───────┘
//!        ▼                                                        ▼
//! ┌──────────────┐                                         ┌──────────────┐
//! │ ChainClient  │◀────────────────────────────────────────│ TVM chain    │
//! └──────────────┘                                         └──────┬───────┘
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │OperationTrack│
//!                                                          │ • failover   │
//!                                                          │ • chunking   │
//!                                                          └──────────────┘
//! ```

pub mod address;
pub mod assets;
pub mod batching;
pub mod bridge;
pub mod cell;
pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod evm;
pub mod model;
pub mod query_id;
pub mod sender;
pub mod tracker;
pub mod wallet;

pub use address::{Address, FriendlyFlags};
pub use assets::{
    aggregate_assets, Asset, AssetOperation, AssetOrigin, AssetResolver, CrossChainPayload,
    EvmCall, FeeParams,
};
pub use batching::{pack_messages, BatchSendReport, GroupReport, MessageGroup, PackingLimits};
pub use bridge::{CallOptions, CrossChainBridge, CrossChainCall, PreparedTransaction};
pub use cell::{Cell, CellBuilder, CellSlice};
pub use chain::{ChainClient, IndexerClient, MemoryChain, OpenedContract};
pub use config::{Network, SdkConfig, TrackerConfig};
pub use error::{BridgeError, BridgeResult};
pub use evm::{EvmAddress, EvmReader};
pub use model::{
    ExecutionStages, OperationId, OutboundMessage, SendOutcome, ShardTransaction, SimplifiedStatus,
    StatusInfo, TransactionLinker,
};
pub use query_id::{HighloadQueryId, ReplayGuard, ReplayToken};
pub use sender::{ExternalApprover, Sender, SenderFactory, SenderKind};
pub use tracker::{Direction, OperationTracker, TrackingSession, TrackingState, WaitOptions};
pub use wallet::{Wallet, WalletVersion};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
