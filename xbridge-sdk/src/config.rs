//! SDK configuration.
//!
//! Everything the core needs from the outside world (endpoints, contract
//! addresses, canonical code hashes, wallet defaults) is collected here once
//! and handed explicitly to the resolver, senders and tracker.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{BridgeError, BridgeResult};
use crate::wallet::WalletVersion;

/// Environment variable names.
pub const NETWORK_ENV: &str = "XBRIDGE_NETWORK";
pub const INDEXER_URL_ENV: &str = "XBRIDGE_INDEXER_URL";
pub const INDEXER_API_KEY_ENV: &str = "XBRIDGE_INDEXER_API_KEY";
pub const TRACKER_ENDPOINTS_ENV: &str = "XBRIDGE_TRACKER_ENDPOINTS";
pub const TRACKER_TIMEOUT_MS_ENV: &str = "XBRIDGE_TRACKER_TIMEOUT_MS";
pub const TRACKER_CHUNK_SIZE_ENV: &str = "XBRIDGE_TRACKER_CHUNK_SIZE";
pub const TRACKER_CHUNK_DELAY_MS_ENV: &str = "XBRIDGE_TRACKER_CHUNK_DELAY_MS";
pub const FORWARD_EXECUTED_MARKER_ENV: &str = "XBRIDGE_FORWARD_EXECUTED_MARKER";
pub const REVERSE_EXECUTED_MARKER_ENV: &str = "XBRIDGE_REVERSE_EXECUTED_MARKER";
pub const CROSS_CHAIN_LAYER_ENV: &str = "XBRIDGE_CROSS_CHAIN_LAYER";
pub const JETTON_PROXY_ENV: &str = "XBRIDGE_JETTON_PROXY";
pub const NFT_PROXY_ENV: &str = "XBRIDGE_NFT_PROXY";
pub const CODE_JETTON_MINTER_ENV: &str = "XBRIDGE_CODE_JETTON_MINTER";
pub const CODE_NFT_ITEM_ENV: &str = "XBRIDGE_CODE_NFT_ITEM";
pub const CODE_NFT_COLLECTION_ENV: &str = "XBRIDGE_CODE_NFT_COLLECTION";
pub const WALLET_VERSION_ENV: &str = "XBRIDGE_WALLET_VERSION";
pub const SUBWALLET_ID_ENV: &str = "XBRIDGE_SUBWALLET_ID";
pub const NONCE_SPAN_ENV: &str = "XBRIDGE_NONCE_SPAN";

/// Terminal status of a forward (asset-bridging) operation.
pub const DEFAULT_FORWARD_EXECUTED: &str = "EVMMerkleMessageExecuted";
/// Terminal status of a reverse (bridge-initiated) operation.
pub const DEFAULT_REVERSE_EXECUTED: &str = "TVMMerkleMessageExecuted";

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK
// ═══════════════════════════════════════════════════════════════════════════════

/// Target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    /// Local or private deployment; has no presets.
    Dev,
}

impl Network {
    /// Global chain id used in wallet ids (v5).
    pub fn global_id(&self) -> i32 {
        match self {
            Self::Mainnet => -239,
            Self::Testnet | Self::Dev => -3,
        }
    }

    /// Whether friendly addresses should carry the test-only flag.
    pub fn is_test_only(&self) -> bool {
        !matches!(self, Self::Mainnet)
    }

    /// Public tracking endpoints for this network.
    pub fn default_tracker_endpoints(&self) -> Vec<String> {
        match self {
            Self::Mainnet => vec![
                "https://data.xbridge.network".to_string(),
                "https://data-backup.xbridge.network".to_string(),
            ],
            Self::Testnet => vec![
                "https://data.testnet.xbridge.network".to_string(),
                "https://data-backup.testnet.xbridge.network".to_string(),
            ],
            Self::Dev => Vec::new(),
        }
    }

    /// Public indexing API for this network.
    pub fn default_indexer_url(&self) -> Option<&'static str> {
        match self {
            Self::Mainnet => Some("https://toncenter.com/api/v3"),
            Self::Testnet => Some("https://testnet.toncenter.com/api/v3"),
            Self::Dev => None,
        }
    }
}

impl FromStr for Network {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "dev" | "devnet" | "local" => Ok(Self::Dev),
            other => Err(BridgeError::Config(format!("unknown network: {}", other))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Dev => "dev",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain RPC (indexing API) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainRpcConfig {
    /// Base URL of the indexing API.
    pub indexer_url: String,
    /// Optional API key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ChainRpcConfig {
    /// Preset for a network. `Dev` has none.
    pub fn for_network(network: Network) -> BridgeResult<Self> {
        let indexer_url = network.default_indexer_url().ok_or_else(|| {
            BridgeError::Config(format!("network {} requires an explicit indexer URL", network))
        })?;
        Ok(Self {
            indexer_url: indexer_url.to_string(),
            api_key: None,
            timeout_ms: 10_000,
        })
    }
}

/// Status markers for one tracking direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionMarkers {
    /// Stage name meaning the operation fully executed.
    pub executed: String,
    /// Stage names treated as terminal failures.
    #[serde(default)]
    pub failed: Vec<String>,
}

impl DirectionMarkers {
    pub fn new(executed: impl Into<String>) -> Self {
        Self {
            executed: executed.into(),
            failed: Vec::new(),
        }
    }

    pub fn with_failed(mut self, marker: impl Into<String>) -> Self {
        self.failed.push(marker.into());
        self
    }
}

/// Operation tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Candidate endpoints, tried in order.
    pub endpoints: Vec<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Keys per batch request.
    pub chunk_size: usize,
    /// Pause between chunks in milliseconds.
    pub chunk_delay_ms: u64,
    /// Markers for forward (asset-bridging) operations.
    pub forward: DirectionMarkers,
    /// Markers for reverse (bridge-initiated) operations.
    pub reverse: DirectionMarkers,
}

impl TrackerConfig {
    /// Configuration with explicit endpoints and default tuning.
    pub fn with_endpoints(endpoints: Vec<String>) -> BridgeResult<Self> {
        if endpoints.is_empty() {
            return Err(BridgeError::Config("tracker endpoint list is empty".into()));
        }
        Ok(Self {
            endpoints,
            timeout_ms: 10_000,
            chunk_size: 100,
            chunk_delay_ms: 0,
            forward: DirectionMarkers::new(DEFAULT_FORWARD_EXECUTED),
            reverse: DirectionMarkers::new(DEFAULT_REVERSE_EXECUTED),
        })
    }

    /// Preset for a network. `Dev` has none.
    pub fn for_network(network: Network) -> BridgeResult<Self> {
        let endpoints = network.default_tracker_endpoints();
        if endpoints.is_empty() {
            return Err(BridgeError::Config(format!(
                "network {} requires explicit tracker endpoints",
                network
            )));
        }
        Self::with_endpoints(endpoints)
    }

    /// Load from `XBRIDGE_*` variables, falling back to the network preset.
    pub fn from_env() -> BridgeResult<Self> {
        let network = network_from_env()?;
        let mut config = match env::var(TRACKER_ENDPOINTS_ENV) {
            Ok(list) => Self::with_endpoints(split_list(&list))?,
            Err(_) => Self::for_network(network)?,
        };

        if let Some(timeout) = parse_env(TRACKER_TIMEOUT_MS_ENV) {
            config.timeout_ms = timeout;
        }
        if let Some(chunk) = parse_env::<usize>(TRACKER_CHUNK_SIZE_ENV) {
            config.chunk_size = chunk.max(1);
        }
        if let Some(delay) = parse_env(TRACKER_CHUNK_DELAY_MS_ENV) {
            config.chunk_delay_ms = delay;
        }
        if let Ok(marker) = env::var(FORWARD_EXECUTED_MARKER_ENV) {
            config.forward.executed = marker;
        }
        if let Ok(marker) = env::var(REVERSE_EXECUTED_MARKER_ENV) {
            config.reverse.executed = marker;
        }
        Ok(config)
    }
}

/// Addresses of the bridge contracts on the TVM side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Entry point that accepts native-value cross-chain messages.
    pub cross_chain_layer: Address,
    /// Receives native jettons being bridged.
    pub jetton_proxy: Address,
    /// Receives native NFT items being bridged.
    pub nft_proxy: Address,
}

/// Representation hashes of the canonical mirrored contract images.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCodes {
    /// Mirrored jetton minter code.
    #[serde(with = "hex32")]
    pub mirrored_jetton_minter: [u8; 32],
    /// Mirrored NFT item code.
    #[serde(with = "hex32")]
    pub mirrored_nft_item: [u8; 32],
    /// Mirrored NFT collection code.
    #[serde(with = "hex32")]
    pub mirrored_nft_collection: [u8; 32],
}

impl CanonicalCodes {
    /// Parse three hex-encoded code hashes.
    pub fn from_hex(
        jetton_minter: &str,
        nft_item: &str,
        nft_collection: &str,
    ) -> BridgeResult<Self> {
        Ok(Self {
            mirrored_jetton_minter: parse_hash(jetton_minter)?,
            mirrored_nft_item: parse_hash(nft_item)?,
            mirrored_nft_collection: parse_hash(nft_collection)?,
        })
    }
}

/// Defaults applied when opening local-key senders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletDefaults {
    pub version: WalletVersion,
    /// Subwallet id; `None` uses the version's default.
    pub subwallet_id: Option<u32>,
    /// Lifetime of a signed external message in seconds.
    pub valid_for_secs: u64,
    /// Highload replay window in seconds.
    pub highload_timeout_secs: u32,
    /// Seconds subtracted from the clock for highload `created_at`.
    pub safety_margin_secs: u64,
    /// Polls while waiting for a seqno to advance.
    pub seqno_poll_attempts: u32,
    /// Delay between seqno polls in milliseconds.
    pub seqno_poll_delay_ms: u64,
}

impl Default for WalletDefaults {
    fn default() -> Self {
        Self {
            version: WalletVersion::V4R2,
            subwallet_id: None,
            valid_for_secs: 600,
            highload_timeout_secs: 3600,
            safety_margin_secs: 30,
            seqno_poll_attempts: 30,
            seqno_poll_delay_ms: 2_000,
        }
    }
}

/// Value and nonce defaults used when building cross-chain calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeDefaults {
    /// Nanotons attached to each jetton/NFT message for fees.
    pub asset_message_value: u128,
    /// Nanotons forwarded with jetton/NFT transfer notifications.
    pub forward_amount: u128,
    /// Upper bound of the random offset in generated nonces.
    pub nonce_span: u64,
}

impl Default for BridgeDefaults {
    fn default() -> Self {
        Self {
            asset_message_value: 100_000_000,
            forward_amount: 50_000_000,
            nonce_span: 1_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SDK CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Complete SDK configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdkConfig {
    pub network: Network,
    pub chain: ChainRpcConfig,
    pub tracker: TrackerConfig,
    pub contracts: ContractsConfig,
    pub codes: CanonicalCodes,
    #[serde(default)]
    pub wallet: WalletDefaults,
    #[serde(default)]
    pub bridge: BridgeDefaults,
}

impl SdkConfig {
    /// Build from network presets plus the deployment-specific parts.
    pub fn new(
        network: Network,
        contracts: ContractsConfig,
        codes: CanonicalCodes,
    ) -> BridgeResult<Self> {
        Ok(Self {
            network,
            chain: ChainRpcConfig::for_network(network)?,
            tracker: TrackerConfig::for_network(network)?,
            contracts,
            codes,
            wallet: WalletDefaults::default(),
            bridge: BridgeDefaults::default(),
        })
    }

    /// Load from `XBRIDGE_*` environment variables.
    pub fn from_env() -> BridgeResult<Self> {
        let network = network_from_env()?;

        let chain = match env::var(INDEXER_URL_ENV) {
            Ok(url) => ChainRpcConfig {
                indexer_url: url,
                api_key: None,
                timeout_ms: 10_000,
            },
            Err(_) => ChainRpcConfig::for_network(network)?,
        };
        let chain = ChainRpcConfig {
            api_key: env::var(INDEXER_API_KEY_ENV).ok(),
            ..chain
        };

        let contracts = ContractsConfig {
            cross_chain_layer: required_address(CROSS_CHAIN_LAYER_ENV)?,
            jetton_proxy: required_address(JETTON_PROXY_ENV)?,
            nft_proxy: required_address(NFT_PROXY_ENV)?,
        };

        let codes = CanonicalCodes::from_hex(
            &required(CODE_JETTON_MINTER_ENV)?,
            &required(CODE_NFT_ITEM_ENV)?,
            &required(CODE_NFT_COLLECTION_ENV)?,
        )?;

        let mut wallet = WalletDefaults::default();
        if let Ok(tag) = env::var(WALLET_VERSION_ENV) {
            wallet.version = tag.parse()?;
        }
        wallet.subwallet_id = parse_env(SUBWALLET_ID_ENV);

        let mut bridge = BridgeDefaults::default();
        if let Some(span) = parse_env(NONCE_SPAN_ENV) {
            bridge.nonce_span = span;
        }

        Ok(Self {
            network,
            chain,
            tracker: TrackerConfig::from_env()?,
            contracts,
            codes,
            wallet,
            bridge,
        })
    }

    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_chain(mut self, chain: ChainRpcConfig) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_wallet(mut self, wallet: WalletDefaults) -> Self {
        self.wallet = wallet;
        self
    }
}

fn network_from_env() -> BridgeResult<Network> {
    match env::var(NETWORK_ENV) {
        Ok(s) => s.parse(),
        Err(_) => Ok(Network::Testnet),
    }
}

fn required(name: &str) -> BridgeResult<String> {
    env::var(name).map_err(|_| BridgeError::Config(format!("{} must be set", name)))
}

fn required_address(name: &str) -> BridgeResult<Address> {
    let raw = required(name)?;
    Address::parse(&raw).map_err(|e| BridgeError::Config(format!("{}: {}", name, e)))
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_hash(s: &str) -> BridgeResult<[u8; 32]> {
    let s = s.trim().strip_prefix("0x").unwrap_or(s.trim());
    let bytes = hex::decode(s).map_err(|e| BridgeError::Config(format!("bad code hash: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::Config("code hash must be 32 bytes".into()))
}

mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hash(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("MAINNET".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("devnet".parse::<Network>().unwrap(), Network::Dev);
        assert!(matches!(
            "moon".parse::<Network>(),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_dev_network_requires_endpoints() {
        assert!(matches!(
            TrackerConfig::for_network(Network::Dev),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            ChainRpcConfig::for_network(Network::Dev),
            Err(BridgeError::Config(_))
        ));
        assert!(TrackerConfig::with_endpoints(vec![]).is_err());

        let explicit = TrackerConfig::with_endpoints(vec!["http://localhost:8080".into()]).unwrap();
        assert_eq!(explicit.chunk_size, 100);
        assert_eq!(explicit.forward.executed, DEFAULT_FORWARD_EXECUTED);
        assert_eq!(explicit.reverse.executed, DEFAULT_REVERSE_EXECUTED);
    }

    #[test]
    fn test_presets_exist_for_public_networks() {
        for network in [Network::Mainnet, Network::Testnet] {
            assert!(!TrackerConfig::for_network(network).unwrap().endpoints.is_empty());
            assert!(ChainRpcConfig::for_network(network).is_ok());
        }
    }

    #[test]
    fn test_canonical_codes_hex() {
        let h = "ab".repeat(32);
        let codes = CanonicalCodes::from_hex(&h, &format!("0x{}", h), &h).unwrap();
        assert_eq!(codes.mirrored_nft_item, [0xab; 32]);
        assert!(CanonicalCodes::from_hex("abcd", &h, &h).is_err());

        let json = serde_json::to_string(&codes).unwrap();
        let back: CanonicalCodes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, codes);
    }

    #[test]
    fn test_split_list_trims() {
        assert_eq!(
            split_list(" http://a/ , ,http://b"),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }
}
