//! EVM-side boundary: addresses, method names and read-only contract calls.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::address::Address;
use crate::encoding::parse_evm_address;
use crate::error::{BridgeError, BridgeResult};

/// Argument list appended to bare method names.
pub const DEFAULT_METHOD_ARGS: &str = "(bytes,bytes)";

/// 20-byte EVM address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// EIP-55 mixed-case form.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for EvmAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_evm_address(s)?))
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmAddress({})", self.to_checksum())
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// First four bytes of keccak-256 of a method signature.
pub fn method_selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Normalize a target method name.
///
/// Empty stays empty (no call). A bare name gets the default `(bytes,bytes)`
/// argument list; a full signature has its whitespace removed.
pub fn normalize_method_name(name: &str) -> BridgeResult<String> {
    let name: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    if name.is_empty() {
        return Ok(name);
    }

    let (ident, args) = match name.find('(') {
        Some(pos) => name.split_at(pos),
        None => (name.as_str(), DEFAULT_METHOD_ARGS),
    };

    let mut chars = ident.chars();
    let valid_ident = matches!(
        chars.next(),
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$'
    )
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !valid_ident {
        return Err(BridgeError::Encoding(format!("invalid method name: {}", name)));
    }
    if !args.ends_with(')') || args.matches('(').count() != args.matches(')').count() {
        return Err(BridgeError::Encoding(format!("invalid method signature: {}", name)));
    }

    Ok(format!("{}{}", ident, args))
}

/// Read-only calls against the EVM side of the bridge.
#[async_trait]
pub trait EvmReader: Send + Sync {
    /// EVM address of the mirror of a TVM token.
    async fn compute_token_address(&self, tvm_token: &Address) -> BridgeResult<EvmAddress>;

    /// EVM address of the mirror of a TVM NFT collection.
    async fn compute_nft_collection_address(
        &self,
        tvm_collection: &Address,
    ) -> BridgeResult<EvmAddress>;

    /// Whether a token is registered on the EVM side.
    async fn token_exists(&self, evm_token: &EvmAddress) -> BridgeResult<bool>;

    /// ERC-20 balance of `owner`.
    async fn erc20_balance(&self, evm_token: &EvmAddress, owner: &EvmAddress) -> BridgeResult<u128>;
}

#[cfg(feature = "evm")]
pub use ethers_reader::EthersEvmReader;

#[cfg(feature = "evm")]
mod ethers_reader {
    use std::sync::Arc;

    use async_trait::async_trait;
    use ethers::providers::{Http, Middleware, Provider};
    use ethers::types::{transaction::eip2718::TypedTransaction, Bytes, TransactionRequest, H160};
    use tracing::debug;

    use super::{method_selector, EvmAddress, EvmReader};
    use crate::address::Address;
    use crate::encoding::{decode_address, decode_bool, decode_uint, encode, AbiValue};
    use crate::error::{BridgeError, BridgeResult};

    /// [`EvmReader`] over a JSON-RPC provider.
    pub struct EthersEvmReader {
        provider: Arc<Provider<Http>>,
        /// Contract exposing `computeAddress*` and `exists`.
        token_utils: H160,
    }

    impl EthersEvmReader {
        pub fn new(rpc_url: &str, token_utils: EvmAddress) -> BridgeResult<Self> {
            let provider = Provider::<Http>::try_from(rpc_url)
                .map_err(|e| BridgeError::Config(format!("bad EVM RPC URL: {}", e)))?;
            Ok(Self {
                provider: Arc::new(provider),
                token_utils: H160::from(token_utils.0),
            })
        }

        async fn call(
            &self,
            to: H160,
            signature: &str,
            args: &[AbiValue],
        ) -> BridgeResult<Vec<u8>> {
            let mut calldata = method_selector(signature).to_vec();
            calldata.extend_from_slice(&encode(args));
            let tx: TypedTransaction = TransactionRequest::new()
                .to(to)
                .data(Bytes::from(calldata))
                .into();
            debug!(?to, signature, "eth_call");
            let out = self
                .provider
                .call(&tx, None)
                .await
                .map_err(|e| BridgeError::Rpc(e.to_string()))?;
            Ok(out.to_vec())
        }
    }

    #[async_trait]
    impl EvmReader for EthersEvmReader {
        async fn compute_token_address(&self, tvm_token: &Address) -> BridgeResult<EvmAddress> {
            let out = self
                .call(
                    self.token_utils,
                    "computeAddress(string)",
                    &[AbiValue::String(tvm_token.to_raw())],
                )
                .await?;
            Ok(EvmAddress(decode_address(&out)?))
        }

        async fn compute_nft_collection_address(
            &self,
            tvm_collection: &Address,
        ) -> BridgeResult<EvmAddress> {
            let out = self
                .call(
                    self.token_utils,
                    "computeNFTCollectionAddress(string)",
                    &[AbiValue::String(tvm_collection.to_raw())],
                )
                .await?;
            Ok(EvmAddress(decode_address(&out)?))
        }

        async fn token_exists(&self, evm_token: &EvmAddress) -> BridgeResult<bool> {
            let out = self
                .call(self.token_utils, "exists(address)", &[AbiValue::Address(evm_token.0)])
                .await?;
            decode_bool(&out)
        }

        async fn erc20_balance(
            &self,
            evm_token: &EvmAddress,
            owner: &EvmAddress,
        ) -> BridgeResult<u128> {
            let out = self
                .call(
                    H160::from(evm_token.0),
                    "balanceOf(address)",
                    &[AbiValue::Address(owner.0)],
                )
                .await?;
            decode_uint(&out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(method_selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(method_selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_normalize_method_name() {
        assert_eq!(normalize_method_name("bridge").unwrap(), "bridge(bytes,bytes)");
        assert_eq!(
            normalize_method_name("swap(bytes, bytes)").unwrap(),
            "swap(bytes,bytes)"
        );
        assert_eq!(
            normalize_method_name("mint((address,uint256)[])").unwrap(),
            "mint((address,uint256)[])"
        );
        assert_eq!(normalize_method_name("").unwrap(), "");
        assert!(normalize_method_name("1bad").is_err());
        assert!(normalize_method_name("open(bytes").is_err());
    }

    #[test]
    fn test_eip55_checksum() {
        let addr: EvmAddress = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        assert_eq!(addr.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        let json = serde_json::to_string(&addr).unwrap();
        let back: EvmAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
