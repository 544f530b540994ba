//! Solidity ABI encoding for EVM-side call arguments.
//!
//! Covers the value kinds cross-chain calls carry: static words (uint, int,
//! address, bool, bytes32), dynamic `bytes`/`string`, dynamic arrays and
//! tuples. Static values sit in the head; dynamic values get an offset word
//! in the head and their data in the tail.

use crate::error::{BridgeError, BridgeResult};

/// One ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    /// uint256, big-endian.
    Uint([u8; 32]),
    /// int256, two's complement.
    Int([u8; 32]),
    Address([u8; 20]),
    Bool(bool),
    FixedBytes32([u8; 32]),
    Bytes(Vec<u8>),
    String(String),
    /// Dynamic array `T[]`.
    Array(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    pub fn uint(value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        Self::Uint(word)
    }

    pub fn int(value: i128) -> Self {
        let fill = if value < 0 { 0xff } else { 0x00 };
        let mut word = [fill; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        Self::Int(word)
    }

    /// Parse a `0x`-prefixed 20-byte address.
    pub fn address(hex_address: &str) -> BridgeResult<Self> {
        Ok(Self::Address(parse_evm_address(hex_address)?))
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes(_) | Self::String(_) | Self::Array(_) => true,
            Self::Tuple(items) => items.iter().any(|v| v.is_dynamic()),
            _ => false,
        }
    }

    /// Canonical type string used in method signatures.
    pub fn type_name(&self) -> String {
        match self {
            Self::Uint(_) => "uint256".into(),
            Self::Int(_) => "int256".into(),
            Self::Address(_) => "address".into(),
            Self::Bool(_) => "bool".into(),
            Self::FixedBytes32(_) => "bytes32".into(),
            Self::Bytes(_) => "bytes".into(),
            Self::String(_) => "string".into(),
            Self::Array(items) => match items.first() {
                Some(first) => format!("{}[]", first.type_name()),
                None => "uint256[]".into(),
            },
            Self::Tuple(items) => format!(
                "({})",
                items.iter().map(|v| v.type_name()).collect::<Vec<_>>().join(",")
            ),
        }
    }
}

/// Encode a parameter list (the body of calldata after the selector).
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let head_len = values.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for value in values {
        if value.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            tail.extend_from_slice(&encode_single(value));
        } else {
            head.extend_from_slice(&encode_single(value));
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn encode_single(value: &AbiValue) -> Vec<u8> {
    match value {
        AbiValue::Uint(word) | AbiValue::Int(word) | AbiValue::FixedBytes32(word) => word.to_vec(),
        AbiValue::Address(addr) => {
            // address (left-padded to 32 bytes)
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(addr);
            word.to_vec()
        }
        AbiValue::Bool(b) => {
            let mut word = [0u8; 32];
            word[31] = *b as u8;
            word.to_vec()
        }
        AbiValue::Bytes(bytes) => encode_dynamic_bytes(bytes),
        AbiValue::String(s) => encode_dynamic_bytes(s.as_bytes()),
        AbiValue::Array(items) => {
            let mut out = usize_word(items.len()).to_vec();
            out.extend_from_slice(&encode(items));
            out
        }
        AbiValue::Tuple(items) => encode(items),
    }
}

fn encode_dynamic_bytes(bytes: &[u8]) -> Vec<u8> {
    // length word, then data right-padded to a 32-byte boundary
    let mut out = usize_word(bytes.len()).to_vec();
    let padded_len = ((bytes.len() + 31) / 32) * 32;
    let mut padded = vec![0u8; padded_len];
    padded[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&padded);
    out
}

fn usize_word(value: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Read a uint256 result word into `u128`, rejecting larger values.
pub fn decode_uint(word: &[u8]) -> BridgeResult<u128> {
    if word.len() < 32 {
        return Err(BridgeError::Encoding(format!(
            "uint word too short: {} < 32",
            word.len()
        )));
    }
    if word[..16].iter().any(|b| *b != 0) {
        return Err(BridgeError::Encoding("uint256 does not fit in u128".into()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..32]);
    Ok(u128::from_be_bytes(low))
}

/// Read an address result word.
pub fn decode_address(word: &[u8]) -> BridgeResult<[u8; 20]> {
    if word.len() < 32 {
        return Err(BridgeError::Encoding(format!(
            "address word too short: {} < 32",
            word.len()
        )));
    }
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&word[12..32]);
    Ok(addr)
}

/// Read a bool result word.
pub fn decode_bool(word: &[u8]) -> BridgeResult<bool> {
    if word.len() < 32 {
        return Err(BridgeError::Encoding("bool word too short".into()));
    }
    Ok(word[31] != 0)
}

/// Parse a `0x`-prefixed (or bare) 20-byte hex address.
pub fn parse_evm_address(hex_address: &str) -> BridgeResult<[u8; 20]> {
    let hex_address = hex_address.trim();
    let stripped = hex_address.strip_prefix("0x").unwrap_or(hex_address);
    let bytes = hex::decode(stripped).map_err(|e| BridgeError::Encoding(e.to_string()))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        BridgeError::Encoding(format!("expected 20 bytes, got {}", b.len()))
    })
}

/// Helper to convert bytes32 to hex string
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}
