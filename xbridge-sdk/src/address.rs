//! TVM standard addresses.
//!
//! Two textual forms are accepted: raw `workchain:hex` and the 48-character
//! user-friendly base64 form with a CRC16 checksum.

use std::fmt;
use std::str::FromStr;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BridgeError, BridgeResult};

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;

/// Flags carried by the user-friendly form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyFlags {
    pub bounceable: bool,
    pub test_only: bool,
    /// Use the URL-safe base64 alphabet.
    pub url_safe: bool,
}

impl Default for FriendlyFlags {
    fn default() -> Self {
        Self {
            bounceable: true,
            test_only: false,
            url_safe: true,
        }
    }
}

/// Standard (`addr_std`) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    workchain: i8,
    hash: [u8; 32],
}

impl Address {
    pub const fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    pub fn workchain(&self) -> i8 {
        self.workchain
    }

    /// Account id within the workchain.
    pub fn hash_part(&self) -> &[u8; 32] {
        &self.hash
    }

    /// `workchain:hex` form.
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// User-friendly base64 form.
    pub fn to_friendly(&self, flags: FriendlyFlags) -> String {
        let mut tag = if flags.bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if flags.test_only {
            tag |= TAG_TEST_ONLY;
        }

        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        if flags.url_safe {
            URL_SAFE.encode(bytes)
        } else {
            STANDARD.encode(bytes)
        }
    }

    /// Parse either textual form.
    pub fn parse(s: &str) -> BridgeResult<Self> {
        Self::parse_with_flags(s).map(|(addr, _)| addr)
    }

    /// Parse either textual form, returning friendly flags when present.
    pub fn parse_with_flags(s: &str) -> BridgeResult<(Self, Option<FriendlyFlags>)> {
        let s = s.trim();
        if s.contains(':') {
            return Self::parse_raw(s).map(|a| (a, None));
        }
        Self::parse_friendly(s).map(|(a, f)| (a, Some(f)))
    }

    fn parse_raw(s: &str) -> BridgeResult<Self> {
        let (wc, hash_hex) = s
            .split_once(':')
            .ok_or_else(|| BridgeError::InvalidAddress(s.to_string()))?;
        let workchain: i8 = wc
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(format!("bad workchain in {}", s)))?;
        let bytes = hex::decode(hash_hex)
            .map_err(|e| BridgeError::InvalidAddress(format!("{}: {}", s, e)))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| {
                BridgeError::InvalidAddress(format!("hash part of {} is not 32 bytes", s))
            })?;
        Ok(Self { workchain, hash })
    }

    fn parse_friendly(s: &str) -> BridgeResult<(Self, FriendlyFlags)> {
        if s.len() != 48 {
            return Err(BridgeError::InvalidAddress(format!(
                "friendly address must be 48 chars: {}",
                s
            )));
        }
        let url_safe = s.contains('-') || s.contains('_');
        let normalized = s.replace('-', "+").replace('_', "/");
        let bytes = STANDARD
            .decode(normalized)
            .map_err(|e| BridgeError::InvalidAddress(format!("{}: {}", s, e)))?;
        if bytes.len() != 36 {
            return Err(BridgeError::InvalidAddress(format!(
                "{} decodes to {} bytes",
                s,
                bytes.len()
            )));
        }

        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16(&bytes[..34]) != expected {
            return Err(BridgeError::InvalidAddress(format!("checksum mismatch in {}", s)));
        }

        let mut tag = bytes[0];
        let test_only = tag & TAG_TEST_ONLY != 0;
        tag &= !TAG_TEST_ONLY;
        let bounceable = match tag {
            TAG_BOUNCEABLE => true,
            TAG_NON_BOUNCEABLE => false,
            other => {
                return Err(BridgeError::InvalidAddress(format!(
                    "unknown tag {:#04x} in {}",
                    other, s
                )))
            }
        };

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok((
            Self {
                workchain: bytes[1] as i8,
                hash,
            },
            FriendlyFlags {
                bounceable,
                test_only,
                url_safe,
            },
        ))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_raw())
    }
}

impl FromStr for Address {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_raw())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// CRC16/XMODEM.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
