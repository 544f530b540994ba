//! Error types for cross-chain dispatch and tracking.

use thiserror::Error;

/// Errors that can occur while building, sending or tracking cross-chain messages.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error (missing network parameter, bad preset, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wallet version tag that no sender adapter understands.
    #[error("Unknown wallet version: {0}")]
    UnknownWalletVersion(String),

    /// Network error talking to a single endpoint.
    #[error("Network error: {0}")]
    Network(String),

    /// Every configured endpoint failed for one request.
    #[error("No endpoint responded to {request} ({attempted} attempted)")]
    AllEndpointsFailed { request: String, attempted: usize },

    /// A single message cannot fit the transport ceilings on its own.
    #[error("Message {index} exceeds transport limits: {reason}")]
    MessageTooLarge { index: usize, reason: String },

    /// A group of messages does not fit the transport ceilings.
    #[error("Structural limit exceeded: {0}")]
    StructuralLimit(String),

    /// Too many bits or refs written to a cell.
    #[error("Cell overflow: {0}")]
    CellOverflow(String),

    /// Not enough bits or refs left in a cell slice.
    #[error("Cell underflow: {0}")]
    CellUnderflow(String),

    /// Malformed bag-of-cells bytes.
    #[error("Invalid BOC: {0}")]
    InvalidBoc(String),

    /// Invalid address format.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No code deployed at an address that has to be classified.
    #[error("Contract not deployed at {0}")]
    ContractNotDeployed(String),

    /// Amount not acceptable for the asset kind.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The same non-fungible item appears twice in one call.
    #[error("Duplicate asset: {0}")]
    DuplicateAsset(String),

    /// Chain RPC returned an error or an unexpected shape.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Signing failed or key material is invalid.
    #[error("Signing error: {0}")]
    Signing(String),

    /// External approver declined or failed the request.
    #[error("Approval rejected: {0}")]
    ApprovalRejected(String),

    /// Waiting for an operation ran out of attempts.
    #[error("Tracking timed out after {attempts} attempts waiting for {waiting_for}")]
    TrackingTimeout { attempts: u32, waiting_for: String },

    /// An external message was accepted by the chain but its effect was
    /// not observed in time. It may still land; do not resend it.
    #[error("Submitted as {hash} but unconfirmed: {reason}")]
    Unconfirmed { hash: String, reason: String },

    /// The replay-protection counter space is used up.
    #[error("Replay window exhausted: {0}")]
    ReplayWindowExhausted(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Encoding error (ABI, JSON payload, ...).
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl BridgeError {
    /// Whether a caller may reasonably retry the same call later.
    ///
    /// Transport problems are transient; configuration, structural and
    /// classification errors never resolve on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::AllEndpointsFailed { .. }
                | Self::Rpc(_)
                | Self::TrackingTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::Network("reset".into()).is_retryable());
        assert!(BridgeError::AllEndpointsFailed {
            request: "status".into(),
            attempted: 3
        }
        .is_retryable());
        assert!(!BridgeError::Config("missing endpoints".into()).is_retryable());
        assert!(!BridgeError::MessageTooLarge {
            index: 0,
            reason: "size".into()
        }
        .is_retryable());
        assert!(!BridgeError::ContractNotDeployed("0:00".into()).is_retryable());
        assert!(!BridgeError::Unconfirmed {
            hash: "ab".into(),
            reason: "seqno".into()
        }
        .is_retryable());
    }
}
