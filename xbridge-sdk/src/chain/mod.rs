//! TVM chain RPC boundary.
//!
//! Everything the SDK needs from the chain goes through [`ChainClient`]:
//! account state (balance, status, code), get-method calls and external
//! message submission. Providers: [`IndexerClient`] over an HTTP indexing
//! API and [`MemoryChain`] for tests. A validator-set client can implement
//! the same trait downstream.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cell::{Cell, CellBuilder};
use crate::error::{BridgeError, BridgeResult};

pub mod indexer;
pub mod memory;

pub use indexer::IndexerClient;
pub use memory::MemoryChain;

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Uninit,
    Frozen,
    Nonexist,
}

/// Snapshot of one account.
#[derive(Debug, Clone)]
pub struct ContractState {
    /// Balance in nanotons.
    pub balance: u128,
    pub status: AccountStatus,
    pub code: Option<Arc<Cell>>,
    pub data: Option<Arc<Cell>>,
}

impl ContractState {
    pub fn nonexistent() -> Self {
        Self {
            balance: 0,
            status: AccountStatus::Nonexist,
            code: None,
            data: None,
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.status == AccountStatus::Active && self.code.is_some()
    }
}

/// TVM stack entry for get-method arguments and results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Int(i128),
    Cell(Arc<Cell>),
    Slice(Arc<Cell>),
    Null,
}

impl StackValue {
    /// Address argument, passed as a slice.
    pub fn address(address: &Address) -> BridgeResult<Self> {
        let mut b = CellBuilder::new();
        b.store_address(Some(address))?;
        Ok(Self::Slice(Arc::new(b.build()?)))
    }

    pub fn as_int(&self) -> BridgeResult<i128> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(BridgeError::Rpc(format!("expected int on stack, got {:?}", other))),
        }
    }

    /// Read an address from a slice or cell entry.
    pub fn as_address(&self) -> BridgeResult<Address> {
        match self {
            Self::Slice(c) | Self::Cell(c) => c
                .parse()
                .load_address()?
                .ok_or_else(|| BridgeError::Rpc("get method returned addr_none".into())),
            other => Err(BridgeError::Rpc(format!(
                "expected address slice on stack, got {:?}",
                other
            ))),
        }
    }
}

/// Chain access used by senders and the asset resolver.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch balance, status and code of an account.
    async fn contract_state(&self, address: &Address) -> BridgeResult<ContractState>;

    /// Run a get method and return its result stack.
    async fn run_get_method(
        &self,
        address: &Address,
        method: &str,
        args: &[StackValue],
    ) -> BridgeResult<Vec<StackValue>>;

    /// Submit a serialized external message. Returns its hash (hex).
    async fn send_boc(&self, boc: &[u8]) -> BridgeResult<String>;

    /// Release underlying connections.
    async fn close(&self) -> BridgeResult<()> {
        Ok(())
    }
}

/// Handle on one contract.
#[derive(Clone)]
pub struct OpenedContract {
    client: Arc<dyn ChainClient>,
    address: Address,
}

impl OpenedContract {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn state(&self) -> BridgeResult<ContractState> {
        self.client.contract_state(&self.address).await
    }

    /// Deployed code, or `ContractNotDeployed`.
    pub async fn code(&self) -> BridgeResult<Arc<Cell>> {
        let state = self.state().await?;
        match (state.status, state.code) {
            (AccountStatus::Active, Some(code)) => Ok(code),
            _ => Err(BridgeError::ContractNotDeployed(self.address.to_raw())),
        }
    }

    pub async fn get(&self, method: &str, args: &[StackValue]) -> BridgeResult<Vec<StackValue>> {
        self.client.run_get_method(&self.address, method, args).await
    }

    /// Wallet seqno; an undeployed wallet is at 0.
    pub async fn seqno(&self) -> BridgeResult<u32> {
        let state = self.state().await?;
        if !state.is_deployed() {
            return Ok(0);
        }
        let stack = self.get("seqno", &[]).await?;
        let value = stack
            .first()
            .ok_or_else(|| BridgeError::Rpc("seqno returned empty stack".into()))?
            .as_int()?;
        u32::try_from(value).map_err(|_| BridgeError::Rpc(format!("seqno {} out of range", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_stack_value() {
        let addr = Address::new(0, [4; 32]);
        let value = StackValue::address(&addr).unwrap();
        assert_eq!(value.as_address().unwrap(), addr);
        assert!(StackValue::Int(1).as_address().is_err());
        assert!(StackValue::Null.as_int().is_err());
    }

    #[tokio::test]
    async fn test_opened_contract_code_and_seqno() {
        let chain = Arc::new(MemoryChain::new());
        let deployed = Address::new(0, [1; 32]);
        chain.deploy(deployed, Arc::new(Cell::empty()), 10);
        chain.set_seqno(deployed, 7);

        let contract = OpenedContract::new(chain.clone(), deployed);
        assert!(contract.code().await.is_ok());
        assert_eq!(contract.seqno().await.unwrap(), 7);

        let missing = OpenedContract::new(chain, Address::new(0, [2; 32]));
        assert!(matches!(
            missing.code().await,
            Err(BridgeError::ContractNotDeployed(_))
        ));
        assert_eq!(missing.seqno().await.unwrap(), 0);
    }
}
