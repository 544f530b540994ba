//! In-memory chain for tests and local tooling.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{AccountStatus, ChainClient, ContractState, StackValue};
use crate::address::Address;
use crate::cell::Cell;
use crate::error::{BridgeError, BridgeResult};

type Getter = Arc<dyn Fn(&[StackValue]) -> BridgeResult<Vec<StackValue>> + Send + Sync>;

/// External message accepted by the memory chain.
#[derive(Debug, Clone)]
pub struct SentBoc {
    pub destination: Address,
    pub hash: String,
    pub root: Arc<Cell>,
}

#[derive(Default)]
struct Account {
    balance: u128,
    code: Option<Arc<Cell>>,
    seqno: Option<u32>,
    getters: HashMap<String, Getter>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Address, Account>,
    sent: Vec<SentBoc>,
    send_attempts: usize,
    failing_sends: HashSet<usize>,
}

/// Chain simulation: accounts, get methods, seqno bumping and a log of
/// submitted messages. Sends can be made to fail by attempt number.
#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<State>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deploy `code` at `address` with a balance.
    pub fn deploy(&self, address: Address, code: Arc<Cell>, balance: u128) {
        let mut state = self.lock();
        let account = state.accounts.entry(address).or_default();
        account.code = Some(code);
        account.balance = balance;
    }

    /// Make `address` a seqno wallet whose seqno bumps on every accepted send.
    pub fn set_seqno(&self, address: Address, seqno: u32) {
        self.lock().accounts.entry(address).or_default().seqno = Some(seqno);
    }

    /// Register a get method handler.
    pub fn set_getter<F>(&self, address: Address, method: &str, getter: F)
    where
        F: Fn(&[StackValue]) -> BridgeResult<Vec<StackValue>> + Send + Sync + 'static,
    {
        self.lock()
            .accounts
            .entry(address)
            .or_default()
            .getters
            .insert(method.to_string(), Arc::new(getter));
    }

    /// Fail the send attempt with this 0-based number.
    pub fn fail_send_attempt(&self, attempt: usize) {
        self.lock().failing_sends.insert(attempt);
    }

    pub fn sent(&self) -> Vec<SentBoc> {
        self.lock().sent.clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.lock().send_attempts
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn contract_state(&self, address: &Address) -> BridgeResult<ContractState> {
        let state = self.lock();
        Ok(match state.accounts.get(address) {
            Some(account) => ContractState {
                balance: account.balance,
                status: if account.code.is_some() {
                    AccountStatus::Active
                } else {
                    AccountStatus::Uninit
                },
                code: account.code.clone(),
                data: None,
            },
            None => ContractState::nonexistent(),
        })
    }

    async fn run_get_method(
        &self,
        address: &Address,
        method: &str,
        args: &[StackValue],
    ) -> BridgeResult<Vec<StackValue>> {
        let getter = {
            let state = self.lock();
            let account = state
                .accounts
                .get(address)
                .ok_or_else(|| BridgeError::ContractNotDeployed(address.to_raw()))?;
            if method == "seqno" {
                if let Some(seqno) = account.seqno {
                    return Ok(vec![StackValue::Int(seqno as i128)]);
                }
            }
            account.getters.get(method).cloned().ok_or_else(|| {
                BridgeError::Rpc(format!("{} has no get method {}", address, method))
            })?
        };
        getter(args)
    }

    async fn send_boc(&self, boc: &[u8]) -> BridgeResult<String> {
        let root = Cell::from_boc(boc)?;
        let mut s = root.parse();
        if s.load_uint(2)? != 0b10 {
            return Err(BridgeError::Rpc("not an external inbound message".into()));
        }
        s.load_address()?;
        let destination = s
            .load_address()?
            .ok_or_else(|| BridgeError::Rpc("external message without destination".into()))?;

        let mut state = self.lock();
        let attempt = state.send_attempts;
        state.send_attempts += 1;
        if state.failing_sends.contains(&attempt) {
            return Err(BridgeError::Rpc(format!("send attempt {} rejected", attempt)));
        }

        if let Some(seqno) = state
            .accounts
            .get_mut(&destination)
            .and_then(|a| a.seqno.as_mut())
        {
            *seqno += 1;
        }
        let hash = root.hash_hex();
        debug!(%destination, %hash, "memory chain accepted external message");
        state.sent.push(SentBoc {
            destination,
            hash: hash.clone(),
            root,
        });
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::external_message;

    #[tokio::test]
    async fn test_send_bumps_seqno_and_logs() {
        let chain = MemoryChain::new();
        let wallet = Address::new(0, [3; 32]);
        chain.set_seqno(wallet, 0);

        let ext = external_message(&wallet, Cell::empty()).unwrap();
        let hash = chain.send_boc(&ext.to_boc().unwrap()).await.unwrap();
        assert_eq!(hash, ext.hash_hex());

        let seqno = chain.run_get_method(&wallet, "seqno", &[]).await.unwrap();
        assert_eq!(seqno, vec![StackValue::Int(1)]);
        assert_eq!(chain.sent().len(), 1);
        assert_eq!(chain.sent()[0].destination, wallet);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let chain = MemoryChain::new();
        let wallet = Address::new(0, [3; 32]);
        chain.fail_send_attempt(1);
        let boc = external_message(&wallet, Cell::empty()).unwrap().to_boc().unwrap();

        assert!(chain.send_boc(&boc).await.is_ok());
        assert!(matches!(chain.send_boc(&boc).await, Err(BridgeError::Rpc(_))));
        assert!(chain.send_boc(&boc).await.is_ok());
        assert_eq!(chain.send_attempts(), 3);
        assert_eq!(chain.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_getter() {
        let chain = MemoryChain::new();
        let master = Address::new(0, [8; 32]);
        let owner_wallet = Address::new(0, [9; 32]);
        chain.deploy(master, Arc::new(Cell::empty()), 0);
        chain.set_getter(master, "get_wallet_address", move |_| {
            Ok(vec![StackValue::address(&owner_wallet)?])
        });

        let stack = chain
            .run_get_method(&master, "get_wallet_address", &[])
            .await
            .unwrap();
        assert_eq!(stack[0].as_address().unwrap(), owner_wallet);
        assert!(chain.run_get_method(&master, "missing", &[]).await.is_err());
    }
}
