//! Highload v3 sender.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ensure_not_expired, unix_now, wallet_balance, GroupSender};
use crate::address::Address;
use crate::cell::Cell;
use crate::chain::ChainClient;
use crate::config::WalletDefaults;
use crate::error::BridgeResult;
use crate::model::OutboundMessage;
use crate::query_id::{HighloadQueryId, ReplayGuard, ReplayToken};
use crate::wallet::{ReplayParams, Wallet};

/// Sender for highload v3 wallets. Each group carries a fresh
/// `(created_at, query_id)` token from this sender's [`ReplayGuard`].
pub struct HighloadSender {
    wallet: Wallet,
    client: Arc<dyn ChainClient>,
    guard: ReplayGuard,
    timeout: u32,
}

impl HighloadSender {
    pub fn new(wallet: Wallet, client: Arc<dyn ChainClient>, defaults: &WalletDefaults) -> Self {
        Self {
            wallet,
            client,
            guard: ReplayGuard::new(defaults.safety_margin_secs),
            timeout: defaults.highload_timeout_secs,
        }
    }

    /// Replace the replay guard, e.g. to resume from a persisted position.
    pub fn with_guard(mut self, guard: ReplayGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn last_token(&self) -> Option<ReplayToken> {
        self.guard.last_issued()
    }

    pub async fn balance(&self) -> BridgeResult<u128> {
        wallet_balance(self.client.as_ref(), self.wallet.address()).await
    }
}

#[async_trait]
impl GroupSender for HighloadSender {
    fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    fn measure(&self, messages: &[OutboundMessage], _valid_until: u64) -> BridgeResult<Cell> {
        // Token fields are fixed width, so any token measures the same.
        let token = ReplayToken {
            created_at: unix_now(),
            query_id: HighloadQueryId::default(),
        };
        self.wallet.build_external(
            messages,
            ReplayParams::Highload {
                token,
                timeout: self.timeout,
            },
        )
    }

    async fn send_group(
        &mut self,
        messages: &[OutboundMessage],
        valid_until: u64,
    ) -> BridgeResult<String> {
        ensure_not_expired(valid_until)?;
        let now = unix_now();
        let token = self.guard.issue(now)?;
        if let Some(wait) = ReplayGuard::wait_before_send(&token, now) {
            debug!(
                created_at = token.created_at,
                wait_ms = wait.as_millis() as u64,
                "token ahead of clock, waiting"
            );
            tokio::time::sleep(wait).await;
        }

        let external = self.wallet.build_external(
            messages,
            ReplayParams::Highload {
                token,
                timeout: self.timeout,
            },
        )?;
        let hash = self.client.send_boc(&external.to_boc()?).await?;
        debug!(
            wallet = %self.wallet.address(),
            created_at = token.created_at,
            query_id = token.query_id.packed(),
            %hash,
            "submitted highload external"
        );
        Ok(hash)
    }
}
