//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking so back-to-back submissions do not collide
//! - Reconciliation with the on-chain transaction count

use crate::chain::RpcClient;
use crate::error::{WalletError, WalletResult};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Local view of the wallet's nonces
#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce not yet used locally
    next: Option<U256>,
    /// Last on-chain transaction count observed
    confirmed: Option<U256>,
}

/// Allocates nonces for one wallet address
pub struct NonceManager {
    wallet: Address,
    rpc: Arc<dyn RpcClient>,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(wallet: Address, rpc: Arc<dyn RpcClient>) -> Self {
        Self {
            wallet,
            rpc,
            state: Mutex::new(NonceState::default()),
        }
    }

    /// max(on-chain transaction count, highest locally used nonce + 1)
    pub async fn next_nonce(&self) -> WalletResult<U256> {
        let on_chain = self.fetch_nonce().await?;
        let mut state = self.state.lock().await;
        state.confirmed = Some(on_chain);

        let nonce = match state.next {
            Some(local) if local > on_chain => local,
            _ => on_chain,
        };
        debug!("Next nonce for {:?}: {} (on-chain {})", self.wallet, nonce, on_chain);
        Ok(nonce)
    }

    /// Record a nonce accepted by the node
    pub async fn mark_used(&self, nonce: U256) {
        let mut state = self.state.lock().await;
        let candidate = nonce + U256::one();
        if state.next.map_or(true, |next| candidate > next) {
            state.next = Some(candidate);
        }
    }

    /// Drop local nonces that the chain has already caught up with
    pub async fn sync(&self) -> WalletResult<()> {
        let on_chain = self.fetch_nonce().await?;
        let mut state = self.state.lock().await;

        if let Some(confirmed) = state.confirmed {
            if on_chain < confirmed {
                warn!(
                    "Transaction count for {:?} went backwards: {} -> {}",
                    self.wallet, confirmed, on_chain
                );
            }
        }
        state.confirmed = Some(on_chain);

        if state.next.map_or(false, |next| next <= on_chain) {
            state.next = None;
        }
        Ok(())
    }

    /// Nonces used locally that the chain has not counted yet
    pub async fn in_flight(&self) -> U256 {
        let state = self.state.lock().await;
        match (state.next, state.confirmed) {
            (Some(next), Some(confirmed)) => next.saturating_sub(confirmed),
            (Some(next), None) => next,
            _ => U256::zero(),
        }
    }

    async fn fetch_nonce(&self) -> WalletResult<U256> {
        self.rpc
            .get_transaction_count(self.wallet)
            .await
            .map_err(|e| WalletError::Nonce {
                address: format!("{:?}", self.wallet),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockRpcClient;
    use tokio_test::assert_ok;

    fn manager_with_counts(counts: Vec<u64>) -> NonceManager {
        let mut rpc = MockRpcClient::new();
        let mut counts = counts.into_iter();
        rpc.expect_get_transaction_count()
            .returning(move |_| Ok(U256::from(counts.next().unwrap_or(0))));
        NonceManager::new(Address::repeat_byte(0x11), Arc::new(rpc))
    }

    #[tokio::test]
    async fn test_uses_on_chain_count_initially() {
        let manager = manager_with_counts(vec![5]);
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(5u64));
    }

    #[tokio::test]
    async fn test_local_nonce_wins_when_ahead() {
        let manager = manager_with_counts(vec![5, 5, 5]);

        manager.mark_used(U256::from(5u64)).await;
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(6u64));

        manager.mark_used(U256::from(6u64)).await;
        manager.mark_used(U256::from(3u64)).await;
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(7u64));
        assert_eq!(manager.in_flight().await, U256::from(2u64));
    }

    #[tokio::test]
    async fn test_sync_clears_local_state_once_mined() {
        let manager = manager_with_counts(vec![5, 9, 9]);

        manager.mark_used(U256::from(5u64)).await;
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(6u64));

        assert_ok!(manager.sync().await);
        assert_eq!(manager.in_flight().await, U256::zero());
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(9u64));
    }

    #[tokio::test]
    async fn test_rpc_failure_maps_to_nonce_error() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_get_transaction_count()
            .returning(|_| Err(WalletError::Network("down".into())));
        let manager = NonceManager::new(Address::repeat_byte(0x11), Arc::new(rpc));

        assert!(matches!(
            manager.next_nonce().await,
            Err(WalletError::Nonce { .. })
        ));
    }
}
