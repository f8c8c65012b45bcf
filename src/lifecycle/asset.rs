//! Fungible asset seam.
//!
//! Pools hold their balance in an external asset; the engine only needs
//! `balance_of` and `transfer`. `InMemoryAsset` is the in-process ledger used
//! by the CLI simulator and the tests.

use super::errors::TransferError;
use super::types::{Address, Amount};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

pub trait AssetLedger: Send + Sync {
    fn balance_of(&self, account: &Address) -> Amount;

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), TransferError>;
}

#[derive(Debug, Default)]
struct AssetState {
    balances: HashMap<Address, Amount>,
    total_supply: Amount,
    paused: bool,
}

/// Pausable in-memory token ledger.
#[derive(Debug)]
pub struct InMemoryAsset {
    symbol: String,
    state: RwLock<AssetState>,
}

impl InMemoryAsset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: RwLock::new(AssetState::default()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Credit fresh units to `account`. Minting ignores the pause switch.
    pub fn mint(&self, account: &Address, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.state.write();
        let supply = state
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| TransferError::InsufficientFunds {
                account: account.clone(),
                available: Amount::MAX - state.total_supply,
                requested: amount,
            })?;
        state.total_supply = supply;
        *state.balances.entry(account.clone()).or_insert(0) += amount;
        Ok(())
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.write().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn total_supply(&self) -> Amount {
        self.state.read().total_supply
    }
}

impl AssetLedger for InMemoryAsset {
    fn balance_of(&self, account: &Address) -> Amount {
        self.state.read().balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.state.write();
        if state.paused {
            return Err(TransferError::Paused);
        }
        let available = state.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        // Credit cannot overflow: total supply bounds every balance.
        state.balances.insert(from.clone(), available - amount);
        *state.balances.entry(to.clone()).or_insert(0) += amount;
        debug!(asset = %self.symbol, %from, %to, amount = %amount, "transfer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_moves_balance() {
        let asset = InMemoryAsset::new("USDC");
        let alice = Address::new("alice");
        let bob = Address::new("bob");
        asset.mint(&alice, 100).unwrap();

        asset.transfer(&alice, &bob, 40).unwrap();
        assert_eq!(asset.balance_of(&alice), 60);
        assert_eq!(asset.balance_of(&bob), 40);
        assert_eq!(asset.total_supply(), 100);
    }

    #[test]
    fn test_overdraw_rejected() {
        let asset = InMemoryAsset::new("USDC");
        let alice = Address::new("alice");
        asset.mint(&alice, 10).unwrap();
        let err = asset
            .transfer(&alice, &Address::new("bob"), 11)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::InsufficientFunds {
                available: 10,
                requested: 11,
                ..
            }
        ));
        assert_eq!(asset.balance_of(&alice), 10);
    }

    #[test]
    fn test_paused_asset_rejects_transfers() {
        let asset = InMemoryAsset::new("USDC");
        let alice = Address::new("alice");
        asset.mint(&alice, 10).unwrap();
        asset.set_paused(true);
        assert_eq!(
            asset.transfer(&alice, &Address::new("bob"), 1),
            Err(TransferError::Paused)
        );
        asset.set_paused(false);
        assert!(asset.transfer(&alice, &Address::new("bob"), 1).is_ok());
    }
}
