//! Risk / Hedge pool.
//!
//! A pool custodies one side of a market. Depositors receive claims in
//! proportion to the pool's claims:balance ratio; the balance itself lives in
//! the external asset ledger under the pool's own address, so a settlement
//! sweep changes what each claim is worth without touching the claims.
//!
//! Every depositor operation runs inside the controller's per-market critical
//! section (`LifecycleController::gated`), which also serializes it against
//! the settlement sweep. Pool events are journaled inside that section, so
//! journal order is commit order.

use super::asset::AssetLedger;
use super::controller::{LifecycleController, PoolOperation};
use super::errors::{LifecycleError, LifecycleResult, TransferError};
use super::journal::LifecycleEvent;
use super::types::{Address, Amount, MarketId, Side};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rounding {
    Down,
    Up,
}

/// `a * b / denom` without overflow or silent wrap.
fn mul_div(a: Amount, b: Amount, denom: Amount, rounding: Rounding) -> LifecycleResult<Amount> {
    if denom == 0 {
        return Err(LifecycleError::validation("division by zero in claim conversion"));
    }
    let product = a
        .checked_mul(b)
        .ok_or_else(|| LifecycleError::validation("amount overflows claim conversion"))?;
    let q = product / denom;
    if rounding == Rounding::Up && product % denom != 0 {
        Ok(q + 1)
    } else {
        Ok(q)
    }
}

#[derive(Debug, Default)]
struct ClaimsLedger {
    total: Amount,
    holders: HashMap<Address, Amount>,
}

impl ClaimsLedger {
    fn held_by(&self, holder: &Address) -> Amount {
        self.holders.get(holder).copied().unwrap_or(0)
    }

    fn ensure_can_credit(&self, claims: Amount) -> LifecycleResult<()> {
        self.total
            .checked_add(claims)
            .map(|_| ())
            .ok_or_else(|| LifecycleError::validation("claim supply overflow"))
    }

    fn ensure_can_debit(&self, owner: &Address, claims: Amount) -> LifecycleResult<()> {
        let held = self.held_by(owner);
        if held < claims {
            return Err(LifecycleError::InsufficientClaims {
                owner: owner.clone(),
                held,
                requested: claims,
            });
        }
        Ok(())
    }

    fn credit(&mut self, holder: &Address, claims: Amount) {
        if claims == 0 {
            return;
        }
        self.total += claims;
        *self.holders.entry(holder.clone()).or_insert(0) += claims;
    }

    fn debit(&mut self, holder: &Address, claims: Amount) {
        if claims == 0 {
            return;
        }
        let remaining = self.held_by(holder) - claims;
        self.total -= claims;
        if remaining == 0 {
            self.holders.remove(holder);
        } else {
            self.holders.insert(holder.clone(), remaining);
        }
    }
}

pub struct Pool {
    address: Address,
    market_id: MarketId,
    side: Side,
    /// Only the creating factory may link a sibling.
    factory: Address,
    /// Set at most once: at construction (risk) or by `link` (hedge).
    sibling: OnceLock<Address>,
    asset: Arc<dyn AssetLedger>,
    controller: Arc<LifecycleController>,
    claims: Mutex<ClaimsLedger>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.address)
            .field("market_id", &self.market_id)
            .field("side", &self.side)
            .field("sibling", &self.sibling.get())
            .finish()
    }
}

impl Pool {
    pub(crate) fn new(
        address: Address,
        market_id: MarketId,
        side: Side,
        factory: Address,
        sibling: Option<Address>,
        asset: Arc<dyn AssetLedger>,
        controller: Arc<LifecycleController>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(sibling) = sibling {
            let _ = cell.set(sibling);
        }
        Self {
            address,
            market_id,
            side,
            factory,
            sibling: cell,
            asset,
            controller,
            claims: Mutex::new(ClaimsLedger::default()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn sibling(&self) -> Option<&Address> {
        self.sibling.get()
    }

    /// Asset units held by the pool.
    pub fn total_balance(&self) -> Amount {
        self.asset.balance_of(&self.address)
    }

    pub fn total_claims(&self) -> Amount {
        self.claims.lock().total
    }

    /// Claims held by `holder`.
    pub fn balance_of(&self, holder: &Address) -> Amount {
        self.claims.lock().held_by(holder)
    }

    /// Second half of two-phase construction: point this pool at `other`,
    /// which must already point back at this pool.
    pub fn link(&self, caller: &Address, other: &Pool) -> LifecycleResult<()> {
        if caller != &self.factory {
            return Err(LifecycleError::unauthorized(caller, "link pools"));
        }
        if self.sibling.get().is_some() {
            return Err(LifecycleError::AlreadyLinked {
                pool: self.address.clone(),
            });
        }
        if other.sibling() != Some(&self.address)
            || other.market_id != self.market_id
            || other.side != self.side.opposite()
        {
            return Err(LifecycleError::validation(format!(
                "pool {} does not name {} as its sibling",
                other.address, self.address
            )));
        }
        self.sibling
            .set(other.address.clone())
            .map_err(|_| LifecycleError::AlreadyLinked {
                pool: self.address.clone(),
            })?;
        debug!(
            market_id = %self.market_id,
            pool = %self.address,
            sibling = %other.address,
            "pools linked"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Conversions
    // ---------------------------------------------------------------------

    /// Refuse to price claims when one side of the ratio is empty but the
    /// other is not. Outstanding claims on an emptied pool (the losing side
    /// after settlement) have no price; a balance nobody holds claims on
    /// (the winning side when it had no depositors) would go to whoever
    /// deposits next.
    fn ensure_priceable(ledger: &ClaimsLedger, balance: Amount) -> LifecycleResult<()> {
        if ledger.total > 0 && balance == 0 {
            return Err(LifecycleError::validation(
                "pool has outstanding claims but no assets",
            ));
        }
        if ledger.total == 0 && balance > 0 {
            return Err(LifecycleError::validation(format!(
                "pool holds {} unclaimed assets",
                balance
            )));
        }
        Ok(())
    }

    fn claims_for(
        ledger: &ClaimsLedger,
        balance: Amount,
        assets: Amount,
        r: Rounding,
    ) -> LifecycleResult<Amount> {
        Self::ensure_priceable(ledger, balance)?;
        if ledger.total == 0 {
            return Ok(assets);
        }
        mul_div(assets, ledger.total, balance, r)
    }

    fn assets_for(
        ledger: &ClaimsLedger,
        balance: Amount,
        claims: Amount,
        r: Rounding,
    ) -> LifecycleResult<Amount> {
        if ledger.total == 0 {
            Self::ensure_priceable(ledger, balance)?;
            return Ok(claims);
        }
        mul_div(claims, balance, ledger.total, r)
    }

    pub fn preview_deposit(&self, assets: Amount) -> LifecycleResult<Amount> {
        let ledger = self.claims.lock();
        Self::claims_for(&ledger, self.total_balance(), assets, Rounding::Down)
    }

    pub fn preview_mint(&self, claims: Amount) -> LifecycleResult<Amount> {
        let ledger = self.claims.lock();
        Self::assets_for(&ledger, self.total_balance(), claims, Rounding::Up)
    }

    pub fn preview_withdraw(&self, assets: Amount) -> LifecycleResult<Amount> {
        let ledger = self.claims.lock();
        Self::claims_for(&ledger, self.total_balance(), assets, Rounding::Up)
    }

    pub fn preview_redeem(&self, claims: Amount) -> LifecycleResult<Amount> {
        let ledger = self.claims.lock();
        Self::assets_for(&ledger, self.total_balance(), claims, Rounding::Down)
    }

    pub fn max_redeem(&self, owner: &Address) -> Amount {
        self.balance_of(owner)
    }

    pub fn max_withdraw(&self, owner: &Address) -> LifecycleResult<Amount> {
        let ledger = self.claims.lock();
        let held = ledger.held_by(owner);
        if held == 0 {
            return Ok(0);
        }
        Self::assets_for(&ledger, self.total_balance(), held, Rounding::Down)
    }

    // ---------------------------------------------------------------------
    // Gated depositor operations
    // ---------------------------------------------------------------------

    /// Pull `assets` from `caller`, credit the resulting claims to `receiver`.
    pub fn deposit(
        &self,
        caller: &Address,
        assets: Amount,
        receiver: &Address,
    ) -> LifecycleResult<Amount> {
        self.controller.gated(self.market_id, PoolOperation::Deposit, || {
            let mut ledger = self.claims.lock();
            let claims = Self::claims_for(&ledger, self.total_balance(), assets, Rounding::Down)?;
            self.enter(&mut ledger, caller, receiver, assets, claims)?;
            self.record_deposit(caller, receiver, assets, claims);
            Ok(claims)
        })
    }

    /// Credit exactly `claims` to `receiver`, pulling however many assets that costs.
    pub fn mint(
        &self,
        caller: &Address,
        claims: Amount,
        receiver: &Address,
    ) -> LifecycleResult<Amount> {
        self.controller.gated(self.market_id, PoolOperation::Deposit, || {
            let mut ledger = self.claims.lock();
            let assets = Self::assets_for(&ledger, self.total_balance(), claims, Rounding::Up)?;
            self.enter(&mut ledger, caller, receiver, assets, claims)?;
            self.record_deposit(caller, receiver, assets, claims);
            Ok(assets)
        })
    }

    /// Pay exactly `assets` to `receiver`, burning the owner's claims. Returns claims burned.
    pub fn withdraw(
        &self,
        caller: &Address,
        assets: Amount,
        receiver: &Address,
        owner: &Address,
    ) -> LifecycleResult<Amount> {
        self.controller.gated(self.market_id, PoolOperation::Withdraw, || {
            Self::ensure_owner(caller, owner)?;
            let mut ledger = self.claims.lock();
            let claims = Self::claims_for(&ledger, self.total_balance(), assets, Rounding::Up)?;
            self.exit(&mut ledger, owner, receiver, assets, claims)?;
            self.record_withdraw(owner, receiver, assets, claims);
            Ok(claims)
        })
    }

    /// Burn `claims` from `owner`, paying the corresponding assets to `receiver`.
    pub fn redeem(
        &self,
        caller: &Address,
        claims: Amount,
        receiver: &Address,
        owner: &Address,
    ) -> LifecycleResult<Amount> {
        self.controller.gated(self.market_id, PoolOperation::Withdraw, || {
            Self::ensure_owner(caller, owner)?;
            let mut ledger = self.claims.lock();
            let assets = Self::assets_for(&ledger, self.total_balance(), claims, Rounding::Down)?;
            self.exit(&mut ledger, owner, receiver, assets, claims)?;
            self.record_withdraw(owner, receiver, assets, claims);
            Ok(assets)
        })
    }

    fn ensure_owner(caller: &Address, owner: &Address) -> LifecycleResult<()> {
        if caller != owner {
            return Err(LifecycleError::unauthorized(caller, "spend another holder's claims"));
        }
        Ok(())
    }

    fn enter(
        &self,
        ledger: &mut ClaimsLedger,
        payer: &Address,
        receiver: &Address,
        assets: Amount,
        claims: Amount,
    ) -> LifecycleResult<()> {
        ledger.ensure_can_credit(claims)?;
        self.asset.transfer(payer, &self.address, assets)?;
        ledger.credit(receiver, claims);
        Ok(())
    }

    fn exit(
        &self,
        ledger: &mut ClaimsLedger,
        owner: &Address,
        receiver: &Address,
        assets: Amount,
        claims: Amount,
    ) -> LifecycleResult<()> {
        ledger.ensure_can_debit(owner, claims)?;
        self.asset.transfer(&self.address, receiver, assets)?;
        ledger.debit(owner, claims);
        Ok(())
    }

    fn record_deposit(&self, caller: &Address, receiver: &Address, assets: Amount, claims: Amount) {
        info!(
            market_id = %self.market_id,
            side = %self.side,
            receiver = %receiver,
            assets = %assets,
            claims = %claims,
            "deposit"
        );
        self.controller.record(LifecycleEvent::Deposited {
            market_id: self.market_id,
            side: self.side,
            caller: caller.clone(),
            receiver: receiver.clone(),
            assets,
            claims,
        });
    }

    fn record_withdraw(&self, owner: &Address, receiver: &Address, assets: Amount, claims: Amount) {
        info!(
            market_id = %self.market_id,
            side = %self.side,
            owner = %owner,
            assets = %assets,
            claims = %claims,
            "withdraw"
        );
        self.controller.record(LifecycleEvent::Withdrawn {
            market_id: self.market_id,
            side: self.side,
            owner: owner.clone(),
            receiver: receiver.clone(),
            assets,
            claims,
        });
    }

    // ---------------------------------------------------------------------
    // Controller-only sweep
    // ---------------------------------------------------------------------

    /// Move `amount` assets to the sibling pool. Claims are untouched.
    ///
    /// Only the controller may call this. It is the mechanism; the policy of
    /// always sweeping the full balance lives in the controller.
    pub fn sweep_to(
        &self,
        caller: &Address,
        destination: &Address,
        amount: Amount,
    ) -> LifecycleResult<()> {
        if caller != self.controller.address() {
            return Err(LifecycleError::unauthorized(caller, "sweep pool"));
        }
        match self.sibling.get() {
            Some(sibling) if sibling == destination => {}
            _ => {
                return Err(LifecycleError::InvalidDestination {
                    pool: self.address.clone(),
                    destination: destination.clone(),
                })
            }
        }
        // Hold the claims lock so the move is ordered against depositors.
        let _ledger = self.claims.lock();
        let balance = self.total_balance();
        if amount > balance {
            return Err(TransferError::InsufficientFunds {
                account: self.address.clone(),
                available: balance,
                requested: amount,
            }
            .into());
        }
        self.asset.transfer(&self.address, destination, amount)?;
        Ok(())
    }
}
