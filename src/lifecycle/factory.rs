//! PoolPair Factory
//!
//! Creates the Risk/Hedge pools for a new market and registers them.
//!
//! The two pools must name each other as siblings, so construction happens
//! in two phases: the hedge pool is built with no sibling, the risk pool is
//! built pointing at it, then the hedge pool is linked back exactly once.

use super::asset::AssetLedger;
use super::clock::Clock;
use super::controller::{validate_market_terms, LifecycleController};
use super::errors::{LifecycleError, LifecycleResult};
use super::pool::Pool;
use super::types::{Address, MarketId, Side, UnixSecs, Window};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The two pools of one market.
#[derive(Debug, Clone)]
pub struct PoolPair {
    pub market_id: MarketId,
    pub risk: Arc<Pool>,
    pub hedge: Arc<Pool>,
}

impl PoolPair {
    pub fn pool(&self, side: Side) -> &Arc<Pool> {
        match side {
            Side::Risk => &self.risk,
            Side::Hedge => &self.hedge,
        }
    }

    /// Combined asset balance of both pools.
    pub fn combined_balance(&self) -> u128 {
        self.risk.total_balance() + self.hedge.total_balance()
    }
}

struct Registry {
    next_id: u64,
    pairs: BTreeMap<MarketId, PoolPair>,
}

pub struct PoolPairFactory {
    address: Address,
    asset: Arc<dyn AssetLedger>,
    controller: Arc<LifecycleController>,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

impl PoolPairFactory {
    pub fn new(
        address: Address,
        asset: Arc<dyn AssetLedger>,
        controller: Arc<LifecycleController>,
    ) -> Self {
        if &address != controller.factory_address() {
            warn!(
                factory = %address,
                expected = %controller.factory_address(),
                "factory identity does not match the controller's; registration will be refused"
            );
        }
        let clock = controller.clock();
        Self {
            address,
            asset,
            controller,
            clock,
            registry: Mutex::new(Registry {
                next_id: 1,
                pairs: BTreeMap::new(),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn pool_address(&self, market_id: MarketId, side: Side) -> Address {
        Address::new(format!("{}/{}/{}", self.address, market_id, side))
    }

    /// Create and register a new market's pool pair.
    ///
    /// Nothing is created, and no id is consumed, unless validation passes.
    pub fn create_pair(
        &self,
        window_start: UnixSecs,
        window_end: UnixSecs,
        trigger_price: u128,
    ) -> LifecycleResult<PoolPair> {
        let now = self.clock.now();
        if window_start <= now {
            return Err(LifecycleError::validation(format!(
                "window start {} must be in the future (now {})",
                window_start, now
            )));
        }
        validate_market_terms(
            Window {
                start: window_start,
                end: window_end,
            },
            trigger_price,
        )?;

        let pair = {
            let mut registry = self.registry.lock();
            let market_id = MarketId(registry.next_id);
            let pair = self.build_pair(market_id)?;
            registry.next_id += 1;
            registry.pairs.insert(market_id, pair.clone());
            pair
        };

        info!(
            market_id = %pair.market_id,
            risk = %pair.risk.address(),
            hedge = %pair.hedge.address(),
            "pool pair created"
        );

        // Best effort: the pair exists whether or not the controller accepts it.
        if let Err(err) = self.controller.on_market_created(
            &self.address,
            pair.market_id,
            window_start,
            window_end,
            trigger_price,
            &pair,
        ) {
            warn!(market_id = %pair.market_id, error = %err, "controller notification failed");
        }

        Ok(pair)
    }

    fn build_pair(&self, market_id: MarketId) -> LifecycleResult<PoolPair> {
        let hedge_address = self.pool_address(market_id, Side::Hedge);
        let risk_address = self.pool_address(market_id, Side::Risk);

        let hedge = Arc::new(Pool::new(
            hedge_address.clone(),
            market_id,
            Side::Hedge,
            self.address.clone(),
            None,
            Arc::clone(&self.asset),
            Arc::clone(&self.controller),
        ));
        let risk = Arc::new(Pool::new(
            risk_address,
            market_id,
            Side::Risk,
            self.address.clone(),
            Some(hedge_address),
            Arc::clone(&self.asset),
            Arc::clone(&self.controller),
        ));
        hedge.link(&self.address, &risk)?;

        Ok(PoolPair {
            market_id,
            risk,
            hedge,
        })
    }

    pub fn get_pair(&self, market_id: MarketId) -> LifecycleResult<PoolPair> {
        self.registry
            .lock()
            .pairs
            .get(&market_id)
            .cloned()
            .ok_or(LifecycleError::NotFound { market_id })
    }

    pub fn market_count(&self) -> usize {
        self.registry.lock().pairs.len()
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        self.registry.lock().pairs.keys().copied().collect()
    }
}
