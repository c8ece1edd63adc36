//! Pool Manager - isolated risk pools and per-pool market parameters.
//!
//! Pool 0 is the core pool: it pre-exists, can never be deactivated, and
//! its market set is managed by the engine at listing time rather than by
//! the pool-management operations. Every other pool holds an explicit
//! membership list whose entries override the core risk parameters.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math;
use super::access::AccessControlManagerContractRef;
use super::errors::RiskError;
use super::events::*;

/// Reserved id of the core pool
pub const CORE_POOL_ID: u32 = 0;

/// A risk pool
#[odra::odra_type]
pub struct Pool {
    /// Human-readable label
    pub label: String,
    /// Whether memberships of this pool participate in resolution
    pub is_active: bool,
    /// Whether markets absent from this pool inherit core parameters
    pub allow_core_pool_fallback: bool,
}

/// Risk parameters of one (pool, market) membership, 1e18 scale
#[odra::odra_type]
pub struct MarketRiskParams {
    /// Fraction of supplied value usable as borrowing power
    pub collateral_factor: U256,
    /// Fraction above which the position is liquidatable
    pub liquidation_threshold: U256,
    /// Liquidator bonus multiplier, >= 1
    pub liquidation_incentive: U256,
    /// Whether this market may be borrowed while in the pool
    pub borrow_allowed: bool,
}

impl MarketRiskParams {
    /// Unconfigured membership: no credit, no borrowing
    pub fn zeroed() -> Self {
        Self {
            collateral_factor: U256::zero(),
            liquidation_threshold: U256::zero(),
            liquidation_incentive: U256::zero(),
            borrow_allowed: false,
        }
    }
}

/// Pool Manager contract
#[odra::module]
pub struct PoolManager {
    /// Access control manager
    access_control: Var<Address>,
    /// Risk engine allowed to manage core memberships
    engine: Var<Address>,
    /// Pools by id
    pools: Mapping<u32, Pool>,
    /// Next pool id to assign
    next_pool_id: Var<u32>,
    /// Pool market lists: (pool id, index) -> market
    pool_markets: Mapping<(u32, u32), Address>,
    /// Pool market list lengths
    pool_market_count: Mapping<u32, u32>,
    /// Membership flags: (pool id, market) -> listed
    memberships: Mapping<(u32, Address), bool>,
    /// Membership risk parameters: (pool id, market) -> params
    market_params: Mapping<(u32, Address), MarketRiskParams>,
}

#[odra::module]
impl PoolManager {
    /// Initialize with the core pool pre-created
    pub fn init(&mut self, access_control: Address) {
        self.access_control.set(access_control);
        self.pools.set(
            &CORE_POOL_ID,
            Pool {
                label: String::from("Core"),
                is_active: true,
                allow_core_pool_fallback: false,
            },
        );
        self.next_pool_id.set(CORE_POOL_ID + 1);
    }

    /// Register the risk engine allowed to manage core memberships
    pub fn set_engine(&mut self, engine: Address) {
        self.ensure_allowed("set_engine");
        self.engine.set(engine);
    }

    // ========================================
    // Pool Management
    // ========================================

    /// Create a new pool and return its id
    pub fn create_pool(&mut self, label: String) -> u32 {
        self.ensure_allowed("create_pool");
        if label.trim().is_empty() {
            self.env().revert(RiskError::EmptyPoolLabel);
        }
        let pool_id = self.next_pool_id.get_or_default();
        self.pools.set(
            &pool_id,
            Pool {
                label: label.clone(),
                is_active: true,
                allow_core_pool_fallback: false,
            },
        );
        self.next_pool_id.set(pool_id + 1);

        self.env().emit_event(PoolCreated {
            pool_id,
            label,
            created_by: self.env().caller(),
        });
        pool_id
    }

    /// Add markets to pools. `pool_ids[i]` receives `markets[i]` with
    /// zeroed parameters; configure them via `set_pool_market_params`.
    pub fn add_pool_markets(&mut self, pool_ids: Vec<u32>, markets: Vec<Address>) {
        self.ensure_allowed("add_pool_markets");
        if pool_ids.len() != markets.len() {
            self.env().revert(RiskError::ArrayLengthMismatch);
        }
        for (pool_id, market) in pool_ids.into_iter().zip(markets.into_iter()) {
            if self.pools.get(&pool_id).is_none() {
                self.env().revert(RiskError::PoolDoesNotExist);
            }
            if pool_id == CORE_POOL_ID {
                self.env().revert(RiskError::InvalidOperationForCorePool);
            }
            if !self.is_pool_market(CORE_POOL_ID, market) {
                self.env().revert(RiskError::MarketNotListedInCorePool);
            }
            if self.is_pool_market(pool_id, market) {
                self.env().revert(RiskError::MarketAlreadyListed);
            }

            let index = self.pool_market_count.get(&pool_id).unwrap_or(0);
            self.pool_markets.set(&(pool_id, index), market);
            self.pool_market_count.set(&pool_id, index + 1);
            self.memberships.set(&(pool_id, market), true);
            self.market_params
                .set(&(pool_id, market), MarketRiskParams::zeroed());

            self.env().emit_event(PoolMarketAdded { pool_id, market });
        }
    }

    /// Remove one market from a pool. The stored parameter override is
    /// zeroed as well; re-adding the market never resurrects old values.
    pub fn remove_pool_market(&mut self, pool_id: u32, market: Address) {
        self.ensure_allowed("remove_pool_market");
        if pool_id == CORE_POOL_ID {
            self.env().revert(RiskError::InvalidOperationForCorePool);
        }
        if !self.is_pool_market(pool_id, market) {
            self.env().revert(RiskError::PoolMarketNotFound);
        }

        let count = self.pool_market_count.get(&pool_id).unwrap_or(0);
        let mut found = false;
        for i in 0..count {
            if found {
                // shift left to keep the list compact
                let next = self.pool_markets.get(&(pool_id, i)).unwrap_or(market);
                self.pool_markets.set(&(pool_id, i - 1), next);
            } else if self.pool_markets.get(&(pool_id, i)) == Some(market) {
                found = true;
            }
        }
        self.pool_market_count.set(&pool_id, count - 1);
        self.memberships.set(&(pool_id, market), false);
        self.market_params
            .set(&(pool_id, market), MarketRiskParams::zeroed());

        self.env().emit_event(PoolMarketRemoved { pool_id, market });
    }

    /// Activate or deactivate a pool. Already at the desired value is a
    /// silent no-op (no event).
    pub fn set_pool_active(&mut self, pool_id: u32, active: bool) {
        self.ensure_allowed("set_pool_active");
        if pool_id == CORE_POOL_ID {
            self.env().revert(RiskError::InvalidOperationForCorePool);
        }
        let mut pool = self
            .pools
            .get(&pool_id)
            .unwrap_or_revert_with(&self.env(), RiskError::PoolDoesNotExist);
        if pool.is_active == active {
            return;
        }
        pool.is_active = active;
        self.pools.set(&pool_id, pool);

        self.env().emit_event(PoolStatusUpdated {
            pool_id,
            is_active: active,
        });
    }

    /// Toggle whether markets absent from this pool resolve through the
    /// core pool instead of resolving to zero credit.
    pub fn set_allow_core_pool_fallback(&mut self, pool_id: u32, allow: bool) {
        self.ensure_allowed("set_allow_core_pool_fallback");
        if pool_id == CORE_POOL_ID {
            self.env().revert(RiskError::InvalidOperationForCorePool);
        }
        let mut pool = self
            .pools
            .get(&pool_id)
            .unwrap_or_revert_with(&self.env(), RiskError::PoolDoesNotExist);
        if pool.allow_core_pool_fallback == allow {
            self.env().revert(RiskError::UnchangedValue);
        }
        pool.allow_core_pool_fallback = allow;
        self.pools.set(&pool_id, pool);

        self.env().emit_event(CorePoolFallbackUpdated { pool_id, allow });
    }

    /// Configure a membership's risk parameters. Valid for the core pool
    /// too; that is how listed markets receive their base parameters.
    pub fn set_pool_market_params(
        &mut self,
        pool_id: u32,
        market: Address,
        collateral_factor: U256,
        liquidation_threshold: U256,
        liquidation_incentive: U256,
        borrow_allowed: bool,
    ) {
        self.ensure_allowed("set_pool_market_params");
        if self.pools.get(&pool_id).is_none() {
            self.env().revert(RiskError::PoolDoesNotExist);
        }
        if !self.is_pool_market(pool_id, market) {
            self.env().revert(RiskError::PoolMarketNotFound);
        }
        let one = math::scale();
        if collateral_factor > one
            || liquidation_threshold > one
            || liquidation_threshold < collateral_factor
            || liquidation_incentive < one
        {
            self.env().revert(RiskError::InvalidRiskParams);
        }
        let params = MarketRiskParams {
            collateral_factor,
            liquidation_threshold,
            liquidation_incentive,
            borrow_allowed,
        };
        self.market_params.set(&(pool_id, market), params.clone());

        self.env().emit_event(PoolMarketParamsUpdated {
            pool_id,
            market,
            params,
        });
    }

    // ========================================
    // Engine Hooks
    // ========================================

    /// Create the core membership for a freshly listed market
    pub fn register_core_market(&mut self, market: Address) {
        self.only_engine();
        if self.is_pool_market(CORE_POOL_ID, market) {
            self.env().revert(RiskError::MarketAlreadyListed);
        }
        let index = self.pool_market_count.get(&CORE_POOL_ID).unwrap_or(0);
        self.pool_markets.set(&(CORE_POOL_ID, index), market);
        self.pool_market_count.set(&CORE_POOL_ID, index + 1);
        self.memberships.set(&(CORE_POOL_ID, market), true);
        self.market_params
            .set(&(CORE_POOL_ID, market), MarketRiskParams::zeroed());
    }

    /// Zero a delisted market's core parameters. The membership itself
    /// stays; markets are never removed structurally.
    pub fn clear_core_market(&mut self, market: Address) {
        self.only_engine();
        if !self.is_pool_market(CORE_POOL_ID, market) {
            self.env().revert(RiskError::PoolMarketNotFound);
        }
        self.market_params
            .set(&(CORE_POOL_ID, market), MarketRiskParams::zeroed());
    }

    // ========================================
    // Resolution
    // ========================================

    /// Effective risk parameters for `market` seen from `pool_id`.
    ///
    /// An explicit membership in an active pool wins; otherwise the core
    /// parameters apply when the pool allows core fallback; otherwise the
    /// market carries no credit and cannot be borrowed in this pool.
    pub fn resolve_market_params(&self, pool_id: u32, market: Address) -> MarketRiskParams {
        if let Some(pool) = self.pools.get(&pool_id) {
            if pool.is_active && self.is_pool_market(pool_id, market) {
                return self
                    .market_params
                    .get(&(pool_id, market))
                    .unwrap_or(MarketRiskParams::zeroed());
            }
            let fallback = pool_id == CORE_POOL_ID || pool.allow_core_pool_fallback;
            if fallback && self.is_pool_market(CORE_POOL_ID, market) {
                return self
                    .market_params
                    .get(&(CORE_POOL_ID, market))
                    .unwrap_or(MarketRiskParams::zeroed());
            }
        }
        MarketRiskParams::zeroed()
    }

    // ========================================
    // View Functions
    // ========================================

    pub fn get_pool(&self, pool_id: u32) -> Option<Pool> {
        self.pools.get(&pool_id)
    }

    pub fn pool_exists(&self, pool_id: u32) -> bool {
        self.pools.get(&pool_id).is_some()
    }

    pub fn is_pool_active(&self, pool_id: u32) -> bool {
        self.pools.get(&pool_id).map(|p| p.is_active).unwrap_or(false)
    }

    pub fn is_pool_market(&self, pool_id: u32, market: Address) -> bool {
        self.memberships.get(&(pool_id, market)).unwrap_or(false)
    }

    pub fn get_pool_market_params(&self, pool_id: u32, market: Address) -> Option<MarketRiskParams> {
        if !self.is_pool_market(pool_id, market) {
            return None;
        }
        self.market_params.get(&(pool_id, market))
    }

    pub fn pool_market_count(&self, pool_id: u32) -> u32 {
        self.pool_market_count.get(&pool_id).unwrap_or(0)
    }

    pub fn pool_market_at(&self, pool_id: u32, index: u32) -> Option<Address> {
        if index >= self.pool_market_count(pool_id) {
            return None;
        }
        self.pool_markets.get(&(pool_id, index))
    }

    pub fn pool_count(&self) -> u32 {
        self.next_pool_id.get_or_default()
    }

    // ========================================
    // Internal
    // ========================================

    fn only_engine(&self) {
        let engine = self
            .engine
            .get_or_revert_with(RiskError::CallerNotAuthorized);
        if self.env().caller() != engine {
            self.env().revert(RiskError::CallerNotAuthorized);
        }
    }

    fn ensure_allowed(&self, action: &str) {
        let acm = self
            .access_control
            .get_or_revert_with(RiskError::AccessDenied);
        let allowed = AccessControlManagerContractRef::new(self.env(), acm)
            .is_allowed_to_call(self.env().caller(), String::from(action));
        if !allowed {
            self.env().revert(RiskError::AccessDenied);
        }
    }
}
