//! Reward Accrual Engine - per-market incentive indices.
//!
//! Each market carries two monotone accumulator indices, one per side.
//! Accrual is lazy: the engine pokes the distributor at the start of every
//! hook that touches a market, and the index advances by
//! `speed * elapsed * 1e18 / total`. An empty market only advances its
//! clock, and a zero speed accrues nothing for the interval no matter how
//! much time passed, so restoring a speed never back-credits.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math::{self, Mantissa, MathError, INITIAL_INDEX};
use super::access::AccessControlManagerContractRef;
use super::engine::RiskEngineContractRef;
use super::errors::RiskError;
use super::events::*;
use super::market::MarketAccountingContractRef;

/// Reward token interface used for claim payouts
#[odra::external_contract]
pub trait RewardToken {
    fn balance_of(&self, account: Address) -> U256;
    fn transfer(&mut self, to: Address, amount: U256);
}

/// One side's accumulator for one market
#[odra::odra_type]
pub struct RewardIndexState {
    /// Monotone accumulator, starts at 1e18
    pub index: U256,
    /// Block time of the last advance
    pub last_update: u64,
}

impl RewardIndexState {
    pub fn initial(now: u64) -> Self {
        Self {
            index: U256::from(INITIAL_INDEX),
            last_update: now,
        }
    }
}

/// Advance an accumulator to `now`.
///
/// Pure: `index += speed * elapsed * 1e18 / total` when both speed and
/// total are nonzero; otherwise only the clock moves.
pub fn advance_index(
    state: &RewardIndexState,
    now: u64,
    speed: U256,
    total: U256,
) -> Result<RewardIndexState, MathError> {
    if now <= state.last_update {
        return Ok(state.clone());
    }
    if speed.is_zero() || total.is_zero() {
        return Ok(RewardIndexState {
            index: state.index,
            last_update: now,
        });
    }
    let elapsed = U256::from(now - state.last_update);
    let accrued = Mantissa::mul(speed, elapsed)?;
    let delta = Mantissa::div(Mantissa::mul(accrued, math::scale())?, total)?;
    Ok(RewardIndexState {
        index: Mantissa::add(state.index, delta)?,
        last_update: now,
    })
}

/// Reward Distributor contract
#[odra::module]
pub struct RewardDistributor {
    /// Access control manager
    access_control: Var<Address>,
    /// Risk engine allowed to drive accrual hooks
    engine: Var<Address>,
    /// Token paid out on claims
    reward_token: Var<Address>,
    /// Supply-side accumulators by market
    supply_state: Mapping<Address, RewardIndexState>,
    /// Borrow-side accumulators by market
    borrow_state: Mapping<Address, RewardIndexState>,
    /// Supply-side speeds (reward units per second)
    supply_speed: Mapping<Address, U256>,
    /// Borrow-side speeds (reward units per second)
    borrow_speed: Mapping<Address, U256>,
    /// Account snapshots: (market, account) -> index at last settlement
    supplier_index: Mapping<(Address, Address), U256>,
    /// Account snapshots, borrow side
    borrower_index: Mapping<(Address, Address), U256>,
    /// Accrued-but-unclaimed rewards per account
    accrued: Mapping<Address, U256>,
}

#[odra::module]
impl RewardDistributor {
    /// Initialize the distributor
    pub fn init(&mut self, access_control: Address) {
        self.access_control.set(access_control);
    }

    /// Register the risk engine allowed to drive accrual
    pub fn set_engine(&mut self, engine: Address) {
        self.ensure_allowed("set_engine");
        self.engine.set(engine);
    }

    /// Register the token claims are paid in
    pub fn set_reward_token(&mut self, reward_token: Address) {
        self.ensure_allowed("set_reward_token");
        if self.reward_token.get() == Some(reward_token) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.reward_token.set(reward_token);
    }

    // ========================================
    // Engine Hooks
    // ========================================

    /// Start both accumulators for a freshly listed market
    pub fn initialize_market(&mut self, market: Address) {
        self.only_engine();
        let now = self.env().get_block_time();
        if self.supply_state.get(&market).is_none() {
            self.supply_state.set(&market, RewardIndexState::initial(now));
        }
        if self.borrow_state.get(&market).is_none() {
            self.borrow_state.set(&market, RewardIndexState::initial(now));
        }
    }

    /// Accrue the supply side and settle one supplier
    pub fn notify_supply(&mut self, market: Address, account: Address) {
        self.only_engine();
        self.accrue_supply(market);
        self.settle_supplier(market, account);
    }

    /// Accrue the borrow side and settle one borrower
    pub fn notify_borrow(&mut self, market: Address, account: Address) {
        self.only_engine();
        self.accrue_borrow(market);
        self.settle_borrower(market, account);
    }

    // ========================================
    // Accrual
    // ========================================

    /// Advance both of a market's accumulators to now. Permissionless;
    /// the math is idempotent.
    pub fn update_market_indices(&mut self, market: Address) {
        self.accrue_supply(market);
        self.accrue_borrow(market);
    }

    /// Set both reward speeds for a market. The elapsed interval accrues
    /// at the old speeds before the new ones take effect.
    pub fn set_reward_speeds(&mut self, market: Address, supply_speed: U256, borrow_speed: U256) {
        self.ensure_allowed("set_reward_speeds");
        let now = self.env().get_block_time();
        if self.supply_state.get(&market).is_none() {
            self.supply_state.set(&market, RewardIndexState::initial(now));
        }
        if self.borrow_state.get(&market).is_none() {
            self.borrow_state.set(&market, RewardIndexState::initial(now));
        }
        self.accrue_supply(market);
        self.accrue_borrow(market);
        self.supply_speed.set(&market, supply_speed);
        self.borrow_speed.set(&market, borrow_speed);

        self.env().emit_event(RewardSpeedUpdated {
            market,
            supply_speed,
            borrow_speed,
        });
    }

    // ========================================
    // Claims
    // ========================================

    /// Settle and pay out an account's rewards across its entered markets.
    /// Reverts when the distributor's reward-token float cannot cover the
    /// claim; the owed balance stays intact for a retry.
    pub fn claim(&mut self, account: Address) -> U256 {
        let engine = self
            .engine
            .get_or_revert_with(RiskError::CallerNotAuthorized);
        let markets = RiskEngineContractRef::new(self.env(), engine).entered_markets(account);
        for market in markets {
            self.accrue_supply(market);
            self.accrue_borrow(market);
            self.settle_supplier(market, account);
            self.settle_borrower(market, account);
        }

        let owed = self.accrued.get(&account).unwrap_or(U256::zero());
        if owed.is_zero() {
            return U256::zero();
        }
        let token_addr = self
            .reward_token
            .get_or_revert_with(RiskError::InsufficientRewardFloat);
        let mut token = RewardTokenContractRef::new(self.env(), token_addr);
        if token.balance_of(self.env().self_address()) < owed {
            self.env().revert(RiskError::InsufficientRewardFloat);
        }
        self.accrued.set(&account, U256::zero());
        token.transfer(account, owed);

        self.env().emit_event(RewardClaimed {
            account,
            amount: owed,
        });
        owed
    }

    // ========================================
    // View Functions
    // ========================================

    pub fn reward_accrued(&self, account: Address) -> U256 {
        self.accrued.get(&account).unwrap_or(U256::zero())
    }

    pub fn get_supply_state(&self, market: Address) -> Option<RewardIndexState> {
        self.supply_state.get(&market)
    }

    pub fn get_borrow_state(&self, market: Address) -> Option<RewardIndexState> {
        self.borrow_state.get(&market)
    }

    pub fn get_supply_speed(&self, market: Address) -> U256 {
        self.supply_speed.get(&market).unwrap_or(U256::zero())
    }

    pub fn get_borrow_speed(&self, market: Address) -> U256 {
        self.borrow_speed.get(&market).unwrap_or(U256::zero())
    }

    // ========================================
    // Internal
    // ========================================

    fn accrue_supply(&mut self, market: Address) {
        let Some(state) = self.supply_state.get(&market) else {
            return;
        };
        let speed = self.supply_speed.get(&market).unwrap_or(U256::zero());
        let total = MarketAccountingContractRef::new(self.env(), market).total_supply();
        let next = match advance_index(&state, self.env().get_block_time(), speed, total) {
            Ok(next) => next,
            Err(e) => self.env().revert(e),
        };
        self.supply_state.set(&market, next);
    }

    fn accrue_borrow(&mut self, market: Address) {
        let Some(state) = self.borrow_state.get(&market) else {
            return;
        };
        let speed = self.borrow_speed.get(&market).unwrap_or(U256::zero());
        let total = MarketAccountingContractRef::new(self.env(), market).total_borrows();
        let next = match advance_index(&state, self.env().get_block_time(), speed, total) {
            Ok(next) => next,
            Err(e) => self.env().revert(e),
        };
        self.borrow_state.set(&market, next);
    }

    fn settle_supplier(&mut self, market: Address, account: Address) {
        let Some(state) = self.supply_state.get(&market) else {
            return;
        };
        let snapshot = self
            .supplier_index
            .get(&(market, account))
            .unwrap_or(U256::from(INITIAL_INDEX));
        if state.index == snapshot {
            return;
        }
        let balance = MarketAccountingContractRef::new(self.env(), market).balance_of(account);
        self.credit(market, account, balance, state.index, snapshot);
        self.supplier_index.set(&(market, account), state.index);
    }

    fn settle_borrower(&mut self, market: Address, account: Address) {
        let Some(state) = self.borrow_state.get(&market) else {
            return;
        };
        let snapshot = self
            .borrower_index
            .get(&(market, account))
            .unwrap_or(U256::from(INITIAL_INDEX));
        if state.index == snapshot {
            return;
        }
        let balance =
            MarketAccountingContractRef::new(self.env(), market).borrow_balance_stored(account);
        self.credit(market, account, balance, state.index, snapshot);
        self.borrower_index.set(&(market, account), state.index);
    }

    fn credit(&mut self, market: Address, account: Address, balance: U256, index: U256, snapshot: U256) {
        if balance.is_zero() {
            return;
        }
        let amount = Mantissa::sub(index, snapshot)
            .and_then(|delta| Mantissa::mul(balance, delta))
            .map(|v| v / math::scale());
        let amount = match amount {
            Ok(v) => v,
            Err(e) => self.env().revert(e),
        };
        if amount.is_zero() {
            return;
        }
        let total_owed = self
            .accrued
            .get(&account)
            .unwrap_or(U256::zero())
            .checked_add(amount)
            .unwrap_or_else(|| self.env().revert(MathError::Overflow));
        self.accrued.set(&account, total_owed);

        self.env().emit_event(RewardDistributed {
            account,
            market,
            amount,
            total_owed,
        });
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SCALE;

    fn state(index: u128, last_update: u64) -> RewardIndexState {
        RewardIndexState {
            index: U256::from(index),
            last_update,
        }
    }

    #[test]
    fn index_advances_proportionally() {
        // 10 units/sec over 5 sec into a total of 100 -> +0.5e18
        let next = advance_index(
            &state(INITIAL_INDEX, 100),
            105,
            U256::from(10u64),
            U256::from(100u64),
        )
        .unwrap();
        assert_eq!(next.index, U256::from(INITIAL_INDEX + SCALE / 2));
        assert_eq!(next.last_update, 105);
    }

    #[test]
    fn zero_total_only_moves_clock() {
        let next = advance_index(
            &state(INITIAL_INDEX, 100),
            200,
            U256::from(10u64),
            U256::zero(),
        )
        .unwrap();
        assert_eq!(next.index, U256::from(INITIAL_INDEX));
        assert_eq!(next.last_update, 200);
    }

    #[test]
    fn zero_speed_never_accrues_regardless_of_elapsed() {
        let next = advance_index(
            &state(INITIAL_INDEX, 0),
            1_000_000,
            U256::zero(),
            U256::from(100u64),
        )
        .unwrap();
        assert_eq!(next.index, U256::from(INITIAL_INDEX));
        assert_eq!(next.last_update, 1_000_000);
    }

    #[test]
    fn restoring_speed_accrues_only_forward() {
        // idle interval at speed zero, then speed restored
        let idle = advance_index(
            &state(INITIAL_INDEX, 0),
            100,
            U256::zero(),
            U256::from(100u64),
        )
        .unwrap();
        let resumed = advance_index(&idle, 110, U256::from(10u64), U256::from(100u64)).unwrap();
        // only the 10 seconds after restoration count
        assert_eq!(resumed.index, U256::from(INITIAL_INDEX + SCALE));
    }

    #[test]
    fn stale_now_is_a_no_op() {
        let s = state(INITIAL_INDEX + 7, 100);
        let next = advance_index(&s, 100, U256::from(10u64), U256::from(100u64)).unwrap();
        assert_eq!(next.index, s.index);
        assert_eq!(next.last_update, 100);
    }
}
