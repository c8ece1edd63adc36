//! Risk Engine - the decision layer market modules call into.
//!
//! Owns the market registry, per-account membership and pool selection,
//! the pause/cap guard, and the account liquidity calculator. Markets ask
//! the engine before mutating their ledgers (`mint_allowed`,
//! `borrow_allowed`, `liquidate_borrow_allowed`, ...) and get back a
//! `RiskCode` they enforce; the engine never touches a market ledger
//! itself.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math::{Mantissa, MathError};
use super::access::AccessControlManagerContractRef;
use super::codes::RiskCode;
use super::errors::RiskError;
use super::events::*;
use super::liquidation::LiquidationEngineContractRef;
use super::market::MarketAccountingContractRef;
use super::oracle::PriceOracleContractRef;
use super::pools::{MarketRiskParams, PoolManagerContractRef, CORE_POOL_ID};
use super::rewards::RewardDistributorContractRef;

/// Risk-affecting action kinds, used by the pause guard
#[odra::odra_type]
pub enum Action {
    Mint = 0,
    Redeem = 1,
    Borrow = 2,
    Repay = 3,
    Seize = 4,
    Liquidate = 5,
    Transfer = 6,
    Enter = 7,
    Exit = 8,
}

/// Number of pausable action kinds
const ACTION_COUNT: u8 = 9;

/// Registry record of a listed market
#[odra::odra_type]
pub struct MarketConfig {
    /// Whether the market is currently listed
    pub is_listed: bool,
    /// Underlying-unit ceiling for total supply; zero closes the market
    pub supply_cap: U256,
    /// Underlying-unit ceiling for total borrows; zero closes the market
    pub borrow_cap: U256,
}

/// Risk Engine contract
#[odra::module]
pub struct RiskEngine {
    /// Access control manager
    access_control: Var<Address>,
    /// Price oracle
    oracle: Var<Address>,
    /// Pool manager
    pool_manager: Var<Address>,
    /// Liquidation engine
    liquidation: Var<Address>,
    /// Reward distributor
    rewards: Var<Address>,
    /// Flash-loan coordinator allowed to trigger borrow auto-entry
    flash_loan_coordinator: Var<Address>,
    /// Stablecoin controller exempt from the listed check on borrow side
    stablecoin_controller: Var<Address>,
    /// Market registry
    markets: Mapping<Address, MarketConfig>,
    /// All markets ever listed: index -> market
    market_list: Mapping<u32, Address>,
    /// Length of `market_list`
    market_count: Var<u32>,
    /// Entered markets per account: (account, index) -> market
    account_markets: Mapping<(Address, u32), Address>,
    /// Entered-market list lengths
    account_market_count: Mapping<Address, u32>,
    /// Membership flags: (account, market) -> entered
    account_in_market: Mapping<(Address, Address), bool>,
    /// Accounts inside a market: (market, index) -> account
    market_members: Mapping<(Address, u32), Address>,
    /// Member list lengths
    market_member_count: Mapping<Address, u32>,
    /// Active pool selection per account (0 = core)
    account_pool: Mapping<Address, u32>,
    /// Pause flags: (market, action discriminant) -> paused
    paused: Mapping<(Address, u8), bool>,
}

#[odra::module]
impl RiskEngine {
    /// Initialize the engine with its collaborators
    pub fn init(
        &mut self,
        access_control: Address,
        oracle: Address,
        pool_manager: Address,
        liquidation: Address,
        rewards: Address,
    ) {
        self.access_control.set(access_control);
        self.oracle.set(oracle);
        self.pool_manager.set(pool_manager);
        self.liquidation.set(liquidation);
        self.rewards.set(rewards);
        self.market_count.set(0);
    }

    // ========================================
    // Wiring
    // ========================================

    /// Replace the price oracle
    pub fn set_oracle(&mut self, oracle: Address) {
        self.ensure_allowed("set_oracle");
        if self.oracle.get() == Some(oracle) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.oracle.set(oracle);
        self.env().emit_event(OracleUpdated { oracle });
    }

    /// Register the flash-loan coordinator
    pub fn set_flash_loan_coordinator(&mut self, coordinator: Address) {
        self.ensure_allowed("set_flash_loan_coordinator");
        if self.flash_loan_coordinator.get() == Some(coordinator) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.flash_loan_coordinator.set(coordinator);
    }

    /// Register the stablecoin controller exempt from the listed check
    pub fn set_stablecoin_controller(&mut self, controller: Address) {
        self.ensure_allowed("set_stablecoin_controller");
        if self.stablecoin_controller.get() == Some(controller) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.stablecoin_controller.set(controller);
        self.env()
            .emit_event(StablecoinControllerUpdated { controller });
    }

    // ========================================
    // Market Registry
    // ========================================

    /// List a market. The candidate must implement the market accounting
    /// interface; it joins the core pool with zeroed risk parameters and
    /// both reward indices start at their fixed base.
    pub fn list_market(&mut self, market: Address) {
        self.ensure_allowed("list_market");
        match self.markets.get(&market) {
            Some(config) if config.is_listed => self.env().revert(RiskError::AlreadyListed),
            Some(mut config) => {
                // re-listing a delisted market; registry structures persist
                config.is_listed = true;
                self.markets.set(&market, config);
            }
            None => {
                if !MarketAccountingContractRef::new(self.env(), market).is_lending_market() {
                    self.env().revert(RiskError::NotAMarket);
                }
                self.markets.set(
                    &market,
                    MarketConfig {
                        is_listed: true,
                        supply_cap: U256::zero(),
                        borrow_cap: U256::zero(),
                    },
                );
                let index = self.market_count.get_or_default();
                self.market_list.set(&index, market);
                self.market_count.set(index + 1);

                self.pool_manager_ref().register_core_market(market);
                self.rewards_ref().initialize_market(market);
            }
        }
        self.env().emit_event(MarketListed { market });
    }

    /// Unlist a market. Every risk action must already be paused; all
    /// accounts are purged from the market and its core collateral factor
    /// is zeroed. The market stays in the registry, delisted.
    pub fn unlist_market(&mut self, market: Address) {
        self.ensure_allowed("unlist_market");
        let mut config = self
            .markets
            .get(&market)
            .unwrap_or_revert_with(&self.env(), RiskError::MarketNotListed);
        if !config.is_listed {
            self.env().revert(RiskError::MarketNotListed);
        }
        for action in 0..ACTION_COUNT {
            if !self.paused.get(&(market, action)).unwrap_or(false) {
                self.env().revert(RiskError::ActionsNotPaused);
            }
        }

        let member_count = self.market_member_count.get(&market).unwrap_or(0);
        for i in 0..member_count {
            if let Some(account) = self.market_members.get(&(market, i)) {
                self.remove_account_market(account, market);
                self.account_in_market.set(&(account, market), false);
            }
        }
        self.market_member_count.set(&market, 0);

        self.pool_manager_ref().clear_core_market(market);

        config.is_listed = false;
        self.markets.set(&market, config);

        self.env().emit_event(MarketUnlisted {
            market,
            purged_accounts: member_count,
        });
    }

    /// Update a market's supply cap
    pub fn set_supply_cap(&mut self, market: Address, new_cap: U256) {
        self.ensure_allowed("set_supply_cap");
        let mut config = self.listed_market(market);
        if config.supply_cap == new_cap {
            self.env().revert(RiskError::UnchangedValue);
        }
        config.supply_cap = new_cap;
        self.markets.set(&market, config);
        self.env().emit_event(SupplyCapUpdated { market, new_cap });
    }

    /// Update a market's borrow cap
    pub fn set_borrow_cap(&mut self, market: Address, new_cap: U256) {
        self.ensure_allowed("set_borrow_cap");
        let mut config = self.listed_market(market);
        if config.borrow_cap == new_cap {
            self.env().revert(RiskError::UnchangedValue);
        }
        config.borrow_cap = new_cap;
        self.markets.set(&market, config);
        self.env().emit_event(BorrowCapUpdated { market, new_cap });
    }

    // ========================================
    // Pause Guard
    // ========================================

    /// Pause or unpause every (market, action) combination of the two
    /// lists. Empty lists are accepted no-ops; an unlisted market aborts.
    pub fn set_actions_paused(
        &mut self,
        markets: Vec<Address>,
        actions: Vec<Action>,
        paused: bool,
    ) {
        self.ensure_allowed("set_actions_paused");
        for market in markets {
            if !self.is_market_listed(market) {
                self.env().revert(RiskError::MarketNotListed);
            }
            for action in actions.clone() {
                let action = action as u8;
                self.paused.set(&(market, action), paused);
                self.env().emit_event(ActionPauseUpdated {
                    market,
                    action,
                    paused,
                });
            }
        }
    }

    /// Whether `action` is paused for `market`
    pub fn is_action_paused(&self, market: Address, action: Action) -> bool {
        self.paused.get(&(market, action as u8)).unwrap_or(false)
    }

    // ========================================
    // Account Membership
    // ========================================

    /// Enter a list of markets; one code per market, in order
    pub fn enter_markets(&mut self, markets: Vec<Address>) -> Vec<RiskCode> {
        let account = self.env().caller();
        let mut results: Vec<RiskCode> = Vec::new();
        for market in markets {
            results.push(self.enter_market_internal(market, account));
        }
        results
    }

    /// Leave a market. Requires no outstanding borrow and that the
    /// account's remaining collateral still covers its borrows.
    pub fn exit_market(&mut self, market: Address) -> RiskCode {
        let account = self.env().caller();
        if !self.is_account_in_market(account, market) {
            return RiskCode::NoError;
        }
        if self.is_action_paused(market, Action::Exit) {
            return RiskCode::ActionPaused;
        }
        let market_ref = MarketAccountingContractRef::new(self.env(), market);
        if !market_ref.borrow_balance_stored(account).is_zero() {
            return RiskCode::NonzeroBorrowBalance;
        }
        let tokens = market_ref.balance_of(account);
        let (code, _, shortfall) =
            self.hypothetical_liquidity(account, Some(market), tokens, U256::zero(), false);
        if code != RiskCode::NoError {
            return code;
        }
        if !shortfall.is_zero() {
            return RiskCode::InsufficientLiquidity;
        }

        self.remove_account_market(account, market);
        self.account_in_market.set(&(account, market), false);
        self.remove_market_member(market, account);

        self.env().emit_event(MarketExited { market, account });
        RiskCode::NoError
    }

    /// Markets an account has entered, in insertion order
    pub fn entered_markets(&self, account: Address) -> Vec<Address> {
        let count = self.account_market_count.get(&account).unwrap_or(0);
        let mut out: Vec<Address> = Vec::new();
        for i in 0..count {
            if let Some(market) = self.account_markets.get(&(account, i)) {
                out.push(market);
            }
        }
        out
    }

    pub fn is_account_in_market(&self, account: Address, market: Address) -> bool {
        self.account_in_market.get(&(account, market)).unwrap_or(false)
    }

    // ========================================
    // Pool Selection
    // ========================================

    /// Switch the caller's active risk pool. Rejected while the account
    /// borrows any market the destination pool disallows borrowing.
    pub fn enter_pool(&mut self, pool_id: u32) {
        let account = self.env().caller();
        let pool_manager = self.pool_manager_ref();
        let pool = pool_manager
            .get_pool(pool_id)
            .unwrap_or_revert_with(&self.env(), RiskError::PoolDoesNotExist);
        if !pool.is_active {
            self.env().revert(RiskError::PoolNotActive);
        }
        let old_pool_id = self.account_pool.get(&account).unwrap_or(CORE_POOL_ID);
        if old_pool_id == pool_id {
            self.env().revert(RiskError::AlreadyInSelectedPool);
        }

        for market in self.entered_markets(account) {
            let borrow_balance = MarketAccountingContractRef::new(self.env(), market)
                .borrow_balance_stored(account);
            if borrow_balance.is_zero() {
                continue;
            }
            let params = pool_manager.resolve_market_params(pool_id, market);
            if !params.borrow_allowed {
                self.env().revert(RiskError::IncompatibleBorrowedAssets);
            }
        }

        self.account_pool.set(&account, pool_id);
        self.env().emit_event(PoolEntered {
            account,
            old_pool_id,
            new_pool_id: pool_id,
        });
    }

    /// Active pool of an account (core when never switched)
    pub fn account_pool(&self, account: Address) -> u32 {
        self.account_pool.get(&account).unwrap_or(CORE_POOL_ID)
    }

    /// Effective risk parameters for `account` looking at `market`
    pub fn effective_market_params(&self, account: Address, market: Address) -> MarketRiskParams {
        self.pool_manager_ref()
            .resolve_market_params(self.account_pool(account), market)
    }

    // ========================================
    // Account Liquidity
    // ========================================

    /// Aggregate position of an account: `(code, liquidity, shortfall)`.
    /// At most one of liquidity/shortfall is nonzero; a missing price for
    /// any entered market reports `PriceError`.
    pub fn get_account_liquidity(&self, account: Address) -> (RiskCode, U256, U256) {
        self.hypothetical_liquidity(account, None, U256::zero(), U256::zero(), false)
    }

    /// Account position as it would look after redeeming `redeem_tokens`
    /// shares of `market` and borrowing `borrow_amount` of its underlying
    pub fn get_hypothetical_account_liquidity(
        &self,
        account: Address,
        market: Address,
        redeem_tokens: U256,
        borrow_amount: U256,
    ) -> (RiskCode, U256, U256) {
        self.hypothetical_liquidity(account, Some(market), redeem_tokens, borrow_amount, false)
    }

    // ========================================
    // Market Hooks
    // ========================================

    /// Pre-flight decision for a mint of `mint_amount` underlying
    pub fn mint_allowed(&mut self, market: Address, minter: Address, mint_amount: U256) -> RiskCode {
        let Some(config) = self.markets.get(&market) else {
            return RiskCode::MarketNotListed;
        };
        if !config.is_listed {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Mint) {
            return RiskCode::ActionPaused;
        }

        let market_ref = MarketAccountingContractRef::new(self.env(), market);
        let underlying_supply = self.checked(Mantissa::mul_scaled(
            market_ref.total_supply(),
            market_ref.exchange_rate_stored(),
        ));
        let next_supply = self.checked(Mantissa::add(underlying_supply, mint_amount));
        if next_supply > config.supply_cap {
            return RiskCode::SupplyCapReached;
        }

        self.rewards_ref().notify_supply(market, minter);
        RiskCode::NoError
    }

    /// Pre-flight decision for redeeming `redeem_tokens` shares
    pub fn redeem_allowed(
        &mut self,
        market: Address,
        redeemer: Address,
        redeem_tokens: U256,
    ) -> RiskCode {
        if !self.is_market_listed(market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Redeem) {
            return RiskCode::ActionPaused;
        }
        if self.is_account_in_market(redeemer, market) {
            let (code, _, shortfall) = self.hypothetical_liquidity(
                redeemer,
                Some(market),
                redeem_tokens,
                U256::zero(),
                false,
            );
            if code != RiskCode::NoError {
                return code;
            }
            if !shortfall.is_zero() {
                return RiskCode::InsufficientLiquidity;
            }
        }
        self.rewards_ref().notify_supply(market, redeemer);
        RiskCode::NoError
    }

    /// Pre-flight decision for borrowing `borrow_amount` underlying.
    /// A borrower who never entered the market is entered automatically,
    /// but only the market itself or the flash-loan coordinator may
    /// trigger that.
    pub fn borrow_allowed(
        &mut self,
        market: Address,
        borrower: Address,
        borrow_amount: U256,
    ) -> RiskCode {
        let Some(config) = self.markets.get(&market) else {
            return RiskCode::MarketNotListed;
        };
        if !config.is_listed {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Borrow) {
            return RiskCode::ActionPaused;
        }
        let params = self.effective_market_params(borrower, market);
        if !params.borrow_allowed {
            return RiskCode::BorrowNotAllowed;
        }
        if self.oracle_ref().get_underlying_price(market).is_zero() {
            return RiskCode::PriceError;
        }

        if !self.is_account_in_market(borrower, market) {
            let caller = self.env().caller();
            let coordinator = self.flash_loan_coordinator.get();
            if caller != market && Some(caller) != coordinator {
                self.env().revert(RiskError::CallerNotAuthorized);
            }
            self.add_account_market(borrower, market);
        }

        let total_borrows = MarketAccountingContractRef::new(self.env(), market).total_borrows();
        let next_borrows = self.checked(Mantissa::add(total_borrows, borrow_amount));
        if next_borrows > config.borrow_cap {
            return RiskCode::BorrowCapReached;
        }

        let (code, _, shortfall) =
            self.hypothetical_liquidity(borrower, Some(market), U256::zero(), borrow_amount, false);
        if code != RiskCode::NoError {
            return code;
        }
        if !shortfall.is_zero() {
            return RiskCode::InsufficientLiquidity;
        }

        self.rewards_ref().notify_borrow(market, borrower);
        RiskCode::NoError
    }

    /// Pre-flight decision for repaying a borrow
    pub fn repay_allowed(&mut self, market: Address, payer: Address, borrower: Address) -> RiskCode {
        let _ = payer;
        if !self.is_market_listed(market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Repay) {
            return RiskCode::ActionPaused;
        }
        self.rewards_ref().notify_borrow(market, borrower);
        RiskCode::NoError
    }

    /// Pre-flight decision for a liquidation seize
    pub fn seize_allowed(
        &mut self,
        collateral_market: Address,
        borrowed_market: Address,
        liquidator: Address,
        borrower: Address,
    ) -> RiskCode {
        if !self.is_market_listed(collateral_market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(collateral_market, Action::Seize) {
            return RiskCode::ActionPaused;
        }
        if !self.is_market_listed(borrowed_market) && !self.is_stablecoin_controller(borrowed_market)
        {
            return RiskCode::MarketNotListed;
        }
        let mut rewards = self.rewards_ref();
        rewards.notify_supply(collateral_market, borrower);
        rewards.notify_supply(collateral_market, liquidator);
        RiskCode::NoError
    }

    /// Pre-flight decision for transferring market shares
    pub fn transfer_allowed(
        &mut self,
        market: Address,
        src: Address,
        dst: Address,
        transfer_tokens: U256,
    ) -> RiskCode {
        if !self.is_market_listed(market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Transfer) {
            return RiskCode::ActionPaused;
        }
        if self.is_account_in_market(src, market) {
            let (code, _, shortfall) =
                self.hypothetical_liquidity(src, Some(market), transfer_tokens, U256::zero(), false);
            if code != RiskCode::NoError {
                return code;
            }
            if !shortfall.is_zero() {
                return RiskCode::InsufficientLiquidity;
            }
        }
        let mut rewards = self.rewards_ref();
        rewards.notify_supply(market, src);
        rewards.notify_supply(market, dst);
        RiskCode::NoError
    }

    /// Pre-flight decision for a liquidation repayment.
    ///
    /// Forced liquidation (per market or per liquidator) skips the
    /// shortfall check but never lets the repayment exceed the outstanding
    /// borrow; the normal path requires a threshold-weighted shortfall and
    /// caps the repayment at the close factor.
    pub fn liquidate_borrow_allowed(
        &mut self,
        borrowed_market: Address,
        collateral_market: Address,
        liquidator: Address,
        borrower: Address,
        repay_amount: U256,
    ) -> RiskCode {
        if !self.is_market_listed(collateral_market) {
            return RiskCode::MarketNotListed;
        }
        let borrowed_listed = self.is_market_listed(borrowed_market);
        if !borrowed_listed && !self.is_stablecoin_controller(borrowed_market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(collateral_market, Action::Liquidate)
            || (borrowed_listed && self.is_action_paused(borrowed_market, Action::Liquidate))
        {
            return RiskCode::ActionPaused;
        }

        let borrow_balance = MarketAccountingContractRef::new(self.env(), borrowed_market)
            .borrow_balance_stored(borrower);
        let liquidation = self.liquidation_ref();

        if liquidation.is_forced(liquidator, borrowed_market) {
            if repay_amount > borrow_balance {
                return RiskCode::TooMuchRepay;
            }
            return RiskCode::NoError;
        }

        let (code, _, shortfall) =
            self.hypothetical_liquidity(borrower, None, U256::zero(), U256::zero(), true);
        if code != RiskCode::NoError {
            return code;
        }
        if shortfall.is_zero() {
            return RiskCode::InsufficientShortfall;
        }
        let max_close = self.checked(Mantissa::mul_scaled(
            borrow_balance,
            liquidation.get_close_factor(),
        ));
        if repay_amount > max_close {
            return RiskCode::TooMuchRepay;
        }
        RiskCode::NoError
    }

    /// Collateral shares to seize for a liquidation repayment
    pub fn liquidate_calculate_seize_tokens(
        &self,
        borrower: Address,
        borrowed_market: Address,
        collateral_market: Address,
        repay_amount: U256,
    ) -> (RiskCode, U256) {
        self.liquidation_ref().calculate_seize_tokens(
            borrower,
            borrowed_market,
            collateral_market,
            repay_amount,
        )
    }

    // ========================================
    // View Functions
    // ========================================

    pub fn is_market_listed(&self, market: Address) -> bool {
        self.markets.get(&market).map(|m| m.is_listed).unwrap_or(false)
    }

    pub fn get_market(&self, market: Address) -> Option<MarketConfig> {
        self.markets.get(&market)
    }

    /// Every market ever listed, including currently delisted ones
    pub fn all_markets(&self) -> Vec<Address> {
        let count = self.market_count.get_or_default();
        let mut out: Vec<Address> = Vec::new();
        for i in 0..count {
            if let Some(market) = self.market_list.get(&i) {
                out.push(market);
            }
        }
        out
    }

    pub fn get_stablecoin_controller(&self) -> Option<Address> {
        self.stablecoin_controller.get()
    }

    // ========================================
    // Internal
    // ========================================

    fn enter_market_internal(&mut self, market: Address, account: Address) -> RiskCode {
        if !self.is_market_listed(market) {
            return RiskCode::MarketNotListed;
        }
        if self.is_action_paused(market, Action::Enter) {
            return RiskCode::ActionPaused;
        }
        if self.is_account_in_market(account, market) {
            return RiskCode::NoError;
        }
        self.add_account_market(account, market);
        RiskCode::NoError
    }

    fn add_account_market(&mut self, account: Address, market: Address) {
        let index = self.account_market_count.get(&account).unwrap_or(0);
        self.account_markets.set(&(account, index), market);
        self.account_market_count.set(&account, index + 1);
        self.account_in_market.set(&(account, market), true);

        let member_index = self.market_member_count.get(&market).unwrap_or(0);
        self.market_members.set(&(market, member_index), account);
        self.market_member_count.set(&market, member_index + 1);

        self.env().emit_event(MarketEntered { market, account });
    }

    /// Drop `market` from `account`'s entered list, keeping insertion order
    fn remove_account_market(&mut self, account: Address, market: Address) {
        let count = self.account_market_count.get(&account).unwrap_or(0);
        let mut found = false;
        for i in 0..count {
            if found {
                if let Some(next) = self.account_markets.get(&(account, i)) {
                    self.account_markets.set(&(account, i - 1), next);
                }
            } else if self.account_markets.get(&(account, i)) == Some(market) {
                found = true;
            }
        }
        if found {
            self.account_market_count.set(&account, count - 1);
        }
    }

    /// Drop `account` from `market`'s member list
    fn remove_market_member(&mut self, market: Address, account: Address) {
        let count = self.market_member_count.get(&market).unwrap_or(0);
        let mut found = false;
        for i in 0..count {
            if found {
                if let Some(next) = self.market_members.get(&(market, i)) {
                    self.market_members.set(&(market, i - 1), next);
                }
            } else if self.market_members.get(&(market, i)) == Some(account) {
                found = true;
            }
        }
        if found {
            self.market_member_count.set(&market, count - 1);
        }
    }

    /// Core of the liquidity calculator. Walks the account's entered
    /// markets, weighting collateral by the pool-resolved collateral
    /// factor (`use_threshold == false`) or liquidation threshold, and
    /// charges the hypothetical redeem/borrow against `modify_market`.
    fn hypothetical_liquidity(
        &self,
        account: Address,
        modify_market: Option<Address>,
        redeem_tokens: U256,
        borrow_amount: U256,
        use_threshold: bool,
    ) -> (RiskCode, U256, U256) {
        let oracle = self.oracle_ref();
        let pool_manager = self.pool_manager_ref();
        let pool_id = self.account_pool(account);

        let mut collateral_sum = U256::zero();
        let mut borrow_sum = U256::zero();

        let count = self.account_market_count.get(&account).unwrap_or(0);
        for i in 0..count {
            let Some(market) = self.account_markets.get(&(account, i)) else {
                continue;
            };
            let market_ref = MarketAccountingContractRef::new(self.env(), market);
            let supply_shares = market_ref.balance_of(account);
            let borrow_balance = market_ref.borrow_balance_stored(account);
            let is_modified = modify_market == Some(market);
            if supply_shares.is_zero() && borrow_balance.is_zero() && !is_modified {
                continue;
            }

            let price = oracle.get_underlying_price(market);
            if price.is_zero() {
                return (RiskCode::PriceError, U256::zero(), U256::zero());
            }
            let params = pool_manager.resolve_market_params(pool_id, market);
            let weight = if use_threshold {
                params.liquidation_threshold
            } else {
                params.collateral_factor
            };

            // value of one share: exchange_rate * weight * price, all 1e18
            let share_value = self.checked(
                Mantissa::mul_scaled(market_ref.exchange_rate_stored(), weight)
                    .and_then(|v| Mantissa::mul_scaled(v, price)),
            );
            if !supply_shares.is_zero() {
                let value = self.checked(Mantissa::mul_scaled(supply_shares, share_value));
                collateral_sum = self.checked(Mantissa::add(collateral_sum, value));
            }
            if !borrow_balance.is_zero() {
                let value = self.checked(Mantissa::mul_scaled(borrow_balance, price));
                borrow_sum = self.checked(Mantissa::add(borrow_sum, value));
            }

            if is_modified {
                if !redeem_tokens.is_zero() {
                    let value = self.checked(Mantissa::mul_scaled(redeem_tokens, share_value));
                    borrow_sum = self.checked(Mantissa::add(borrow_sum, value));
                }
                if !borrow_amount.is_zero() {
                    let value = self.checked(Mantissa::mul_scaled(borrow_amount, price));
                    borrow_sum = self.checked(Mantissa::add(borrow_sum, value));
                }
            }
        }

        if collateral_sum >= borrow_sum {
            (RiskCode::NoError, collateral_sum - borrow_sum, U256::zero())
        } else {
            (RiskCode::NoError, U256::zero(), borrow_sum - collateral_sum)
        }
    }

    fn listed_market(&self, market: Address) -> MarketConfig {
        let config = self
            .markets
            .get(&market)
            .unwrap_or_revert_with(&self.env(), RiskError::MarketNotListed);
        if !config.is_listed {
            self.env().revert(RiskError::MarketNotListed);
        }
        config
    }

    fn is_stablecoin_controller(&self, candidate: Address) -> bool {
        self.stablecoin_controller.get() == Some(candidate)
    }

    fn oracle_ref(&self) -> PriceOracleContractRef {
        let addr = self.oracle.get_or_revert_with(RiskError::AccessDenied);
        PriceOracleContractRef::new(self.env(), addr)
    }

    fn pool_manager_ref(&self) -> PoolManagerContractRef {
        let addr = self
            .pool_manager
            .get_or_revert_with(RiskError::AccessDenied);
        PoolManagerContractRef::new(self.env(), addr)
    }

    fn liquidation_ref(&self) -> LiquidationEngineContractRef {
        let addr = self.liquidation.get_or_revert_with(RiskError::AccessDenied);
        LiquidationEngineContractRef::new(self.env(), addr)
    }

    fn rewards_ref(&self) -> RewardDistributorContractRef {
        let addr = self.rewards.get_or_revert_with(RiskError::AccessDenied);
        RewardDistributorContractRef::new(self.env(), addr)
    }

    fn checked(&self, value: Result<U256, MathError>) -> U256 {
        match value {
            Ok(v) => v,
            Err(e) => self.env().revert(e),
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
