//! Liquidation Engine - seize math and liquidation policy.
//!
//! Computes how many collateral shares make a liquidator whole for a given
//! repayment, owns the close factor, and tracks forced-liquidation
//! overrides (global per market, or granted to a single liquidator).

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math::{self, Mantissa};
use super::access::AccessControlManagerContractRef;
use super::codes::RiskCode;
use super::engine::RiskEngineContractRef;
use super::errors::RiskError;
use super::events::*;
use super::market::MarketAccountingContractRef;
use super::oracle::PriceOracleContractRef;

/// Liquidation Engine contract
#[odra::module]
pub struct LiquidationEngine {
    /// Access control manager
    access_control: Var<Address>,
    /// Risk engine (source of account pool selections)
    engine: Var<Address>,
    /// Pool manager (source of incentive resolution)
    pool_manager: Var<Address>,
    /// Price oracle
    oracle: Var<Address>,
    /// Max fraction of a borrow repayable per liquidation (1e18 scale)
    close_factor: Var<U256>,
    /// Markets with forced liquidation enabled for everyone
    forced_market: Mapping<Address, bool>,
    /// (liquidator, market) pairs with forced liquidation enabled
    forced_account: Mapping<(Address, Address), bool>,
}

#[odra::module]
impl LiquidationEngine {
    /// Initialize the liquidation engine
    pub fn init(
        &mut self,
        access_control: Address,
        oracle: Address,
        pool_manager: Address,
        close_factor: U256,
    ) {
        if close_factor > math::scale() {
            self.env().revert(RiskError::InvalidRiskParams);
        }
        self.access_control.set(access_control);
        self.oracle.set(oracle);
        self.pool_manager.set(pool_manager);
        self.close_factor.set(close_factor);
    }

    /// Register the risk engine
    pub fn set_engine(&mut self, engine: Address) {
        self.ensure_allowed("set_engine");
        self.engine.set(engine);
    }

    // ========================================
    // Policy Configuration
    // ========================================

    /// Update the close factor
    pub fn set_close_factor(&mut self, close_factor: U256) {
        self.ensure_allowed("set_close_factor");
        if close_factor > math::scale() {
            self.env().revert(RiskError::InvalidRiskParams);
        }
        let old = self.close_factor.get_or_default();
        if old == close_factor {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.close_factor.set(close_factor);

        self.env().emit_event(CloseFactorUpdated {
            old_close_factor: old,
            new_close_factor: close_factor,
        });
    }

    /// Enable or disable forced liquidation for every liquidator of a market
    pub fn set_forced_liquidation(&mut self, market: Address, enabled: bool) {
        self.ensure_allowed("set_forced_liquidation");
        if self.forced_market.get(&market).unwrap_or(false) == enabled {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.forced_market.set(&market, enabled);

        self.env()
            .emit_event(ForcedLiquidationUpdated { market, enabled });
    }

    /// Enable or disable forced liquidation for one liquidator on a market
    pub fn set_forced_liquidation_for(
        &mut self,
        liquidator: Address,
        market: Address,
        enabled: bool,
    ) {
        self.ensure_allowed("set_forced_liquidation_for");
        if self.forced_account.get(&(liquidator, market)).unwrap_or(false) == enabled {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.forced_account.set(&(liquidator, market), enabled);

        self.env().emit_event(ForcedLiquidationAccountUpdated {
            liquidator,
            market,
            enabled,
        });
    }

    // ========================================
    // Seize Math
    // ========================================

    /// Collateral shares to seize for repaying `repay_amount` of the
    /// borrowed market's underlying:
    ///
    /// `seize = repay * incentive * price_borrowed / (price_collateral * exchange_rate)`
    ///
    /// Prices of zero report `PriceError`; arithmetic overflow aborts the
    /// call rather than wrapping.
    pub fn calculate_seize_tokens(
        &self,
        borrower: Address,
        borrowed_market: Address,
        collateral_market: Address,
        repay_amount: U256,
    ) -> (RiskCode, U256) {
        let oracle_addr = self.oracle.get_or_revert_with(RiskError::AccessDenied);
        let oracle = PriceOracleContractRef::new(self.env(), oracle_addr);
        let price_borrowed = oracle.get_underlying_price(borrowed_market);
        let price_collateral = oracle.get_underlying_price(collateral_market);
        if price_borrowed.is_zero() || price_collateral.is_zero() {
            return (RiskCode::PriceError, U256::zero());
        }

        let incentive = self
            .resolve_incentive(borrower, collateral_market);
        let exchange_rate =
            MarketAccountingContractRef::new(self.env(), collateral_market).exchange_rate_stored();

        let numerator = self.checked(Mantissa::mul_scaled(incentive, price_borrowed));
        let denominator = self.checked(Mantissa::mul_scaled(price_collateral, exchange_rate));
        let ratio = self.checked(Mantissa::div_scaled(numerator, denominator));
        let seize_tokens = self.checked(Mantissa::mul_scaled(repay_amount, ratio));

        (RiskCode::NoError, seize_tokens)
    }

    /// Largest repayment the close factor permits against a borrow
    pub fn max_close(&self, borrower: Address, borrowed_market: Address) -> U256 {
        let borrow_balance = MarketAccountingContractRef::new(self.env(), borrowed_market)
            .borrow_balance_stored(borrower);
        self.checked(Mantissa::mul_scaled(
            borrow_balance,
            self.close_factor.get_or_default(),
        ))
    }

    // ========================================
    // View Functions
    // ========================================

    pub fn get_close_factor(&self) -> U256 {
        self.close_factor.get_or_default()
    }

    /// Whether `liquidator` may force-liquidate positions in `market`
    pub fn is_forced(&self, liquidator: Address, market: Address) -> bool {
        self.forced_market.get(&market).unwrap_or(false)
            || self.forced_account.get(&(liquidator, market)).unwrap_or(false)
    }

    pub fn is_forced_liquidation_enabled(&self, market: Address) -> bool {
        self.forced_market.get(&market).unwrap_or(false)
    }

    // ========================================
    // Internal
    // ========================================

    fn resolve_incentive(&self, borrower: Address, collateral_market: Address) -> U256 {
        let engine_addr = self.engine.get_or_revert_with(RiskError::AccessDenied);
        let pool_id = RiskEngineContractRef::new(self.env(), engine_addr).account_pool(borrower);
        let pm_addr = self
            .pool_manager
            .get_or_revert_with(RiskError::AccessDenied);
        super::pools::PoolManagerContractRef::new(self.env(), pm_addr)
            .resolve_market_params(pool_id, collateral_market)
            .liquidation_incentive
    }

    fn checked(&self, value: Result<U256, crate::math::MathError>) -> U256 {
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
