//! Mock collaborators for exercising the risk engine.
//!
//! `MockMarket` implements the `MarketAccounting` surface with settable
//! state, `MockFlashLoanReceiver` plays the receiver side of a flash loan
//! with configurable repayment behavior, and `MockRewardToken` is a
//! minimal balance ledger for reward payouts.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math::SCALE;
use super::errors::RiskError;

/// Settable market accounting used in place of a real market module
#[odra::module]
pub struct MockMarket {
    total_supply: Var<U256>,
    total_borrows: Var<U256>,
    exchange_rate: Var<U256>,
    borrow_index: Var<U256>,
    cash: Var<U256>,
    total_reserves: Var<U256>,
    protocol_fees_routed: Var<U256>,
    lending_market: Var<bool>,
    balances: Mapping<Address, U256>,
    borrow_balances: Mapping<Address, U256>,
}

#[odra::module]
impl MockMarket {
    pub fn init(&mut self) {
        self.exchange_rate.set(U256::from(SCALE));
        self.borrow_index.set(U256::from(SCALE));
        self.lending_market.set(true);
    }

    // ---- state setters for tests ----

    pub fn set_total_supply(&mut self, value: U256) {
        self.total_supply.set(value);
    }

    pub fn set_total_borrows(&mut self, value: U256) {
        self.total_borrows.set(value);
    }

    pub fn set_exchange_rate(&mut self, value: U256) {
        self.exchange_rate.set(value);
    }

    pub fn set_cash(&mut self, value: U256) {
        self.cash.set(value);
    }

    pub fn set_balance(&mut self, account: Address, value: U256) {
        self.balances.set(&account, value);
    }

    pub fn set_borrow_balance(&mut self, account: Address, value: U256) {
        self.borrow_balances.set(&account, value);
    }

    pub fn set_is_lending_market(&mut self, value: bool) {
        self.lending_market.set(value);
    }

    /// Pay underlying into the market (flash-loan repayment path)
    pub fn credit_cash(&mut self, amount: U256) {
        let cash = self.cash.get_or_default();
        self.cash.set(cash + amount);
    }

    // ---- MarketAccounting surface ----

    pub fn total_supply(&self) -> U256 {
        self.total_supply.get_or_default()
    }

    pub fn total_borrows(&self) -> U256 {
        self.total_borrows.get_or_default()
    }

    pub fn exchange_rate_stored(&self) -> U256 {
        self.exchange_rate.get().unwrap_or(U256::from(SCALE))
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).unwrap_or(U256::zero())
    }

    pub fn borrow_balance_stored(&self, account: Address) -> U256 {
        self.borrow_balances.get(&account).unwrap_or(U256::zero())
    }

    pub fn borrow_index(&self) -> U256 {
        self.borrow_index.get().unwrap_or(U256::from(SCALE))
    }

    pub fn is_lending_market(&self) -> bool {
        self.lending_market.get().unwrap_or(true)
    }

    pub fn underlying_cash(&self) -> U256 {
        self.cash.get_or_default()
    }

    pub fn flash_transfer_out(&mut self, receiver: Address, amount: U256) {
        let _ = receiver;
        let cash = self.cash.get_or_default();
        if amount > cash {
            self.env().revert(RiskError::InsufficientBalance);
        }
        self.cash.set(cash - amount);
    }

    pub fn borrow_on_behalf(&mut self, account: Address, amount: U256) {
        let balance = self.borrow_balances.get(&account).unwrap_or(U256::zero());
        self.borrow_balances.set(&account, balance + amount);
        let total = self.total_borrows.get_or_default();
        self.total_borrows.set(total + amount);
    }

    pub fn route_flash_fee(&mut self, collector: Address, protocol_share: U256, reserve_share: U256) {
        let _ = collector;
        let cash = self.cash.get_or_default();
        if protocol_share > cash {
            self.env().revert(RiskError::InsufficientBalance);
        }
        self.cash.set(cash - protocol_share);
        let routed = self.protocol_fees_routed.get_or_default();
        self.protocol_fees_routed.set(routed + protocol_share);
        let reserves = self.total_reserves.get_or_default();
        self.total_reserves.set(reserves + reserve_share);
    }

    // ---- inspection ----

    pub fn get_total_reserves(&self) -> U256 {
        self.total_reserves.get_or_default()
    }

    pub fn get_protocol_fees_routed(&self) -> U256 {
        self.protocol_fees_routed.get_or_default()
    }
}

/// Flash-loan receiver with scripted repayment behavior
#[odra::module]
pub struct MockFlashLoanReceiver {
    /// Explicit repayment per market; absent means principal plus fee
    repay_overrides: Mapping<Address, U256>,
    has_override: Mapping<Address, bool>,
    /// Report failure from the callback
    fail: Var<bool>,
}

#[odra::module]
impl MockFlashLoanReceiver {
    pub fn init(&mut self) {
        self.fail.set(false);
    }

    pub fn set_fail(&mut self, fail: bool) {
        self.fail.set(fail);
    }

    /// Script the exact amount repaid to `market`, zero included
    pub fn set_repayment(&mut self, market: Address, amount: U256) {
        self.repay_overrides.set(&market, amount);
        self.has_override.set(&market, true);
    }

    pub fn execute_operation(
        &mut self,
        markets: Vec<Address>,
        amounts: Vec<U256>,
        fees: Vec<U256>,
        initiator: Address,
    ) -> bool {
        let _ = initiator;
        if self.fail.get_or_default() {
            return false;
        }
        for i in 0..markets.len() {
            let market = markets[i];
            let repay = if self.has_override.get(&market).unwrap_or(false) {
                self.repay_overrides.get(&market).unwrap_or(U256::zero())
            } else {
                amounts[i] + fees[i]
            };
            if !repay.is_zero() {
                MockMarketContractRef::new(self.env(), market).credit_cash(repay);
            }
        }
        true
    }
}

/// Minimal reward-token ledger
#[odra::module]
pub struct MockRewardToken {
    balances: Mapping<Address, U256>,
}

#[odra::module]
impl MockRewardToken {
    pub fn init(&mut self) {}

    pub fn mint(&mut self, to: Address, amount: U256) {
        let balance = self.balances.get(&to).unwrap_or(U256::zero());
        self.balances.set(&to, balance + amount);
    }

    pub fn transfer(&mut self, to: Address, amount: U256) {
        let from = self.env().caller();
        let from_balance = self.balances.get(&from).unwrap_or(U256::zero());
        if amount > from_balance {
            self.env().revert(RiskError::InsufficientBalance);
        }
        self.balances.set(&from, from_balance - amount);
        let to_balance = self.balances.get(&to).unwrap_or(U256::zero());
        self.balances.set(&to, to_balance + amount);
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).unwrap_or(U256::zero())
    }
}
