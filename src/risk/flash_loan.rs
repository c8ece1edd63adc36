//! Flash-Loan Coordinator - multi-asset atomic borrow-and-repay.
//!
//! All transfer-out legs run before the single receiver callback, so the
//! receiver sees every borrowed asset at once; repayment is verified per
//! market from cash deltas only after the callback returns. A repayment
//! that covers principal but not the whole fee books the unpaid fee as a
//! borrow against the on-behalf-of account, gated by the engine's normal
//! borrow decision.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::math::{self, Mantissa};
use super::access::AccessControlManagerContractRef;
use super::codes::RiskCode;
use super::engine::RiskEngineContractRef;
use super::errors::RiskError;
use super::events::*;
use super::market::MarketAccountingContractRef;

/// Receiver callback invoked with all borrowed funds in place
#[odra::external_contract]
pub trait FlashLoanReceiver {
    fn execute_operation(
        &mut self,
        markets: Vec<Address>,
        amounts: Vec<U256>,
        fees: Vec<U256>,
        initiator: Address,
    ) -> bool;
}

/// Flash-Loan Coordinator contract
#[odra::module]
pub struct FlashLoanCoordinator {
    /// Access control manager
    access_control: Var<Address>,
    /// Risk engine
    engine: Var<Address>,
    /// Recipient of the protocol's share of fees
    fee_collector: Var<Address>,
    /// Fee rate applied to each borrowed amount (1e18 scale)
    fee_rate: Var<U256>,
    /// Share of the fee routed to the collector (1e18 scale)
    protocol_fee_share: Var<U256>,
    /// Markets open to flash loans
    market_enabled: Mapping<Address, bool>,
    /// Accounts allowed to initiate flash loans
    authorized: Mapping<Address, bool>,
    /// (account, delegate) approvals for initiating on the account's behalf
    delegates: Mapping<(Address, Address), bool>,
}

#[odra::module]
impl FlashLoanCoordinator {
    /// Initialize the coordinator
    pub fn init(
        &mut self,
        access_control: Address,
        engine: Address,
        fee_collector: Address,
        fee_rate: U256,
        protocol_fee_share: U256,
    ) {
        if fee_rate > math::scale() || protocol_fee_share > math::scale() {
            self.env().revert(RiskError::InvalidRiskParams);
        }
        self.access_control.set(access_control);
        self.engine.set(engine);
        self.fee_collector.set(fee_collector);
        self.fee_rate.set(fee_rate);
        self.protocol_fee_share.set(protocol_fee_share);
    }

    // ========================================
    // Configuration
    // ========================================

    /// Open or close a listed market to flash loans
    pub fn set_flash_loan_enabled(&mut self, market: Address, enabled: bool) {
        self.ensure_allowed("set_flash_loan_enabled");
        let engine_addr = self.engine.get_or_revert_with(RiskError::AccessDenied);
        if !RiskEngineContractRef::new(self.env(), engine_addr).is_market_listed(market) {
            self.env().revert(RiskError::MarketNotListed);
        }
        if self.market_enabled.get(&market).unwrap_or(false) == enabled {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.market_enabled.set(&market, enabled);

        self.env()
            .emit_event(FlashLoanMarketUpdated { market, enabled });
    }

    /// Allow-list or remove a flash-loan initiator
    pub fn set_authorized(&mut self, account: Address, authorized: bool) {
        self.ensure_allowed("set_authorized");
        if self.authorized.get(&account).unwrap_or(false) == authorized {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.authorized.set(&account, authorized);

        self.env()
            .emit_event(FlashLoanAuthorizationUpdated { account, authorized });
    }

    /// Approve or revoke a delegate to initiate on the caller's behalf
    pub fn set_delegate(&mut self, delegate: Address, approved: bool) {
        let account = self.env().caller();
        if self.delegates.get(&(account, delegate)).unwrap_or(false) == approved {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.delegates.set(&(account, delegate), approved);

        self.env().emit_event(FlashLoanDelegateUpdated {
            account,
            delegate,
            approved,
        });
    }

    /// Update fee rate and the protocol's share of it
    pub fn set_fee(&mut self, fee_rate: U256, protocol_fee_share: U256) {
        self.ensure_allowed("set_fee");
        if fee_rate > math::scale() || protocol_fee_share > math::scale() {
            self.env().revert(RiskError::InvalidRiskParams);
        }
        if self.fee_rate.get_or_default() == fee_rate
            && self.protocol_fee_share.get_or_default() == protocol_fee_share
        {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.fee_rate.set(fee_rate);
        self.protocol_fee_share.set(protocol_fee_share);

        self.env().emit_event(FlashLoanFeeUpdated {
            fee_rate,
            protocol_fee_share,
        });
    }

    /// Update the protocol fee collector
    pub fn set_fee_collector(&mut self, collector: Address) {
        self.ensure_allowed("set_fee_collector");
        if self.fee_collector.get() == Some(collector) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.fee_collector.set(collector);
    }

    // ========================================
    // Execution
    // ========================================

    /// Borrow `amounts[i]` of `markets[i]`, hand everything to `receiver`,
    /// and verify repayment of principal plus fee per market afterwards.
    pub fn execute_flash_loan(
        &mut self,
        receiver: Address,
        on_behalf_of: Address,
        markets: Vec<Address>,
        amounts: Vec<U256>,
    ) {
        let initiator = self.env().caller();
        if !self.authorized.get(&initiator).unwrap_or(false)
            && !self.delegates.get(&(on_behalf_of, initiator)).unwrap_or(false)
        {
            self.env().revert(RiskError::SenderNotAuthorizedForFlashLoan);
        }
        if markets.is_empty() || markets.len() != amounts.len() {
            self.env().revert(RiskError::InvalidFlashLoanParams);
        }

        let fee_rate = self.fee_rate.get_or_default();
        let mut fees: Vec<U256> = Vec::new();
        let mut cash_before: Vec<U256> = Vec::new();

        for (market, amount) in markets.iter().zip(amounts.iter()) {
            if !self.market_enabled.get(market).unwrap_or(false) {
                self.env().revert(RiskError::FlashLoanNotEnabled);
            }
            if amount.is_zero() {
                self.env().revert(RiskError::InvalidAmount);
            }
            fees.push(self.checked(Mantissa::mul_scaled(*amount, fee_rate)));

            let mut market_ref = MarketAccountingContractRef::new(self.env(), *market);
            cash_before.push(market_ref.underlying_cash());
            market_ref.flash_transfer_out(receiver, *amount);
        }

        // single callback with every leg funded
        let success = FlashLoanReceiverContractRef::new(self.env(), receiver).execute_operation(
            markets.clone(),
            amounts.clone(),
            fees.clone(),
            initiator,
        );
        if !success {
            self.env().revert(RiskError::ExecuteFlashLoanFailed);
        }

        for i in 0..markets.len() {
            self.settle_flash_leg(markets[i], on_behalf_of, amounts[i], fees[i], cash_before[i]);
        }

        self.env().emit_event(FlashLoanExecuted {
            initiator,
            receiver,
            on_behalf_of,
            markets,
            amounts,
            fees,
        });
    }

    /// Expected fee for borrowing `amount`
    pub fn flash_fee(&self, amount: U256) -> U256 {
        self.checked(Mantissa::mul_scaled(amount, self.fee_rate.get_or_default()))
    }

    // ========================================
    // View Functions
    // ========================================

    pub fn is_flash_loan_enabled(&self, market: Address) -> bool {
        self.market_enabled.get(&market).unwrap_or(false)
    }

    pub fn is_authorized_initiator(&self, account: Address) -> bool {
        self.authorized.get(&account).unwrap_or(false)
    }

    pub fn is_delegate_approved(&self, account: Address, delegate: Address) -> bool {
        self.delegates.get(&(account, delegate)).unwrap_or(false)
    }

    pub fn get_fee_rate(&self) -> U256 {
        self.fee_rate.get_or_default()
    }

    pub fn get_protocol_fee_share(&self) -> U256 {
        self.protocol_fee_share.get_or_default()
    }

    // ========================================
    // Internal
    // ========================================

    /// Verify one leg's repayment and distribute its fee.
    ///
    /// Repayment at or above `principal + fee` is the normal path. Anything
    /// in `[principal, principal + fee)` converts the unpaid fee into a
    /// borrow against `on_behalf_of`, subject to the engine's borrow
    /// decision. Below principal the whole transaction is aborted.
    fn settle_flash_leg(
        &mut self,
        market: Address,
        on_behalf_of: Address,
        amount: U256,
        fee: U256,
        cash_before: U256,
    ) {
        let mut market_ref = MarketAccountingContractRef::new(self.env(), market);
        let cash_after = market_ref.underlying_cash();
        // what actually came back: cash_after - (cash_before - amount)
        let returned = self.checked(
            Mantissa::add(cash_after, amount).and_then(|v| Mantissa::sub(v, cash_before)),
        );
        let owed = self.checked(Mantissa::add(amount, fee));

        if returned < amount {
            self.env().revert(RiskError::InsufficientBalance);
        }
        if returned < owed {
            let unpaid = self.checked(Mantissa::sub(owed, returned));
            let engine_addr = self.engine.get_or_revert_with(RiskError::AccessDenied);
            let code = RiskEngineContractRef::new(self.env(), engine_addr).borrow_allowed(
                market,
                on_behalf_of,
                unpaid,
            );
            if code != RiskCode::NoError {
                self.env().revert(RiskError::InsufficientBalance);
            }
            market_ref.borrow_on_behalf(on_behalf_of, unpaid);
        }

        if !fee.is_zero() {
            let protocol_share =
                self.checked(Mantissa::mul_scaled(fee, self.protocol_fee_share.get_or_default()));
            let reserve_share = self.checked(Mantissa::sub(fee, protocol_share));
            let collector = self
                .fee_collector
                .get_or_revert_with(RiskError::AccessDenied);
            market_ref.route_flash_fee(collector, protocol_share, reserve_share);
        }
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
