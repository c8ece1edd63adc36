//! Accounting interface of a listed market.
//!
//! The engine never mutates market ledgers directly; it reads balances and
//! rates through this interface and returns allow/deny decisions that the
//! market enforces itself. The flash-loan entry points are invoked only by
//! the coordinator.

use odra::casper_types::U256;
use odra::prelude::*;

/// External interface every listed market must implement
#[odra::external_contract]
pub trait MarketAccounting {
    /// Total share supply of the market
    fn total_supply(&self) -> U256;
    /// Total outstanding borrows, in underlying units
    fn total_borrows(&self) -> U256;
    /// Stored underlying-per-share exchange rate (1e18 scale)
    fn exchange_rate_stored(&self) -> U256;
    /// Share balance of an account
    fn balance_of(&self, account: Address) -> U256;
    /// Stored borrow balance of an account, in underlying units
    fn borrow_balance_stored(&self, account: Address) -> U256;
    /// Market interest index
    fn borrow_index(&self) -> U256;
    /// Capability probe checked at listing time
    fn is_lending_market(&self) -> bool;
    /// Idle underlying held by the market
    fn underlying_cash(&self) -> U256;
    /// Send underlying to a flash-loan receiver
    fn flash_transfer_out(&mut self, receiver: Address, amount: U256);
    /// Book a borrow against an account without transferring underlying
    fn borrow_on_behalf(&mut self, account: Address, amount: U256);
    /// Split a collected flash fee between the protocol collector and reserves
    fn route_flash_fee(&mut self, collector: Address, protocol_share: U256, reserve_share: U256);
}
