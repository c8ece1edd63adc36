//! Business-rule result codes.
//!
//! Every market-facing hook returns one of these instead of reverting, so
//! the calling market module can react (refuse the mint, surface the cap)
//! without unwinding its own call. Hard faults revert with `RiskError`.

use odra::prelude::*;

/// Outcome of a risk decision
#[odra::odra_type]
pub enum RiskCode {
    /// Action is allowed
    NoError = 0,
    /// Market is not listed
    MarketNotListed = 1,
    /// Action is paused for this market
    ActionPaused = 2,
    /// A required oracle price is unavailable or zero
    PriceError = 3,
    /// Action would leave the account undercollateralized
    InsufficientLiquidity = 4,
    /// Mint would exceed the market supply cap
    SupplyCapReached = 5,
    /// Borrow would exceed the market borrow cap
    BorrowCapReached = 6,
    /// Borrowing this market is disallowed in the account's pool
    BorrowNotAllowed = 7,
    /// Account has no shortfall to liquidate
    InsufficientShortfall = 8,
    /// Repay amount exceeds what liquidation permits
    TooMuchRepay = 9,
    /// Account still has an outstanding borrow in this market
    NonzeroBorrowBalance = 10,
}

impl RiskCode {
    pub fn is_ok(&self) -> bool {
        *self == RiskCode::NoError
    }
}
