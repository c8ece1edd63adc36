//! Hard-fault errors for the risk engine.
//!
//! These abort the whole action: misconfiguration, malformed input, and
//! authorization faults. Expected business-rule outcomes are reported as
//! `RiskCode` values instead (see `codes.rs`).

use odra::prelude::*;

/// Errors that abort a risk-engine call
#[odra::odra_error]
pub enum RiskError {
    // Access Control
    /// Caller lacks permission for this action
    AccessDenied = 1,
    /// Caller is not authorized for this internal hook
    CallerNotAuthorized = 2,

    // Market Registry
    /// Market is already listed
    AlreadyListed = 10,
    /// Candidate does not implement the market accounting interface
    NotAMarket = 11,
    /// Market must have every action paused before unlisting
    ActionsNotPaused = 12,
    /// Market is not listed
    MarketNotListed = 13,

    // Pool Management
    /// Pool label must not be blank
    EmptyPoolLabel = 20,
    /// Input arrays must have equal length
    ArrayLengthMismatch = 21,
    /// Pool id does not exist
    PoolDoesNotExist = 22,
    /// Operation is not valid for the core pool
    InvalidOperationForCorePool = 23,
    /// Market must be listed in the core pool first
    MarketNotListedInCorePool = 24,
    /// Market already belongs to this pool
    MarketAlreadyListed = 25,
    /// (pool, market) membership does not exist
    PoolMarketNotFound = 26,
    /// Account already selected this pool
    AlreadyInSelectedPool = 27,
    /// Account borrows an asset the destination pool disallows
    IncompatibleBorrowedAssets = 28,
    /// Pool is not active
    PoolNotActive = 29,

    // Parameter Validation
    /// Risk parameters violate factor/threshold/incentive bounds
    InvalidRiskParams = 40,
    /// Setter would not change the stored value
    UnchangedValue = 41,
    /// Price must be nonzero
    InvalidPrice = 42,

    // Rewards
    /// Distributor reward-token balance cannot cover the claim
    InsufficientRewardFloat = 50,

    // Flash Loans
    /// Market does not have flash loans enabled
    FlashLoanNotEnabled = 60,
    /// Caller is not allow-listed for flash loans
    SenderNotAuthorizedForFlashLoan = 61,
    /// Array lengths mismatch or empty request
    InvalidFlashLoanParams = 62,
    /// Flash loan amounts must be nonzero
    InvalidAmount = 63,
    /// Receiver callback reported failure
    ExecuteFlashLoanFailed = 64,
    /// Repayment below required amount
    InsufficientBalance = 65,
}
