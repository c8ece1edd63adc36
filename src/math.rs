//! Fixed-point math for the risk engine.
//! All fractional quantities (collateral factors, liquidation thresholds,
//! incentives, fee rates, reward indices) are 1e18-scaled mantissas.
use odra::casper_types::U256;
use odra::prelude::*;

/// Mantissa scale: 1.0 == 1e18.
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// Starting value for reward accrual indices.
pub const INITIAL_INDEX: u128 = SCALE;

/// Arithmetic faults. Decision math must fail loudly, never wrap.
#[odra::odra_error]
pub enum MathError {
    /// Addition or multiplication overflowed U256
    Overflow = 200,
    /// Subtraction underflowed
    Underflow = 201,
    /// Division by zero
    DivisionByZero = 202,
}

/// One unit in mantissa scale.
pub fn scale() -> U256 {
    U256::from(SCALE)
}

/// Checked U256 operations over 1e18 mantissas.
pub struct Mantissa;

impl Mantissa {
    pub fn add(a: U256, b: U256) -> Result<U256, MathError> {
        a.checked_add(b).ok_or(MathError::Overflow)
    }

    pub fn sub(a: U256, b: U256) -> Result<U256, MathError> {
        a.checked_sub(b).ok_or(MathError::Underflow)
    }

    pub fn mul(a: U256, b: U256) -> Result<U256, MathError> {
        a.checked_mul(b).ok_or(MathError::Overflow)
    }

    pub fn div(a: U256, b: U256) -> Result<U256, MathError> {
        if b.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        Ok(a / b)
    }

    /// `a * mantissa / 1e18`, truncating. Used to apply a fraction to an
    /// amount (collateral factor, fee rate, close factor).
    pub fn mul_scaled(a: U256, mantissa: U256) -> Result<U256, MathError> {
        Ok(Self::mul(a, mantissa)? / scale())
    }

    /// `a * 1e18 / b`, truncating. Used to form a mantissa ratio.
    pub fn div_scaled(a: U256, b: U256) -> Result<U256, MathError> {
        Self::div(Self::mul(a, scale())?, b)
    }

    pub fn min(a: U256, b: U256) -> U256 {
        if a < b {
            a
        } else {
            b
        }
    }
}
