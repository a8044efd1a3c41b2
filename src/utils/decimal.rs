//! Decimal arithmetic utilities for order prices.

use rust_decimal::Decimal;

/// Round down to a price step (e.g. 0.00001 for DOGEUSD).
///
/// A zero or negative step leaves the value unchanged.
pub fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}
