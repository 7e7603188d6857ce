//! Exact arithmetic on prices, quantities and balances.
//!
//! `Decimal` silently rounds any result that needs more than 28 significant
//! digits. A rounded reservation no longer matches the fills taken out of
//! it, so amounts entering the exchange are held to [`MAX_DECIMALS`] places
//! and each asset's total supply to [`MAX_SUPPLY`]. Inside those bounds a
//! notional has at most 16 places and every balance stays below `10^12`,
//! which always fits the 96-bit mantissa exactly. The helpers here still
//! refuse a result that was rounded rather than trusting the bounds.

use rust_decimal::Decimal;

/// Decimal places accepted on a price, quantity or transfer amount.
pub const MAX_DECIMALS: u32 = 8;

/// Largest total (available + reserved over every account) an asset may reach.
pub const MAX_SUPPLY: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0); // 10^12

pub fn within_precision(amount: Decimal) -> bool {
    amount.scale() <= MAX_DECIMALS
}

/// `a × b`, or `None` if it overflows or had to be rounded.
pub fn exact_mul(a: Decimal, b: Decimal) -> Option<Decimal> {
    let product = a.checked_mul(b)?;
    (product.is_zero() || product.scale() == a.scale() + b.scale()).then_some(product)
}

/// `a + b`, or `None` if it overflows or had to be rounded.
pub fn exact_add(a: Decimal, b: Decimal) -> Option<Decimal> {
    let sum = a.checked_add(b)?;
    unrounded(a, b, sum)
}

/// `a - b`, or `None` if it overflows or had to be rounded.
pub fn exact_sub(a: Decimal, b: Decimal) -> Option<Decimal> {
    let diff = a.checked_sub(b)?;
    unrounded(a, b, diff)
}

// Adding to zero returns the other operand unchanged; otherwise an exact
// result keeps the larger of the two scales.
fn unrounded(a: Decimal, b: Decimal, result: Decimal) -> Option<Decimal> {
    let exact = a.is_zero()
        || b.is_zero()
        || result.is_zero()
        || result.scale() == a.scale().max(b.scale());
    exact.then_some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn supply_cap_is_ten_to_the_twelfth() {
        assert_eq!(MAX_SUPPLY, Decimal::from(1_000_000_000_000i64));
    }

    #[test]
    fn precision_limit_counts_written_places() {
        assert!(within_precision(dec!(0.00000001)));
        assert!(within_precision(dec!(95)));
        assert!(!within_precision(dec!(0.000000001)));
        assert!(!within_precision(dec!(1.0000000000000000000000000006)));
    }

    #[test]
    fn mul_rejects_rounded_products() {
        assert_eq!(exact_mul(dec!(99), dec!(0.4)), Some(dec!(39.6)));
        assert_eq!(exact_mul(Decimal::ZERO, dec!(1.5)), Some(Decimal::ZERO));
        // 28 significant digits times 9 needs a 29th
        assert_eq!(exact_mul(dec!(1.0000000000000000000000000006), dec!(9)), None);
        assert_eq!(exact_mul(Decimal::MAX, dec!(2)), None);
    }

    #[test]
    fn add_and_sub_reject_overflow_and_rounding() {
        assert_eq!(exact_add(dec!(57.0), dec!(39.6)), Some(dec!(96.6)));
        assert_eq!(exact_add(Decimal::ZERO, dec!(0.0001)), Some(dec!(0.0001)));
        assert_eq!(exact_add(Decimal::MAX, Decimal::ONE), None);
        assert_eq!(exact_add(dec!(10000000000000000000000000000), dec!(0.1)), None);
        assert_eq!(exact_sub(dec!(100), dec!(96.6)), Some(dec!(3.4)));
        assert_eq!(exact_sub(dec!(1), dec!(1)), Some(Decimal::ZERO));
    }
}
