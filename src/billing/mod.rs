//! Billing arithmetic and the invoice workflow.
//!
//! Money is always `Decimal`, rounded to cents half away from zero at the
//! points where an amount becomes visible (a line, a VAT total, a payment).

pub mod invoice;
pub mod rates;
pub mod vat;

use rust_decimal::{Decimal, RoundingStrategy};

pub use rates::{RateBook, RateSource, resolve_hourly_rate, resolve_vat_rate};
pub use vat::{VatBreakdown, VatRateTotal, vat_amount, vat_breakdown};

/// Round a monetary amount to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Fee for `minutes` at an hourly `rate`, rounded to cents.
pub fn amount_for_minutes(minutes: i64, rate: Decimal) -> Decimal {
    round_money(Decimal::from(minutes) * rate / Decimal::from(60))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{amount_for_minutes, round_money};

    #[test]
    fn round_money_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn amount_for_minutes_prorates_hourly_rate() {
        assert_eq!(amount_for_minutes(60, dec!(250)), dec!(250.00));
        assert_eq!(amount_for_minutes(6, dec!(250)), dec!(25.00));
        assert_eq!(amount_for_minutes(10, dec!(185)), dec!(30.83));
        assert_eq!(amount_for_minutes(0, dec!(185)), dec!(0));
    }
}
