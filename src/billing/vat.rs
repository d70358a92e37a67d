use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::round_money;

/// Net base and VAT for one rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatRateTotal {
    pub rate: Decimal,
    pub base: Decimal,
    pub vat: Decimal,
}

/// Per-rate VAT split of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatBreakdown {
    pub rates: Vec<VatRateTotal>,
    pub net_total: Decimal,
    pub vat_total: Decimal,
    pub gross_total: Decimal,
}

/// VAT due on `base` at `rate` percent, rounded to cents.
pub fn vat_amount(base: Decimal, rate: Decimal) -> Decimal {
    round_money(base * rate / Decimal::ONE_HUNDRED)
}

/// Group `(vat_rate, net_amount)` pairs by rate and compute VAT per rate.
///
/// VAT is computed once on each rate's base, not summed from per-line
/// roundings. Rates are listed in ascending order.
pub fn vat_breakdown<I>(lines: I) -> VatBreakdown
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let mut bases: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for (rate, net) in lines {
        *bases.entry(rate.normalize()).or_insert(Decimal::ZERO) += net;
    }

    let rates: Vec<VatRateTotal> = bases
        .into_iter()
        .map(|(rate, base)| {
            let base = round_money(base);
            VatRateTotal {
                rate,
                base,
                vat: vat_amount(base, rate),
            }
        })
        .collect();

    let net_total = rates.iter().fold(Decimal::ZERO, |acc, r| acc + r.base);
    let vat_total = rates.iter().fold(Decimal::ZERO, |acc, r| acc + r.vat);

    VatBreakdown {
        rates,
        net_total,
        vat_total,
        gross_total: net_total + vat_total,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{vat_amount, vat_breakdown};

    #[test]
    fn vat_amount_rounds_half_up() {
        assert_eq!(vat_amount(dec!(10.25), dec!(20)), dec!(2.05));
        assert_eq!(vat_amount(dec!(0.125), dec!(20)), dec!(0.03));
        assert_eq!(vat_amount(dec!(100), dec!(5.5)), dec!(5.50));
        assert_eq!(vat_amount(dec!(100), Decimal::ZERO), dec!(0));
    }

    #[test]
    fn breakdown_groups_equal_rates_regardless_of_scale() {
        let breakdown = vat_breakdown(vec![
            (dec!(20), dec!(100.00)),
            (dec!(20.00), dec!(50.00)),
            (dec!(5.5), dec!(10.00)),
        ]);

        assert_eq!(breakdown.rates.len(), 2);
        assert_eq!(breakdown.rates[0].rate, dec!(5.5));
        assert_eq!(breakdown.rates[0].vat, dec!(0.55));
        assert_eq!(breakdown.rates[1].base, dec!(150.00));
        assert_eq!(breakdown.rates[1].vat, dec!(30.00));
        assert_eq!(breakdown.net_total, dec!(160.00));
        assert_eq!(breakdown.vat_total, dec!(30.55));
        assert_eq!(breakdown.gross_total, dec!(190.55));
    }

    #[test]
    fn vat_is_computed_on_the_base_not_per_line() {
        // Per-line rounding would give 3 × 0.01 = 0.03; on the base it is 0.02.
        let breakdown = vat_breakdown(vec![
            (dec!(20), dec!(0.03)),
            (dec!(20), dec!(0.03)),
            (dec!(20), dec!(0.03)),
        ]);
        assert_eq!(breakdown.rates[0].base, dec!(0.09));
        assert_eq!(breakdown.vat_total, dec!(0.02));
    }

    #[test]
    fn empty_breakdown_is_zero() {
        let breakdown = vat_breakdown(Vec::new());
        assert!(breakdown.rates.is_empty());
        assert_eq!(breakdown.gross_total, Decimal::ZERO);
    }
}
