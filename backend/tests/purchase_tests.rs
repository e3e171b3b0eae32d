//! Purchase orchestration tests
//!
//! Tests for the pure rules behind purchase recording: line subtotal
//! validation, header totals, price transition percentages and the
//! last-write-wins price sequencing across a purchase's lines.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::ledger;
use shared::validation;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Subtotal must equal quantity times unit price exactly
    #[test]
    fn test_line_subtotal_validation() {
        assert!(validation::validate_line_subtotal(dec("100"), dec("10"), dec("1000")).is_ok());
        assert!(validation::validate_line_subtotal(dec("100"), dec("10"), dec("1000.01")).is_err());
        assert!(validation::validate_line_subtotal(dec("2.5"), dec("4"), dec("10")).is_ok());
    }

    /// The header total is the sum of the line subtotals
    #[test]
    fn test_header_total_is_sum_of_subtotals() {
        let subtotals = [dec("1000"), dec("900"), dec("137.50")];
        let total: Decimal = subtotals.iter().copied().sum();
        assert_eq!(total, dec("2037.50"));
    }

    /// Price transition percentages, including the zero-price step
    #[test]
    fn test_price_change_percentages() {
        assert_eq!(ledger::price_change_percent(dec("10"), dec("11")), dec("10"));
        assert_eq!(ledger::price_change_percent(dec("20"), dec("15")), dec("-25"));
        assert_eq!(ledger::price_change_percent(dec("0"), dec("15")), dec("100"));
        assert_eq!(ledger::price_change_percent(dec("0"), dec("0")), dec("0"));
    }

    /// Lines are applied in order: for a material purchased twice on one
    /// invoice, the second line's previous price is the first line's unit
    /// price and the last line wins the current price
    #[test]
    fn test_last_write_wins_price_sequencing() {
        let starting_price = dec("10");
        let line_prices = [dec("12"), dec("11")];

        let mut current = starting_price;
        let mut recorded_previous = Vec::new();
        for price in line_prices {
            recorded_previous.push(current);
            current = price;
        }

        assert_eq!(recorded_previous, vec![dec("10"), dec("12")]);
        assert_eq!(current, dec("11"));
    }

    /// Invoice numbers are required and bounded
    #[test]
    fn test_invoice_number_validation() {
        assert!(validation::validate_invoice_number("A-2025-0042").is_ok());
        assert!(validation::validate_invoice_number("").is_err());
        assert!(validation::validate_invoice_number("  ").is_err());
    }

    /// After removing a material's newest line, the price falls back to the
    /// most recent remaining purchase, then the baseline
    #[test]
    fn test_price_fallback_selection() {
        // remaining purchase history, newest first
        let remaining = [dec("13"), dec("12")];
        let baseline_price = Some(dec("9"));

        let fallback = remaining.first().copied().or(baseline_price);
        assert_eq!(fallback, Some(dec("13")));

        let none_remaining: [Decimal; 0] = [];
        let fallback = none_remaining.first().copied().or(baseline_price);
        assert_eq!(fallback, Some(dec("9")));

        let fallback = none_remaining.first().copied().or(None);
        assert_eq!(fallback, None);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10000i64).prop_map(|n| Decimal::new(n, 1))
    }

    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100000i64).prop_map(|n| Decimal::new(n, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A subtotal computed as quantity times price always validates
        #[test]
        fn prop_consistent_subtotal_validates(
            quantity in quantity_strategy(),
            unit_price in price_strategy()
        ) {
            let subtotal = quantity * unit_price;
            prop_assert!(
                validation::validate_line_subtotal(quantity, unit_price, subtotal).is_ok()
            );
        }

        /// A perturbed subtotal never validates
        #[test]
        fn prop_perturbed_subtotal_rejected(
            quantity in quantity_strategy(),
            unit_price in price_strategy(),
            off in 1i64..1000i64
        ) {
            let subtotal = quantity * unit_price + Decimal::new(off, 2);
            prop_assert!(
                validation::validate_line_subtotal(quantity, unit_price, subtotal).is_err()
            );
        }

        /// The percentage delta applied to the previous price reproduces the
        /// new price, up to decimal rounding of the division
        #[test]
        fn prop_price_change_percent_roundtrip(
            previous in price_strategy(),
            new in price_strategy()
        ) {
            let pct = ledger::price_change_percent(previous, new);
            let reconstructed = previous + previous * pct / Decimal::from(100);
            let difference = (reconstructed - new).abs();
            prop_assert!(difference < Decimal::new(1, 6));
        }

        /// Applying lines in sequence always leaves the last line's price as
        /// the current price
        #[test]
        fn prop_last_line_wins(
            starting in price_strategy(),
            line_prices in prop::collection::vec(price_strategy(), 1..10)
        ) {
            let mut current = starting;
            for price in &line_prices {
                current = *price;
            }
            prop_assert_eq!(current, *line_prices.last().unwrap());
        }
    }
}
