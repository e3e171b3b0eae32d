//! Recipe (feed formula) tests
//!
//! Tests for composition validation, line percentages and the cost cascade
//! arithmetic.

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

    /// Line weights summing to the base weight are accepted
    #[test]
    fn test_composition_valid() {
        let weights = vec![dec("600"), dec("250"), dec("150")];
        assert!(validation::validate_recipe_composition(&weights, dec("1000")).is_ok());
    }

    /// Weights summing to 999 instead of 1000 are rejected
    #[test]
    fn test_composition_off_by_one_rejected() {
        let weights = vec![dec("600"), dec("249"), dec("150")];
        assert!(validation::validate_recipe_composition(&weights, dec("1000")).is_err());
    }

    /// Empty recipes and non-positive weights are rejected
    #[test]
    fn test_composition_rejects_degenerate_lines() {
        assert!(validation::validate_recipe_composition(&[], dec("1000")).is_err());
        let weights = vec![dec("1000"), dec("0")];
        assert!(validation::validate_recipe_composition(&weights, dec("1000")).is_err());
        let weights = vec![dec("1100"), dec("-100")];
        assert!(validation::validate_recipe_composition(&weights, dec("1000")).is_err());
    }

    /// Percentages follow the weight share of the base weight
    #[test]
    fn test_line_percentages() {
        assert_eq!(ledger::line_percentage(dec("600"), dec("1000")), dec("60"));
        assert_eq!(ledger::line_percentage(dec("250"), dec("1000")), dec("25"));
        assert_eq!(ledger::line_percentage(dec("150"), dec("1000")), dec("15"));
    }

    /// Line cost is weight times current price; the recipe total is their sum
    #[test]
    fn test_cost_recomputation() {
        let lines = [
            (dec("600"), dec("0.25")),
            (dec("250"), dec("0.48")),
            (dec("150"), dec("0.10")),
        ];

        let total: Decimal = lines.iter().map(|(qty, price)| qty * price).sum();
        // 150 + 120 + 15
        assert_eq!(total, dec("285"));
    }

    /// A price change on one constituent moves the recipe total by the
    /// line weight times the price delta
    #[test]
    fn test_cascade_moves_total_by_weighted_delta() {
        let maize_weight = dec("600");
        let old_price = dec("0.25");
        let new_price = dec("0.30");

        let before = maize_weight * old_price + dec("135");
        let after = maize_weight * new_price + dec("135");

        assert_eq!(after - before, maize_weight * (new_price - old_price));
        assert_eq!(after - before, dec("30"));
    }

    /// Recipe codes follow the same format rule as material codes
    #[test]
    fn test_recipe_code_format() {
        assert!(validation::validate_code("ENGORDE1").is_ok());
        assert!(validation::validate_code("engorde1").is_err());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn weight_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=5000i64).prop_map(Decimal::from)
    }

    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100000i64).prop_map(|n| Decimal::new(n, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A composition validates exactly when its weights sum to the base
        #[test]
        fn prop_composition_iff_sum_matches(
            weights in prop::collection::vec(weight_strategy(), 1..10)
        ) {
            let total: Decimal = weights.iter().sum();

            prop_assert!(validation::validate_recipe_composition(&weights, total).is_ok());
            prop_assert!(
                validation::validate_recipe_composition(&weights, total + Decimal::ONE).is_err()
            );
        }

        /// Percentages of a valid composition sum to 100
        #[test]
        fn prop_percentages_sum_to_hundred(
            weights in prop::collection::vec(weight_strategy(), 1..10)
        ) {
            let base: Decimal = weights.iter().sum();
            let pct_total: Decimal = weights
                .iter()
                .map(|w| ledger::line_percentage(*w, base))
                .sum();

            let difference = (pct_total - Decimal::from(100)).abs();
            prop_assert!(difference < Decimal::new(1, 6));
        }

        /// The recipe total cost is linear in each line's price
        #[test]
        fn prop_total_cost_linear_in_price(
            weights in prop::collection::vec(weight_strategy(), 1..10),
            prices in prop::collection::vec(price_strategy(), 1..10),
            bump in price_strategy()
        ) {
            let len = weights.len().min(prices.len());
            let weights = &weights[..len];
            let prices = &prices[..len];

            let total: Decimal = weights.iter().zip(prices).map(|(w, p)| w * p).sum();

            let mut bumped_prices = prices.to_vec();
            bumped_prices[0] += bump;
            let bumped_total: Decimal =
                weights.iter().zip(&bumped_prices).map(|(w, p)| w * p).sum();

            prop_assert_eq!(bumped_total - total, weights[0] * bump);
        }
    }
}
