//! Production orchestration tests
//!
//! Tests for consumption scaling, run costing and the informational
//! under-stock flag.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::ledger;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// One recipe line scaled for a run, as the orchestrator computes it
fn plan_line(
    quantity_kg: Decimal,
    current_price: Decimal,
    batches: Decimal,
) -> (Decimal, Decimal) {
    let consumed = ledger::consumed_quantity(quantity_kg, batches);
    (consumed, consumed * current_price)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// One batch of a 1000 kg recipe consumes exactly the line weights
    #[test]
    fn test_single_batch_consumes_line_weights() {
        let (consumed, cost) = plan_line(dec("600"), dec("0.25"), dec("1"));
        assert_eq!(consumed, dec("600"));
        assert_eq!(cost, dec("150"));
    }

    /// Fractional batch counts scale linearly
    #[test]
    fn test_fractional_batches_scale_linearly() {
        let (consumed, _) = plan_line(dec("250"), dec("0.4"), dec("2.5"));
        assert_eq!(consumed, dec("625"));
    }

    /// Run cost is the sum of the scaled line costs, and the cost per kg
    /// divides by the produced weight
    #[test]
    fn test_run_costing() {
        let batches = dec("2");
        let base_weight = dec("1000");
        let lines = [
            (dec("600"), dec("0.25")), // maize
            (dec("250"), dec("0.48")), // soy meal
            (dec("150"), dec("0.10")), // bran
        ];

        let mut total = Decimal::ZERO;
        for (quantity_kg, price) in lines {
            let (_, cost) = plan_line(quantity_kg, price, batches);
            total += cost;
        }

        // 2 * (150 + 120 + 15) = 570
        assert_eq!(total, dec("570"));

        let produced = ledger::produced_weight(batches, base_weight);
        assert_eq!(produced, dec("2000"));
        assert_eq!(ledger::cost_per_kg(total, produced), dec("0.285"));
    }

    /// Zero produced weight never divides
    #[test]
    fn test_cost_per_kg_zero_weight() {
        assert_eq!(ledger::cost_per_kg(dec("570"), Decimal::ZERO), Decimal::ZERO);
    }

    /// The under-stock flag trips when any line consumes more than the
    /// physically available quantity; it is informational and per run
    #[test]
    fn test_under_stock_flag() {
        let available = [dec("1000"), dec("400")];
        let consumed = [dec("600"), dec("500")];

        let under_stock = consumed
            .iter()
            .zip(available.iter())
            .any(|(c, a)| c > a);
        assert!(under_stock);

        let consumed_ok = [dec("600"), dec("400")];
        let under_stock = consumed_ok
            .iter()
            .zip(available.iter())
            .any(|(c, a)| c > a);
        assert!(!under_stock);
    }

    /// A material with no ledger row counts as zero availability
    #[test]
    fn test_missing_ledger_row_is_zero_availability() {
        let available: Option<Decimal> = None;
        let available = available.unwrap_or(Decimal::ZERO);
        assert!(dec("0.1") > available);
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

        /// Total run cost equals the sum of consumed quantity times price
        #[test]
        fn prop_total_cost_is_sum_of_line_costs(
            lines in prop::collection::vec((quantity_strategy(), price_strategy()), 1..10),
            batches in quantity_strategy()
        ) {
            let mut total = Decimal::ZERO;
            for (quantity_kg, price) in &lines {
                let (consumed, cost) = plan_line(*quantity_kg, *price, batches);
                prop_assert_eq!(cost, consumed * *price);
                total += cost;
            }

            let expected: Decimal = lines
                .iter()
                .map(|(q, p)| *q * batches * *p)
                .sum();
            prop_assert_eq!(total, expected);
        }

        /// Consumption scales linearly in the batch count
        #[test]
        fn prop_consumption_linear_in_batches(
            quantity_kg in quantity_strategy(),
            batches in quantity_strategy()
        ) {
            let single = ledger::consumed_quantity(quantity_kg, Decimal::ONE);
            let scaled = ledger::consumed_quantity(quantity_kg, batches);
            prop_assert_eq!(scaled, single * batches);
        }

        /// Cost per kg times produced weight reproduces the total cost,
        /// up to decimal rounding of the division
        #[test]
        fn prop_cost_per_kg_roundtrip(
            total in price_strategy(),
            batches in quantity_strategy()
        ) {
            let produced = ledger::produced_weight(batches, Decimal::from(1000));
            let per_kg = ledger::cost_per_kg(total, produced);
            let difference = (per_kg * produced - total).abs();
            prop_assert!(difference < Decimal::new(1, 6));
        }
    }
}
