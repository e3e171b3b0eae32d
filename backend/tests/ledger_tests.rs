//! Stock ledger derivation tests
//!
//! Covers the derived quantities of a warehouse ledger row:
//! - accumulated / system / real quantity algebra
//! - quantity-weighted warehouse price
//! - manual delta preservation across recalculations
//! - idempotence of recalculation

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::ledger::{self, PreviousQuantities, PriceEvent};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn event(qty: &str, price: &str) -> PriceEvent {
    PriceEvent::new(dec(qty), dec(price))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Two purchases, no baseline: 100 @ 10 then 50 @ 16
    #[test]
    fn test_two_purchases_no_baseline() {
        let purchases = [event("100", "10"), event("50", "16")];
        let d = ledger::derive(None, &purchases, Decimal::ZERO, None);

        assert_eq!(d.accumulated_quantity, dec("150"));
        assert_eq!(d.system_quantity, dec("150"));
        assert_eq!(d.real_quantity, dec("150"));
        // (100*10 + 50*16) / 150 = 12, quantity-weighted
        assert_eq!(d.warehouse_price, dec("12"));
        assert_eq!(d.stock_value, dec("1800"));
        assert_eq!(d.shrinkage, Decimal::ZERO);
    }

    /// A production run consuming 50 units drops system and real together
    /// while the manual delta is zero
    #[test]
    fn test_consumption_moves_system_and_real() {
        let purchases = [event("100", "10"), event("50", "16")];
        let initial = ledger::derive(None, &purchases, Decimal::ZERO, None);

        let after = ledger::derive(
            None,
            &purchases,
            dec("50"),
            Some(PreviousQuantities {
                system_quantity: initial.system_quantity,
                real_quantity: initial.real_quantity,
            }),
        );

        assert_eq!(after.system_quantity, dec("100"));
        assert_eq!(after.real_quantity, dec("100"));
        assert_eq!(after.shrinkage, Decimal::ZERO);
        // the price only depends on the purchase history
        assert_eq!(after.warehouse_price, dec("12"));
    }

    /// Removing the consumption again restores the previous row exactly
    #[test]
    fn test_delete_restores_previous_values() {
        let purchases = [event("100", "10"), event("50", "18")];
        let initial = ledger::derive(None, &purchases, Decimal::ZERO, None);

        let consumed = ledger::derive(
            None,
            &purchases,
            dec("50"),
            Some(PreviousQuantities {
                system_quantity: initial.system_quantity,
                real_quantity: initial.real_quantity,
            }),
        );

        let restored = ledger::derive(
            None,
            &purchases,
            Decimal::ZERO,
            Some(PreviousQuantities {
                system_quantity: consumed.system_quantity,
                real_quantity: consumed.real_quantity,
            }),
        );

        assert_eq!(restored, initial);
    }

    /// A manual correction to 90 at system 100 establishes a delta of -10;
    /// a later purchase of 20 raises system to 120 and real to 110
    #[test]
    fn test_manual_delta_survives_later_purchase() {
        let purchases = [event("100", "10")];
        let manual = ledger::derive_manual(None, &purchases, Decimal::ZERO, dec("90"));
        assert_eq!(manual.system_quantity, dec("100"));
        assert_eq!(manual.real_quantity, dec("90"));
        assert_eq!(manual.shrinkage, dec("10"));

        let purchases = [event("100", "10"), event("20", "10")];
        let after = ledger::derive(
            None,
            &purchases,
            Decimal::ZERO,
            Some(PreviousQuantities {
                system_quantity: manual.system_quantity,
                real_quantity: manual.real_quantity,
            }),
        );

        assert_eq!(after.system_quantity, dec("120"));
        assert_eq!(after.real_quantity, dec("110"));
        assert_eq!(after.shrinkage, dec("10"));
    }

    /// Recalculating with unchanged inputs yields an identical derivation
    #[test]
    fn test_recalculation_is_idempotent() {
        let baseline = Some(event("30", "8"));
        let purchases = [event("100", "10"), event("50", "18")];

        let first = ledger::derive(baseline, &purchases, dec("40"), None);
        let second = ledger::derive(
            baseline,
            &purchases,
            dec("40"),
            Some(PreviousQuantities {
                system_quantity: first.system_quantity,
                real_quantity: first.real_quantity,
            }),
        );

        assert_eq!(first, second);
    }

    /// The baseline seed counts as one more price event
    #[test]
    fn test_baseline_participates_in_average() {
        let baseline = Some(event("50", "10"));
        let purchases = [event("50", "20")];
        let d = ledger::derive(baseline, &purchases, Decimal::ZERO, None);

        assert_eq!(d.accumulated_quantity, dec("100"));
        // (50*10 + 50*20) / 100 = 15
        assert_eq!(d.warehouse_price, dec("15"));
    }

    /// An empty baseline row contributes neither quantity nor price
    #[test]
    fn test_empty_baseline_is_ignored() {
        let baseline = Some(event("0", "0"));
        let purchases = [event("100", "10")];
        let d = ledger::derive(baseline, &purchases, Decimal::ZERO, None);

        assert_eq!(d.accumulated_quantity, dec("100"));
        assert_eq!(d.warehouse_price, dec("10"));
    }

    /// Over-consumption drives system and real negative but never the value
    #[test]
    fn test_negative_real_quantity_has_zero_value() {
        let purchases = [event("10", "10")];
        let d = ledger::derive(None, &purchases, dec("25"), None);

        assert_eq!(d.system_quantity, dec("-15"));
        assert_eq!(d.real_quantity, dec("-15"));
        assert_eq!(d.stock_value, Decimal::ZERO);
    }

    /// A physical surplus shows up as negative shrinkage
    #[test]
    fn test_surplus_is_negative_shrinkage() {
        let purchases = [event("100", "10")];
        let d = ledger::derive_manual(None, &purchases, Decimal::ZERO, dec("104"));

        assert_eq!(d.shrinkage, dec("-4"));
        assert_eq!(d.stock_value, dec("1040"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for generating valid quantities (positive decimals)
    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10000i64).prop_map(|n| Decimal::new(n, 1)) // 0.1 to 1000.0
    }

    /// Strategy for generating valid unit prices
    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100000i64).prop_map(|n| Decimal::new(n, 2)) // 0.01 to 1000.00
    }

    fn event_strategy() -> impl Strategy<Value = PriceEvent> {
        (quantity_strategy(), price_strategy())
            .prop_map(|(quantity, unit_price)| PriceEvent::new(quantity, unit_price))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Accumulated quantity equals baseline plus the purchase quantities
        #[test]
        fn prop_accumulated_is_baseline_plus_purchases(
            baseline in event_strategy(),
            purchases in prop::collection::vec(event_strategy(), 0..10)
        ) {
            let expected = baseline.quantity
                + purchases.iter().map(|e| e.quantity).sum::<Decimal>();
            let d = ledger::derive(Some(baseline), &purchases, Decimal::ZERO, None);

            prop_assert_eq!(d.accumulated_quantity, expected);
        }

        /// System quantity is accumulated minus consumption
        #[test]
        fn prop_system_is_accumulated_minus_consumed(
            purchases in prop::collection::vec(event_strategy(), 1..10),
            consumed in quantity_strategy()
        ) {
            let d = ledger::derive(None, &purchases, consumed, None);
            prop_assert_eq!(d.system_quantity, d.accumulated_quantity - consumed);
        }

        /// The warehouse price stays between the cheapest and the most
        /// expensive purchase
        #[test]
        fn prop_warehouse_price_bounded(
            purchases in prop::collection::vec(event_strategy(), 1..10)
        ) {
            let d = ledger::derive(None, &purchases, Decimal::ZERO, None);

            let min_price = purchases.iter().map(|e| e.unit_price).min().unwrap();
            let max_price = purchases.iter().map(|e| e.unit_price).max().unwrap();

            prop_assert!(d.warehouse_price >= min_price);
            prop_assert!(d.warehouse_price <= max_price);
        }

        /// Whatever the new system quantity, the manual delta is carried
        /// over exactly
        #[test]
        fn prop_manual_delta_preserved(
            purchases in prop::collection::vec(event_strategy(), 1..10),
            consumed in quantity_strategy(),
            prev_system in quantity_strategy(),
            delta in -1000i64..1000i64
        ) {
            let delta = Decimal::from(delta);
            let previous = PreviousQuantities {
                system_quantity: prev_system,
                real_quantity: prev_system + delta,
            };
            let d = ledger::derive(None, &purchases, consumed, Some(previous));

            prop_assert_eq!(d.real_quantity - d.system_quantity, delta);
        }

        /// Shrinkage is always system minus real
        #[test]
        fn prop_shrinkage_algebra(
            purchases in prop::collection::vec(event_strategy(), 1..10),
            real in quantity_strategy()
        ) {
            let d = ledger::derive_manual(None, &purchases, Decimal::ZERO, real);
            prop_assert_eq!(d.shrinkage, d.system_quantity - d.real_quantity);
        }

        /// Stock value is never negative
        #[test]
        fn prop_stock_value_non_negative(
            purchases in prop::collection::vec(event_strategy(), 1..10),
            consumed in quantity_strategy()
        ) {
            let d = ledger::derive(None, &purchases, consumed, None);
            prop_assert!(d.stock_value >= Decimal::ZERO);
        }

        /// Deriving twice with unchanged inputs changes nothing
        #[test]
        fn prop_idempotent_recalculation(
            baseline in event_strategy(),
            purchases in prop::collection::vec(event_strategy(), 0..10),
            consumed in quantity_strategy()
        ) {
            let first = ledger::derive(Some(baseline), &purchases, consumed, None);
            let second = ledger::derive(
                Some(baseline),
                &purchases,
                consumed,
                Some(PreviousQuantities {
                    system_quantity: first.system_quantity,
                    real_quantity: first.real_quantity,
                }),
            );

            prop_assert_eq!(first, second);
        }
    }
}
