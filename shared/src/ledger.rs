//! Stock ledger derivation rules
//!
//! Every quantity on a warehouse ledger row is derived from the same three
//! inputs: the optional pre-system baseline, the active purchase-line events,
//! and the total quantity consumed by active production runs. The functions
//! here express those rules once, with no side effects, so the orchestration
//! services all recalculate identically and the arithmetic can be tested
//! without a database.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A stock-in event that carries a price: one active purchase line, or the
/// baseline seed representing pre-system stock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl PriceEvent {
    pub fn new(quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            quantity,
            unit_price,
        }
    }
}

/// Quantities of a ledger row as they stood before the triggering event.
/// Their difference is the manual delta carried across recalculations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousQuantities {
    pub system_quantity: Decimal,
    pub real_quantity: Decimal,
}

/// Result of one full ledger derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerDerivation {
    pub accumulated_quantity: Decimal,
    pub system_quantity: Decimal,
    pub real_quantity: Decimal,
    pub shrinkage: Decimal,
    pub warehouse_price: Decimal,
    pub stock_value: Decimal,
}

/// Quantity-weighted average unit price over the given events:
/// `sum(quantity * price) / sum(quantity)`, or zero when no quantity was
/// ever received. A per-event mean of unit prices is NOT used; the two rules
/// agree only when every event carries the same quantity.
pub fn warehouse_price(events: &[PriceEvent]) -> Decimal {
    let total_quantity: Decimal = events.iter().map(|e| e.quantity).sum();
    if total_quantity.is_zero() {
        return Decimal::ZERO;
    }
    let total_value: Decimal = events.iter().map(|e| e.quantity * e.unit_price).sum();
    total_value / total_quantity
}

/// The baseline participates in price averaging only when it actually carries
/// stock or a price.
pub fn baseline_event(baseline: Option<PriceEvent>) -> Option<PriceEvent> {
    baseline.filter(|b| !b.quantity.is_zero() || !b.unit_price.is_zero())
}

/// Total quantity ever received: baseline seed plus all active purchases.
pub fn accumulated_quantity(baseline: Option<PriceEvent>, purchases: &[PriceEvent]) -> Decimal {
    let seeded = baseline.map(|b| b.quantity).unwrap_or(Decimal::ZERO);
    seeded + purchases.iter().map(|e| e.quantity).sum::<Decimal>()
}

/// Loss (positive) or surplus (negative) against the physical count.
pub fn shrinkage(system_quantity: Decimal, real_quantity: Decimal) -> Decimal {
    system_quantity - real_quantity
}

/// Stock is valued on the physically available quantity; a negative physical
/// count never produces a negative value.
pub fn stock_value(real_quantity: Decimal, warehouse_price: Decimal) -> Decimal {
    real_quantity.max(Decimal::ZERO) * warehouse_price
}

fn derive_with_real(
    baseline: Option<PriceEvent>,
    purchases: &[PriceEvent],
    consumed: Decimal,
    real_quantity: Decimal,
) -> LedgerDerivation {
    let accumulated = accumulated_quantity(baseline, purchases);
    let system = accumulated - consumed;

    let mut events: Vec<PriceEvent> = Vec::with_capacity(purchases.len() + 1);
    if let Some(seed) = baseline_event(baseline) {
        events.push(seed);
    }
    events.extend_from_slice(purchases);
    let price = warehouse_price(&events);

    LedgerDerivation {
        accumulated_quantity: accumulated,
        system_quantity: system,
        real_quantity,
        shrinkage: shrinkage(system, real_quantity),
        warehouse_price: price,
        stock_value: stock_value(real_quantity, price),
    }
}

/// Full derivation for an automatic recalculation. The manual delta the
/// operator established earlier (`previous.real - previous.system`) is
/// preserved: the new real quantity is the new system quantity plus that
/// delta. A row that does not exist yet carries a zero delta.
pub fn derive(
    baseline: Option<PriceEvent>,
    purchases: &[PriceEvent],
    consumed: Decimal,
    previous: Option<PreviousQuantities>,
) -> LedgerDerivation {
    let manual_delta = previous
        .map(|p| p.real_quantity - p.system_quantity)
        .unwrap_or(Decimal::ZERO);
    let accumulated = accumulated_quantity(baseline, purchases);
    let system = accumulated - consumed;
    derive_with_real(baseline, purchases, consumed, system + manual_delta)
}

/// Derivation for the manual-correction path: the caller-supplied real
/// quantity is taken as-is and thereby redefines the manual delta.
pub fn derive_manual(
    baseline: Option<PriceEvent>,
    purchases: &[PriceEvent],
    consumed: Decimal,
    real_quantity: Decimal,
) -> LedgerDerivation {
    derive_with_real(baseline, purchases, consumed, real_quantity)
}

/// Quantity of one recipe line consumed by a run of `batches` batches.
/// One batch produces the recipe's base weight, so the scale factor reduces
/// to the batch count.
pub fn consumed_quantity(line_quantity: Decimal, batches: Decimal) -> Decimal {
    line_quantity * batches
}

/// Absolute weight produced by a run.
pub fn produced_weight(batches: Decimal, base_weight: Decimal) -> Decimal {
    batches * base_weight
}

/// Cost of one produced weight unit; zero when nothing was produced.
pub fn cost_per_kg(total_cost: Decimal, produced_weight: Decimal) -> Decimal {
    if produced_weight.is_zero() {
        Decimal::ZERO
    } else {
        total_cost / produced_weight
    }
}

/// Share of the recipe's base weight contributed by one line, in percent.
pub fn line_percentage(quantity: Decimal, base_weight: Decimal) -> Decimal {
    if base_weight.is_zero() {
        Decimal::ZERO
    } else {
        quantity / base_weight * Decimal::from(100)
    }
}

/// Percentage delta of a price transition. A step up from a zero price is
/// recorded as a 100% change.
pub fn price_change_percent(previous: Decimal, new: Decimal) -> Decimal {
    if previous.is_zero() {
        if new.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::from(100)
        }
    } else {
        (new - previous) / previous * Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn event(qty: &str, price: &str) -> PriceEvent {
        PriceEvent::new(dec(qty), dec(price))
    }

    #[test]
    fn test_warehouse_price_is_quantity_weighted() {
        // 100 @ 10 and 50 @ 16 -> (1000 + 800) / 150 = 12
        let events = [event("100", "10"), event("50", "16")];
        assert_eq!(warehouse_price(&events), dec("12"));
    }

    #[test]
    fn test_warehouse_price_differs_from_per_event_mean() {
        // 100 @ 10 and 50 @ 18: the per-event mean would be (10+18)/2 = 14;
        // the weighted average is 1900/150
        let events = [event("100", "10"), event("50", "18")];
        assert_eq!(warehouse_price(&events), dec("1900") / dec("150"));
        assert_ne!(warehouse_price(&events), dec("14"));
    }

    #[test]
    fn test_warehouse_price_empty_history_is_zero() {
        assert_eq!(warehouse_price(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_warehouse_price_ignores_zero_quantity_total() {
        let events = [event("0", "25")];
        assert_eq!(warehouse_price(&events), Decimal::ZERO);
    }

    #[test]
    fn test_baseline_event_dropped_when_empty() {
        assert!(baseline_event(Some(event("0", "0"))).is_none());
        assert!(baseline_event(Some(event("10", "0"))).is_some());
        assert!(baseline_event(Some(event("0", "5"))).is_some());
        assert!(baseline_event(None).is_none());
    }

    #[test]
    fn test_accumulated_includes_baseline() {
        let purchases = [event("100", "10"), event("50", "18")];
        assert_eq!(
            accumulated_quantity(Some(event("30", "8")), &purchases),
            dec("180")
        );
        assert_eq!(accumulated_quantity(None, &purchases), dec("150"));
    }

    #[test]
    fn test_derive_without_history() {
        let d = derive(None, &[], Decimal::ZERO, None);
        assert_eq!(d.accumulated_quantity, Decimal::ZERO);
        assert_eq!(d.system_quantity, Decimal::ZERO);
        assert_eq!(d.real_quantity, Decimal::ZERO);
        assert_eq!(d.warehouse_price, Decimal::ZERO);
        assert_eq!(d.stock_value, Decimal::ZERO);
    }

    #[test]
    fn test_derive_preserves_manual_delta() {
        let purchases = [event("120", "10")];
        let previous = PreviousQuantities {
            system_quantity: dec("100"),
            real_quantity: dec("90"),
        };
        let d = derive(None, &purchases, dec("0"), Some(previous));
        assert_eq!(d.system_quantity, dec("120"));
        // delta of -10 carried over
        assert_eq!(d.real_quantity, dec("110"));
        assert_eq!(d.shrinkage, dec("10"));
    }

    #[test]
    fn test_derive_manual_redefines_delta() {
        let purchases = [event("100", "10")];
        let d = derive_manual(None, &purchases, Decimal::ZERO, dec("90"));
        assert_eq!(d.system_quantity, dec("100"));
        assert_eq!(d.real_quantity, dec("90"));
        assert_eq!(d.shrinkage, dec("10"));
        assert_eq!(d.stock_value, dec("900"));
    }

    #[test]
    fn test_stock_value_floors_negative_real_quantity() {
        assert_eq!(stock_value(dec("-5"), dec("12")), Decimal::ZERO);
        assert_eq!(stock_value(dec("5"), dec("12")), dec("60"));
    }

    #[test]
    fn test_shrinkage_can_be_negative_on_surplus() {
        assert_eq!(shrinkage(dec("100"), dec("104")), dec("-4"));
    }

    #[test]
    fn test_consumed_quantity_scales_by_batches() {
        // 250 kg per 1000 kg batch, 3 batches -> 750 kg
        assert_eq!(consumed_quantity(dec("250"), dec("3")), dec("750"));
    }

    #[test]
    fn test_cost_per_kg_zero_weight() {
        assert_eq!(cost_per_kg(dec("500"), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(cost_per_kg(dec("500"), dec("1000")), dec("0.5"));
    }

    #[test]
    fn test_line_percentage() {
        assert_eq!(line_percentage(dec("250"), dec("1000")), dec("25"));
        assert_eq!(line_percentage(dec("250"), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_price_change_percent() {
        assert_eq!(price_change_percent(dec("10"), dec("12")), dec("20"));
        assert_eq!(price_change_percent(dec("10"), dec("8")), dec("-20"));
        assert_eq!(price_change_percent(Decimal::ZERO, dec("8")), dec("100"));
        assert_eq!(price_change_percent(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }
}
