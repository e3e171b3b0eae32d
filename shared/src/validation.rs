//! Validation rules for the Farm Feed Management Platform
//!
//! Pure checks shared by the orchestration services; the services wrap the
//! failures into bilingual application errors.

use rust_decimal::Decimal;

// ============================================================================
// Quantity and money validations
// ============================================================================

/// Quantities entering the system (purchase lines, produced batches) must be
/// strictly positive.
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// A physically counted quantity may be zero but never negative.
pub fn validate_non_negative_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    Ok(())
}

pub fn validate_non_negative_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Price cannot be negative");
    }
    Ok(())
}

/// A purchase line's subtotal must equal quantity times unit price exactly.
pub fn validate_line_subtotal(
    quantity: Decimal,
    unit_price: Decimal,
    subtotal: Decimal,
) -> Result<(), &'static str> {
    if quantity * unit_price != subtotal {
        return Err("Line subtotal does not equal quantity times unit price");
    }
    Ok(())
}

// ============================================================================
// Recipe validations
// ============================================================================

/// A recipe's line weights must be positive and sum exactly to its base
/// weight (one batch).
pub fn validate_recipe_composition(
    line_weights: &[Decimal],
    base_weight: Decimal,
) -> Result<(), &'static str> {
    if line_weights.is_empty() {
        return Err("Recipe requires at least one line");
    }
    for w in line_weights {
        if *w <= Decimal::ZERO {
            return Err("Recipe line weights must be positive");
        }
    }
    let total: Decimal = line_weights.iter().sum();
    if total != base_weight {
        return Err("Recipe line weights must sum to the recipe base weight");
    }
    Ok(())
}

// ============================================================================
// Code and reference validations
// ============================================================================

/// Raw-material and recipe codes are 3-10 uppercase alphanumeric characters,
/// unique per farm.
pub fn validate_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 3 {
        return Err("Code must be at least 3 characters");
    }
    if code.len() > 10 {
        return Err("Code must be at most 10 characters");
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("Code must be uppercase alphanumeric only");
    }
    Ok(())
}

pub fn validate_invoice_number(invoice_number: &str) -> Result<(), &'static str> {
    if invoice_number.trim().is_empty() {
        return Err("Invoice number cannot be empty");
    }
    if invoice_number.len() > 40 {
        return Err("Invoice number must be at most 40 characters");
    }
    Ok(())
}
