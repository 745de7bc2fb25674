//! Order intake: turns order lines into individual coils.
//!
//! A product code such as `HRC/2.0/1200` carries the coil length (in cm) in
//! its third `/`-separated segment. A coil weighs `length × 1.15` kg, and an
//! order of `order_weight` kg is split into `round(order_weight / unit_weight)`
//! coils of that product.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::model::{Item, ItemId, ValidationError};
use crate::types::COIL_WEIGHT_PER_LENGTH;

/// One line of a customer order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    /// Product code, length in the third segment (e.g. `HRC/2.0/1200`).
    pub product_code: String,
    /// Ordered tonnage in kg.
    pub order_weight: f64,
}

impl OrderLine {
    #[allow(dead_code)]
    pub fn new(product_code: impl Into<String>, order_weight: f64) -> Self {
        Self {
            product_code: product_code.into(),
            order_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntakeError {
    #[error("product code '{0}' has no length segment")]
    MissingLength(String),
    #[error("product code '{code}' has an invalid length segment '{segment}'")]
    InvalidLength { code: String, segment: String },
    #[error("order for '{code}' has an invalid weight {weight}")]
    InvalidOrderWeight { code: String, weight: f64 },
    #[error("order for '{code}' exceeds the limit of {limit} coils per request")]
    TooManyItems { code: String, limit: usize },
    #[error(transparent)]
    Item(#[from] ValidationError),
}

/// Extracts the coil length from a product code.
pub fn length_from_product_code(code: &str) -> Result<f64, IntakeError> {
    let segment = code
        .split('/')
        .nth(2)
        .ok_or_else(|| IntakeError::MissingLength(code.to_string()))?;
    let invalid = || IntakeError::InvalidLength {
        code: code.to_string(),
        segment: segment.to_string(),
    };
    let length: i64 = segment.trim().parse().map_err(|_| invalid())?;
    if length <= 0 {
        return Err(invalid());
    }
    Ok(length as f64)
}

/// Weight of one coil of the given length.
#[inline]
pub fn unit_weight(length: f64) -> f64 {
    length * COIL_WEIGHT_PER_LENGTH
}

/// Number of coils an order is split into. Ties round to even.
pub fn unit_count(order_weight: f64, unit_weight: f64) -> usize {
    rounded_units(order_weight, unit_weight) as usize
}

fn rounded_units(order_weight: f64, unit_weight: f64) -> f64 {
    (order_weight / unit_weight).round_ties_even()
}

/// Expands order lines into coils with sequential ids.
///
/// Lines that round to zero coils contribute nothing. All lines are checked,
/// and the total coil count is held to `max_items`, before any coil is
/// created.
pub fn expand_orders(orders: &[OrderLine], max_items: usize) -> Result<Vec<Item>, IntakeError> {
    let mut lines = Vec::with_capacity(orders.len());
    let mut total = 0usize;
    for line in orders {
        if !line.order_weight.is_finite() || line.order_weight < 0.0 {
            return Err(IntakeError::InvalidOrderWeight {
                code: line.product_code.clone(),
                weight: line.order_weight,
            });
        }
        let length = length_from_product_code(&line.product_code)?;
        let weight = unit_weight(length);
        let units = rounded_units(line.order_weight, weight);
        if units > (max_items - total) as f64 {
            return Err(IntakeError::TooManyItems {
                code: line.product_code.clone(),
                limit: max_items,
            });
        }
        let units = units as usize;
        total += units;
        lines.push((line.product_code.as_str(), length, weight, units));
    }

    let mut items = Vec::with_capacity(total);
    for (code, length, weight, units) in lines {
        for _ in 0..units {
            items.push(Item::new(ItemId(items.len()), code, length, weight)?);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_length_segment() {
        assert_eq!(length_from_product_code("HRC/2.0/1200").unwrap(), 1200.0);
        assert_eq!(length_from_product_code("CRC/0.8/950/B").unwrap(), 950.0);
    }

    #[test]
    fn rejects_malformed_codes() {
        assert_eq!(
            length_from_product_code("HRC/2.0"),
            Err(IntakeError::MissingLength("HRC/2.0".to_string()))
        );
        assert!(matches!(
            length_from_product_code("HRC/2.0/wide"),
            Err(IntakeError::InvalidLength { .. })
        ));
        assert!(matches!(
            length_from_product_code("HRC/2.0/0"),
            Err(IntakeError::InvalidLength { .. })
        ));
    }

    #[test]
    fn rounds_unit_count_half_to_even() {
        let weight = unit_weight(1000.0);
        assert!((weight - 1150.0).abs() < 1e-9);
        assert_eq!(unit_count(1150.0 * 2.5, 1150.0), 2);
        assert_eq!(unit_count(1150.0 * 3.5, 1150.0), 4);
        assert_eq!(unit_count(1150.0 * 2.4, 1150.0), 2);
        assert_eq!(unit_count(400.0, 1150.0), 0);
    }

    #[test]
    fn expands_orders_with_sequential_ids() {
        let orders = vec![
            OrderLine::new("HRC/2.0/1000", 2300.0),
            OrderLine::new("HRC/2.0/1400", 100.0),
            OrderLine::new("HRC/3.0/1200", 4140.0),
        ];
        let items = expand_orders(&orders, 100).unwrap();

        let ids: Vec<usize> = items.iter().map(|item| item.id().0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(items[0].product_id(), "HRC/2.0/1000");
        assert!(items[0].is_top_eligible());
        assert_eq!(items[2].product_id(), "HRC/3.0/1200");
        assert!((items[4].weight() - 1380.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_negative_order_weight() {
        let orders = vec![OrderLine::new("HRC/2.0/1000", -5.0)];
        assert!(matches!(
            expand_orders(&orders, 100),
            Err(IntakeError::InvalidOrderWeight { .. })
        ));
    }

    #[test]
    fn rejects_orders_beyond_the_coil_limit() {
        assert_eq!(unit_count(1150.0 * 3.0, 1150.0), 3);
        let huge = vec![OrderLine::new("HRC/2.0/1000", 1e300)];
        assert_eq!(
            expand_orders(&huge, 10_000),
            Err(IntakeError::TooManyItems {
                code: "HRC/2.0/1000".to_string(),
                limit: 10_000,
            })
        );

        let orders = vec![
            OrderLine::new("HRC/2.0/1000", 1150.0 * 3.0),
            OrderLine::new("HRC/2.0/1200", 1380.0 * 2.0),
        ];
        assert_eq!(expand_orders(&orders, 5).unwrap().len(), 5);
        assert!(matches!(
            expand_orders(&orders, 4),
            Err(IntakeError::TooManyItems { ref code, limit: 4 }) if code == "HRC/2.0/1200"
        ));
    }
}
