//! Per-product summary of a planning run.

use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::PackingResult;
use crate::intake::{OrderLine, length_from_product_code, unit_count, unit_weight};

/// What was ordered, planned and left over for one product code.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ProductSummary {
    pub product_code: String,
    /// Ordered tonnage in kg.
    pub requested_weight: f64,
    /// Coils the order was split into.
    pub requested_units: usize,
    pub planned_units: usize,
    pub planned_weight: f64,
    /// `requested_weight - planned_weight`; negative when rounding produced
    /// more coil weight than was ordered.
    pub remaining_weight: f64,
    pub leftover_units: usize,
}

/// Summary over all products of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct PlanSummary {
    /// Products in order of first appearance.
    pub products: Vec<ProductSummary>,
    pub container_count: usize,
    pub planned_weight: f64,
    pub leftover_weight: f64,
}

impl PlanSummary {
    /// Builds the summary for the given orders and result.
    ///
    /// Order lines sharing a product code are merged.
    pub fn from_result(orders: &[OrderLine], result: &PackingResult) -> Self {
        let mut products: Vec<ProductSummary> = Vec::new();

        for line in orders {
            let units = length_from_product_code(&line.product_code)
                .map(|length| unit_count(line.order_weight, unit_weight(length)))
                .unwrap_or(0);
            match products
                .iter_mut()
                .find(|p| p.product_code == line.product_code)
            {
                Some(product) => {
                    product.requested_weight += line.order_weight;
                    product.requested_units += units;
                }
                None => products.push(ProductSummary {
                    product_code: line.product_code.clone(),
                    requested_weight: line.order_weight,
                    requested_units: units,
                    planned_units: 0,
                    planned_weight: 0.0,
                    remaining_weight: 0.0,
                    leftover_units: 0,
                }),
            }
        }

        for container in &result.containers {
            for (_, item) in container.items() {
                if let Some(product) = products
                    .iter_mut()
                    .find(|p| p.product_code == item.product_id())
                {
                    product.planned_units += 1;
                    product.planned_weight += item.weight();
                }
            }
        }
        for item in &result.leftover {
            if let Some(product) = products
                .iter_mut()
                .find(|p| p.product_code == item.product_id())
            {
                product.leftover_units += 1;
            }
        }
        for product in &mut products {
            product.remaining_weight = product.requested_weight - product.planned_weight;
        }

        Self {
            products,
            container_count: result.container_count(),
            planned_weight: result.total_planned_weight(),
            leftover_weight: result.leftover_weight(),
        }
    }
}
