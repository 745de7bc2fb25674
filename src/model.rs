//! Data models for coil load planning.
//!
//! This module defines the fundamental data structures:
//! - `Item`: one physical coil with length, weight and tier eligibility
//! - `Container`: a committed load split into a bottom and a top tier
//!
//! Both implement the traits from the `types` module.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stacking::{paired_heights, sort_for_pairing};
use crate::types::{Measured, Tier, Weighted, validation};

/// Validation error for item and configuration data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid length: {0}")]
    InvalidLength(String),
    #[error("Invalid weight: {0}")]
    InvalidWeight(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Identity of a single item, independent of its field values.
///
/// Several coils of one order share length, weight and product code, so the
/// pool tells them apart by this id only.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single coil awaiting assignment.
///
/// Immutable once created: the fields are only readable through accessors and
/// `top_eligible` is always derived from the length.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Item {
    id: ItemId,
    product_id: String,
    length: f64,
    weight: f64,
    top_eligible: bool,
}

impl Item {
    /// Creates a new item with validation.
    ///
    /// # Parameters
    /// * `id` - Unique identity within the pool
    /// * `product_id` - Product code the coil was ordered under
    /// * `length` - Coil length in cm
    /// * `weight` - Coil weight in kg
    ///
    /// # Returns
    /// `Ok(Item)` for valid values, otherwise `Err(ValidationError)`
    pub fn new(
        id: ItemId,
        product_id: impl Into<String>,
        length: f64,
        weight: f64,
    ) -> Result<Self, ValidationError> {
        validation::validate_length(length).map_err(ValidationError::InvalidLength)?;
        validation::validate_weight(weight).map_err(ValidationError::InvalidWeight)?;
        let mut item = Self {
            id,
            product_id: product_id.into(),
            length,
            weight,
            top_eligible: false,
        };
        item.top_eligible = item.fits_top_tier();
        Ok(item)
    }

    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[inline]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.length
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Whether the coil may be placed in the top tier.
    #[inline]
    pub fn is_top_eligible(&self) -> bool {
        self.top_eligible
    }
}

impl Weighted for Item {
    fn weight(&self) -> f64 {
        self.weight
    }
}

impl Measured for Item {
    fn length(&self) -> f64 {
        self.length
    }
}

/// A committed container load.
///
/// Both tiers are stored in pairing order (length ascending), so
/// `bottom[i]` carries `top[i]` for every `i` below the shorter tier length.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub number: usize,
    pub bottom: Vec<Item>,
    pub top: Vec<Item>,
    pub total_weight: f64,
    pub score: f64,
}

impl Container {
    /// Assembles a container from the items of both tiers.
    ///
    /// The tiers are brought into pairing order; weight and score are taken
    /// from the evaluation that selected them.
    pub fn assemble(
        number: usize,
        mut bottom: Vec<Item>,
        mut top: Vec<Item>,
        total_weight: f64,
        score: f64,
    ) -> Self {
        sort_for_pairing(&mut bottom);
        sort_for_pairing(&mut top);
        Self {
            number,
            bottom,
            top,
            total_weight,
            score,
        }
    }

    /// Heading used in reports, e.g. `Container 2 - Total weight: 24150 kg`.
    pub fn label(&self) -> String {
        format!(
            "Container {} - Total weight: {} kg",
            self.number,
            self.total_weight.round()
        )
    }

    /// Number of coils in both tiers.
    pub fn item_count(&self) -> usize {
        self.bottom.len() + self.top.len()
    }

    /// Iterates over all coils with the tier they occupy.
    pub fn items(&self) -> impl Iterator<Item = (Tier, &Item)> {
        self.bottom
            .iter()
            .map(|item| (Tier::Bottom, item))
            .chain(self.top.iter().map(|item| (Tier::Top, item)))
    }

    /// Combined lengths of each bottom/top pair.
    pub fn paired_heights(&self) -> Vec<f64> {
        let bottom: Vec<f64> = self.bottom.iter().map(Item::length).collect();
        let top: Vec<f64> = self.top.iter().map(Item::length).collect();
        paired_heights(&bottom, &top).collect()
    }
}

impl Weighted for Container {
    fn weight(&self) -> f64 {
        self.total_weight
    }
}
