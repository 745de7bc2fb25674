//! Common types and traits for coil load planning.
//!
//! This module defines the physical limits shared by the planner and small
//! trait abstractions that items and containers implement.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Longest coil (in cm) that may be stacked in the top tier.
pub const TOP_ELIGIBLE_MAX_LENGTH: f64 = 1250.0;

/// Default ceiling (in cm) for a bottom coil plus the top coil stacked on it.
pub const DEFAULT_MAX_PAIRED_LENGTH: f64 = 2650.0;

/// Default number of slots in each tier of a container.
pub const DEFAULT_TIER_SLOTS: usize = 11;

/// Most slots a single tier may be configured with.
pub const MAX_TIER_SLOTS: usize = 64;

/// Coil weight in kg per cm of coil length.
pub const COIL_WEIGHT_PER_LENGTH: f64 = 1.15;

/// Relative tolerance for weight sums that are accumulated in different orders.
///
/// Only used for pruning decisions; acceptance always goes through the scorer.
pub const EPSILON_WEIGHT: f64 = 1e-9;

/// Absolute slack applied to admissible score bounds.
pub const EPSILON_SCORE: f64 = 1e-9;

/// Returns the weight tolerance scaled to the magnitude of `reference`.
#[inline]
pub fn weight_tolerance(reference: f64) -> f64 {
    reference.abs().max(1.0) * EPSILON_WEIGHT
}

/// One of the two placement levels inside a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bottom,
    Top,
}

impl Tier {
    /// Short label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Bottom => "bottom",
            Tier::Top => "top",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Trait for objects with weight.
///
/// Provides a common interface for weight operations.
pub trait Weighted {
    /// Returns the weight in kg.
    fn weight(&self) -> f64;
}

/// Trait for objects with a coil length.
pub trait Measured {
    /// Returns the length in cm.
    fn length(&self) -> f64;

    /// Checks whether the object is short enough for the top tier.
    fn fits_top_tier(&self) -> bool {
        self.length() <= TOP_ELIGIBLE_MAX_LENGTH
    }
}

/// Sums the weights of all given objects.
pub fn total_weight<'a, T, I>(items: I) -> f64
where
    T: Weighted + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items.into_iter().map(Weighted::weight).sum()
}

/// Validation functions shared by the model and the order intake.
pub mod validation {

    /// Validates a coil length.
    ///
    /// # Parameters
    /// * `value` - The value to validate
    ///
    /// # Returns
    /// `Ok(())` for valid values, otherwise error text
    pub fn validate_length(value: f64) -> Result<(), String> {
        if value.is_nan() {
            return Err("Length must not be NaN".to_string());
        }
        if value.is_infinite() {
            return Err("Length must not be infinite".to_string());
        }
        if value <= 0.0 {
            return Err(format!("Length must be positive, got: {}", value));
        }
        Ok(())
    }

    /// Validates a weight.
    ///
    /// # Parameters
    /// * `value` - The value to validate
    ///
    /// # Returns
    /// `Ok(())` for valid values, otherwise error text
    pub fn validate_weight(value: f64) -> Result<(), String> {
        if value.is_nan() {
            return Err("Weight must not be NaN".to_string());
        }
        if value.is_infinite() {
            return Err("Weight must not be infinite".to_string());
        }
        if value <= 0.0 {
            return Err(format!("Weight must be positive, got: {}", value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Coil {
        length: f64,
        weight: f64,
    }

    impl Measured for Coil {
        fn length(&self) -> f64 {
            self.length
        }
    }

    impl Weighted for Coil {
        fn weight(&self) -> f64 {
            self.weight
        }
    }

    #[test]
    fn test_top_tier_boundary_is_inclusive() {
        let at_limit = Coil {
            length: 1250.0,
            weight: 1.0,
        };
        let above = Coil {
            length: 1250.5,
            weight: 1.0,
        };
        assert!(at_limit.fits_top_tier());
        assert!(!above.fits_top_tier());
    }

    #[test]
    fn test_total_weight_sums_all_items() {
        let coils = [
            Coil {
                length: 1000.0,
                weight: 1150.0,
            },
            Coil {
                length: 1200.0,
                weight: 1380.0,
            },
        ];
        assert!((total_weight(&coils) - 2530.0).abs() < 1e-9);
        assert_eq!(total_weight::<Coil, _>(&[]), 0.0);
    }

    #[test]
    fn test_weight_tolerance_scales_with_reference() {
        assert!((weight_tolerance(0.5) - EPSILON_WEIGHT).abs() < f64::EPSILON);
        assert!((weight_tolerance(25_000.0) - 25_000.0 * EPSILON_WEIGHT).abs() < 1e-12);
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(Tier::Bottom.to_string(), "bottom");
        assert_eq!(Tier::Top.label(), "top");
    }

    #[test]
    fn test_validation_length() {
        assert!(validation::validate_length(1200.0).is_ok());
        assert!(validation::validate_length(0.0).is_err());
        assert!(validation::validate_length(-1.0).is_err());
        assert!(validation::validate_length(f64::NAN).is_err());
        assert!(validation::validate_length(f64::INFINITY).is_err());
    }

    #[test]
    fn test_validation_weight() {
        assert!(validation::validate_weight(10.0).is_ok());
        assert!(validation::validate_weight(0.0).is_err());
        assert!(validation::validate_weight(-1.0).is_err());
    }
}
