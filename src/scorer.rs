//! Feasibility check and scoring of one candidate container.
//!
//! `evaluate` is the single predicate every selection strategy goes through:
//! a candidate is accepted only if it respects tier capacity, tier
//! eligibility, both weight bounds and the paired stack height.

use std::fmt;

use crate::engine::PackingConfig;
use crate::model::{Item, ItemId};
use crate::stacking::{compatible_pairs, first_overhang, sort_for_pairing};

/// Reasons why a candidate container is not acceptable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RejectReason {
    EmptyBottom,
    BottomOverCapacity { count: usize, capacity: usize },
    TopOverCapacity { count: usize, capacity: usize },
    NotTopEligible(ItemId),
    Overweight { weight: f64 },
    Underweight { weight: f64 },
    PairedLengthExceeded { index: usize, height: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyBottom => write!(f, "container has no bottom coil"),
            RejectReason::BottomOverCapacity { count, capacity } => {
                write!(f, "{} bottom coils exceed the {} bottom slots", count, capacity)
            }
            RejectReason::TopOverCapacity { count, capacity } => {
                write!(f, "{} top coils exceed the {} top slots", count, capacity)
            }
            RejectReason::NotTopEligible(id) => {
                write!(f, "coil {} is too long for the top tier", id)
            }
            RejectReason::Overweight { weight } => {
                write!(f, "total weight {:.1} kg exceeds the container limit", weight)
            }
            RejectReason::Underweight { weight } => {
                write!(f, "total weight {:.1} kg is below the minimum tonnage", weight)
            }
            RejectReason::PairedLengthExceeded { index, height } => {
                write!(f, "pair {} stacks to {:.0} cm", index + 1, height)
            }
        }
    }
}

/// Score of an accepted candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Score {
    /// Combined desirability, higher is better.
    pub value: f64,
    /// Total weight of both tiers.
    pub weight: f64,
    pub height_score: usize,
    pub weight_score: f64,
}

/// Outcome of evaluating a candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Evaluation {
    Rejected(RejectReason),
    Accepted(Score),
}

impl Evaluation {
    #[allow(dead_code)]
    pub fn accepted(&self) -> Option<&Score> {
        match self {
            Evaluation::Accepted(score) => Some(score),
            Evaluation::Rejected(_) => None,
        }
    }
}

/// Closeness of `weight` to the container cap, in `[0, 1]`.
///
/// Monotonically increasing for `weight <= max_weight`, which the bounded
/// search relies on for its score bound.
#[inline]
pub fn weight_score(weight: f64, max_weight: f64) -> f64 {
    (1.0 - (weight - max_weight).abs() / max_weight).max(0.0)
}

/// Combines the partial scores with the configured weights.
#[inline]
pub fn combined_score(height_score: usize, weight_score: f64, config: &PackingConfig) -> f64 {
    config.height_score_weight * height_score as f64 + config.weight_score_weight * weight_score
}

/// Result of the structural checks, before the lower weight bound.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    pub weight: f64,
    pub compatible_pairs: usize,
}

/// Checks capacity, eligibility, the weight cap and pairing.
///
/// Does not require a bottom coil and ignores the minimum tonnage, so partial
/// loads can be grown step by step.
pub fn check_structure(
    bottom: &[&Item],
    top: &[&Item],
    config: &PackingConfig,
) -> Result<Structure, RejectReason> {
    if bottom.len() > config.max_bottom_slots {
        return Err(RejectReason::BottomOverCapacity {
            count: bottom.len(),
            capacity: config.max_bottom_slots,
        });
    }
    if top.len() > config.max_top_slots {
        return Err(RejectReason::TopOverCapacity {
            count: top.len(),
            capacity: config.max_top_slots,
        });
    }
    if let Some(item) = top.iter().find(|item| !item.is_top_eligible()) {
        return Err(RejectReason::NotTopEligible(item.id()));
    }

    let mut bottom = bottom.to_vec();
    let mut top = top.to_vec();
    sort_for_pairing(&mut bottom);
    sort_for_pairing(&mut top);

    // Summed in pairing order so equal multisets give identical totals.
    let weight: f64 = bottom.iter().chain(top.iter()).map(|item| item.weight()).sum();
    if weight > config.max_container_weight {
        return Err(RejectReason::Overweight { weight });
    }

    let bottom_lengths: Vec<f64> = bottom.iter().map(|item| item.length()).collect();
    let top_lengths: Vec<f64> = top.iter().map(|item| item.length()).collect();
    if let Some((index, height)) =
        first_overhang(&bottom_lengths, &top_lengths, config.max_paired_length)
    {
        return Err(RejectReason::PairedLengthExceeded { index, height });
    }

    Ok(Structure {
        weight,
        compatible_pairs: compatible_pairs(
            &bottom_lengths,
            &top_lengths,
            config.max_paired_length,
        ),
    })
}

/// Evaluates a candidate container.
///
/// # Parameters
/// * `bottom` - Coils for the bottom tier, in any order
/// * `top` - Coils for the top tier, in any order
/// * `config` - Limits and score weights
///
/// # Returns
/// `Evaluation::Accepted` with score and weight, or the first violated rule
pub fn evaluate(bottom: &[&Item], top: &[&Item], config: &PackingConfig) -> Evaluation {
    if bottom.is_empty() {
        return Evaluation::Rejected(RejectReason::EmptyBottom);
    }
    let structure = match check_structure(bottom, top, config) {
        Ok(structure) => structure,
        Err(reason) => return Evaluation::Rejected(reason),
    };
    if structure.weight < config.min_acceptable_weight {
        return Evaluation::Rejected(RejectReason::Underweight {
            weight: structure.weight,
        });
    }

    let height_score = structure.compatible_pairs;
    let closeness = weight_score(structure.weight, config.max_container_weight);
    Evaluation::Accepted(Score {
        value: combined_score(height_score, closeness, config),
        weight: structure.weight,
        height_score,
        weight_score: closeness,
    })
}
