//! Packing engine: repeatedly selects and commits containers.
//!
//! The engine owns the item pool. Each round asks the configured
//! [`SelectionStrategy`] for the best container, removes its coils from the
//! pool and records the result, until no feasible container remains, the pool
//! is empty, the optional target count is reached or the caller cancels.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::model::{Container, Item, ItemId, ValidationError};
use crate::pool::{ItemPool, PoolError};
use crate::scorer::{Evaluation, RejectReason, evaluate};
use crate::selector::{
    CancelToken, SearchControl, SearchStats, SelectOutcome, Selection, SelectionError,
    SelectionStrategy, StrategyKind,
};
use crate::types::{DEFAULT_MAX_PAIRED_LENGTH, DEFAULT_TIER_SLOTS, MAX_TIER_SLOTS, total_weight};

/// Limits, score weights and search settings for a planning run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PackingConfig {
    /// Upper weight bound per container in kg.
    pub max_container_weight: f64,
    /// Lower weight bound per container in kg.
    pub min_acceptable_weight: f64,
    /// Maximum combined length of a bottom/top pair in cm.
    pub max_paired_length: f64,
    pub max_bottom_slots: usize,
    pub max_top_slots: usize,
    /// Stop after this many containers; `None` plans until the pool runs dry.
    pub target_container_count: Option<usize>,
    pub height_score_weight: f64,
    pub weight_score_weight: f64,
    pub strategy: StrategyKind,
    /// Node budget of one bounded selection.
    pub search_node_limit: u64,
    /// Largest number of pairs the exhaustive strategy agrees to evaluate.
    pub exhaustive_limit: u64,
    /// Evaluate the exhaustive search on the rayon pool.
    pub parallel: bool,
    /// Evaluations between two progress reports.
    pub progress_interval: u64,
}

impl PackingConfig {
    pub const DEFAULT_MAX_CONTAINER_WEIGHT: f64 = 25_000.0;
    pub const DEFAULT_MIN_ACCEPTABLE_WEIGHT: f64 = 20_000.0;
    pub const DEFAULT_MAX_PAIRED_LENGTH: f64 = DEFAULT_MAX_PAIRED_LENGTH;
    pub const DEFAULT_MAX_BOTTOM_SLOTS: usize = DEFAULT_TIER_SLOTS;
    pub const DEFAULT_MAX_TOP_SLOTS: usize = DEFAULT_TIER_SLOTS;
    pub const DEFAULT_HEIGHT_SCORE_WEIGHT: f64 = 1.0;
    pub const DEFAULT_WEIGHT_SCORE_WEIGHT: f64 = 1.0;
    pub const DEFAULT_SEARCH_NODE_LIMIT: u64 = 2_000_000;
    pub const DEFAULT_EXHAUSTIVE_LIMIT: u64 = 5_000_000;
    pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }

    /// Effective target; a target of zero means no target.
    pub fn target(&self) -> Option<usize> {
        self.target_container_count.filter(|&target| target > 0)
    }

    /// Checks that the limits describe a usable container.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("max_container_weight", self.max_container_weight),
            ("min_acceptable_weight", self.min_acceptable_weight),
            ("max_paired_length", self.max_paired_length),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if self.min_acceptable_weight > self.max_container_weight {
            return Err(invalid(format!(
                "min_acceptable_weight ({}) exceeds max_container_weight ({})",
                self.min_acceptable_weight, self.max_container_weight
            )));
        }
        let slots = [
            ("max_bottom_slots", self.max_bottom_slots),
            ("max_top_slots", self.max_top_slots),
        ];
        for (name, value) in slots {
            if !(1..=MAX_TIER_SLOTS).contains(&value) {
                return Err(invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_TIER_SLOTS, value
                )));
            }
        }

        let score_weights = [
            ("height_score_weight", self.height_score_weight),
            ("weight_score_weight", self.weight_score_weight),
        ];
        for (name, value) in score_weights {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{} must be finite and not negative, got {}",
                    name, value
                )));
            }
        }
        if self.search_node_limit == 0 {
            return Err(invalid("search_node_limit must be at least 1".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(invalid("progress_interval must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> ValidationError {
    ValidationError::InvalidConfiguration(message)
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            max_container_weight: Self::DEFAULT_MAX_CONTAINER_WEIGHT,
            min_acceptable_weight: Self::DEFAULT_MIN_ACCEPTABLE_WEIGHT,
            max_paired_length: Self::DEFAULT_MAX_PAIRED_LENGTH,
            max_bottom_slots: Self::DEFAULT_MAX_BOTTOM_SLOTS,
            max_top_slots: Self::DEFAULT_MAX_TOP_SLOTS,
            target_container_count: None,
            height_score_weight: Self::DEFAULT_HEIGHT_SCORE_WEIGHT,
            weight_score_weight: Self::DEFAULT_WEIGHT_SCORE_WEIGHT,
            strategy: StrategyKind::default(),
            search_node_limit: Self::DEFAULT_SEARCH_NODE_LIMIT,
            exhaustive_limit: Self::DEFAULT_EXHAUSTIVE_LIMIT,
            parallel: false,
            progress_interval: Self::DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Builder for [`PackingConfig`].
#[derive(Clone, Debug, Default)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl PackingConfigBuilder {
    pub fn max_container_weight(mut self, weight: f64) -> Self {
        self.config.max_container_weight = weight;
        self
    }

    pub fn min_acceptable_weight(mut self, weight: f64) -> Self {
        self.config.min_acceptable_weight = weight;
        self
    }

    pub fn max_paired_length(mut self, length: f64) -> Self {
        self.config.max_paired_length = length;
        self
    }

    pub fn max_bottom_slots(mut self, slots: usize) -> Self {
        self.config.max_bottom_slots = slots;
        self
    }

    pub fn max_top_slots(mut self, slots: usize) -> Self {
        self.config.max_top_slots = slots;
        self
    }

    /// Sets the target container count; `0` removes the target.
    pub fn target_container_count(mut self, count: usize) -> Self {
        self.config.target_container_count = (count > 0).then_some(count);
        self
    }

    pub fn height_score_weight(mut self, weight: f64) -> Self {
        self.config.height_score_weight = weight;
        self
    }

    pub fn weight_score_weight(mut self, weight: f64) -> Self {
        self.config.weight_score_weight = weight;
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn search_node_limit(mut self, limit: u64) -> Self {
        self.config.search_node_limit = limit;
        self
    }

    pub fn exhaustive_limit(mut self, limit: u64) -> Self {
        self.config.exhaustive_limit = limit;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Returns the final configuration.
    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// Why a planning run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every coil was placed.
    PoolExhausted,
    /// Coils remain but none of their combinations forms a valid container.
    NoFeasibleContainer,
    TargetReached,
    Cancelled,
}

impl TerminationReason {
    pub fn code(&self) -> &'static str {
        match self {
            TerminationReason::PoolExhausted => "pool_exhausted",
            TerminationReason::NoFeasibleContainer => "no_feasible_container",
            TerminationReason::TargetReached => "target_reached",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::PoolExhausted => write!(f, "all coils were planned"),
            TerminationReason::NoFeasibleContainer => {
                write!(f, "the remaining coils cannot fill another container")
            }
            TerminationReason::TargetReached => write!(f, "the target container count was reached"),
            TerminationReason::Cancelled => write!(f, "planning was cancelled"),
        }
    }
}

/// Result of a planning run.
#[derive(Clone, Debug, PartialEq)]
pub struct PackingResult {
    pub containers: Vec<Container>,
    /// Coils not assigned to any container, in pool order.
    pub leftover: Vec<Item>,
    pub termination: TerminationReason,
    pub stats: SearchStats,
}

impl PackingResult {
    /// Whether every coil was planned.
    pub fn is_complete(&self) -> bool {
        self.leftover.is_empty()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn leftover_count(&self) -> usize {
        self.leftover.len()
    }

    /// Total weight inside committed containers.
    pub fn total_planned_weight(&self) -> f64 {
        total_weight(&self.containers)
    }

    pub fn leftover_weight(&self) -> f64 {
        total_weight(&self.leftover)
    }
}

/// Events emitted during planning, e.g. for a live stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PlanEvent {
    PlanStarted {
        items: usize,
        total_weight: f64,
    },
    /// The search for container `container` made progress.
    SearchProgress {
        container: usize,
        evaluated: u64,
        total: u64,
    },
    ContainerCommitted {
        container: usize,
        label: String,
        bottom: Vec<ItemId>,
        top: Vec<ItemId>,
        total_weight: f64,
        score: f64,
    },
    Finished {
        containers: usize,
        leftover: usize,
        termination: TerminationReason,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidConfiguration(#[from] ValidationError),
    #[error("invalid item pool: {0}")]
    InvalidPool(PoolError),
    #[error("pool out of sync with the selection: {0}")]
    InvariantViolation(PoolError),
    #[error("strategy '{strategy}' proposed an invalid container: {reason}")]
    InvalidSelection {
        strategy: &'static str,
        reason: RejectReason,
    },
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Runs the select/commit loop with one strategy.
pub struct PackingEngine {
    config: PackingConfig,
    strategy: Box<dyn SelectionStrategy>,
}

impl PackingEngine {
    /// Creates an engine using the strategy named in the configuration.
    pub fn new(config: PackingConfig) -> Result<Self, EngineError> {
        Self::with_strategy(config, config.strategy.build())
    }

    pub fn with_strategy(
        config: PackingConfig,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config, strategy })
    }

    /// Plans containers until the pool is exhausted or no container fits.
    ///
    /// # Parameters
    /// * `items` - Coils to plan, in pool order
    /// * `cancel` - Optional token that stops the run between evaluations
    /// * `on_event` - Receives plan events, possibly from search threads
    pub fn run(
        &self,
        items: Vec<Item>,
        cancel: Option<&CancelToken>,
        on_event: &(dyn Fn(&PlanEvent) + Sync),
    ) -> Result<PackingResult, EngineError> {
        let mut pool = ItemPool::new(items).map_err(EngineError::InvalidPool)?;
        let item_count = pool.len();
        info!(
            items = item_count,
            strategy = self.strategy.name(),
            "planning started"
        );
        on_event(&PlanEvent::PlanStarted {
            items: item_count,
            total_weight: pool.total_weight(),
        });

        let mut containers: Vec<Container> = Vec::new();
        let mut stats = SearchStats::default();

        let termination = loop {
            if pool.is_empty() {
                break TerminationReason::PoolExhausted;
            }
            if self
                .config
                .target()
                .is_some_and(|target| containers.len() >= target)
            {
                break TerminationReason::TargetReached;
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                break TerminationReason::Cancelled;
            }

            let number = containers.len() + 1;
            let observer = |evaluated: u64, total: u64| {
                on_event(&PlanEvent::SearchProgress {
                    container: number,
                    evaluated,
                    total,
                })
            };
            let mut control = SearchControl::new().with_observer(&observer);
            if let Some(cancel) = cancel {
                control = control.with_cancel(cancel);
            }

            let report = self.strategy.select(&pool, &self.config, control)?;
            stats.absorb(report.stats);
            let selection = match report.outcome {
                SelectOutcome::Found(selection) => selection,
                SelectOutcome::NoFeasible => break TerminationReason::NoFeasibleContainer,
                SelectOutcome::Cancelled(_) => break TerminationReason::Cancelled,
            };

            let container = self.commit(&mut pool, number, selection)?;
            debug!(
                container = number,
                coils = container.item_count(),
                bottom = container.bottom.len(),
                top = container.top.len(),
                weight = container.total_weight,
                score = container.score,
                remaining = pool.len(),
                "container committed"
            );
            on_event(&PlanEvent::ContainerCommitted {
                container: number,
                label: container.label(),
                bottom: container.bottom.iter().map(Item::id).collect(),
                top: container.top.iter().map(Item::id).collect(),
                total_weight: container.total_weight,
                score: container.score,
            });
            containers.push(container);
        };

        let leftover = pool.into_items();
        info!(
            containers = containers.len(),
            leftover = leftover.len(),
            evaluated = stats.evaluated,
            truncated = stats.truncated,
            termination = termination.code(),
            "planning finished"
        );
        on_event(&PlanEvent::Finished {
            containers: containers.len(),
            leftover: leftover.len(),
            termination,
        });

        Ok(PackingResult {
            containers,
            leftover,
            termination,
            stats,
        })
    }

    /// Moves the selected coils out of the pool into a new container.
    ///
    /// The selection is re-checked with the scorer before anything leaves the
    /// pool; a strategy cannot commit a container that violates the
    /// constraints.
    fn commit(
        &self,
        pool: &mut ItemPool,
        number: usize,
        selection: Selection,
    ) -> Result<Container, EngineError> {
        let requested: Vec<ItemId> = selection
            .bottom
            .iter()
            .chain(&selection.top)
            .copied()
            .collect();

        let score = {
            let mut bottom_refs = pool
                .lookup(&requested)
                .map_err(EngineError::InvariantViolation)?;
            let top_refs = bottom_refs.split_off(selection.bottom.len());
            match evaluate(&bottom_refs, &top_refs, &self.config) {
                Evaluation::Accepted(score) => score,
                Evaluation::Rejected(reason) => {
                    return Err(EngineError::InvalidSelection {
                        strategy: self.strategy.name(),
                        reason,
                    });
                }
            }
        };

        let mut bottom = pool
            .remove(&requested)
            .map_err(EngineError::InvariantViolation)?;
        let top = bottom.split_off(selection.bottom.len());
        Ok(Container::assemble(number, bottom, top, score.weight, score.value))
    }
}

/// Plans containers with the default configuration.
#[allow(dead_code)]
pub fn plan_containers(items: Vec<Item>) -> Result<PackingResult, EngineError> {
    plan_containers_with_config(items, PackingConfig::default())
}

/// Plans containers with a custom configuration.
pub fn plan_containers_with_config(
    items: Vec<Item>,
    config: PackingConfig,
) -> Result<PackingResult, EngineError> {
    plan_containers_with_progress(items, config, None, |_| {})
}

/// Plans containers and reports every step through `on_event`.
///
/// # Parameters
/// * `items` - Coils to plan
/// * `config` - Limits and search settings
/// * `cancel` - Optional cancellation token
/// * `on_event` - Event callback; may be called from rayon worker threads
pub fn plan_containers_with_progress(
    items: Vec<Item>,
    config: PackingConfig,
    cancel: Option<&CancelToken>,
    on_event: impl Fn(&PlanEvent) + Sync,
) -> Result<PackingResult, EngineError> {
    PackingEngine::new(config)?.run(items, cancel, &on_event)
}
