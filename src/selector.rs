//! Container selection strategies.
//!
//! A strategy looks at the current pool and proposes the bottom/top split for
//! the next container. All strategies accept a candidate only through
//! [`crate::scorer::evaluate`] and share one tie-break contract: among equal
//! scores the candidate that comes first in the reference enumeration wins
//! (bottom size, bottom positions, top size, top positions).
//!
//! - `ExhaustiveScoredStrategy` enumerates every subset pair. Exact, but only
//!   usable for small residual pools.
//! - `BoundedSearchStrategy` runs a branch-and-bound over item kinds and returns
//!   the same selection as the exhaustive search while pruning most of it.
//! - `GreedyStrategy` fills a container in one pass, longest coils first.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

use crate::engine::PackingConfig;
use crate::model::{Item, ItemId};
use crate::pool::ItemPool;
use crate::scorer::{Evaluation, check_structure, combined_score, evaluate, weight_score};
use crate::types::{EPSILON_SCORE, weight_tolerance};

/// Which selection strategy the engine runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Greedy,
    Exhaustive,
    #[default]
    Bounded,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Greedy => "greedy",
            StrategyKind::Exhaustive => "exhaustive",
            StrategyKind::Bounded => "bounded",
        }
    }

    /// Instantiates the strategy.
    pub fn build(&self) -> Box<dyn SelectionStrategy> {
        match self {
            StrategyKind::Greedy => Box::new(GreedyStrategy),
            StrategyKind::Exhaustive => Box::new(ExhaustiveScoredStrategy),
            StrategyKind::Bounded => Box::new(BoundedSearchStrategy),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(StrategyKind::Greedy),
            "exhaustive" => Ok(StrategyKind::Exhaustive),
            "bounded" | "branch_and_bound" => Ok(StrategyKind::Bounded),
            other => Err(format!(
                "unknown strategy '{}', expected greedy, exhaustive or bounded",
                other
            )),
        }
    }
}

/// Receives search progress as `(evaluated, total)`.
///
/// Called from search threads; implementations must not block for long.
pub trait ProgressObserver: Sync {
    fn on_progress(&self, evaluated: u64, total: u64);
}

impl<F> ProgressObserver for F
where
    F: Fn(u64, u64) + Sync,
{
    fn on_progress(&self, evaluated: u64, total: u64) {
        self(evaluated, total)
    }
}

/// Cooperative cancellation flag shared between the caller and a search.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Optional observer and cancellation token handed to a strategy.
#[derive(Clone, Copy, Default)]
pub struct SearchControl<'a> {
    observer: Option<&'a dyn ProgressObserver>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> SearchControl<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    fn report(&self, evaluated: u64, total: u64) {
        if let Some(observer) = self.observer {
            observer.on_progress(evaluated, total);
        }
    }
}

/// The bottom/top split proposed for the next container.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Bottom coils in pool order.
    pub bottom: Vec<ItemId>,
    /// Top coils in pool order.
    pub top: Vec<ItemId>,
    pub weight: f64,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectOutcome {
    Found(Selection),
    /// No feasible container exists in the pool. Not an error.
    NoFeasible,
    /// The search was cancelled; carries the best candidate seen so far.
    Cancelled(Option<Selection>),
}

/// Work done by one or more selections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SearchStats {
    /// Candidates (or search nodes) evaluated.
    pub evaluated: u64,
    /// Whether a search stopped at its node budget.
    pub truncated: bool,
}

impl SearchStats {
    pub fn absorb(&mut self, other: SearchStats) {
        self.evaluated = self.evaluated.saturating_add(other.evaluated);
        self.truncated |= other.truncated;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectionReport {
    pub outcome: SelectOutcome,
    pub stats: SearchStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error(
        "exhaustive search would evaluate {combinations} combinations (limit {limit}); use the bounded strategy for pools this large"
    )]
    SearchSpaceTooLarge { combinations: u128, limit: u64 },
}

/// Chooses the next container from the pool.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(
        &self,
        pool: &ItemPool,
        config: &PackingConfig,
        control: SearchControl<'_>,
    ) -> Result<SelectionReport, SelectionError>;
}

/// Accepted candidate, addressed by pool positions.
#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    bottom: Vec<usize>,
    top: Vec<usize>,
    score: f64,
    weight: f64,
}

impl Candidate {
    /// Whether `self` comes before `other` in the reference enumeration.
    fn precedes(&self, other: &Candidate) -> bool {
        (self.bottom.len(), &self.bottom, self.top.len(), &self.top)
            < (other.bottom.len(), &other.bottom, other.top.len(), &other.top)
    }

    fn beats(&self, other: &Candidate) -> bool {
        self.score > other.score || (self.score == other.score && self.precedes(other))
    }

    fn into_selection(self, items: &[Item]) -> Selection {
        Selection {
            bottom: self.bottom.iter().map(|&pos| items[pos].id()).collect(),
            top: self.top.iter().map(|&pos| items[pos].id()).collect(),
            weight: self.weight,
            score: self.score,
        }
    }
}

fn offer(best: &mut Option<Candidate>, candidate: Candidate) {
    match best {
        Some(current) if !candidate.beats(current) => {}
        _ => *best = Some(candidate),
    }
}

/// Evaluates the candidate formed by the given pool positions.
fn score_positions(
    items: &[Item],
    bottom: &[usize],
    top: &[usize],
    config: &PackingConfig,
) -> Option<Candidate> {
    let bottom_refs: Vec<&Item> = bottom.iter().map(|&pos| &items[pos]).collect();
    let top_refs: Vec<&Item> = top.iter().map(|&pos| &items[pos]).collect();
    match evaluate(&bottom_refs, &top_refs, config) {
        Evaluation::Accepted(score) => Some(Candidate {
            bottom: bottom.to_vec(),
            top: top.to_vec(),
            score: score.value,
            weight: score.weight,
        }),
        Evaluation::Rejected(_) => None,
    }
}

fn finish_outcome(best: Option<Candidate>, cancelled: bool, items: &[Item]) -> SelectOutcome {
    let best = best.map(|candidate| candidate.into_selection(items));
    match (cancelled, best) {
        (true, best) => SelectOutcome::Cancelled(best),
        (false, Some(selection)) => SelectOutcome::Found(selection),
        (false, None) => SelectOutcome::NoFeasible,
    }
}

/// Shared evaluation counter that reports at a bounded frequency.
struct Progress<'a> {
    control: SearchControl<'a>,
    counter: AtomicU64,
    total: u64,
    interval: u64,
}

impl<'a> Progress<'a> {
    fn new(control: SearchControl<'a>, total: u64, interval: u64) -> Self {
        Self {
            control,
            counter: AtomicU64::new(0),
            total,
            interval,
        }
    }

    fn tick(&self) {
        let evaluated = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.interval > 0 && evaluated % self.interval == 0 {
            self.control.report(evaluated, self.total);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Sends a final report and returns the number of evaluations.
    fn finish(&self) -> u64 {
        let evaluated = self.counter.load(Ordering::Relaxed);
        self.control.report(evaluated, self.total.max(evaluated));
        evaluated
    }
}

/// Calls `visit` with every `k`-subset of `0..n` in lexicographic order.
fn for_each_combination(
    n: usize,
    k: usize,
    mut visit: impl FnMut(&[usize]) -> ControlFlow<()>,
) -> ControlFlow<()> {
    if k > n {
        return ControlFlow::Continue(());
    }
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        if visit(&indices).is_break() {
            return ControlFlow::Break(());
        }
        let mut i = k;
        loop {
            if i == 0 {
                return ControlFlow::Continue(());
            }
            i -= 1;
            if indices[i] < n - k + i {
                break;
            }
        }
        indices[i] += 1;
        for j in i + 1..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

fn binomial(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = match result.checked_mul((n - i) as u128) {
            Some(product) => product / (i as u128 + 1),
            None => return u128::MAX,
        };
    }
    result
}

/// Number of bottom/top pairs the exhaustive search evaluates.
///
/// `eligible` of the `n` pool items may go on top; a top subset never reuses
/// a bottom item.
fn combination_total(n: usize, eligible: usize, max_bottom: usize, max_top: usize) -> u128 {
    let mut total: u128 = 0;
    for size in 1..=max_bottom.min(n) {
        for eligible_below in 0..=size.min(eligible) {
            let others = size - eligible_below;
            if others > n - eligible {
                continue;
            }
            let bottoms =
                binomial(eligible, eligible_below).saturating_mul(binomial(n - eligible, others));
            let free = eligible - eligible_below;
            let tops = (0..=max_top.min(free))
                .fold(0u128, |acc, size| acc.saturating_add(binomial(free, size)));
            total = total.saturating_add(bottoms.saturating_mul(tops));
        }
    }
    total
}

/// Reference search: evaluates every bottom/top subset pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExhaustiveScoredStrategy;

impl SelectionStrategy for ExhaustiveScoredStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::Exhaustive.name()
    }

    fn select(
        &self,
        pool: &ItemPool,
        config: &PackingConfig,
        control: SearchControl<'_>,
    ) -> Result<SelectionReport, SelectionError> {
        let items = pool.items();
        let top_positions: Vec<usize> = pool.eligible_top().map(|(pos, _)| pos).collect();

        let total = combination_total(
            items.len(),
            top_positions.len(),
            config.max_bottom_slots,
            config.max_top_slots,
        );
        if total > u128::from(config.exhaustive_limit) {
            return Err(SelectionError::SearchSpaceTooLarge {
                combinations: total,
                limit: config.exhaustive_limit,
            });
        }

        let progress = Progress::new(control, total as u64, config.progress_interval);
        let max_bottom = config.max_bottom_slots.min(items.len());
        let search =
            |size: usize| search_bottom_size(items, &top_positions, size, config, &progress);

        // Partitioned by bottom size; merged in ascending size order below.
        let partials: Vec<(Option<Candidate>, bool)> = if config.parallel {
            (1..=max_bottom).into_par_iter().map(search).collect()
        } else {
            let mut partials = Vec::with_capacity(max_bottom);
            for size in 1..=max_bottom {
                let partial = search(size);
                let stop = partial.1;
                partials.push(partial);
                if stop {
                    break;
                }
            }
            partials
        };

        let mut best = None;
        let mut cancelled = false;
        for (candidate, was_cancelled) in partials {
            cancelled |= was_cancelled;
            if let Some(candidate) = candidate {
                offer(&mut best, candidate);
            }
        }

        let evaluated = progress.finish();
        debug!(
            strategy = self.name(),
            evaluated,
            total = total as u64,
            parallel = config.parallel,
            "exhaustive selection finished"
        );
        Ok(SelectionReport {
            outcome: finish_outcome(best, cancelled, items),
            stats: SearchStats {
                evaluated,
                truncated: false,
            },
        })
    }
}

/// Evaluates all pairs whose bottom tier has exactly `size` coils.
///
/// Returns the best candidate and whether the search was cancelled.
fn search_bottom_size(
    items: &[Item],
    top_positions: &[usize],
    size: usize,
    config: &PackingConfig,
    progress: &Progress<'_>,
) -> (Option<Candidate>, bool) {
    let mut best = None;
    let mut available: Vec<usize> = Vec::with_capacity(top_positions.len());
    let mut top: Vec<usize> = Vec::with_capacity(top_positions.len());

    let flow = for_each_combination(items.len(), size, |bottom| {
        available.clear();
        available.extend(
            top_positions
                .iter()
                .copied()
                .filter(|pos| bottom.binary_search(pos).is_err()),
        );

        for top_size in 0..=config.max_top_slots.min(available.len()) {
            let flow = for_each_combination(available.len(), top_size, |chosen| {
                if progress.is_cancelled() {
                    return ControlFlow::Break(());
                }
                progress.tick();
                top.clear();
                top.extend(chosen.iter().map(|&i| available[i]));
                if let Some(candidate) = score_positions(items, bottom, &top, config) {
                    offer(&mut best, candidate);
                }
                ControlFlow::Continue(())
            });
            if flow.is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    });

    (best, flow.is_break())
}

/// One-pass heuristic: longest and heaviest coils first.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyStrategy;

impl SelectionStrategy for GreedyStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::Greedy.name()
    }

    fn select(
        &self,
        pool: &ItemPool,
        config: &PackingConfig,
        control: SearchControl<'_>,
    ) -> Result<SelectionReport, SelectionError> {
        let items = pool.items();
        let progress = Progress::new(control, 3 * items.len() as u64, config.progress_interval);

        if progress.is_cancelled() {
            return Ok(SelectionReport {
                outcome: SelectOutcome::Cancelled(None),
                stats: SearchStats::default(),
            });
        }

        let best = greedy_fill(pool, config, &progress)
            .and_then(|(bottom, top)| score_positions(items, &bottom, &top, config));
        let evaluated = progress.finish();
        debug!(strategy = self.name(), evaluated, found = best.is_some(), "greedy selection finished");

        Ok(SelectionReport {
            outcome: finish_outcome(best, false, items),
            stats: SearchStats {
                evaluated,
                truncated: false,
            },
        })
    }
}

/// Fills one container greedily and returns the chosen pool positions.
///
/// Bottom-only coils form the base, short coils go on top while their pair
/// stays within the height limit, and remaining slots take whatever still fits.
/// Every step keeps the load structurally valid; the minimum tonnage is left
/// to the final evaluation.
fn greedy_fill(
    pool: &ItemPool,
    config: &PackingConfig,
    progress: &Progress<'_>,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let items = pool.items();
    let mut order: Vec<usize> = pool.eligible_bottom().map(|(pos, _)| pos).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .length()
            .total_cmp(&items[a].length())
            .then_with(|| items[b].weight().total_cmp(&items[a].weight()))
    });

    let fits = |bottom: &[usize], top: &[usize]| {
        progress.tick();
        let bottom: Vec<&Item> = bottom.iter().map(|&pos| &items[pos]).collect();
        let top: Vec<&Item> = top.iter().map(|&pos| &items[pos]).collect();
        check_structure(&bottom, &top, config).is_ok()
    };

    let mut used = vec![false; items.len()];
    let mut bottom: Vec<usize> = Vec::new();
    let mut top: Vec<usize> = Vec::new();

    for &pos in &order {
        if items[pos].is_top_eligible() || bottom.len() >= config.max_bottom_slots {
            continue;
        }
        bottom.push(pos);
        if fits(&bottom, &top) {
            used[pos] = true;
        } else {
            bottom.pop();
        }
    }

    for &pos in &order {
        if used[pos] || !items[pos].is_top_eligible() {
            continue;
        }
        if top.len() >= config.max_top_slots {
            break;
        }
        top.push(pos);
        if fits(&bottom, &top) {
            used[pos] = true;
        } else {
            top.pop();
        }
    }

    for &pos in &order {
        if used[pos] {
            continue;
        }
        if bottom.len() < config.max_bottom_slots {
            bottom.push(pos);
            if fits(&bottom, &top) {
                used[pos] = true;
                continue;
            }
            bottom.pop();
        }
        if items[pos].is_top_eligible() && top.len() < config.max_top_slots {
            top.push(pos);
            if fits(&bottom, &top) {
                used[pos] = true;
            } else {
                top.pop();
            }
        }
    }

    if bottom.is_empty() {
        return None;
    }
    Some((bottom, top))
}

/// Items with identical length, weight and eligibility.
#[derive(Clone, Debug)]
struct Kind {
    weight: f64,
    top_eligible: bool,
    /// Pool positions, ascending.
    members: Vec<usize>,
}

/// Groups the pool into kinds in order of first appearance.
///
/// Returns the kinds and, for every pool position, the index of its kind.
fn group_kinds(items: &[Item]) -> (Vec<Kind>, Vec<usize>) {
    let mut index: HashMap<(u64, u64, bool), usize> = HashMap::new();
    let mut kinds: Vec<Kind> = Vec::new();
    let mut kind_of = Vec::with_capacity(items.len());

    for (pos, item) in items.iter().enumerate() {
        let key = (
            item.length().to_bits(),
            item.weight().to_bits(),
            item.is_top_eligible(),
        );
        let kind = *index.entry(key).or_insert_with(|| {
            kinds.push(Kind {
                weight: item.weight(),
                top_eligible: item.is_top_eligible(),
                members: Vec::new(),
            });
            kinds.len() - 1
        });
        kinds[kind].members.push(pos);
        kind_of.push(kind);
    }
    (kinds, kind_of)
}

/// Exact branch-and-bound over item kinds.
///
/// Interchangeable coils are counted instead of enumerated. Each count vector
/// is realised canonically from the earliest pool positions of every kind,
/// bottom tier first, which is the winner of the reference tie-break among
/// all subsets with those counts. The result therefore matches
/// `ExhaustiveScoredStrategy` whenever the node budget is not exhausted.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundedSearchStrategy;

impl SelectionStrategy for BoundedSearchStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::Bounded.name()
    }

    fn select(
        &self,
        pool: &ItemPool,
        config: &PackingConfig,
        control: SearchControl<'_>,
    ) -> Result<SelectionReport, SelectionError> {
        let items = pool.items();
        let progress = Progress::new(control, config.search_node_limit, config.progress_interval);
        let (kinds, kind_of) = group_kinds(items);
        let mut search = KindSearch::new(items, kinds, config, &progress);

        if let Some((bottom, top)) = greedy_fill(pool, config, &progress) {
            search.seed(&kind_of, &bottom, &top);
        }
        search.run();

        let evaluated = progress.finish();
        debug!(
            strategy = self.name(),
            kinds = search.kinds.len(),
            evaluated,
            truncated = search.truncated,
            "bounded selection finished"
        );

        let KindSearch {
            best,
            cancelled,
            truncated,
            ..
        } = search;
        Ok(SelectionReport {
            outcome: finish_outcome(best, cancelled, items),
            stats: SearchStats {
                evaluated,
                truncated,
            },
        })
    }
}

struct KindSearch<'a> {
    items: &'a [Item],
    kinds: Vec<Kind>,
    config: &'a PackingConfig,
    progress: &'a Progress<'a>,
    /// Coils in kinds `k..`.
    suffix_count: Vec<usize>,
    /// Top-eligible coils in kinds `k..`.
    suffix_top_count: Vec<usize>,
    /// Total weight of kinds `k..`.
    suffix_weight: Vec<f64>,
    /// Heaviest unit weight in kinds `k..`.
    suffix_max_weight: Vec<f64>,
    /// Chosen `(kind, bottom count, top count)` along the current path.
    path: Vec<(usize, usize, usize)>,
    best: Option<Candidate>,
    nodes: u64,
    truncated: bool,
    cancelled: bool,
}

impl<'a> KindSearch<'a> {
    fn new(
        items: &'a [Item],
        kinds: Vec<Kind>,
        config: &'a PackingConfig,
        progress: &'a Progress<'a>,
    ) -> Self {
        let len = kinds.len();
        let mut suffix_count = vec![0; len + 1];
        let mut suffix_top_count = vec![0; len + 1];
        let mut suffix_weight = vec![0.0; len + 1];
        let mut suffix_max_weight = vec![0.0_f64; len + 1];
        for (k, kind) in kinds.iter().enumerate().rev() {
            let count = kind.members.len();
            suffix_count[k] = suffix_count[k + 1] + count;
            suffix_top_count[k] =
                suffix_top_count[k + 1] + if kind.top_eligible { count } else { 0 };
            suffix_weight[k] = suffix_weight[k + 1] + kind.weight * count as f64;
            suffix_max_weight[k] = suffix_max_weight[k + 1].max(kind.weight);
        }

        Self {
            items,
            kinds,
            config,
            progress,
            suffix_count,
            suffix_top_count,
            suffix_weight,
            suffix_max_weight,
            path: Vec::new(),
            best: None,
            nodes: 0,
            truncated: false,
            cancelled: false,
        }
    }

    /// Uses a greedy fill, in canonical form, as the first incumbent.
    fn seed(&mut self, kind_of: &[usize], bottom: &[usize], top: &[usize]) {
        let mut counts: Vec<(usize, usize)> = vec![(0, 0); self.kinds.len()];
        for &pos in bottom {
            counts[kind_of[pos]].0 += 1;
        }
        for &pos in top {
            counts[kind_of[pos]].1 += 1;
        }
        self.path = counts
            .into_iter()
            .enumerate()
            .filter(|(_, (b, t))| b + t > 0)
            .map(|(kind, (b, t))| (kind, b, t))
            .collect();
        self.evaluate_path();
        self.path.clear();
    }

    fn run(&mut self) {
        let _ = self.descend(0, 0, 0, 0.0);
    }

    /// Realises the current path canonically and offers it as a candidate.
    fn evaluate_path(&mut self) {
        let mut bottom = Vec::new();
        let mut top = Vec::new();
        for &(kind, b, t) in &self.path {
            let members = &self.kinds[kind].members;
            bottom.extend_from_slice(&members[..b]);
            top.extend_from_slice(&members[b..b + t]);
        }
        bottom.sort_unstable();
        top.sort_unstable();
        if let Some(candidate) = score_positions(self.items, &bottom, &top, self.config) {
            offer(&mut self.best, candidate);
        }
    }

    /// Whether no extension of the current node, itself included, can win.
    fn is_dominated(&self, start: usize, bottom_len: usize, top_len: usize, weight: f64) -> bool {
        let config = self.config;
        let max = config.max_container_weight;
        let slots_left = config
            .max_bottom_slots
            .saturating_sub(bottom_len)
            .saturating_add(config.max_top_slots.saturating_sub(top_len));
        let extra = self.suffix_weight[start]
            .min(slots_left as f64 * self.suffix_max_weight[start]);
        let reachable = weight + extra + weight_tolerance(max);

        if reachable < config.min_acceptable_weight {
            return true;
        }

        let Some(best) = &self.best else {
            return false;
        };
        let pairs = config
            .max_bottom_slots
            .min(bottom_len + self.suffix_count[start])
            .min(config.max_top_slots.min(top_len + self.suffix_top_count[start]));
        let bound = combined_score(pairs, weight_score(reachable.min(max), max), config);
        bound + EPSILON_SCORE < best.score
    }

    fn descend(
        &mut self,
        start: usize,
        bottom_len: usize,
        top_len: usize,
        weight: f64,
    ) -> ControlFlow<()> {
        if self.nodes >= self.config.search_node_limit {
            self.truncated = true;
            return ControlFlow::Break(());
        }
        if self.progress.is_cancelled() {
            self.cancelled = true;
            return ControlFlow::Break(());
        }
        self.nodes += 1;
        self.progress.tick();

        if self.is_dominated(start, bottom_len, top_len, weight) {
            return ControlFlow::Continue(());
        }

        let max = self.config.max_container_weight;
        let cap = max + weight_tolerance(max);
        if bottom_len > 0 && weight + weight_tolerance(max) >= self.config.min_acceptable_weight
        {
            self.evaluate_path();
        }

        for kind in start..self.kinds.len() {
            let count = self.kinds[kind].members.len();
            let unit = self.kinds[kind].weight;
            let eligible = self.kinds[kind].top_eligible;
            let max_bottom = count.min(self.config.max_bottom_slots - bottom_len);

            for b in (0..=max_bottom).rev() {
                let with_bottom = weight + b as f64 * unit;
                if with_bottom > cap {
                    continue;
                }
                let max_top = if eligible {
                    (count - b).min(self.config.max_top_slots - top_len)
                } else {
                    0
                };
                for t in (0..=max_top).rev() {
                    if b + t == 0 {
                        continue;
                    }
                    let with_top = with_bottom + t as f64 * unit;
                    if with_top > cap {
                        continue;
                    }
                    self.path.push((kind, b, t));
                    let flow = self.descend(kind + 1, bottom_len + b, top_len + t, with_top);
                    self.path.pop();
                    if flow.is_break() {
                        return flow;
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;

    fn pool_of(rows: &[(f64, f64)]) -> ItemPool {
        let items = rows
            .iter()
            .enumerate()
            .map(|(i, &(length, weight))| Item::new(ItemId(i), "P", length, weight).unwrap())
            .collect();
        ItemPool::new(items).unwrap()
    }

    fn config(max: f64, min: f64) -> PackingConfig {
        PackingConfig::builder()
            .max_container_weight(max)
            .min_acceptable_weight(min)
            .build()
    }

    fn select(
        strategy: &dyn SelectionStrategy,
        pool: &ItemPool,
        config: &PackingConfig,
    ) -> SelectionReport {
        strategy
            .select(pool, config, SearchControl::new())
            .expect("selection should not fail")
    }

    fn found(report: &SelectionReport) -> &Selection {
        match &report.outcome {
            SelectOutcome::Found(selection) => selection,
            other => panic!("expected a selection, got {:?}", other),
        }
    }

    fn three_coil_pool() -> ItemPool {
        pool_of(&[(1000.0, 1150.0), (1200.0, 1380.0), (1400.0, 1610.0)])
    }

    #[test]
    fn combinations_are_lexicographic() {
        let mut seen = Vec::new();
        let _ = for_each_combination(4, 2, |c| {
            seen.push(c.to_vec());
            ControlFlow::Continue(())
        });
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );

        let mut empty = 0;
        let _ = for_each_combination(3, 0, |c| {
            assert!(c.is_empty());
            empty += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(empty, 1);
    }

    #[test]
    fn binomial_values() {
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(11, 0), 1);
        assert_eq!(binomial(3, 4), 0);
        assert_eq!(binomial(40, 11), 2_311_801_440);
    }

    #[test]
    fn exhaustive_counts_every_pair() {
        let pool = pool_of(&[
            (1000.0, 1.0),
            (1300.0, 1.0),
            (1100.0, 1.0),
            (1500.0, 1.0),
            (1200.0, 1.0),
        ]);
        let cfg = config(2.0, 1.0);
        let report = select(&ExhaustiveScoredStrategy, &pool, &cfg);
        assert_eq!(u128::from(report.stats.evaluated), combination_total(5, 3, 11, 11));
    }

    #[test]
    fn exhaustive_picks_heaviest_paired_split() {
        let pool = three_coil_pool();
        let report = select(&ExhaustiveScoredStrategy, &pool, &config(3000.0, 2000.0));
        let selection = found(&report);
        assert_eq!(selection.bottom, vec![ItemId(2)]);
        assert_eq!(selection.top, vec![ItemId(1)]);
        assert!((selection.weight - 2990.0).abs() < 1e-9);
        assert!((selection.score - (1.0 + (1.0 - 10.0 / 3000.0))).abs() < 1e-12);
    }

    #[test]
    fn unbounded_slot_counts_do_not_overflow() {
        let pool = three_coil_pool();
        let reference = select(&ExhaustiveScoredStrategy, &pool, &config(3000.0, 2000.0));
        let cfg = PackingConfig {
            max_bottom_slots: usize::MAX,
            max_top_slots: usize::MAX,
            ..config(3000.0, 2000.0)
        };
        assert_eq!(select(&ExhaustiveScoredStrategy, &pool, &cfg).outcome, reference.outcome);
        assert_eq!(select(&BoundedSearchStrategy, &pool, &cfg).outcome, reference.outcome);
        assert_eq!(select(&GreedyStrategy, &pool, &cfg).outcome, reference.outcome);
    }

    #[test]
    fn all_strategies_agree_on_small_pool() {
        let pool = three_coil_pool();
        let cfg = config(3000.0, 2000.0);
        let reference = select(&ExhaustiveScoredStrategy, &pool, &cfg);
        assert_eq!(select(&BoundedSearchStrategy, &pool, &cfg).outcome, reference.outcome);
        assert_eq!(select(&GreedyStrategy, &pool, &cfg).outcome, reference.outcome);
    }

    #[test]
    fn no_feasible_container_below_minimum() {
        let pool = pool_of(&[(1000.0, 500.0), (1100.0, 600.0)]);
        let cfg = config(3000.0, 2000.0);
        for strategy in [StrategyKind::Greedy, StrategyKind::Exhaustive, StrategyKind::Bounded] {
            let report = select(strategy.build().as_ref(), &pool, &cfg);
            assert_eq!(report.outcome, SelectOutcome::NoFeasible, "{}", strategy);
        }
    }

    #[test]
    fn bounded_prefers_earliest_duplicates() {
        let pool = pool_of(&[
            (1000.0, 1000.0),
            (1400.0, 1500.0),
            (1000.0, 1000.0),
            (1400.0, 1500.0),
        ]);
        let cfg = config(2600.0, 2000.0);
        let reference = select(&ExhaustiveScoredStrategy, &pool, &cfg);
        let bounded = select(&BoundedSearchStrategy, &pool, &cfg);
        assert_eq!(bounded.outcome, reference.outcome);
        let selection = found(&bounded);
        assert_eq!(selection.bottom, vec![ItemId(1)]);
        assert_eq!(selection.top, vec![ItemId(0)]);
    }

    #[test]
    fn parallel_exhaustive_matches_sequential() {
        let pool = pool_of(&[
            (1000.0, 900.0),
            (1300.0, 1200.0),
            (1200.0, 1100.0),
            (1500.0, 1400.0),
            (1100.0, 1000.0),
            (1250.0, 1150.0),
        ]);
        let sequential = config(3500.0, 2000.0);
        let parallel = PackingConfig {
            parallel: true,
            ..sequential
        };
        assert_eq!(
            select(&ExhaustiveScoredStrategy, &pool, &parallel),
            select(&ExhaustiveScoredStrategy, &pool, &sequential)
        );
    }

    #[test]
    fn exhaustive_refuses_large_pools() {
        let rows: Vec<(f64, f64)> = (0..40).map(|_| (1000.0, 1150.0)).collect();
        let pool = pool_of(&rows);
        let cfg = PackingConfig {
            exhaustive_limit: 1_000,
            ..config(25_000.0, 20_000.0)
        };
        let err = ExhaustiveScoredStrategy
            .select(&pool, &cfg, SearchControl::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SelectionError::SearchSpaceTooLarge { limit: 1_000, .. }
        ));
    }

    #[test]
    fn bounded_handles_realistic_pool() {
        // Three orders of identical coils, far beyond exhaustive reach.
        let mut rows = Vec::new();
        rows.extend((0..30).map(|_| (1000.0, 1150.0)));
        rows.extend((0..25).map(|_| (1200.0, 1380.0)));
        rows.extend((0..20).map(|_| (1500.0, 1725.0)));
        let pool = pool_of(&rows);
        let cfg = config(25_000.0, 20_000.0);

        let report = select(&BoundedSearchStrategy, &pool, &cfg);
        assert!(!report.stats.truncated);
        let selection = found(&report);
        assert!(selection.weight <= 25_000.0 && selection.weight >= 20_000.0);
        assert!(selection.bottom.len() <= 11 && selection.top.len() <= 11);
    }

    #[test]
    fn pre_cancelled_search_reports_cancellation() {
        let pool = three_coil_pool();
        let cfg = config(3000.0, 2000.0);
        let token = CancelToken::new();
        token.cancel();
        for strategy in [StrategyKind::Greedy, StrategyKind::Exhaustive, StrategyKind::Bounded] {
            let report = strategy
                .build()
                .select(&pool, &cfg, SearchControl::new().with_cancel(&token))
                .unwrap();
            assert!(
                matches!(report.outcome, SelectOutcome::Cancelled(_)),
                "{} ignored the cancel token",
                strategy
            );
        }
    }

    #[test]
    fn node_budget_truncates_search() {
        let pool = three_coil_pool();
        let cfg = PackingConfig {
            search_node_limit: 1,
            ..config(3000.0, 2000.0)
        };
        let report = select(&BoundedSearchStrategy, &pool, &cfg);
        assert!(report.stats.truncated);
        // The greedy seed still provides a container.
        assert!(matches!(report.outcome, SelectOutcome::Found(_)));
    }

    #[test]
    fn observer_receives_progress() {
        let pool = three_coil_pool();
        let cfg = PackingConfig {
            progress_interval: 2,
            ..config(3000.0, 2000.0)
        };
        let calls = Mutex::new(Vec::new());
        let observer = |evaluated: u64, total: u64| {
            calls.lock().unwrap().push((evaluated, total));
        };
        let report = ExhaustiveScoredStrategy
            .select(&pool, &cfg, SearchControl::new().with_observer(&observer))
            .unwrap();

        let calls = calls.into_inner().unwrap();
        assert!(calls.len() >= 2);
        assert_eq!(calls.last(), Some(&(report.stats.evaluated, report.stats.evaluated)));
        assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("Greedy".parse::<StrategyKind>(), Ok(StrategyKind::Greedy));
        assert_eq!(" bounded ".parse::<StrategyKind>(), Ok(StrategyKind::Bounded));
        assert_eq!(
            "branch_and_bound".parse::<StrategyKind>(),
            Ok(StrategyKind::Bounded)
        );
        assert!("random".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::default(), StrategyKind::Bounded);
    }

    fn small_pool() -> impl Strategy<Value = Vec<(f64, f64)>> {
        const LENGTHS: [f64; 5] = [900.0, 1100.0, 1250.0, 1400.0, 1600.0];
        const WEIGHTS: [f64; 3] = [800.0, 1000.0, 1300.0];
        prop::collection::vec((0..LENGTHS.len(), 0..WEIGHTS.len()), 1..=7).prop_map(|picks| {
            picks
                .into_iter()
                .map(|(l, w)| (LENGTHS[l], WEIGHTS[w]))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 96,
            ..ProptestConfig::default()
        })]

        #[test]
        fn bounded_matches_exhaustive(rows in small_pool(), min in 1500.0..3500.0f64) {
            let pool = pool_of(&rows);
            let cfg = PackingConfig::builder()
                .max_container_weight(4000.0)
                .min_acceptable_weight(min)
                .max_bottom_slots(3)
                .max_top_slots(3)
                .build();

            let reference = select(&ExhaustiveScoredStrategy, &pool, &cfg);
            let bounded = select(&BoundedSearchStrategy, &pool, &cfg);
            prop_assert!(!bounded.stats.truncated);
            prop_assert_eq!(bounded.outcome, reference.outcome);
        }

        #[test]
        fn greedy_selection_is_feasible(rows in small_pool()) {
            let pool = pool_of(&rows);
            let cfg = config(4000.0, 1500.0);
            let report = select(&GreedyStrategy, &pool, &cfg);
            if let SelectOutcome::Found(selection) = report.outcome {
                let lookup = |ids: &[ItemId]| -> Vec<&Item> {
                    ids.iter()
                        .map(|id| pool.items().iter().find(|item| item.id() == *id).unwrap())
                        .collect()
                };
                let bottom = lookup(&selection.bottom);
                let top = lookup(&selection.top);
                prop_assert!(evaluate(&bottom, &top, &cfg).accepted().is_some());
            }
        }
    }
}
