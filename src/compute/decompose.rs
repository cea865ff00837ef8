//! Best-first decomposition of a [`CurveCover`] into a bounded set of index ranges.
//!
//! The loosest cell (largest expansion) is refined first. Refinement stops when the
//! loosest cell is within `maxExpansion`, when the depth bound is reached, or when
//! the range budget is spent.

use crate::compute::curve::CurveCell;
use crate::compute::mapper::{Assessment, CurveCover};
use crate::error::{PlannerError, Result};
use geo::{Rect, coord};
use geoplan_types::{CurveRange, RangeSettings};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio_util::sync::CancellationToken;

/// Deepest level the decomposer refines to (further capped by the curve resolution).
pub const MAX_RECURSION_DEPTH: u8 = 20;

/// An index range plus what the planner knows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub range: CurveRange,
    /// Covered measure ÷ true measure of the query inside this range.
    pub expansion: f64,
    /// Decomposition level the range was emitted at.
    pub level: u8,
    /// Region in degrees indexed by the range.
    pub footprint: Rect<f64>,
}

impl Envelope {
    pub fn new(range: CurveRange, expansion: f64, level: u8, footprint: Rect<f64>) -> Self {
        Self {
            range,
            expansion,
            level,
            footprint,
        }
    }
}

pub(crate) fn union_rect(a: &Rect<f64>, b: &Rect<f64>) -> Rect<f64> {
    Rect::new(
        coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

struct Candidate {
    cell: CurveCell,
    assessment: Assessment,
}

impl Candidate {
    fn expansion(&self) -> f64 {
        self.assessment.expansion()
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expansion()
            .total_cmp(&other.expansion())
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Running sums for a range built from several cells.
struct Accumulator {
    range: CurveRange,
    covered: f64,
    true_measure: f64,
    level: u8,
    footprint: Rect<f64>,
}

impl Accumulator {
    fn start(cover: &CurveCover, candidate: &Candidate) -> Self {
        Self {
            range: cover.curve().subtree_range(&candidate.cell),
            covered: candidate.assessment.covered,
            true_measure: candidate.assessment.true_measure,
            level: candidate.cell.level,
            footprint: cover.footprint(&candidate.cell),
        }
    }

    fn add(&mut self, cover: &CurveCover, candidate: &Candidate) {
        self.range = self
            .range
            .union(&cover.curve().subtree_range(&candidate.cell));
        self.covered += candidate.assessment.covered;
        self.true_measure += candidate.assessment.true_measure;
        self.level = self.level.min(candidate.cell.level);
        self.footprint = union_rect(&self.footprint, &cover.footprint(&candidate.cell));
    }

    fn finish(self) -> Envelope {
        let expansion = (self.covered / self.true_measure).max(1.0);
        Envelope::new(self.range, expansion, self.level, self.footprint)
    }
}

fn envelope(cover: &CurveCover, candidate: &Candidate) -> Envelope {
    Envelope::new(
        cover.curve().subtree_range(&candidate.cell),
        candidate.expansion(),
        candidate.cell.level,
        cover.footprint(&candidate.cell),
    )
}

fn assessed(cover: &CurveCover, cell: CurveCell) -> Option<Candidate> {
    cover
        .assess(&cell)
        .map(|assessment| Candidate { cell, assessment })
}

/// Merge cells whose subtree ranges touch into runs.
fn coalesce(cover: &CurveCover, mut cells: Vec<Candidate>) -> Vec<Envelope> {
    cells.sort_by_key(|c| cover.curve().subtree_range(&c.cell));
    let mut runs: Vec<Accumulator> = Vec::new();
    for candidate in &cells {
        let range = cover.curve().subtree_range(&candidate.cell);
        match runs.last_mut() {
            Some(run) if run.range.high >= range.low => run.add(cover, candidate),
            _ => runs.push(Accumulator::start(cover, candidate)),
        }
    }
    runs.into_iter().map(Accumulator::finish).collect()
}

/// One range spanning `dropped`, measured over every child inside that span.
fn coarsen(cover: &CurveCover, dropped: &[Candidate], kept: &[Candidate]) -> Option<Envelope> {
    let curve = cover.curve();
    let span = dropped
        .iter()
        .map(|c| curve.subtree_range(&c.cell))
        .reduce(|a, b| a.union(&b))?;
    let mut run: Option<Accumulator> = None;
    for candidate in dropped.iter().chain(kept.iter()) {
        let range = curve.subtree_range(&candidate.cell);
        if range.low < span.low || range.high > span.high {
            continue;
        }
        match run.as_mut() {
            Some(run) => run.add(cover, candidate),
            None => run = Some(Accumulator::start(cover, candidate)),
        }
    }
    run.map(Accumulator::finish)
}

/// Decompose `cover` into at most `settings.max_envelopes` ranges, sorted by `low`.
///
/// Ranges may overlap; the optimizer resolves that.
///
/// # Errors
///
/// [`PlannerError::BudgetExhausted`] when the starting cells cannot be packed into the
/// budget even after touching cells are merged, and [`PlannerError::Cancelled`] when
/// `cancel` fires between refinement steps.
pub fn decompose(
    cover: &CurveCover,
    settings: &RangeSettings,
    cancel: &CancellationToken,
) -> Result<Vec<Envelope>> {
    let budget = settings.max_envelopes;
    let curve = cover.curve();
    let initial: Vec<Candidate> = cover
        .cells()
        .iter()
        .filter_map(|cell| assessed(cover, *cell))
        .collect();

    if initial.is_empty() {
        return Ok(Vec::new());
    }

    if initial.len() > budget {
        let runs = coalesce(cover, initial);
        if runs.len() > budget {
            return Err(PlannerError::BudgetExhausted {
                required: runs.len(),
                max_envelopes: budget,
            });
        }
        log::debug!(
            "Starting cells exceed {} range(s); coalesced into {} run(s)",
            budget,
            runs.len()
        );
        return Ok(runs);
    }

    let mut done: Vec<Envelope> = Vec::with_capacity(budget.min(1024));
    let mut frontier: BinaryHeap<Candidate> = initial.into_iter().collect();

    while let Some(top) = frontier.pop() {
        if cancel.is_cancelled() {
            return Err(PlannerError::Cancelled);
        }

        if top.expansion() <= settings.max_expansion || top.cell.level >= cover.leaf_level() {
            done.push(envelope(cover, &top));
            continue;
        }

        let mut children: Vec<Candidate> = curve
            .children(&top.cell)
            .into_iter()
            .filter_map(|child| assessed(cover, child))
            .collect();
        if children.is_empty() {
            done.push(envelope(cover, &top));
            continue;
        }

        let own = curve.own_range(&top.cell).map(|range| {
            Envelope::new(
                range,
                top.expansion(),
                top.cell.level,
                cover.footprint(&top.cell),
            )
        });
        let reserved = usize::from(own.is_some());
        let available = budget.saturating_sub(done.len() + frontier.len());

        if children.len() + reserved <= available {
            done.extend(own);
            frontier.extend(children);
        } else if available >= reserved + 2 {
            children.sort_by(|a, b| {
                a.expansion()
                    .total_cmp(&b.expansion())
                    .then_with(|| a.cell.cmp(&b.cell))
            });
            let dropped = children.split_off(available - reserved - 1);
            done.extend(coarsen(cover, &dropped, &children));
            done.extend(own);
            frontier.extend(children);
        } else {
            done.push(envelope(cover, &top));
        }
    }

    done.sort_by_key(|e| (e.range.low, e.range.high));
    debug_assert!(done.len() <= budget);
    log::debug!(
        "Decomposed {} query into {} range(s)",
        cover.range_type(),
        done.len()
    );
    Ok(done)
}
