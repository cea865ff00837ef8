//! Post-decomposition range optimization.
//!
//! Repeats three steps until nothing changes: merge touching ranges, collapse
//! ranges that overlap by at least `maxRangeOverlap`, and merge the closest
//! neighbours while over `maxEnvelopes`. Then, if `rangeSplitThreshold` is set,
//! splits long ranges that overlap nothing.

use crate::compute::decompose::{Envelope, union_rect};
use geoplan_types::{CurveRange, RangeSettings};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Fixpoint passes allowed per range before the optimizer gives up.
pub const OPTIMIZER_PASSES_PER_ENVELOPE: usize = 4;

/// Optimize decomposed ranges. Returns the input unchanged unless `optimize_ranges` is set.
///
/// # Examples
///
/// ```
/// use geo::{Rect, coord};
/// use geoplan::compute::decompose::Envelope;
/// use geoplan::compute::optimize::optimize;
/// use geoplan_types::{CurveRange, RangeSettings};
///
/// let footprint = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
/// let envelopes = vec![
///     Envelope::new(CurveRange::new(0, 10), 1.5, 4, footprint),
///     Envelope::new(CurveRange::new(10, 20), 1.5, 4, footprint),
///     Envelope::new(CurveRange::new(15, 30), 3.0, 4, footprint),
/// ];
/// let settings = RangeSettings::new(8, 2.0).with_optimize_ranges(true);
/// let optimized = optimize(envelopes, &settings);
/// assert_eq!(optimized.len(), 1);
/// assert_eq!(optimized[0].range, CurveRange::new(0, 30));
/// ```
pub fn optimize(envelopes: Vec<Envelope>, settings: &RangeSettings) -> Vec<Envelope> {
    if !settings.optimize_ranges || envelopes.is_empty() {
        return envelopes;
    }

    let threshold = settings.max_range_overlap.unwrap_or(0.0);
    let max_passes = settings
        .max_envelopes
        .max(envelopes.len())
        .max(1)
        .saturating_mul(OPTIMIZER_PASSES_PER_ENVELOPE);
    let mut ranges = envelopes;
    let mut passes = 0;

    loop {
        passes += 1;
        sort(&mut ranges);
        let merged = merge_touching(&mut ranges);
        let collapsed = resolve_overlaps(&mut ranges, threshold);
        let capped = enforce_budget(&mut ranges, settings.max_envelopes);
        if !(merged || collapsed || capped) {
            break;
        }
        if passes >= max_passes {
            log::warn!(
                "Range optimizer stopped after {} passes with {} range(s)",
                passes,
                ranges.len()
            );
            break;
        }
    }

    if let Some(threshold) = settings.range_split_threshold {
        sort(&mut ranges);
        let allowed = max_passes.saturating_sub(passes);
        let splits = split_long_ranges(&mut ranges, threshold, settings.max_envelopes, allowed);
        if splits == allowed && allowed > 0 {
            log::warn!("Range optimizer stopped splitting after {} split(s)", splits);
        }
    }

    sort(&mut ranges);
    ranges
}

fn sort(ranges: &mut [Envelope]) {
    ranges.sort_by_key(|e| (e.range.low, e.range.high));
}

/// Weighted by span; exact when both sides carry the same expansion.
fn combined_expansion(a: &Envelope, b: &Envelope) -> f64 {
    if a.expansion == b.expansion {
        return a.expansion;
    }
    let (wa, wb) = (a.range.span() as f64, b.range.span() as f64);
    (a.expansion * wa + b.expansion * wb) / (wa + wb)
}

/// `retained` takes over the span of `absorbed`.
fn absorb(retained: &Envelope, absorbed: &Envelope) -> Envelope {
    Envelope {
        range: retained.range.union(&absorbed.range),
        expansion: combined_expansion(retained, absorbed),
        level: retained.level.min(absorbed.level),
        footprint: union_rect(&retained.footprint, &absorbed.footprint),
    }
}

/// Merge chains of ranges where one ends exactly where the next begins.
fn merge_touching(ranges: &mut Vec<Envelope>) -> bool {
    let mut by_low: FxHashMap<u64, usize> = FxHashMap::default();
    for (i, envelope) in ranges.iter().enumerate() {
        by_low.entry(envelope.range.low).or_insert(i);
    }

    let mut consumed = vec![false; ranges.len()];
    let mut merged = Vec::with_capacity(ranges.len());
    let mut changed = false;
    for i in 0..ranges.len() {
        if consumed[i] {
            continue;
        }
        consumed[i] = true;
        let mut current = ranges[i].clone();
        while let Some(&next) = by_low.get(&current.range.high) {
            if consumed[next] {
                break;
            }
            consumed[next] = true;
            current = absorb(&current, &ranges[next]);
            changed = true;
        }
        merged.push(current);
    }

    *ranges = merged;
    changed
}

/// Overlap as a fraction of the shorter range.
fn overlap_ratio(a: &CurveRange, b: &CurveRange) -> f64 {
    let overlap = a.overlap(b);
    if overlap == 0 {
        return 0.0;
    }
    overlap as f64 / a.span().min(b.span()) as f64
}

/// Collapse every pair whose overlap ratio reaches `threshold`. Input must be sorted.
fn resolve_overlaps(ranges: &mut Vec<Envelope>, threshold: f64) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < ranges.len() {
        let mut j = i + 1;
        while j < ranges.len() && ranges[j].range.low < ranges[i].range.high {
            let a = &ranges[i];
            let b = &ranges[j];
            if a.range.overlap(&b.range) > 0 && overlap_ratio(&a.range, &b.range) >= threshold {
                // the tighter range is retained
                let collapsed = if b.expansion < a.expansion {
                    absorb(b, a)
                } else {
                    absorb(a, b)
                };
                ranges[i] = collapsed;
                ranges.remove(j);
                changed = true;
            } else {
                j += 1;
            }
        }
        i += 1;
    }
    changed
}

/// Merge the two neighbours with the smallest gap until at most `max_envelopes` remain.
fn enforce_budget(ranges: &mut Vec<Envelope>, max_envelopes: usize) -> bool {
    let mut changed = false;
    while ranges.len() > max_envelopes.max(1) {
        let closest = ranges
            .windows(2)
            .enumerate()
            .min_by_key(|(_, pair)| pair[1].range.low.saturating_sub(pair[0].range.high))
            .map(|(i, _)| i);
        let Some(i) = closest else { break };
        let next = ranges.remove(i + 1);
        ranges[i] = absorb(&ranges[i], &next);
        changed = true;
    }
    changed
}

/// Halve the longest ranges above `threshold` while under the budget, at most
/// `max_splits` times. Returns the number of splits made.
///
/// Only ranges that overlap no other range are split. Input must be sorted.
fn split_long_ranges(
    ranges: &mut Vec<Envelope>,
    threshold: u64,
    max_envelopes: usize,
    max_splits: usize,
) -> usize {
    let splittable = |e: &Envelope| e.range.span() > threshold && e.range.span() >= 2;

    // Sorted by low: a range overlaps a later one iff it overlaps its successor, and
    // an earlier one iff the running maximum of `high` reaches past its `low`.
    let mut heap = BinaryHeap::new();
    let mut reach = 0u64;
    for (i, envelope) in ranges.iter().enumerate() {
        let overlaps_before = i > 0 && reach > envelope.range.low;
        let overlaps_after = ranges
            .get(i + 1)
            .is_some_and(|next| envelope.range.overlap(&next.range) > 0);
        reach = reach.max(envelope.range.high);
        if !overlaps_before && !overlaps_after && splittable(envelope) {
            heap.push((envelope.range.span(), Reverse(envelope.range.low), i));
        }
    }

    let mut splits = 0;
    while ranges.len() < max_envelopes && splits < max_splits {
        let Some((_, _, i)) = heap.pop() else { break };
        let whole = ranges[i].clone();
        let mid = whole.range.low + whole.range.span() / 2;
        ranges[i] = Envelope {
            range: CurveRange::new(whole.range.low, mid),
            ..whole.clone()
        };
        ranges.push(Envelope {
            range: CurveRange::new(mid, whole.range.high),
            ..whole
        });
        splits += 1;

        let upper = ranges.len() - 1;
        for index in [i, upper] {
            let half = &ranges[index];
            if splittable(half) {
                heap.push((half.range.span(), Reverse(half.range.low), index));
            }
        }
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};

    fn envelope(low: u64, high: u64, expansion: f64) -> Envelope {
        Envelope::new(
            CurveRange::new(low, high),
            expansion,
            6,
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }),
        )
    }

    fn ranges(envelopes: &[Envelope]) -> Vec<(u64, u64)> {
        envelopes.iter().map(|e| (e.range.low, e.range.high)).collect()
    }

    fn assert_disjoint(envelopes: &[Envelope]) {
        for (i, a) in envelopes.iter().enumerate() {
            for b in &envelopes[i + 1..] {
                assert_eq!(a.range.overlap(&b.range), 0, "{} overlaps {}", a.range, b.range);
            }
        }
    }

    #[test]
    fn test_pass_through_when_disabled() {
        let input = vec![envelope(10, 20, 1.0), envelope(0, 15, 2.0)];
        let output = optimize(input.clone(), &RangeSettings::new(8, 2.0));
        assert_eq!(output, input);
    }

    #[test]
    fn test_merges_touching_chain() {
        let settings = RangeSettings::new(8, 2.0).with_optimize_ranges(true);
        let output = optimize(
            vec![envelope(20, 30, 1.0), envelope(0, 10, 1.0), envelope(10, 20, 1.0), envelope(40, 50, 1.0)],
            &settings,
        );
        assert_eq!(ranges(&output), vec![(0, 30), (40, 50)]);
        assert_eq!(output[0].expansion, 1.0);
    }

    #[test]
    fn test_unset_overlap_gives_disjoint_output() {
        let settings = RangeSettings::new(8, 2.0).with_optimize_ranges(true);
        let output = optimize(
            vec![
                envelope(0, 100, 3.0),
                envelope(10, 20, 1.0),
                envelope(90, 150, 2.0),
                envelope(200, 210, 1.0),
                envelope(205, 206, 1.0),
            ],
            &settings,
        );
        assert_disjoint(&output);
        assert_eq!(ranges(&output), vec![(0, 150), (200, 210)]);
    }

    #[test]
    fn test_overlap_threshold_keeps_small_overlaps() {
        let settings = RangeSettings::new(8, 2.0)
            .with_optimize_ranges(true)
            .with_max_range_overlap(0.5);
        // overlap 10 of shorter 100 (0.1) stays; 40 of 50 (0.8) collapses
        let output = optimize(
            vec![envelope(0, 100, 1.0), envelope(90, 190, 1.0), envelope(300, 350, 2.0), envelope(310, 400, 1.0)],
            &settings,
        );
        assert_eq!(ranges(&output), vec![(0, 100), (90, 190), (300, 400)]);
        for (i, a) in output.iter().enumerate() {
            for b in &output[i + 1..] {
                assert!(overlap_ratio(&a.range, &b.range) < 0.5);
            }
        }
    }

    #[test]
    fn test_looser_range_is_absorbed() {
        let settings = RangeSettings::new(8, 2.0).with_optimize_ranges(true);
        let output = optimize(vec![envelope(0, 10, 4.0), envelope(5, 15, 1.0)], &settings);
        assert_eq!(ranges(&output), vec![(0, 15)]);
        assert!(output[0].expansion > 1.0 && output[0].expansion < 4.0);
    }

    #[test]
    fn test_budget_merges_closest_neighbours() {
        let settings = RangeSettings::new(2, 2.0).with_optimize_ranges(true);
        let output = optimize(
            vec![envelope(0, 10, 1.0), envelope(12, 20, 1.0), envelope(100, 110, 1.0)],
            &settings,
        );
        assert_eq!(ranges(&output), vec![(0, 20), (100, 110)]);
    }

    #[test]
    fn test_split_largest_first_within_budget() {
        let settings = RangeSettings::new(4, 2.0)
            .with_optimize_ranges(true)
            .with_range_split_threshold(50);
        let output = optimize(vec![envelope(0, 400, 1.5), envelope(1000, 1060, 1.5)], &settings);
        assert_eq!(output.len(), 4);
        assert_eq!(ranges(&output), vec![(0, 100), (100, 200), (200, 400), (1000, 1060)]);
        assert!(output.iter().all(|e| e.expansion == 1.5));
    }

    #[test]
    fn test_overlapping_range_is_not_split() {
        let settings = RangeSettings::new(8, 2.0)
            .with_optimize_ranges(true)
            .with_max_range_overlap(0.9)
            .with_range_split_threshold(10);
        let output = optimize(vec![envelope(0, 100, 1.0), envelope(95, 200, 1.0)], &settings);
        assert_eq!(ranges(&output), vec![(0, 100), (95, 200)]);
    }

    #[test]
    fn test_huge_budget_does_not_overflow() {
        let settings = RangeSettings::new(usize::MAX / 2, 2.0).with_optimize_ranges(true);
        assert!(settings.violations().is_empty());
        let output = optimize(vec![envelope(0, 10, 1.0), envelope(20, 30, 1.0)], &settings);
        assert_eq!(ranges(&output), vec![(0, 10), (20, 30)]);

        let settings = settings.with_range_split_threshold(4);
        let output = optimize(vec![envelope(0, 16, 1.0)], &settings);
        assert_eq!(ranges(&output), vec![(0, 4), (4, 8), (8, 12), (12, 16)]);
    }

    #[test]
    fn test_many_splits_stay_disjoint() {
        let settings = RangeSettings::new(1500, 2.0)
            .with_optimize_ranges(true)
            .with_range_split_threshold(1);
        let output = optimize(vec![envelope(0, 1 << 40, 1.0)], &settings);
        assert_eq!(output.len(), 1500);
        assert_disjoint(&output);
        assert_eq!(output.first().unwrap().range.low, 0);
        assert_eq!(output.last().unwrap().range.high, 1 << 40);

        let settings = RangeSettings::new(8, 2.0)
            .with_optimize_ranges(true)
            .with_range_split_threshold(1);
        assert_eq!(optimize(vec![envelope(0, 1 << 20, 1.0)], &settings).len(), 8);
    }

    #[test]
    fn test_idempotent() {
        let inputs = vec![
            vec![envelope(0, 100, 3.0), envelope(10, 20, 1.0), envelope(100, 130, 2.0), envelope(500, 900, 1.2)],
            vec![envelope(0, 64, 1.0), envelope(64, 128, 1.5), envelope(1 << 40, (1 << 40) + 1000, 2.0)],
        ];
        let settings = [
            RangeSettings::new(4, 2.0).with_optimize_ranges(true),
            RangeSettings::new(6, 2.0)
                .with_optimize_ranges(true)
                .with_range_split_threshold(16),
            RangeSettings::new(3, 2.0)
                .with_optimize_ranges(true)
                .with_max_range_overlap(0.25)
                .with_range_split_threshold(100),
        ];
        for input in &inputs {
            for s in &settings {
                let once = optimize(input.clone(), s);
                let twice = optimize(once.clone(), s);
                assert_eq!(once, twice);
                assert!(once.len() <= s.max_envelopes);
            }
        }
    }
}
