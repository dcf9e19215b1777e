//! Per-level, per-(node, predictor) argmax split search.
//!
//! A [`SplitDriver`] is stateless: it is handed a node's member rows (in a
//! predictor's rank order, already restricted to that node by the tree
//! builder's restage step) and emits the best [`SplitCandidate`] for one
//! predictor. The tree builder fans this out over `(node, predictor)`
//! pairs with `rayon` and reduces to one winner per node.

use rand::Rng;

use crate::runset::{LevelArena, SplitMode};

/// Small-factor threshold below which LH subsets are enumerated explicitly
/// rather than heap-ordered.
pub const SMALL_FACTOR_CEILING: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response<'a> {
    Regression(&'a [f64]),
    Classification { ctg: &'a [u32], ctg_width: usize },
}

/// Sign of a monotonicity constraint on a numeric regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monotone {
    None,
    Increasing,
    Decreasing,
}

/// The winning split for one (node, predictor) pair.
#[derive(Debug, Clone)]
pub struct SplitCandidate {
    pub pred_idx: usize,
    pub info: f64,
    pub kind: SplitKind,
    pub lh_samp_ct: u32,
    pub lh_idx_count: u32,
}

#[derive(Debug, Clone)]
pub enum SplitKind {
    /// Numeric cut: rows at rank `< rank_cut` (within the node's local rank
    /// order) go left; `split_val` is the threshold used at prediction time.
    Numeric { rank_cut: u32, split_val: f64 },
    /// Factor split: the set of factor levels routed left.
    Factor { lh_levels: Vec<u32> },
}

/// Evaluate every rank boundary of a numeric predictor for a node, given the
/// node's rows already in that predictor's rank order (ties collapsed is
/// not required — ties simply produce adjacent candidate boundaries with
/// identical value, which a downstream boundary check discards).
///
/// `values`/`response`/`s_count` are parallel arrays over the node's member
/// rows in ascending predictor-value order.
pub fn best_numeric_split(
    pred_idx: usize,
    values: &[f64],
    response: Response,
    s_count: &[u32],
    min_node: usize,
    monotone: Monotone,
) -> Option<SplitCandidate> {
    let n = values.len();
    if n < 2 * min_node.max(1) {
        return None;
    }

    match response {
        Response::Regression(y) => best_numeric_regression(pred_idx, values, y, s_count, min_node, monotone),
        Response::Classification { ctg, ctg_width } => {
            best_numeric_classification(pred_idx, values, ctg, ctg_width, s_count, min_node)
        }
    }
}

/// Variance-reduction argmax over rank boundaries. The criterion
/// `left_sum^2/left_s + right_sum^2/right_s - total_sum^2/total_s` is
/// algebraically equivalent to `total_sse - (left_sse + right_sse)` and
/// avoids tracking `sum(y^2)` incrementally.
fn best_numeric_regression(
    pred_idx: usize,
    values: &[f64],
    y: &[f64],
    s_count: &[u32],
    min_node: usize,
    monotone: Monotone,
) -> Option<SplitCandidate> {
    let n = values.len();
    let total_s: u32 = s_count.iter().sum();
    let total_sum: f64 = y.iter().zip(s_count).map(|(&yi, &c)| yi * c as f64).sum();

    let mut left_s = 0u32;
    let mut left_sum = 0.0f64;

    let mut best: Option<(f64, usize)> = None;
    for i in 0..n - 1 {
        left_s += s_count[i];
        left_sum += y[i] * s_count[i] as f64;

        if values[i] == values[i + 1] {
            continue; // only evaluate boundaries between distinct values
        }
        let right_s = total_s - left_s;
        if (left_s as usize) < min_node || (right_s as usize) < min_node {
            continue;
        }

        let right_sum = total_sum - left_sum;
        if monotone != Monotone::None {
            let left_mean = left_sum / left_s as f64;
            let right_mean = right_sum / right_s as f64;
            if monotone == Monotone::Increasing && left_mean > right_mean {
                continue;
            }
            if monotone == Monotone::Decreasing && left_mean < right_mean {
                continue;
            }
        }

        let info = left_sum * left_sum / left_s as f64 + right_sum * right_sum / right_s as f64
            - total_sum * total_sum / total_s as f64;

        if info > 0.0 && best.map(|(b, _)| info > b).unwrap_or(true) {
            best = Some((info, i));
        }
    }

    best.map(|(info, i)| SplitCandidate {
        pred_idx,
        info,
        kind: SplitKind::Numeric {
            rank_cut: (i + 1) as u32,
            split_val: (values[i] + values[i + 1]) / 2.0,
        },
        lh_samp_ct: s_count[..=i].iter().sum(),
        lh_idx_count: (i + 1) as u32,
    })
}

fn best_numeric_classification(
    pred_idx: usize,
    values: &[f64],
    ctg: &[u32],
    ctg_width: usize,
    s_count: &[u32],
    min_node: usize,
) -> Option<SplitCandidate> {
    let n = values.len();
    let mut total_ctg = vec![0u32; ctg_width];
    for i in 0..n {
        total_ctg[ctg[i] as usize] += s_count[i];
    }
    let total_s: u32 = s_count.iter().sum();

    let mut left_ctg = vec![0u32; ctg_width];
    let mut left_s = 0u32;

    let mut best: Option<(f64, usize)> = None;
    for i in 0..n - 1 {
        left_s += s_count[i];
        left_ctg[ctg[i] as usize] += s_count[i];

        if values[i] == values[i + 1] {
            continue;
        }
        let right_s = total_s - left_s;
        if (left_s as usize) < min_node || (right_s as usize) < min_node {
            continue;
        }

        let gini_left = gini_impurity(&left_ctg, left_s);
        let right_ctg: Vec<u32> = total_ctg
            .iter()
            .zip(&left_ctg)
            .map(|(&t, &l)| t - l)
            .collect();
        let gini_right = gini_impurity(&right_ctg, right_s);
        let total_gini = gini_impurity(&total_ctg, total_s);

        let weighted = (left_s as f64 * gini_left + right_s as f64 * gini_right) / total_s as f64;
        let info = total_gini - weighted;

        if info > 0.0 && best.map(|(b, _)| info > b).unwrap_or(true) {
            best = Some((info, i));
        }
    }

    best.map(|(info, i)| SplitCandidate {
        pred_idx,
        info,
        kind: SplitKind::Numeric {
            rank_cut: (i + 1) as u32,
            split_val: (values[i] + values[i + 1]) / 2.0,
        },
        lh_samp_ct: s_count[..=i].iter().sum(),
        lh_idx_count: (i + 1) as u32,
    })
}

fn gini_impurity(ctg_counts: &[u32], total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mut acc = 1.0;
    for &c in ctg_counts {
        let p = c as f64 / total as f64;
        acc -= p * p;
    }
    acc
}

/// Evaluate a factor predictor for one node: collapse the node's rows
/// (already grouped into runs and accumulated into `arena`'s pair `i`) into
/// a split, dispatching on cardinality and response type.
pub fn best_factor_split<R: Rng>(
    pred_idx: usize,
    arena: &mut LevelArena,
    pair_idx: usize,
    mode: SplitMode,
    min_node: usize,
    rng: &mut R,
) -> Option<SplitCandidate> {
    let _ = rng; // arena's rvWide strip is pre-filled at LevelArena::build time
    let run_count = arena.pair(pair_idx).run_count();
    if run_count < 2 {
        return None; // singleton: elided from split consideration
    }

    let card = run_count as u32;
    if card <= SMALL_FACTOR_CEILING {
        best_factor_subset(pred_idx, arena, pair_idx, mode, min_node)
    } else if matches!(mode, SplitMode::WideClassification { .. }) {
        arena.de_wide(pair_idx);
        best_factor_subset(pred_idx, arena, pair_idx, mode, min_node)
    } else {
        match mode {
            SplitMode::Regression => arena.heap_mean(pair_idx),
            SplitMode::BinaryClassification => arena.heap_binary(pair_idx),
            SplitMode::WideClassification { .. } => unreachable!("handled above"),
        }
        let run_count = arena.pair(pair_idx).run_count();
        arena.de_pop(pair_idx, run_count);
        best_factor_monotone_cut(pred_idx, arena, pair_idx, mode, min_node)
    }
}

/// Variance reduction (regression) or Gini gain (classification) for a
/// candidate left/right split of total `(left_s, left_sum)` /
/// `(total_s, total_sum)`, mirroring `best_numeric_split`'s criteria so
/// factor and numeric candidates are commensurable under `argmax`.
fn split_info(mode: SplitMode, left_s: u32, total_s: u32, left_sum: f64, total_sum: f64, left_ctg: Option<&[f64]>, total_ctg: Option<&[f64]>) -> f64 {
    match mode {
        SplitMode::Regression => {
            let right_s = total_s - left_s;
            if right_s == 0 || left_s == 0 {
                return 0.0;
            }
            let right_sum = total_sum - left_sum;
            left_sum * left_sum / left_s as f64 + right_sum * right_sum / right_s as f64
                - total_sum * total_sum / total_s as f64
        }
        SplitMode::BinaryClassification | SplitMode::WideClassification { .. } => {
            let left_ctg = left_ctg.expect("classification mode carries ctg sums");
            let total_ctg = total_ctg.expect("classification mode carries ctg sums");
            let right_s = total_s - left_s;
            if right_s == 0 || left_s == 0 {
                return 0.0;
            }
            let right_ctg: Vec<f64> = total_ctg.iter().zip(left_ctg).map(|(&t, &l)| t - l).collect();
            let gini_left = gini_impurity_f64(left_ctg, left_s);
            let gini_right = gini_impurity_f64(&right_ctg, right_s);
            let total_gini = gini_impurity_f64(total_ctg, total_s);
            let weighted = (left_s as f64 * gini_left + right_s as f64 * gini_right) / total_s as f64;
            total_gini - weighted
        }
    }
}

fn gini_impurity_f64(ctg_sums: &[f64], total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mut acc = 1.0;
    for &c in ctg_sums {
        let p = c / total as f64;
        acc -= p * p;
    }
    acc
}

fn best_factor_subset(
    pred_idx: usize,
    arena: &mut LevelArena,
    pair_idx: usize,
    mode: SplitMode,
    min_node: usize,
) -> Option<SplitCandidate> {
    let run_count = arena.pair(pair_idx).run_count();
    let totals = arena.totals(pair_idx);
    let total_ctg = if matches!(mode, SplitMode::Regression) {
        None
    } else {
        Some(arena.ctg_totals(pair_idx))
    };
    let n_masks = 1u32 << (run_count.saturating_sub(1));
    let mut best: Option<(f64, u32)> = None;

    for mask in 1..n_masks {
        arena.lh_bits(pair_idx, mask);
        let p = *arena.pair(pair_idx);
        let left_s = p.lh_samp_ct();
        let right_s = totals.0 - left_s;
        if (left_s as usize) < min_node || (right_s as usize) < min_node {
            continue;
        }
        let mut left_sum = 0.0f64;
        let mut left_ctg = total_ctg.as_ref().map(|t| vec![0.0f64; t.len()]);
        for k in 0..run_count {
            if mask & (1 << k) == 0 {
                continue;
            }
            let run = arena.run_at(pair_idx, k);
            left_sum += run.sum;
            if let Some(left_ctg) = left_ctg.as_mut() {
                let row = arena.ctg_at(pair_idx, k);
                for (l, v) in left_ctg.iter_mut().zip(row) {
                    *l += v;
                }
            }
        }
        let info = split_info(
            mode,
            left_s,
            totals.0,
            left_sum,
            totals.1,
            left_ctg.as_deref(),
            total_ctg.as_deref(),
        );
        if info > 0.0 && best.map(|(b, _)| info > b).unwrap_or(true) {
            best = Some((info, mask));
        }
    }

    best.map(|(info, mask)| {
        arena.lh_bits(pair_idx, mask);
        let p = *arena.pair(pair_idx);
        let lh_levels: Vec<u32> = (0..run_count)
            .filter(|k| mask & (1 << k) != 0)
            .map(|k| arena.run_level(pair_idx, k))
            .collect();
        SplitCandidate {
            pred_idx,
            info,
            kind: SplitKind::Factor { lh_levels },
            lh_samp_ct: p.lh_samp_ct(),
            lh_idx_count: p.lh_idx_count(),
        }
    })
}

fn best_factor_monotone_cut(
    pred_idx: usize,
    arena: &mut LevelArena,
    pair_idx: usize,
    mode: SplitMode,
    min_node: usize,
) -> Option<SplitCandidate> {
    let run_count = arena.pair(pair_idx).run_count();
    let totals = arena.totals(pair_idx);
    let total_ctg = if matches!(mode, SplitMode::Regression) {
        None
    } else {
        Some(arena.ctg_totals(pair_idx))
    };
    let mut best: Option<(f64, usize)> = None;

    for cut in 0..run_count.saturating_sub(1) {
        arena.lh_slots(pair_idx, cut);
        let p = *arena.pair(pair_idx);
        let left_s = p.lh_samp_ct();
        let right_s = totals.0 - left_s;
        if (left_s as usize) < min_node || (right_s as usize) < min_node {
            continue;
        }
        let mut left_sum = 0.0f64;
        let mut left_ctg = total_ctg.as_ref().map(|t| vec![0.0f64; t.len()]);
        for slot in 0..=cut {
            let run = arena.run_at_out_slot(pair_idx, slot);
            left_sum += run.sum;
            if let Some(left_ctg) = left_ctg.as_mut() {
                let row = arena.ctg_at_out_slot(pair_idx, slot);
                for (l, v) in left_ctg.iter_mut().zip(row) {
                    *l += v;
                }
            }
        }
        let info = split_info(
            mode,
            left_s,
            totals.0,
            left_sum,
            totals.1,
            left_ctg.as_deref(),
            total_ctg.as_deref(),
        );
        if info > 0.0 && best.map(|(b, _)| info > b).unwrap_or(true) {
            best = Some((info, cut));
        }
    }

    best.map(|(info, cut)| {
        arena.lh_slots(pair_idx, cut);
        let p = *arena.pair(pair_idx);
        let mut lh_levels = Vec::with_capacity(cut + 1);
        for slot in 0..=cut {
            let (_, _, rank) = arena.bounds(pair_idx, slot);
            lh_levels.push(rank);
        }
        SplitCandidate {
            pred_idx,
            info,
            kind: SplitKind::Factor { lh_levels },
            lh_samp_ct: p.lh_samp_ct(),
            lh_idx_count: p.lh_idx_count(),
        }
    })
}

/// Reduce a list of per-predictor candidates for one node to the argmax,
/// ties broken by lowest `pred_idx` then lowest rank/cut.
pub fn argmax(candidates: Vec<Option<SplitCandidate>>) -> Option<SplitCandidate> {
    candidates
        .into_iter()
        .flatten()
        .fold(None, |best: Option<SplitCandidate>, cand| match &best {
            None => Some(cand),
            Some(b) => {
                if cand.info > b.info
                    || (cand.info == b.info && cand.pred_idx < b.pred_idx)
                {
                    Some(cand)
                } else {
                    best
                }
            }
        })
}
