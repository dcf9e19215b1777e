//! Row-blocked ensemble walk: regression scores, classification votes and
//! probabilities, and quantile aggregation.
//!
//! Rows within a block are scored in parallel via `rayon`; each row writes
//! to disjoint output slots, so no shared accumulator is needed. Blocks are
//! processed via an indexed `into_par_iter().map(..).collect()`, which
//! preserves ascending block order in the output regardless of completion
//! order — the summation order this module documents and holds stable is
//! ascending tree index within a row, then ascending row-block index.

use log::warn;
use rayon::prelude::*;

use crate::bitmatrix::BitMatrix;
use crate::config::PredictParams;
use crate::error::{ForestError, Result};
use crate::forest::{argmax_lowest_index, Forest, ResponseKind};
use crate::predblock::PredBlock;

/// Target row-block size for the outer prediction loop (cache occupancy).
pub const DEFAULT_ROW_BLOCK: usize = 4096;

/// A finished regression pass: the per-row mean prediction, and — when a
/// [`QuantileRequest`] was supplied — the requested quantiles per row.
#[derive(Debug, Clone)]
pub struct RegressionPrediction {
    pub y_pred: Vec<f64>,
    /// `q_pred[row][i]` is the prediction for `quant_vec[i]`.
    pub q_pred: Option<Vec<Vec<f64>>>,
}

/// A finished classification pass.
#[derive(Debug, Clone)]
pub struct ClassificationPrediction {
    pub y_pred: Vec<u32>,
    /// Row-major `n_row * ctg_width` de-jittered integer vote counts.
    pub census: Vec<u32>,
    /// Row-major `n_row * ctg_width`, row-normalized to sum to 1; `None`
    /// when the caller didn't ask for probabilities.
    pub prob: Option<Vec<f64>>,
}

/// A confusion matrix and per-category error rate against known labels.
#[derive(Debug, Clone)]
pub struct Confusion {
    /// Row-major `ctg_width * ctg_width`; `conf[true * ctg_width + pred]`.
    pub conf: Vec<u32>,
    pub error: Vec<f64>,
}

/// Bucket `yRanked` against requested quantiles for one row's contributing
/// leaves.
#[derive(Debug, Clone, Copy)]
pub struct QuantileRequest<'a> {
    pub y_ranked: &'a [f64],
    pub q_bin: usize,
    pub quant_vec: &'a [f64],
}

/// Descend every tree for the rows in `[row_start, row_end)`, returning a
/// row-major `(row_end - row_start) * n_tree` array of leaf positions, with
/// `-1` at `(row, t)` when `bag` marks that row in-bag for tree `t`.
fn predict_across(
    forest: &Forest,
    block: &PredBlock,
    bag: Option<&BitMatrix>,
    row_start: usize,
    row_end: usize,
) -> Result<Vec<i32>> {
    let n_tree = forest.n_tree();
    let n_rows = row_end - row_start;
    let n_pred_num = forest.n_pred_num();
    let n_fac = block.n_pred()? - n_pred_num;
    let mut out = vec![-1i32; n_rows * n_tree];

    // resolve each row's feature values once, up front, so the inner
    // per-tree descend takes plain infallible closures
    let mut num_vals = vec![0.0f64; n_pred_num];
    let mut fac_vals = vec![0u32; n_fac];
    for row in row_start..row_end {
        for p in 0..n_pred_num {
            num_vals[p] = block.predict_num_val(row, p)?;
        }
        for f in 0..n_fac {
            let code = block.predict_fac_val(row, f)?;
            fac_vals[f] = if code < 0 { u32::MAX } else { code as u32 };
        }
        for t in 0..n_tree {
            if let Some(bag) = bag {
                if bag.get(row, t) {
                    continue;
                }
            }
            let leaf_pos = forest.descend(t, |p| num_vals[p], |fac_idx| fac_vals[fac_idx]);
            out[(row - row_start) * n_tree + t] = leaf_pos as i32;
        }
    }
    Ok(out)
}

fn row_blocks(n_row: usize, row_block: usize) -> usize {
    (n_row + row_block - 1) / row_block.max(1)
}

/// Score a regression forest over every row of a predict-installed
/// [`PredBlock`]. `bag`, when given, suppresses each row's in-bag trees
/// (out-of-bag validation scoring); pass `None` to let every tree
/// contribute (fresh external rows). A row with zero contributing trees
/// scores `NaN` — see the open question in `DESIGN.md` on this precondition.
///
/// `params.row_block` sizes the outer row-blocked loop. When `y_ranked` (the
/// training response in ascending-rank order) is given and `params.quant_vec`
/// is non-empty, each row's leaves are additionally bucketed against
/// `params.q_bin` bins to answer the requested quantiles.
pub fn predict_regression(
    forest: &Forest,
    block: &PredBlock,
    bag: Option<&BitMatrix>,
    params: &PredictParams,
    y_ranked: Option<&[f64]>,
) -> Result<RegressionPrediction> {
    if !matches!(forest.response(), ResponseKind::Regression) {
        return Err(ForestError::Internal(
            "predict_regression called against a classification forest".into(),
        ));
    }
    let quantile = match y_ranked {
        Some(y_ranked) if !params.quant_vec.is_empty() => Some(QuantileRequest {
            y_ranked,
            q_bin: params.q_bin,
            quant_vec: &params.quant_vec,
        }),
        _ => None,
    };
    let n_row = block.n_row()?;
    let n_tree = forest.n_tree();
    let n_blocks = row_blocks(n_row, params.row_block);

    let block_results: Vec<(Vec<f64>, Vec<Vec<f64>>)> = (0..n_blocks)
        .into_par_iter()
        .map(|b| {
            let row_start = b * params.row_block;
            let row_end = (row_start + params.row_block).min(n_row);
            let leaves = predict_across(forest, block, bag, row_start, row_end)?;

            let mut y_pred = Vec::with_capacity(row_end - row_start);
            let mut q_pred = Vec::new();
            for r in 0..(row_end - row_start) {
                let row_leaves = &leaves[r * n_tree..(r + 1) * n_tree];
                let mut sum = 0.0f64;
                let mut contributing = 0u32;
                for &l in row_leaves {
                    if l >= 0 {
                        sum += forest.leaf_val(l as u32);
                        contributing += 1;
                    }
                }
                y_pred.push(if contributing == 0 {
                    warn!("row {} has zero contributing trees; scoring NaN", row_start + r);
                    f64::NAN
                } else {
                    sum / contributing as f64
                });
                if let Some(q) = &quantile {
                    q_pred.push(predict_quantile_row(forest, row_leaves, q));
                }
            }
            Ok::<_, ForestError>((y_pred, q_pred))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut y_pred = Vec::with_capacity(n_row);
    let mut q_pred_all = quantile.map(|_| Vec::with_capacity(n_row));
    for (y, q) in block_results {
        y_pred.extend(y);
        if let Some(acc) = &mut q_pred_all {
            acc.extend(q);
        }
    }
    Ok(RegressionPrediction { y_pred, q_pred: q_pred_all })
}

fn predict_quantile_row(forest: &Forest, row_leaves: &[i32], q: &QuantileRequest) -> Vec<f64> {
    if q.q_bin == 0 {
        return vec![f64::NAN; q.quant_vec.len()];
    }
    let n_row = q.y_ranked.len();
    let mut bin_counts = vec![0u32; q.q_bin];
    let mut total = 0u32;
    for &leaf in row_leaves {
        if leaf < 0 {
            continue;
        }
        for &(rank, s_count) in forest.leaf_rank_samples(leaf as u32) {
            let bin = ((rank as usize * q.q_bin) / n_row).min(q.q_bin - 1);
            bin_counts[bin] += s_count;
            total += s_count;
        }
    }

    let mut out = Vec::with_capacity(q.quant_vec.len());
    for &quant in q.quant_vec {
        if total == 0 {
            out.push(f64::NAN);
            continue;
        }
        let threshold = ((quant * total as f64).ceil() as u32).max(1);
        let mut cum = 0u32;
        let mut chosen_bin = q.q_bin - 1;
        for (b, &c) in bin_counts.iter().enumerate() {
            cum += c;
            if cum >= threshold {
                chosen_bin = b;
                break;
            }
        }
        let rank_idx = ((chosen_bin + 1) * n_row / q.q_bin).saturating_sub(1).min(n_row - 1);
        out.push(q.y_ranked[rank_idx]);
    }
    out
}

/// Score a classification forest over every row. Votes tally the jittered
/// leaf score per the `1 + (val - floor(val))` convention (see
/// `DESIGN.md`'s resolution of the jitter open question); `census` is the
/// plain de-jittered per-tree integer count. `with_prob` additionally
/// aggregates and row-normalizes `leaf_weight`. `params.row_block` sizes the
/// outer row-blocked loop; the quantile fields of `params` go unused here.
pub fn predict_classification(
    forest: &Forest,
    block: &PredBlock,
    bag: Option<&BitMatrix>,
    params: &PredictParams,
    with_prob: bool,
) -> Result<ClassificationPrediction> {
    let ctg_width = match forest.response() {
        ResponseKind::Classification { ctg_width } => ctg_width,
        ResponseKind::Regression => {
            return Err(ForestError::Internal(
                "predict_classification called against a regression forest".into(),
            ))
        }
    };
    let n_row = block.n_row()?;
    let n_tree = forest.n_tree();
    let n_blocks = row_blocks(n_row, params.row_block);

    let block_results: Vec<(Vec<u32>, Vec<u32>, Vec<f64>)> = (0..n_blocks)
        .into_par_iter()
        .map(|b| {
            let row_start = b * params.row_block;
            let row_end = (row_start + params.row_block).min(n_row);
            let leaves = predict_across(forest, block, bag, row_start, row_end)?;

            let mut y_pred = Vec::with_capacity(row_end - row_start);
            let mut census = Vec::with_capacity((row_end - row_start) * ctg_width);
            let mut prob = Vec::new();
            for r in 0..(row_end - row_start) {
                let row_leaves = &leaves[r * n_tree..(r + 1) * n_tree];
                let mut votes = vec![0.0f64; ctg_width];
                let mut int_votes = vec![0u32; ctg_width];
                let mut prob_row = vec![0.0f64; ctg_width];
                for &l in row_leaves {
                    if l < 0 {
                        continue;
                    }
                    let leaf_pos = l as u32;
                    let val = forest.leaf_score(leaf_pos);
                    let ctg = val.floor() as usize;
                    let frac = val - val.floor();
                    votes[ctg] += 1.0 + frac;
                    int_votes[ctg] += 1;
                    if with_prob {
                        for (acc, &w) in prob_row.iter_mut().zip(forest.leaf_weight(leaf_pos)) {
                            *acc += w;
                        }
                    }
                }
                y_pred.push(argmax_lowest_index(&votes) as u32);
                census.extend(int_votes);
                if with_prob {
                    let row_sum: f64 = prob_row.iter().sum();
                    if row_sum > 0.0 {
                        for v in prob_row.iter_mut() {
                            *v /= row_sum;
                        }
                    }
                    prob.extend(prob_row);
                }
            }
            Ok::<_, ForestError>((y_pred, census, prob))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut y_pred = Vec::with_capacity(n_row);
    let mut census = Vec::with_capacity(n_row * ctg_width);
    let mut prob = if with_prob { Some(Vec::with_capacity(n_row * ctg_width)) } else { None };
    for (y, c, p) in block_results {
        y_pred.extend(y);
        census.extend(c);
        if let Some(acc) = &mut prob {
            acc.extend(p);
        }
    }
    Ok(ClassificationPrediction { y_pred, census, prob })
}

/// `conf[true_ctg * ctg_width + pred_ctg] += 1` for every row, plus the
/// per-true-category off-diagonal error rate.
pub fn confusion(y_pred: &[u32], y_true: &[u32], ctg_width: usize) -> Confusion {
    let mut conf = vec![0u32; ctg_width * ctg_width];
    for (&p, &t) in y_pred.iter().zip(y_true) {
        conf[t as usize * ctg_width + p as usize] += 1;
    }
    let mut error = vec![0.0f64; ctg_width];
    for c in 0..ctg_width {
        let row: &[u32] = &conf[c * ctg_width..(c + 1) * ctg_width];
        let row_sum: u32 = row.iter().sum();
        let diag = row[c];
        error[c] = if row_sum == 0 {
            0.0
        } else {
            (row_sum - diag) as f64 / row_sum as f64
        };
    }
    Confusion { conf, error }
}
