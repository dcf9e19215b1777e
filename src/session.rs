//! Forest-level training orchestration.
//!
//! Ties the per-tree builder (`tree.rs`) to the ensemble-wide arrays
//! (`forest.rs`) and the in-bag mask (`bitmatrix.rs`): draws each tree's
//! bootstrap sample, grows a block of `trainBlock` trees in parallel via
//! `rayon`, then splices the block into the shared `Forest` in tree-index
//! order — completion order within a block need not be the commit order.

use log::info;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::bitmatrix::BitMatrix;
use crate::config::TrainParams;
use crate::error::{ForestError, Result};
use crate::forest::{Forest, ResponseKind};
use crate::predblock::PredBlock;
use crate::rowrank::RowRank;
use crate::tree::{self, TreeResponse};

/// Response data borrowed for the duration of one training session.
pub enum TrainResponse<'a> {
    Regression { y: &'a [f64] },
    Classification { y_ctg: &'a [u32], ctg_width: usize },
}

/// Everything a training session returns besides the forest itself.
pub struct TrainOutput {
    pub forest: Forest,
    pub in_bag: BitMatrix,
    /// Summed split info per predictor across every tree; importance proxy.
    pub pred_info: Vec<f64>,
    /// Ascending-sorted response values, present for a regression session
    /// that requested quantile support; indexes the `rank` a leaf's
    /// `rank_samples` refer to.
    pub y_ranked: Option<Vec<f64>>,
}

/// Draw one tree's in-bag sample count per row. With replacement, `n_samp`
/// independent weighted draws via `rand::distributions::WeightedIndex`;
/// without replacement, an A-Res weighted reservoir keeps it a single pass
/// with no repeated rows.
fn draw_bag(
    n_row: usize,
    n_samp: usize,
    with_replacement: bool,
    weight: &[f64],
    rng: &mut StdRng,
) -> Result<Vec<u32>> {
    let mut s_count = vec![0u32; n_row];
    if with_replacement {
        let dist = WeightedIndex::new(weight)
            .map_err(|e| ForestError::ArityError(format!("invalid sample weights: {}", e)))?;
        for _ in 0..n_samp {
            s_count[dist.sample(rng)] += 1;
        }
    } else {
        let mut keyed: Vec<(f64, usize)> = (0..n_row)
            .map(|r| {
                let u: f64 = rng.gen_range(1e-12..1.0);
                let w = weight[r].max(1e-12);
                (u.powf(1.0 / w), r)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).expect("weighted key is never NaN"));
        for &(_, r) in keyed.iter().take(n_samp.min(n_row)) {
            s_count[r] = 1;
        }
    }
    Ok(s_count)
}

/// Grow a forest of `params.n_tree` trees, `params.train_block` at a time,
/// against a training-installed `PredBlock` and its precomputed `RowRank`.
///
/// `sample_weight` is the per-row inclusion weight consulted by bagging.
/// `seed` roots a deterministic per-tree RNG
/// stream so a block's trees can be grown concurrently and still reproduce
/// bit-for-bit given the same seed.
pub fn train(
    block: &PredBlock,
    row_rank: &RowRank,
    response: TrainResponse,
    sample_weight: &[f64],
    params: &TrainParams,
    seed: u64,
) -> Result<TrainOutput> {
    let n_row = block.n_row()?;
    let n_pred = block.n_pred()?;
    if sample_weight.len() != n_row {
        return Err(ForestError::ArityError(
            "feSampleWeight length does not match n_row".into(),
        ));
    }

    let response_kind = match &response {
        TrainResponse::Regression { .. } => ResponseKind::Regression,
        TrainResponse::Classification { ctg_width, .. } => ResponseKind::Classification { ctg_width: *ctg_width },
    };

    // Regression carries a global rank table so leaves can record
    // `(rank, sCount)` for quantile prediction.
    let (y_rank, y_ranked) = match &response {
        TrainResponse::Regression { y } => {
            let mut sorted: Vec<f64> = y.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN in response"));
            let rank_col = RowRank::build_column(y);
            let ranks: Vec<u32> = (0..n_row).map(|r| rank_col.rank_of_row(r)).collect();
            (Some(ranks), Some(sorted))
        }
        TrainResponse::Classification { .. } => (None, None),
    };

    let mut fac_card = Vec::new();
    for p in block.fac_first()?..n_pred {
        fac_card.push(block.fac_card(p)?);
    }

    let tree_params = params.tree_params();
    let mut forest = Forest::new(response_kind, block.num_sup()?);
    let mut in_bag = BitMatrix::new(n_row, params.n_tree);
    let mut pred_info = vec![0.0f64; n_pred];

    let mut tree_idx = 0usize;
    while tree_idx < params.n_tree {
        let block_len = params.train_block.min(params.n_tree - tree_idx);
        info!(
            "training block of {} trees (tree {}..{})",
            block_len,
            tree_idx,
            tree_idx + block_len
        );

        let grown: Vec<Result<(tree::BuiltTree, Vec<u32>)>> = (0..block_len)
            .into_par_iter()
            .map(|i| {
                let t = tree_idx + i;
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let s_count = draw_bag(
                    n_row,
                    params.n_samp,
                    params.with_replacement,
                    sample_weight,
                    &mut rng,
                )?;
                let tree_response = match &response {
                    TrainResponse::Regression { y } => TreeResponse::Regression(y),
                    TrainResponse::Classification { y_ctg, ctg_width } => TreeResponse::Classification {
                        ctg: y_ctg,
                        ctg_width: *ctg_width,
                    },
                };
                let built = tree::build_tree(
                    block,
                    row_rank,
                    tree_response,
                    &s_count,
                    &tree_params,
                    &mut rng,
                    y_rank.as_deref(),
                )?;
                Ok((built, s_count))
            })
            .collect();

        for result in grown {
            let (built, s_count) = result?;
            for (row, &c) in s_count.iter().enumerate() {
                if c > 0 {
                    in_bag.set(row, tree_idx);
                }
            }
            for (p, info) in pred_info.iter_mut().zip(&built.pred_info) {
                *p += info;
            }
            forest.splice_tree(&built.tree, &fac_card)?;
            tree_idx += 1;
        }
    }

    Ok(TrainOutput {
        forest,
        in_bag,
        pred_info,
        y_ranked,
    })
}
