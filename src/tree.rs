//! Level-by-level tree growth: in-bag sampling, per-level split search, and
//! restage of the survivor rows into child ranges.
//!
//! Growth proceeds one level at a time rather than by naive top-down
//! recursion: every node of the current frontier is evaluated before any of
//! their children are created, which is what lets the frontier be fanned out
//! over `rayon` and gives the "level `L+1` observes all writes from level
//! `L`" ordering a straightforward implementation (the frontier swap below
//! is the barrier).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{ForestError, Result};
use crate::predblock::PredBlock;
use crate::rowrank::RowRank;
use crate::runset::{FRNode, LevelArena, SplitMode};
use crate::split::{self, Monotone, Response, SplitCandidate, SplitKind};

/// Hyperparameters that govern how far and how a single tree grows. A
/// session's broader configuration (see `config.rs`) holds one of these per
/// forest and threads it unchanged into every tree.
#[derive(Debug, Clone)]
pub struct TreeParams {
    pub min_node: usize,
    pub min_ratio: f64,
    pub tot_levels: usize,
    /// Fixed count of predictors sampled per split search; 0 defers to
    /// `pred_prob`.
    pub pred_fixed: usize,
    /// Per-predictor Bernoulli inclusion probability, used when
    /// `pred_fixed == 0`.
    pub pred_prob: Vec<f64>,
    /// Monotonicity sign per predictor; only consulted for numeric
    /// predictors under a regression response.
    pub reg_mono: Vec<Monotone>,
}

/// Response carried by a training row, borrowed for the lifetime of one
/// tree's growth.
#[derive(Clone, Copy)]
pub enum TreeResponse<'a> {
    Regression(&'a [f64]),
    Classification { ctg: &'a [u32], ctg_width: usize },
}

/// A grown tree as a flat, indexable node array. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub n_pred_num: usize,
}

/// A grown tree plus the per-predictor split-info this tree contributed;
/// summed across a forest's trees this is the `predInfo` training output.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub tree: Tree,
    pub pred_info: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    Split(SplitNode),
    Leaf(LeafNode),
}

#[derive(Debug, Clone)]
pub struct SplitNode {
    pub pred_idx: u32,
    pub kind: SplitNodeKind,
    pub lh: u32,
    pub rh: u32,
}

#[derive(Debug, Clone)]
pub enum SplitNodeKind {
    Numeric { split_val: f64 },
    Factor { lh_levels: Vec<u32> },
}

#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pub sample_count: u32,
    pub sum: f64,
    /// Per-category weighted counts; empty for a regression response.
    pub ctg_weight: Vec<f64>,
    /// `(globalRank, sCount)` of every member row, keyed against the
    /// ensemble-wide response order; empty unless the caller passed a
    /// `y_rank` table into [`build_tree`] (quantile prediction only needs
    /// this for a regression response).
    pub rank_samples: Vec<(u32, u32)>,
    /// Tie-breaking fraction in `[0, 1)` drawn once at leaf creation;
    /// combined with the leaf's argmax category at splice time to produce
    /// the jittered vote score (classification only, ignored otherwise).
    pub ctg_jitter: f64,
}

impl LeafNode {
    pub fn mean(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.sum / self.sample_count as f64
        }
    }
}

impl Tree {
    /// Walk from the root to a leaf given per-predictor accessors. Exposed
    /// for tests and single-tree sanity checks; the forest-level prediction
    /// driver descends its own flattened node array instead of calling
    /// through here tree-by-tree.
    pub fn descend(&self, num_val: impl Fn(usize) -> f64, fac_val: impl Fn(usize) -> u32) -> &LeafNode {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf(leaf) => return leaf,
                TreeNode::Split(s) => {
                    let pred_idx = s.pred_idx as usize;
                    let go_left = match &s.kind {
                        SplitNodeKind::Numeric { split_val } => num_val(pred_idx) < *split_val,
                        SplitNodeKind::Factor { lh_levels } => {
                            lh_levels.contains(&fac_val(pred_idx - self.n_pred_num))
                        }
                    };
                    idx = if go_left { s.lh as usize } else { s.rh as usize };
                }
            }
        }
    }
}

struct NodeState {
    slot: usize,
    rows: Vec<u32>,
    depth: usize,
}

enum Decision {
    Leaf { jitter: f64 },
    Split {
        pred_idx: usize,
        info: f64,
        kind: SplitKind,
        lh_rows: Vec<u32>,
        rh_rows: Vec<u32>,
    },
}

/// Grow one tree from a training-installed [`PredBlock`] and its
/// precomputed [`RowRank`]. `s_count[row]` is this tree's in-bag weight for
/// `row` (0 excludes the row entirely); callers produce it via sampling
/// with or without replacement before calling in.
pub fn build_tree<R: Rng>(
    block: &PredBlock,
    row_rank: &RowRank,
    response: TreeResponse,
    s_count: &[u32],
    params: &TreeParams,
    rng: &mut R,
    y_rank: Option<&[u32]>,
) -> Result<BuiltTree> {
    let n_row = block.n_row()?;
    let n_pred = block.n_pred()?;
    let n_pred_num = block.num_sup()?;
    if s_count.len() != n_row {
        return Err(ForestError::Internal(
            "s_count length does not match n_row".into(),
        ));
    }
    if params.pred_fixed == 0 && params.pred_prob.len() != n_pred {
        return Err(ForestError::ArityError(
            "pred_prob length does not match n_pred".into(),
        ));
    }

    let root_rows: Vec<u32> = (0..n_row as u32).filter(|&r| s_count[r as usize] > 0).collect();
    if root_rows.is_empty() {
        return Err(ForestError::ArityError(
            "in-bag sample is empty; every row has sCount == 0".into(),
        ));
    }

    let mut nodes: Vec<Option<TreeNode>> = vec![None];
    let mut pred_info = vec![0.0f64; n_pred];
    let mut frontier = vec![NodeState {
        slot: 0,
        rows: root_rows,
        depth: 0,
    }];

    while !frontier.is_empty() {
        let seeds: Vec<u64> = (0..frontier.len()).map(|_| rng.gen()).collect();

        let decisions: Vec<Decision> = frontier
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(state, &seed)| {
                let mut node_rng = StdRng::seed_from_u64(seed);
                if state.depth >= params.tot_levels || state.rows.len() < 2 * params.min_node.max(1) {
                    return Decision::Leaf { jitter: node_rng.gen() };
                }
                evaluate_node(block, row_rank, response, s_count, params, state, &mut node_rng)
            })
            .collect();

        let mut next_frontier = Vec::new();
        for (state, decision) in frontier.into_iter().zip(decisions) {
            match decision {
                Decision::Leaf { jitter } => {
                    nodes[state.slot] = Some(TreeNode::Leaf(make_leaf(
                        &state.rows,
                        response,
                        s_count,
                        y_rank,
                        jitter,
                    )));
                }
                Decision::Split {
                    pred_idx,
                    info,
                    kind,
                    lh_rows,
                    rh_rows,
                } => {
                    pred_info[pred_idx] += info;
                    let lh_slot = nodes.len();
                    nodes.push(None);
                    let rh_slot = nodes.len();
                    nodes.push(None);
                    let node_kind = match kind {
                        SplitKind::Numeric { split_val, .. } => SplitNodeKind::Numeric { split_val },
                        SplitKind::Factor { lh_levels } => SplitNodeKind::Factor { lh_levels },
                    };
                    nodes[state.slot] = Some(TreeNode::Split(SplitNode {
                        pred_idx: pred_idx as u32,
                        kind: node_kind,
                        lh: lh_slot as u32,
                        rh: rh_slot as u32,
                    }));
                    next_frontier.push(NodeState {
                        slot: lh_slot,
                        rows: lh_rows,
                        depth: state.depth + 1,
                    });
                    next_frontier.push(NodeState {
                        slot: rh_slot,
                        rows: rh_rows,
                        depth: state.depth + 1,
                    });
                }
            }
        }
        frontier = next_frontier;
    }

    let nodes = nodes
        .into_iter()
        .map(|n| n.expect("every reserved slot is filled by its frontier pass"))
        .collect();
    Ok(BuiltTree {
        tree: Tree { nodes, n_pred_num },
        pred_info,
    })
}

fn select_predictors<R: Rng>(n_pred: usize, params: &TreeParams, rng: &mut R) -> Vec<usize> {
    if params.pred_fixed > 0 {
        let mut idx: Vec<usize> = (0..n_pred).collect();
        idx.shuffle(rng);
        idx.truncate(params.pred_fixed.min(n_pred));
        idx
    } else {
        (0..n_pred)
            .filter(|&p| rng.gen::<f64>() < params.pred_prob[p])
            .collect()
    }
}

fn evaluate_node<R: Rng>(
    block: &PredBlock,
    row_rank: &RowRank,
    response: TreeResponse,
    s_count: &[u32],
    params: &TreeParams,
    state: &NodeState,
    rng: &mut R,
) -> Decision {
    let n_pred = block.n_pred().expect("predictor block must be train-installed");
    let candidates: Vec<Option<SplitCandidate>> = select_predictors(n_pred, params, rng)
        .into_iter()
        .map(|p| evaluate_predictor(block, row_rank, response, s_count, params, state, p, rng))
        .collect();

    let winner = match split::argmax(candidates) {
        Some(w) => w,
        None => return Decision::Leaf { jitter: rng.gen() },
    };

    let (lh_rows, rh_rows) = partition_rows(block, row_rank, state, winner.pred_idx, &winner.kind);
    if lh_rows.len() < params.min_node || rh_rows.len() < params.min_node {
        return Decision::Leaf { jitter: rng.gen() };
    }
    let smaller = lh_rows.len().min(rh_rows.len()) as f64;
    let larger = lh_rows.len().max(rh_rows.len()) as f64;
    if smaller / larger < params.min_ratio {
        return Decision::Leaf { jitter: rng.gen() };
    }

    Decision::Split {
        pred_idx: winner.pred_idx,
        info: winner.info,
        kind: winner.kind,
        lh_rows,
        rh_rows,
    }
}

fn evaluate_predictor<R: Rng>(
    block: &PredBlock,
    row_rank: &RowRank,
    response: TreeResponse,
    s_count: &[u32],
    params: &TreeParams,
    state: &NodeState,
    p: usize,
    rng: &mut R,
) -> Option<SplitCandidate> {
    if block.is_factor(p).ok()? {
        evaluate_factor_predictor(block, response, s_count, params, state, p, rng)
    } else {
        evaluate_numeric_predictor(block, row_rank, response, s_count, params, state, p)
    }
}

fn evaluate_numeric_predictor(
    block: &PredBlock,
    row_rank: &RowRank,
    response: TreeResponse,
    s_count: &[u32],
    params: &TreeParams,
    state: &NodeState,
    p: usize,
) -> Option<SplitCandidate> {
    let col = row_rank.column(p);
    let mut local: Vec<u32> = state.rows.clone();
    local.sort_by_key(|&r| col.rank_of_row(r as usize));

    let values: Vec<f64> = local
        .iter()
        .map(|&r| block.train_num_val(r as usize, p).unwrap())
        .collect();
    let local_s_count: Vec<u32> = local.iter().map(|&r| s_count[r as usize]).collect();

    let monotone = params.reg_mono.get(p).copied().unwrap_or(Monotone::None);

    // `rank_cut` in the returned candidate is expressed in this node's local
    // rank order; `partition_rows` resolves it back into a row set using the
    // same `sort_by_key` ordering.
    match response {
        TreeResponse::Regression(y) => {
            let local_y: Vec<f64> = local.iter().map(|&r| y[r as usize]).collect();
            split::best_numeric_split(
                p,
                &values,
                Response::Regression(&local_y),
                &local_s_count,
                params.min_node,
                monotone,
            )
        }
        TreeResponse::Classification { ctg, ctg_width } => {
            let local_ctg: Vec<u32> = local.iter().map(|&r| ctg[r as usize]).collect();
            split::best_numeric_split(
                p,
                &values,
                Response::Classification {
                    ctg: &local_ctg,
                    ctg_width,
                },
                &local_s_count,
                params.min_node,
                Monotone::None,
            )
        }
    }
}

fn evaluate_factor_predictor<R: Rng>(
    block: &PredBlock,
    response: TreeResponse,
    s_count: &[u32],
    params: &TreeParams,
    state: &NodeState,
    p: usize,
    rng: &mut R,
) -> Option<SplitCandidate> {
    let fac_idx = block.block_idx(p, true).ok()?;

    let mut by_level: std::collections::BTreeMap<u32, Vec<u32>> = std::collections::BTreeMap::new();
    for &row in &state.rows {
        let level = block.train_fac_val(row as usize, fac_idx).ok()?;
        by_level.entry(level).or_default().push(row);
    }
    let safe_count = by_level.len();
    if safe_count < 2 {
        return None;
    }

    let mode = match response {
        TreeResponse::Regression(_) => SplitMode::Regression,
        TreeResponse::Classification { ctg_width, .. } if ctg_width <= 2 => SplitMode::BinaryClassification,
        TreeResponse::Classification { ctg_width, .. } => SplitMode::WideClassification { ctg_width },
    };

    let mut arena = LevelArena::build(&[safe_count], mode, rng);
    let mut offset = 0u32;
    for (&level, rows) in &by_level {
        let count = rows.len() as u32;
        let sample_weight: u32 = rows.iter().map(|&r| s_count[r as usize]).sum();
        let ctg_contrib = match response {
            TreeResponse::Regression(_) => None,
            TreeResponse::Classification { ctg, ctg_width } => {
                let mut contrib = vec![0.0f64; ctg_width];
                for &row in rows {
                    contrib[ctg[row as usize] as usize] += s_count[row as usize] as f64;
                }
                Some(contrib)
            }
        };
        let sum: f64 = match response {
            TreeResponse::Regression(y) => rows.iter().map(|&r| y[r as usize] * s_count[r as usize] as f64).sum(),
            TreeResponse::Classification { .. } => sample_weight as f64,
        };
        let run = FRNode {
            start: offset,
            end: offset + count,
            s_count: sample_weight,
            sum,
            rank: level,
        };
        arena.accumulate(0, run, ctg_contrib.as_deref());
        offset += count;
    }

    split::best_factor_split(p, &mut arena, 0, mode, params.min_node, rng)
}

fn partition_rows(
    block: &PredBlock,
    row_rank: &RowRank,
    state: &NodeState,
    pred_idx: usize,
    kind: &SplitKind,
) -> (Vec<u32>, Vec<u32>) {
    match kind {
        SplitKind::Numeric { rank_cut, .. } => {
            let col = row_rank.column(pred_idx);
            let mut local: Vec<u32> = state.rows.clone();
            local.sort_by_key(|&r| col.rank_of_row(r as usize));
            let (lh, rh) = local.split_at(*rank_cut as usize);
            (lh.to_vec(), rh.to_vec())
        }
        SplitKind::Factor { lh_levels } => {
            let fac_idx = block.block_idx(pred_idx, true).expect("factor predictor");
            let mut lh = Vec::new();
            let mut rh = Vec::new();
            for &row in &state.rows {
                let level = block
                    .train_fac_val(row as usize, fac_idx)
                    .expect("row present in a training-installed block");
                if lh_levels.contains(&level) {
                    lh.push(row);
                } else {
                    rh.push(row);
                }
            }
            (lh, rh)
        }
    }
}

fn make_leaf(
    rows: &[u32],
    response: TreeResponse,
    s_count: &[u32],
    y_rank: Option<&[u32]>,
    jitter: f64,
) -> LeafNode {
    let sample_count: u32 = rows.iter().map(|&r| s_count[r as usize]).sum();
    let rank_samples = match (response, y_rank) {
        (TreeResponse::Regression(_), Some(ranks)) => rows
            .iter()
            .map(|&r| (ranks[r as usize], s_count[r as usize]))
            .collect(),
        _ => Vec::new(),
    };
    match response {
        TreeResponse::Regression(y) => {
            let sum: f64 = rows.iter().map(|&r| y[r as usize] * s_count[r as usize] as f64).sum();
            LeafNode {
                sample_count,
                sum,
                ctg_weight: Vec::new(),
                rank_samples,
                ctg_jitter: 0.0,
            }
        }
        TreeResponse::Classification { ctg, ctg_width } => {
            let mut ctg_weight = vec![0.0f64; ctg_width];
            for &r in rows {
                ctg_weight[ctg[r as usize] as usize] += s_count[r as usize] as f64;
            }
            let sum = ctg_weight.iter().sum();
            LeafNode {
                sample_count,
                sum,
                ctg_weight,
                rank_samples,
                ctg_jitter: jitter,
            }
        }
    }
}
