//! Append-only ensemble storage: splices each grown [`Tree`] into one set of
//! flat arrays and answers the descend query the prediction driver needs.

use crate::error::{ForestError, Result};
use crate::tree::{SplitNodeKind, Tree, TreeNode};

/// Which response the ensemble was trained for; decides whether leaves carry
/// a single regression value or a `ctgWidth`-wide weight vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseKind {
    Regression,
    Classification { ctg_width: usize },
}

#[derive(Debug, Clone)]
pub enum ForestNode {
    Split {
        pred_idx: u32,
        split: ForestSplit,
        lh: u32,
        rh: u32,
    },
    Leaf {
        leaf_pos: u32,
    },
}

#[derive(Debug, Clone)]
pub enum ForestSplit {
    Numeric { split_val: f64 },
    /// `bitset_offset` is a word index into the forest's `fac_split` array;
    /// the `n_words`-word region starting there holds exactly this split's
    /// bitset, sized by the predictor's training-time cardinality.
    Factor { bitset_offset: u32, n_words: u32 },
}

/// Ensemble-wide decision-node and leaf-payload arrays, built up one tree at
/// a time via [`Forest::splice_tree`].
#[derive(Debug, Clone)]
pub struct Forest {
    nodes: Vec<ForestNode>,
    origin: Vec<u32>,
    fac_off: Vec<u32>,
    fac_split: Vec<u32>,
    leaf_val: Vec<f64>,
    leaf_weight: Vec<f64>,
    /// Jittered `category + fraction` vote score, one per classification
    /// leaf (same indexing as `leaf_weight` groups). Truncating yields the
    /// leaf's predicted category; the fraction exists only to break ties
    /// deterministically when votes are tallied across trees.
    leaf_score: Vec<f64>,
    /// `(globalRank, sCount)` pairs of every training row a leaf absorbed,
    /// one group per regression leaf (same indexing as `leaf_val`); empty
    /// groups when quantile support was not requested at training time.
    leaf_rank_samples: Vec<Vec<(u32, u32)>>,
    response: ResponseKind,
    n_pred_num: usize,
}

impl Forest {
    pub fn new(response: ResponseKind, n_pred_num: usize) -> Self {
        Forest {
            nodes: Vec::new(),
            origin: Vec::new(),
            fac_off: Vec::new(),
            fac_split: Vec::new(),
            leaf_val: Vec::new(),
            leaf_weight: Vec::new(),
            leaf_score: Vec::new(),
            leaf_rank_samples: Vec::new(),
            response,
            n_pred_num,
        }
    }

    pub fn n_tree(&self) -> usize {
        self.origin.len()
    }

    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    pub fn ctg_width(&self) -> usize {
        match self.response {
            ResponseKind::Classification { ctg_width } => ctg_width,
            ResponseKind::Regression => 0,
        }
    }

    pub fn response(&self) -> ResponseKind {
        self.response
    }

    /// Append one grown tree's nodes and leaf payloads, translating its
    /// tree-local child indices into absolute indices in the shared `nodes`
    /// array and its factor splits into bitsets sized by `fac_card` (indexed
    /// by factor-local predictor index). Returns the new tree's index.
    pub fn splice_tree(&mut self, tree: &Tree, fac_card: &[u32]) -> Result<u32> {
        if tree.n_pred_num != self.n_pred_num {
            return Err(ForestError::Internal(
                "spliced tree's numeric-predictor count does not match the forest".into(),
            ));
        }

        let t = self.origin.len() as u32;
        let node_base = self.nodes.len() as u32;
        self.origin.push(node_base);
        self.fac_off.push(self.fac_split.len() as u32);

        for node in &tree.nodes {
            let forest_node = match node {
                TreeNode::Split(s) => {
                    let split = match &s.kind {
                        SplitNodeKind::Numeric { split_val } => ForestSplit::Numeric { split_val: *split_val },
                        SplitNodeKind::Factor { lh_levels } => {
                            let fac_idx = s.pred_idx as usize - self.n_pred_num;
                            let card = *fac_card.get(fac_idx).ok_or_else(|| {
                                ForestError::Internal("fac_card missing an entry for a spliced split".into())
                            })?;
                            let offset = self.fac_split.len() as u32;
                            let bitset = encode_bitset(lh_levels, card);
                            let n_words = bitset.len() as u32;
                            self.fac_split.extend(bitset);
                            ForestSplit::Factor {
                                bitset_offset: offset,
                                n_words,
                            }
                        }
                    };
                    ForestNode::Split {
                        pred_idx: s.pred_idx,
                        split,
                        lh: node_base + s.lh,
                        rh: node_base + s.rh,
                    }
                }
                TreeNode::Leaf(leaf) => {
                    let leaf_pos = match self.response {
                        ResponseKind::Regression => {
                            let pos = self.leaf_val.len() as u32;
                            self.leaf_val.push(leaf.mean());
                            self.leaf_rank_samples.push(leaf.rank_samples.clone());
                            pos
                        }
                        ResponseKind::Classification { ctg_width } => {
                            let pos = (self.leaf_weight.len() / ctg_width) as u32;
                            if leaf.ctg_weight.len() != ctg_width {
                                return Err(ForestError::Internal(
                                    "leaf category-weight width does not match the forest's ctgWidth".into(),
                                ));
                            }
                            self.leaf_weight.extend_from_slice(&leaf.ctg_weight);
                            let category = argmax_lowest_index(&leaf.ctg_weight);
                            self.leaf_score.push(category as f64 + leaf.ctg_jitter);
                            pos
                        }
                    };
                    ForestNode::Leaf { leaf_pos }
                }
            };
            self.nodes.push(forest_node);
        }
        Ok(t)
    }

    pub fn origin(&self, t: usize) -> u32 {
        self.origin[t]
    }

    /// Descend tree `t` for one row, returning the leaf position it lands
    /// in. `num_val`/`fac_val` read that row's feature values on demand.
    pub fn descend(&self, t: usize, num_val: impl Fn(usize) -> f64, fac_val: impl Fn(usize) -> u32) -> u32 {
        let mut idx = self.origin[t] as usize;
        loop {
            match &self.nodes[idx] {
                ForestNode::Leaf { leaf_pos } => return *leaf_pos,
                ForestNode::Split {
                    pred_idx,
                    split,
                    lh,
                    rh,
                } => {
                    let go_left = match split {
                        ForestSplit::Numeric { split_val } => num_val(*pred_idx as usize) < *split_val,
                        ForestSplit::Factor { bitset_offset, n_words } => {
                            let fac_idx = *pred_idx as usize - self.n_pred_num;
                            bit_at(&self.fac_split, *bitset_offset, *n_words, fac_val(fac_idx))
                        }
                    };
                    idx = if go_left { *lh as usize } else { *rh as usize };
                }
            }
        }
    }

    pub fn leaf_val(&self, leaf_pos: u32) -> f64 {
        self.leaf_val[leaf_pos as usize]
    }

    pub fn leaf_weight(&self, leaf_pos: u32) -> &[f64] {
        let width = self.ctg_width();
        let base = leaf_pos as usize * width;
        &self.leaf_weight[base..base + width]
    }

    /// Jittered `category + fraction` vote score written at training time;
    /// `floor()` is the leaf's predicted category.
    pub fn leaf_score(&self, leaf_pos: u32) -> f64 {
        self.leaf_score[leaf_pos as usize]
    }

    /// `(globalRank, sCount)` pairs absorbed by a regression leaf, used by
    /// quantile prediction; empty if the tree was grown without a rank
    /// table.
    pub fn leaf_rank_samples(&self, leaf_pos: u32) -> &[(u32, u32)] {
        &self.leaf_rank_samples[leaf_pos as usize]
    }
}

/// Index of the largest weight, ties broken by the lowest index.
pub(crate) fn argmax_lowest_index(weights: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &w) in weights.iter().enumerate() {
        if w > best_val {
            best_val = w;
            best = i;
        }
    }
    best
}

fn encode_bitset(levels: &[u32], card: u32) -> Vec<u32> {
    let n_words = ((card + 31) / 32).max(1) as usize;
    let mut words = vec![0u32; n_words];
    for &level in levels {
        words[(level / 32) as usize] |= 1 << (level % 32);
    }
    words
}

/// A `level` beyond the bitset's training-time cardinality (a predict-time
/// proxy code for a level never observed while training — see
/// `signature::recode_levels`) is treated as not a member of LH, routing
/// right.
fn bit_at(words: &[u32], region_offset_words: u32, n_words: u32, level: u32) -> bool {
    let rel_word = (level / 32) as usize;
    if rel_word >= n_words as usize {
        return false;
    }
    let word_idx = region_offset_words as usize + rel_word;
    (words[word_idx] >> (level % 32)) & 1 != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predblock::PredBlock;
    use crate::rowrank::RowRank;
    use crate::split::Monotone;
    use crate::tree::{self, TreeParams, TreeResponse};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn regression_roundtrip_through_splice() {
        let x: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let y = vec![1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
        let mut block = PredBlock::new();
        block.train_immutables(x, vec![], vec![], 8, 1).unwrap();
        let row_rank = RowRank::build(&block).unwrap();
        let params = TreeParams {
            min_node: 1,
            min_ratio: 0.0,
            tot_levels: 10,
            pred_fixed: 0,
            pred_prob: vec![1.0],
            reg_mono: vec![Monotone::None],
        };
        let mut rng = StdRng::seed_from_u64(0);
        let s_count = vec![1u32; 8];
        let built = tree::build_tree(
            &block,
            &row_rank,
            TreeResponse::Regression(&y),
            &s_count,
            &params,
            &mut rng,
            None,
        )
        .unwrap();

        let mut forest = Forest::new(ResponseKind::Regression, 1);
        let t = forest.splice_tree(&built.tree, &[]).unwrap();
        assert_eq!(t, 0);
        assert_eq!(forest.n_tree(), 1);

        for row in 0..8u32 {
            let leaf_pos = forest.descend(0, |_| block.train_num_val(row as usize, 0).unwrap(), |_| 0);
            let expected = if row < 4 { 1.0 } else { 9.0 };
            assert!((forest.leaf_val(leaf_pos) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn factor_split_bitset_routes_correctly() {
        let mut block = PredBlock::new();
        block
            .train_immutables(vec![], vec![0, 0, 1, 1, 2, 2], vec![3], 6, 0)
            .unwrap();
        let row_rank = RowRank::build(&block).unwrap();
        let ctg = vec![0u32, 0, 1, 1, 0, 1];
        let s_count = vec![1u32; 6];
        let params = TreeParams {
            min_node: 1,
            min_ratio: 0.0,
            tot_levels: 10,
            pred_fixed: 0,
            pred_prob: vec![1.0],
            reg_mono: vec![],
        };
        let mut rng = StdRng::seed_from_u64(4);
        let built = tree::build_tree(
            &block,
            &row_rank,
            TreeResponse::Classification { ctg: &ctg, ctg_width: 2 },
            &s_count,
            &params,
            &mut rng,
            None,
        )
        .unwrap();

        let mut forest = Forest::new(ResponseKind::Classification { ctg_width: 2 }, 0);
        forest.splice_tree(&built.tree, &[3]).unwrap();

        // every row should land in a leaf whose weight vector is non-empty and
        // accounts for at least its own sCount contribution
        for row in 0..6u32 {
            let level = [0u32, 0, 1, 1, 2, 2][row as usize];
            let leaf_pos = forest.descend(0, |_| 0.0, |_| level);
            let weight = forest.leaf_weight(leaf_pos);
            assert_eq!(weight.len(), 2);
            assert!(weight.iter().sum::<f64>() >= 1.0);
        }
    }
}
