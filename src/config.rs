//! Validated hyperparameter bags, built with fluent setters in the
//! `ExtraTreesRegressor::new().n_estimators(..)` style.

use crate::error::{ForestError, Result};
use crate::split::Monotone;
use crate::tree::TreeParams;

/// Hyperparameters for one forest's training session.
#[derive(Debug, Clone)]
pub struct TrainParams {
    pub n_tree: usize,
    pub n_samp: usize,
    pub with_replacement: bool,
    /// Trees grown per parallel block (see `tree.rs` module docs).
    pub train_block: usize,
    pub min_node: usize,
    pub min_ratio: f64,
    pub tot_levels: usize,
    /// Fixed count of predictors sampled per split search; 0 defers to
    /// `pred_prob`.
    pub pred_fixed: usize,
    pub pred_prob: Vec<f64>,
    pub reg_mono: Vec<Monotone>,
}

impl TrainParams {
    /// Project onto the subset of fields a single tree's growth consumes.
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            min_node: self.min_node,
            min_ratio: self.min_ratio,
            tot_levels: self.tot_levels,
            pred_fixed: self.pred_fixed,
            pred_prob: self.pred_prob.clone(),
            reg_mono: self.reg_mono.clone(),
        }
    }
}

/// Builds a [`TrainParams`], validating it against a predictor count at
/// [`TrainParamsBuilder::build`] time.
pub struct TrainParamsBuilder {
    n_tree: usize,
    n_samp: usize,
    with_replacement: bool,
    train_block: usize,
    min_node: usize,
    min_ratio: f64,
    tot_levels: usize,
    pred_fixed: usize,
    pred_prob: Option<Vec<f64>>,
    reg_mono: Option<Vec<Monotone>>,
}

impl Default for TrainParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainParamsBuilder {
    pub fn new() -> Self {
        TrainParamsBuilder {
            n_tree: 500,
            n_samp: 0,
            with_replacement: true,
            train_block: 1,
            min_node: 1,
            min_ratio: 0.0,
            tot_levels: usize::MAX,
            pred_fixed: 0,
            pred_prob: None,
            reg_mono: None,
        }
    }

    pub fn n_tree(mut self, n: usize) -> Self {
        self.n_tree = n;
        self
    }

    pub fn n_samp(mut self, n: usize) -> Self {
        self.n_samp = n;
        self
    }

    pub fn with_replacement(mut self, b: bool) -> Self {
        self.with_replacement = b;
        self
    }

    pub fn train_block(mut self, n: usize) -> Self {
        self.train_block = n;
        self
    }

    pub fn min_node(mut self, n: usize) -> Self {
        self.min_node = n;
        self
    }

    pub fn min_ratio(mut self, r: f64) -> Self {
        self.min_ratio = r;
        self
    }

    pub fn tot_levels(mut self, n: usize) -> Self {
        self.tot_levels = n;
        self
    }

    pub fn pred_fixed(mut self, n: usize) -> Self {
        self.pred_fixed = n;
        self
    }

    pub fn pred_prob(mut self, p: Vec<f64>) -> Self {
        self.pred_prob = Some(p);
        self
    }

    pub fn reg_mono(mut self, m: Vec<Monotone>) -> Self {
        self.reg_mono = Some(m);
        self
    }

    /// Validate against `n_pred` predictors, filling `pred_prob`/`reg_mono`
    /// defaults (all-predictors, unconstrained) when left unset.
    pub fn build(self, n_pred: usize) -> Result<TrainParams> {
        if self.n_tree == 0 {
            return Err(ForestError::ArityError("nTree == 0".into()));
        }
        if self.n_samp == 0 {
            return Err(ForestError::ArityError("nSamp == 0".into()));
        }
        if self.train_block == 0 {
            return Err(ForestError::ArityError("trainBlock == 0".into()));
        }

        let pred_prob = self.pred_prob.unwrap_or_else(|| vec![1.0; n_pred]);
        if pred_prob.len() != n_pred {
            return Err(ForestError::ArityError(
                "predProb.len() does not match nPred".into(),
            ));
        }

        let reg_mono = self.reg_mono.unwrap_or_else(|| vec![Monotone::None; n_pred]);
        if reg_mono.len() != n_pred {
            return Err(ForestError::ArityError(
                "regMono.len() does not match nPred".into(),
            ));
        }

        Ok(TrainParams {
            n_tree: self.n_tree,
            n_samp: self.n_samp,
            with_replacement: self.with_replacement,
            train_block: self.train_block,
            min_node: self.min_node.max(1),
            min_ratio: self.min_ratio,
            tot_levels: self.tot_levels,
            pred_fixed: self.pred_fixed,
            pred_prob,
            reg_mono,
        })
    }
}

/// Prediction-time knobs consumed by [`crate::predict::predict_regression`]
/// and [`crate::predict::predict_classification`]: the row-blocked outer
/// loop's block size, and the quantile request (`quant_vec`/`q_bin`) that
/// regression prediction honors when the caller also supplies `y_ranked`.
#[derive(Debug, Clone)]
pub struct PredictParams {
    pub row_block: usize,
    pub quant_vec: Vec<f64>,
    pub q_bin: usize,
}

impl Default for PredictParams {
    fn default() -> Self {
        PredictParams {
            row_block: crate::predict::DEFAULT_ROW_BLOCK,
            quant_vec: Vec::new(),
            q_bin: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_pred_prob_and_reg_mono() {
        let params = TrainParamsBuilder::new().n_tree(10).n_samp(100).build(3).unwrap();
        assert_eq!(params.pred_prob, vec![1.0, 1.0, 1.0]);
        assert_eq!(params.reg_mono, vec![Monotone::None, Monotone::None, Monotone::None]);
    }

    #[test]
    fn zero_n_tree_is_an_arity_error() {
        let err = TrainParamsBuilder::new().n_samp(10).build(2);
        assert!(matches!(err, Err(ForestError::ArityError(_))));
    }

    #[test]
    fn mismatched_pred_prob_length_is_an_arity_error() {
        let err = TrainParamsBuilder::new()
            .n_tree(1)
            .n_samp(10)
            .pred_prob(vec![1.0, 1.0])
            .build(3);
        assert!(matches!(err, Err(ForestError::ArityError(_))));
    }

    #[test]
    fn tree_params_projects_matching_fields() {
        let params = TrainParamsBuilder::new()
            .n_tree(1)
            .n_samp(10)
            .min_node(4)
            .build(1)
            .unwrap();
        let tp = params.tree_params();
        assert_eq!(tp.min_node, 4);
        assert_eq!(tp.pred_prob, params.pred_prob);
    }
}
