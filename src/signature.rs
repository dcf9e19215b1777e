//! Factor-level signature matching between a training session and a later
//! prediction session, plus the portable `PreFormat` record that lets a
//! session skip `RowRank` recomputation across retrains.
//!
//! Building `PreFormat` from a raw design matrix (level harmonization,
//! column-name bookkeeping) is the ingestion layer's job and out of scope
//! here; this module only carries the already-built record and the
//! signature-matching logic `PredBlock`/`RowRank` consumers need at
//! predict time.

use serde::{Deserialize, Serialize};

use crate::error::{ForestError, Result};

/// Which predictors were factors at train time, and what level strings each
/// factor predictor's codes refer to (code `i` is `level[p][i]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signature {
    pub pred_map: Vec<bool>,
    pub level: Vec<Vec<String>>,
}

impl Signature {
    /// A predict-time signature must agree with training on which
    /// predictors are factors. Level *sets* are allowed to differ — that
    /// is exactly what [`recode_levels`] and `LevelNotObserved` handle.
    pub fn check(&self, predict_time: &Signature) -> Result<()> {
        if self.pred_map != predict_time.pred_map {
            return Err(ForestError::SignatureMismatch);
        }
        Ok(())
    }
}

/// A non-fatal `LevelNotObserved` condition: a predict-time row carried a
/// factor level training never saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub fac_idx: usize,
    pub level: String,
    pub proxy_code: u32,
}

/// Recode `observed` level strings (one factor predictor, predict time)
/// against `train_levels` (the same predictor's training-time level list,
/// code order). Levels training never saw are assigned the shared proxy
/// code `train_levels.len() + 1`, matching the one-based "trainLevels + 1"
/// convention, and each occurrence raises a [`Warning`].
pub fn recode_levels(train_levels: &[String], observed: &[String], fac_idx: usize) -> (Vec<i32>, Vec<Warning>) {
    let proxy_code = train_levels.len() as u32 + 1;
    let mut codes = Vec::with_capacity(observed.len());
    let mut warnings = Vec::new();
    for level in observed {
        match train_levels.iter().position(|l| l == level) {
            Some(code) => codes.push(code as i32),
            None => {
                codes.push(proxy_code as i32);
                warnings.push(Warning {
                    fac_idx,
                    level: level.clone(),
                    proxy_code,
                });
            }
        }
    }
    (codes, warnings)
}

/// Portable pre-sort/ingestion artifact. Round-trips across sessions so a
/// warm-started retrain can skip reharmonizing factor levels and rebuilding
/// `RowRank`; populating it from a raw matrix is the ingestion layer's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFormat {
    pub col_names: Vec<String>,
    pub row_names: Vec<String>,
    /// Column-major `n_row * n_pred_num` numeric block.
    pub block_num: Vec<f64>,
    /// Column-major `n_row * n_pred_fac` factor-code block.
    pub block_fac: Vec<u32>,
    pub n_pred_fac: usize,
    pub n_row: usize,
    pub fac_card: Vec<u32>,
    pub signature: Signature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_mismatch_on_differing_factor_set() {
        let train = Signature {
            pred_map: vec![false, true],
            level: vec![vec![], vec!["x".into(), "y".into(), "z".into()]],
        };
        let predict = Signature {
            pred_map: vec![true, true],
            level: vec![vec![], vec!["x".into(), "y".into(), "w".into()]],
        };
        assert_eq!(train.check(&predict), Err(ForestError::SignatureMismatch));
    }

    #[test]
    fn matching_pred_map_with_differing_levels_is_not_a_mismatch() {
        let train = Signature {
            pred_map: vec![true],
            level: vec![vec!["x".into(), "y".into(), "z".into()]],
        };
        let predict = Signature {
            pred_map: vec![true],
            level: vec![vec!["x".into(), "y".into(), "w".into()]],
        };
        assert!(train.check(&predict).is_ok());
    }

    #[test]
    fn unobserved_level_gets_proxy_code_and_warning() {
        // trained on [x,y,z], predicted with [x,y,w]
        let train_levels = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let observed = vec!["x".to_string(), "y".to_string(), "w".to_string()];
        let (codes, warnings) = recode_levels(&train_levels, &observed, 0);
        assert_eq!(codes, vec![0, 1, 4]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, "w");
        assert_eq!(warnings[0].proxy_code, 4);
    }

    #[test]
    fn fully_observed_levels_produce_no_warnings() {
        let train_levels = vec!["x".to_string(), "y".to_string()];
        let observed = vec!["y".to_string(), "x".to_string(), "y".to_string()];
        let (codes, warnings) = recode_levels(&train_levels, &observed, 2);
        assert_eq!(codes, vec![1, 0, 1]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn preformat_round_trips_through_serde() {
        let pf = PreFormat {
            col_names: vec!["a".into(), "b".into()],
            row_names: vec![],
            block_num: vec![1.0, 2.0, 3.0, 4.0],
            block_fac: vec![0, 1],
            n_pred_fac: 1,
            n_row: 2,
            fac_card: vec![2],
            signature: Signature {
                pred_map: vec![false, true],
                level: vec![vec![], vec!["lo".into(), "hi".into()]],
            },
        };
        let json = serde_json::to_string(&pf).expect("serialize PreFormat");
        let back: PreFormat = serde_json::from_str(&json).expect("deserialize PreFormat");
        assert_eq!(back.n_row, pf.n_row);
        assert_eq!(back.block_num, pf.block_num);
        assert_eq!(back.signature, pf.signature);
    }
}
