//! Pre-sort numeric predictors into rank-indexed blocks.
//!
//! Computed once per `PreFormat` and reused across retrains within a
//! session; the whole point is to pay the `O(n log n)` sort exactly once.

use crate::error::{ForestError, Result};
use crate::predblock::PredBlock;

/// Rank order for a single numeric predictor: `row[rank]` gives the row at
/// sort position `rank`, and `inv[row]` gives the inverse.
#[derive(Debug, Clone)]
pub struct RankColumn {
    row: Vec<u32>,
    inv: Vec<u32>,
}

impl RankColumn {
    pub fn row_at_rank(&self, rank: usize) -> u32 {
        self.row[rank]
    }

    pub fn rank_of_row(&self, row: usize) -> u32 {
        self.inv[row]
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }
}

/// Rank columns for every numeric predictor in a [`PredBlock`].
#[derive(Debug, Clone)]
pub struct RowRank {
    cols: Vec<RankColumn>,
}

impl RowRank {
    /// Build rank columns for all numeric predictors of a train-installed
    /// `PredBlock`. Fails with `ArityError` when `n_row == 0`.
    pub fn build(block: &PredBlock) -> Result<RowRank> {
        let n_row = block.n_row()?;
        if n_row == 0 {
            return Err(ForestError::ArityError("n_row == 0".into()));
        }
        let n_pred_num = block.num_sup()? - block.num_first()?;

        let mut cols = Vec::with_capacity(n_pred_num);
        for p in 0..n_pred_num {
            let mut values = Vec::with_capacity(n_row);
            for row in 0..n_row {
                values.push(block.train_num_val(row, p)?);
            }
            cols.push(Self::build_column(&values));
        }
        Ok(RowRank { cols })
    }

    /// Build a single rank column directly from a value slice; exposed for
    /// tests and for callers that already hold a numeric column outside a
    /// `PredBlock`.
    pub fn build_column(values: &[f64]) -> RankColumn {
        let n = values.len();
        let mut row: Vec<u32> = (0..n as u32).collect();
        row.sort_by(|&a, &b| {
            values[a as usize]
                .partial_cmp(&values[b as usize])
                .expect("NaN in numeric predictor column")
        });
        let mut inv = vec![0u32; n];
        for (rank, &r) in row.iter().enumerate() {
            inv[r as usize] = rank as u32;
        }
        RankColumn { row, inv }
    }

    pub fn column(&self, p: usize) -> &RankColumn {
        &self.cols[p]
    }

    pub fn n_pred_num(&self) -> usize {
        self.cols.len()
    }
}
