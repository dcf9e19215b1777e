//! Process-wide immutable view over the design matrix for one session.
//!
//! A [`PredBlock`] starts dormant. Installing a training or a prediction
//! view consumes the input arrays and makes the query surface live; only
//! one of {train, predict} can be live at a time. This is the session-handle
//! re-expression of the classic `*Immutables`/`De*Immutables` pair:
//! the state machine below is what used to be a pair of free functions
//! toggling process-wide statics.

use crate::error::{ForestError, Result};

enum State {
    Dormant,
    Train(TrainData),
    Predict(PredictData),
}

struct TrainData {
    fe_num: Vec<f64>, // column-major, n_row * n_pred_num
    fe_fac: Vec<u32>, // column-major, n_row * n_pred_fac, zero-based level codes
    fe_card: Vec<u32>,
    n_row: usize,
    n_pred_num: usize,
    n_pred_fac: usize,
    card_max: u32,
}

struct PredictData {
    fe_num_t: Vec<f64>, // row-major (transposed), n_pred_num * n_row
    fe_fac_t: Vec<i32>, // row-major (transposed), n_pred_fac * n_row
    n_row: usize,
    n_pred_num: usize,
    n_pred_fac: usize,
}

/// Numeric-vs-factor predictor column store, with exactly one of a train or
/// predict view installed at a time.
pub struct PredBlock {
    state: State,
}

impl Default for PredBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl PredBlock {
    pub fn new() -> Self {
        PredBlock {
            state: State::Dormant,
        }
    }

    /// Install a training-time view. `fe_num` is column-major `n_row x
    /// n_pred_num`; `fe_fac` is column-major `n_row x n_pred_fac` zero-based
    /// level codes; `fe_card` gives the cardinality of each of the
    /// `n_pred_fac` factor predictors that follow the numeric prefix.
    pub fn train_immutables(
        &mut self,
        fe_num: Vec<f64>,
        fe_fac: Vec<u32>,
        fe_card: Vec<u32>,
        n_row: usize,
        n_pred_num: usize,
    ) -> Result<()> {
        if !matches!(self.state, State::Dormant) {
            return Err(ForestError::AlreadyInitialized);
        }
        if n_row == 0 {
            return Err(ForestError::ArityError("n_row == 0".into()));
        }
        if fe_num.len() != n_row * n_pred_num {
            return Err(ForestError::Internal(
                "fe_num length does not match n_row * n_pred_num".into(),
            ));
        }
        let n_pred_fac = fe_card.len();
        if fe_fac.len() != n_row * n_pred_fac {
            return Err(ForestError::Internal(
                "fe_fac length does not match n_row * n_pred_fac".into(),
            ));
        }
        let card_max = fe_card.iter().copied().max().unwrap_or(0);
        self.state = State::Train(TrainData {
            fe_num,
            fe_fac,
            fe_card,
            n_row,
            n_pred_num,
            n_pred_fac,
            card_max,
        });
        Ok(())
    }

    pub fn train_de_immutables(&mut self) -> Result<()> {
        match self.state {
            State::Train(_) => {
                self.state = State::Dormant;
                Ok(())
            }
            _ => Err(ForestError::NotInitialized),
        }
    }

    /// Install a prediction-time view. `fe_num_t`/`fe_fac_t` are transposed
    /// (predictor-major) so row-blocked scoring strides contiguously
    /// through one predictor at a time.
    pub fn predict_immutables(
        &mut self,
        fe_num_t: Vec<f64>,
        fe_fac_t: Vec<i32>,
        n_pred_num: usize,
        n_pred_fac: usize,
        n_row: usize,
    ) -> Result<()> {
        if !matches!(self.state, State::Dormant) {
            return Err(ForestError::AlreadyInitialized);
        }
        if n_row == 0 {
            return Err(ForestError::ArityError("n_row == 0".into()));
        }
        self.state = State::Predict(PredictData {
            fe_num_t,
            fe_fac_t,
            n_row,
            n_pred_num,
            n_pred_fac,
        });
        Ok(())
    }

    pub fn predict_de_immutables(&mut self) -> Result<()> {
        match self.state {
            State::Predict(_) => {
                self.state = State::Dormant;
                Ok(())
            }
            _ => Err(ForestError::NotInitialized),
        }
    }

    pub fn n_row(&self) -> Result<usize> {
        match &self.state {
            State::Train(t) => Ok(t.n_row),
            State::Predict(p) => Ok(p.n_row),
            State::Dormant => Err(ForestError::NotInitialized),
        }
    }

    pub fn n_pred(&self) -> Result<usize> {
        match &self.state {
            State::Train(t) => Ok(t.n_pred_num + t.n_pred_fac),
            State::Predict(p) => Ok(p.n_pred_num + p.n_pred_fac),
            State::Dormant => Err(ForestError::NotInitialized),
        }
    }

    pub fn num_first(&self) -> Result<usize> {
        Ok(0)
    }

    pub fn num_sup(&self) -> Result<usize> {
        match &self.state {
            State::Train(t) => Ok(t.n_pred_num),
            State::Predict(p) => Ok(p.n_pred_num),
            State::Dormant => Err(ForestError::NotInitialized),
        }
    }

    pub fn fac_first(&self) -> Result<usize> {
        self.num_sup()
    }

    pub fn fac_sup(&self) -> Result<usize> {
        self.n_pred()
    }

    pub fn is_factor(&self, p: usize) -> Result<bool> {
        Ok(p >= self.fac_first()?)
    }

    /// Map a global predictor index to its offset within its own (numeric
    /// or factor) block.
    pub fn block_idx(&self, p: usize, is_factor: bool) -> Result<usize> {
        let fac_first = self.fac_first()?;
        if is_factor {
            Ok(p - fac_first)
        } else {
            Ok(p)
        }
    }

    pub fn fac_card(&self, p: usize) -> Result<u32> {
        if !self.is_factor(p)? {
            return Err(ForestError::Internal(format!(
                "predictor {} is numeric, has no cardinality",
                p
            )));
        }
        let idx = self.block_idx(p, true)?;
        match &self.state {
            State::Train(t) => Ok(t.fe_card[idx]),
            State::Predict(_) => Err(ForestError::Internal(
                "fac_card queried on predict view; cardinality is train-time only".into(),
            )),
            State::Dormant => Err(ForestError::NotInitialized),
        }
    }

    pub fn card_max(&self) -> Result<u32> {
        match &self.state {
            State::Train(t) => Ok(t.card_max),
            State::Predict(_) => Err(ForestError::Internal(
                "card_max queried on predict view".into(),
            )),
            State::Dormant => Err(ForestError::NotInitialized),
        }
    }

    /// Numeric value of row `row` for numeric predictor `p` (training view).
    pub fn train_num_val(&self, row: usize, p: usize) -> Result<f64> {
        match &self.state {
            State::Train(t) => Ok(t.fe_num[p * t.n_row + row]),
            _ => Err(ForestError::NotInitialized),
        }
    }

    /// Factor code of row `row` for factor predictor at block index `fac_idx`
    /// (training view).
    pub fn train_fac_val(&self, row: usize, fac_idx: usize) -> Result<u32> {
        match &self.state {
            State::Train(t) => Ok(t.fe_fac[fac_idx * t.n_row + row]),
            _ => Err(ForestError::NotInitialized),
        }
    }

    /// Numeric value of row `row` for numeric predictor `p` (predict view,
    /// transposed storage).
    pub fn predict_num_val(&self, row: usize, p: usize) -> Result<f64> {
        match &self.state {
            State::Predict(d) => Ok(d.fe_num_t[p * d.n_row + row]),
            _ => Err(ForestError::NotInitialized),
        }
    }

    /// Factor code of row `row` for factor predictor at block index `fac_idx`
    /// (predict view). `-1` signals a missing/unobserved level.
    pub fn predict_fac_val(&self, row: usize, fac_idx: usize) -> Result<i32> {
        match &self.state {
            State::Predict(d) => Ok(d.fe_fac_t[fac_idx * d.n_row + row]),
            _ => Err(ForestError::NotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_before_install_fails() {
        let block = PredBlock::new();
        assert_eq!(block.n_row(), Err(ForestError::NotInitialized));
    }

    #[test]
    fn double_install_fails() {
        let mut block = PredBlock::new();
        block
            .train_immutables(vec![0.0; 4], vec![0; 4], vec![2], 4, 1)
            .unwrap();
        assert_eq!(
            block.train_immutables(vec![0.0; 4], vec![0; 4], vec![2], 4, 1),
            Err(ForestError::AlreadyInitialized)
        );
    }

    #[test]
    fn boundary_indices() {
        let mut block = PredBlock::new();
        block
            .train_immutables(vec![0.0; 3 * 2], vec![0; 3 * 2], vec![3, 2], 3, 2)
            .unwrap();
        assert_eq!(block.num_first().unwrap(), 0);
        assert_eq!(block.num_sup().unwrap(), 2);
        assert_eq!(block.fac_first().unwrap(), 2);
        assert_eq!(block.fac_sup().unwrap(), 4);
        assert!(!block.is_factor(0).unwrap());
        assert!(block.is_factor(2).unwrap());
        assert_eq!(block.fac_card(2).unwrap(), 3);
        assert_eq!(block.fac_card(3).unwrap(), 2);
        assert_eq!(block.card_max().unwrap(), 3);
    }

    #[test]
    fn deinstall_then_reinstall() {
        let mut block = PredBlock::new();
        block
            .train_immutables(vec![0.0; 4], vec![], vec![], 4, 1)
            .unwrap();
        block.train_de_immutables().unwrap();
        assert_eq!(block.n_row(), Err(ForestError::NotInitialized));
        block
            .train_immutables(vec![0.0; 2], vec![], vec![], 2, 1)
            .unwrap();
        assert_eq!(block.n_row().unwrap(), 2);
    }

    #[test]
    fn empty_rows_rejected() {
        let mut block = PredBlock::new();
        assert!(matches!(
            block.train_immutables(vec![], vec![], vec![], 0, 1),
            Err(ForestError::ArityError(_))
        ));
    }
}
