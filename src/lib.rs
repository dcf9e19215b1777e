//! Core data structures and algorithms for training and predicting with
//! random forests: predictor pre-sort (`PredBlock`/`RowRank`), the
//! run/heap split engine (`RunSet`/`split`), the per-tree builder
//! (`tree`), the ensemble-wide arrays (`forest`), and the row-blocked
//! prediction driver (`predict`).
//!
//! Front-end matrix ingestion, CLI/session glue, result formatting, and
//! language-binding marshaling live outside this crate; `signature`
//! exposes just enough of the ingestion contract (`Signature`,
//! `PreFormat`, `recode_levels`) for this crate to be exercised and tested
//! standalone.

pub mod bitmatrix;
pub mod config;
pub mod error;
pub mod forest;
pub mod heap;
pub mod predblock;
pub mod predict;
pub mod rowrank;
pub mod runset;
pub mod session;
pub mod signature;
pub mod split;
pub mod tree;

pub use bitmatrix::BitMatrix;
pub use config::{PredictParams, TrainParams, TrainParamsBuilder};
pub use error::{ForestError, Result};
pub use forest::{Forest, ResponseKind};
pub use predblock::PredBlock;
pub use predict::{ClassificationPrediction, Confusion, QuantileRequest, RegressionPrediction};
pub use rowrank::RowRank;
pub use session::{TrainOutput, TrainResponse};
pub use signature::{PreFormat, Signature};
