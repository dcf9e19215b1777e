//! Integration tests exercising the crate's public API end to end, rather
//! than the module-internal invariants covered by each file's own
//! `#[cfg(test)]` block.

use forester::predict;
use forester::runset::{LevelArena, SplitMode};
use forester::session::{self, TrainResponse};
use forester::signature::{recode_levels, Signature};
use forester::split::Monotone;
use forester::tree::{self, TreeParams, TreeResponse};
use forester::{BitMatrix, Forest, PredBlock, PredictParams, ResponseKind, RowRank, TrainParamsBuilder};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Single numeric predictor, 8 rows, regression: training splits at the
/// rank boundary between 4 and 5, and scoring the training rows back
/// through the public predict API recovers the two response levels.
#[test]
fn trains_and_predicts_a_single_numeric_split() {
    let x: Vec<f64> = (1..=8).map(|v| v as f64).collect();
    let y = vec![1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];

    let mut train_block = PredBlock::new();
    train_block.train_immutables(x.clone(), vec![], vec![], 8, 1).unwrap();
    let row_rank = RowRank::build(&train_block).unwrap();

    let params = TrainParamsBuilder::new()
        .n_tree(1)
        .n_samp(8)
        .with_replacement(false)
        .min_node(1)
        .pred_prob(vec![1.0])
        .reg_mono(vec![Monotone::None])
        .build(1)
        .unwrap();

    let out = session::train(
        &train_block,
        &row_rank,
        TrainResponse::Regression { y: &y },
        &vec![1.0; 8],
        &params,
        0,
    )
    .unwrap();
    assert!(out.pred_info[0] > 0.0);

    let mut predict_block = PredBlock::new();
    predict_block.predict_immutables(x, vec![], 1, 0, 8).unwrap();
    let prediction =
        predict::predict_regression(&out.forest, &predict_block, None, &PredictParams::default(), None).unwrap();
    let expected = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
    for (got, want) in prediction.y_pred.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-9);
    }
}

/// Single factor predictor, binary classification: a level arena collapses
/// six rows into three runs and orders them by class-1 concentration.
#[test]
fn orders_factor_runs_by_class_concentration() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut arena = LevelArena::build(&[3], SplitMode::BinaryClassification, &mut rng);
    // levels [A,A,B,B,C,C], ctg = [0,0,1,1,0,1] -> runs A(2,0), B(0,2), C(1,1)
    arena.accumulate(
        0,
        forester::runset::FRNode { start: 0, end: 2, s_count: 2, sum: 0.0, rank: 0 },
        Some(&[2.0, 0.0]),
    );
    arena.accumulate(
        0,
        forester::runset::FRNode { start: 2, end: 4, s_count: 2, sum: 2.0, rank: 1 },
        Some(&[0.0, 2.0]),
    );
    arena.accumulate(
        0,
        forester::runset::FRNode { start: 4, end: 6, s_count: 2, sum: 1.0, rank: 2 },
        Some(&[1.0, 1.0]),
    );

    assert_eq!(arena.pair(0).run_count(), 3);
    arena.heap_binary(0);
    arena.de_pop(0, 3);
    let order: Vec<u32> = (0..3).map(|k| arena.bounds(0, k).2).collect();
    assert_eq!(order, vec![0, 2, 1]); // A, C, B ascending class-1 concentration
}

/// Training saw factor levels `[x,y,z]`; a predict session observes
/// `[x,y,w]` — `w` is recoded to the shared proxy code and raises a
/// warning, but the predictor-set signature itself still matches.
#[test]
fn unobserved_factor_level_gets_a_proxy_code_and_warning() {
    let train_sig = Signature {
        pred_map: vec![true],
        level: vec![vec!["x".into(), "y".into(), "z".into()]],
    };
    let predict_sig = Signature {
        pred_map: vec![true],
        level: vec![vec!["x".into(), "y".into(), "w".into()]],
    };
    assert!(train_sig.check(&predict_sig).is_ok());

    let train_levels = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    let observed = vec!["x".to_string(), "y".to_string(), "w".to_string()];
    let (codes, warnings) = recode_levels(&train_levels, &observed, 0);
    assert_eq!(codes, vec![0, 1, 4]);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].proxy_code, 4);
}

/// Row 0 is in-bag for tree 0, so out-of-bag scoring suppresses tree 0's
/// contribution and only tree 1's leaf value lands in the prediction.
#[test]
fn out_of_bag_mask_suppresses_a_rows_own_tree() {
    let x = vec![1.0, 2.0, 3.0, 4.0];
    let mut train_block = PredBlock::new();
    train_block.train_immutables(x.clone(), vec![], vec![], 4, 1).unwrap();
    let row_rank = RowRank::build(&train_block).unwrap();
    let tree_params = TreeParams {
        min_node: 1,
        min_ratio: 0.0,
        tot_levels: 1,
        pred_fixed: 0,
        pred_prob: vec![1.0],
        reg_mono: vec![Monotone::None],
    };
    let s_count = vec![1u32; 4];

    let mut forest = Forest::new(ResponseKind::Regression, 1);
    for y in [vec![10.0; 4], vec![20.0; 4]] {
        let mut rng = StdRng::seed_from_u64(0);
        let built = tree::build_tree(
            &train_block,
            &row_rank,
            TreeResponse::Regression(&y),
            &s_count,
            &tree_params,
            &mut rng,
            None,
        )
        .unwrap();
        forest.splice_tree(&built.tree, &[]).unwrap();
    }

    let mut bag = BitMatrix::new(4, 2);
    bag.set(0, 0);
    bag.set(3, 0);
    bag.set(1, 1);
    bag.set(2, 1);

    let mut predict_block = PredBlock::new();
    predict_block.predict_immutables(x, vec![], 1, 0, 4).unwrap();
    let out =
        predict::predict_regression(&forest, &predict_block, Some(&bag), &PredictParams::default(), None).unwrap();
    assert!((out.y_pred[0] - 20.0).abs() < 1e-9);
}

/// A wide factor predictor (more levels than the subsampling cap) grown
/// twice from the same seed produces bit-identical trees, and a bare arena
/// draw never keeps more runs than the cap allows.
#[test]
fn wide_factor_subsampling_is_seed_deterministic_and_capped() {
    let n_levels = 12u32;
    let fe_fac: Vec<u32> = (0..n_levels).collect();
    let ctg: Vec<u32> = (0..n_levels).map(|l| l % 3).collect();
    let mut block = PredBlock::new();
    block
        .train_immutables(vec![], fe_fac, vec![n_levels], n_levels as usize, 0)
        .unwrap();
    let row_rank = RowRank::build(&block).unwrap();
    let s_count = vec![1u32; n_levels as usize];
    let tree_params = TreeParams {
        min_node: 1,
        min_ratio: 0.0,
        tot_levels: 10,
        pred_fixed: 0,
        pred_prob: vec![1.0],
        reg_mono: vec![],
    };

    let grow = || {
        let mut rng = StdRng::seed_from_u64(9);
        tree::build_tree(
            &block,
            &row_rank,
            TreeResponse::Classification { ctg: &ctg, ctg_width: 3 },
            &s_count,
            &tree_params,
            &mut rng,
            None,
        )
        .unwrap()
        .tree
    };

    let first = grow();
    let second = grow();
    assert_eq!(format!("{:?}", first.nodes), format!("{:?}", second.nodes));

    // independently, a bare arena draw never keeps more than the cap's worth
    // of runs regardless of how many levels were accumulated.
    let mut rng = StdRng::seed_from_u64(11);
    let mut arena =
        LevelArena::build_with_max_width(&[12], SplitMode::WideClassification { ctg_width: 3 }, 5, &mut rng);
    for i in 0..12u32 {
        arena.accumulate(
            0,
            forester::runset::FRNode { start: i, end: i + 1, s_count: 1, sum: 1.0, rank: i },
            Some(&[1.0, 0.0, 0.0]),
        );
    }
    assert_eq!(arena.de_wide(0), 5);
    let mut seen = std::collections::HashSet::new();
    for k in 0..5 {
        seen.insert(arena.bounds(0, k).2);
    }
    assert_eq!(seen.len(), 5);
}

/// Three leaves covering ranks `{2, 2, 4}` bucket into the median bin of a
/// 5-bin, 5-ranked-value table, yielding the middle ranked value.
#[test]
fn quantile_prediction_buckets_leaf_ranks_into_the_median_bin() {
    let y_ranked = vec![10.0, 20.0, 30.0, 40.0, 50.0];
    let mut forest = Forest::new(ResponseKind::Regression, 0);
    for rank in [2u32, 2, 4] {
        let tree = forester::tree::Tree {
            nodes: vec![forester::tree::TreeNode::Leaf(forester::tree::LeafNode {
                sample_count: 1,
                sum: y_ranked[rank as usize],
                ctg_weight: Vec::new(),
                rank_samples: vec![(rank, 1)],
                ctg_jitter: 0.0,
            })],
            n_pred_num: 0,
        };
        forest.splice_tree(&tree, &[]).unwrap();
    }

    let mut predict_block = PredBlock::new();
    predict_block.predict_immutables(vec![], vec![], 0, 0, 1).unwrap();
    let params = PredictParams {
        q_bin: 5,
        quant_vec: vec![0.5],
        ..PredictParams::default()
    };
    let out =
        predict::predict_regression(&forest, &predict_block, None, &params, Some(&y_ranked)).unwrap();
    let q_pred = out.q_pred.unwrap();
    assert!((q_pred[0][0] - 30.0).abs() < 1e-9);
}
