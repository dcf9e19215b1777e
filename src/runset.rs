//! Per-(node, factor-predictor) run accumulation for one level.
//!
//! A level's runs, heap pairs, and out-slot lists all live in one
//! [`LevelArena`]; each [`RunSet`] is a small `Copy` view (offsets + caps)
//! into that arena rather than a set of cached pointers. Arena
//! lifetime is exactly one level; the tree builder drops it at
//! `levelClear`.

use rand::Rng;

use crate::heap::{self, HeapPair};

/// Default sampled-without-replacement cap for very wide factors.
/// Configurable per [`LevelArena`] so tests can exercise the
/// subsampling path deterministically with a small cap.
pub const DEFAULT_MAX_WIDTH: usize = 10;

/// A contiguous block of rank-ordered rows sharing a factor level.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FRNode {
    pub start: u32,
    pub end: u32,
    pub s_count: u32,
    pub sum: f64,
    pub rank: u32,
}

/// Which scoring regime a level's splits are being evaluated under; decides
/// whether a heap is primed at all, and which key function it uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMode {
    Regression,
    BinaryClassification,
    WideClassification { ctg_width: usize },
}

/// Per-pair bookkeeping: arena offsets, capacities, and the mutable counters
/// that accumulate during a level (`runCount`, `runsLH`, and the split
/// resolution totals).
#[derive(Debug, Clone, Copy)]
pub struct RunSet {
    run_off: usize,
    run_cap: usize,
    heap_off: usize,
    heap_cap: usize,
    out_off: usize,
    out_cap: usize,
    run_count: usize,
    runs_lh: usize,
    lh_idx_count: u32,
    lh_samp_ct: u32,
}

impl RunSet {
    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn runs_lh(&self) -> usize {
        self.runs_lh
    }

    pub fn lh_idx_count(&self) -> u32 {
        self.lh_idx_count
    }

    pub fn lh_samp_ct(&self) -> u32 {
        self.lh_samp_ct
    }

    pub fn safe_count(&self) -> usize {
        self.run_cap
    }
}

/// Owns the three flat arenas (runs, heap pairs, out-slot lists) plus the
/// per-run category-sum strip and wide-factor random draws, for one level.
pub struct LevelArena {
    fac_run: Vec<FRNode>,
    b_heap: Vec<HeapPair>,
    lh_out: Vec<u32>,
    ctg_sum: Vec<f64>,
    rv_wide: Vec<f64>,
    ctg_width: usize,
    max_width: usize,
    pairs: Vec<RunSet>,
}

impl LevelArena {
    /// Allocate a level's arenas from the `safeCount` upper bound of each
    /// (node, predictor) pair carried forward from the previous level, using
    /// the default subsampling cap ([`DEFAULT_MAX_WIDTH`]).
    pub fn build<R: Rng>(safe_counts: &[usize], mode: SplitMode, rng: &mut R) -> LevelArena {
        Self::build_with_max_width(safe_counts, mode, DEFAULT_MAX_WIDTH, rng)
    }

    /// Like [`LevelArena::build`] but with an explicit subsampling cap —
    /// used by tests that need to exercise `de_wide` without allocating
    /// thousands of runs.
    pub fn build_with_max_width<R: Rng>(
        safe_counts: &[usize],
        mode: SplitMode,
        max_width: usize,
        rng: &mut R,
    ) -> LevelArena {
        let ctg_width = match mode {
            SplitMode::WideClassification { ctg_width } => ctg_width,
            SplitMode::BinaryClassification => 2,
            SplitMode::Regression => 0,
        };

        let mut pairs = Vec::with_capacity(safe_counts.len());
        let mut run_total = 0usize;
        let mut heap_total = 0usize;
        let mut out_total = 0usize;

        // first pass: compute offsets
        struct Plan {
            run_off: usize,
            run_cap: usize,
            heap_off: usize,
            heap_cap: usize,
            out_off: usize,
            out_cap: usize,
        }
        let mut plans = Vec::with_capacity(safe_counts.len());
        for &safe_count in safe_counts {
            let heap_cap = match mode {
                SplitMode::Regression => safe_count,
                SplitMode::BinaryClassification => safe_count,
                SplitMode::WideClassification { .. } => {
                    if safe_count > max_width {
                        safe_count
                    } else {
                        0
                    }
                }
            };
            let out_cap = match mode {
                SplitMode::WideClassification { .. } if safe_count > max_width => max_width,
                _ => safe_count,
            };
            plans.push(Plan {
                run_off: run_total,
                run_cap: safe_count,
                heap_off: heap_total,
                heap_cap,
                out_off: out_total,
                out_cap,
            });
            run_total += safe_count;
            heap_total += heap_cap;
            out_total += out_cap;
        }

        let mut rv_wide = vec![0.0f64; heap_total];
        if let SplitMode::WideClassification { .. } = mode {
            for v in rv_wide.iter_mut() {
                *v = rng.gen::<f64>();
            }
        }

        for p in plans {
            pairs.push(RunSet {
                run_off: p.run_off,
                run_cap: p.run_cap,
                heap_off: p.heap_off,
                heap_cap: p.heap_cap,
                out_off: p.out_off,
                out_cap: p.out_cap,
                run_count: 0,
                runs_lh: 0,
                lh_idx_count: 0,
                lh_samp_ct: 0,
            });
        }

        LevelArena {
            fac_run: vec![FRNode::default(); run_total],
            b_heap: vec![HeapPair { key: 0.0, slot: 0 }; heap_total],
            lh_out: vec![0u32; out_total],
            ctg_sum: vec![0.0f64; run_total * ctg_width],
            rv_wide,
            ctg_width,
            max_width,
            pairs,
        }
    }

    pub fn pair(&self, i: usize) -> &RunSet {
        &self.pairs[i]
    }

    pub fn ctg_width(&self) -> usize {
        self.ctg_width
    }

    /// Append a run to pair `i`. `ctg_contrib`, when classification is
    /// active, must sum to `run.sum`.
    pub fn accumulate(&mut self, i: usize, run: FRNode, ctg_contrib: Option<&[f64]>) {
        let p = &mut self.pairs[i];
        assert!(
            p.run_count < p.run_cap,
            "run_count would exceed safeCount for pair {}",
            i
        );
        let slot = p.run_count;
        self.fac_run[p.run_off + slot] = run;
        if let Some(contrib) = ctg_contrib {
            debug_assert_eq!(contrib.len(), self.ctg_width);
            let base = (p.run_off + slot) * self.ctg_width;
            self.ctg_sum[base..base + self.ctg_width].copy_from_slice(contrib);
        }
        p.run_count += 1;
    }

    fn ctg_row(&self, run_idx: usize) -> &[f64] {
        let base = run_idx * self.ctg_width;
        &self.ctg_sum[base..base + self.ctg_width]
    }

    /// Prime the heap with `sum / sCount` keys (regression).
    pub fn heap_mean(&mut self, i: usize) {
        let p = self.pairs[i];
        for slot in 0..p.run_count {
            let run = self.fac_run[p.run_off + slot];
            let key = run.sum / run.s_count as f64;
            heap::insert(
                &mut self.b_heap[p.heap_off..p.heap_off + p.heap_cap],
                slot,
                slot as u32,
                key,
            );
        }
    }

    /// Prime the heap with class-1 concentration keys (binary classification).
    pub fn heap_binary(&mut self, i: usize) {
        let p = self.pairs[i];
        for slot in 0..p.run_count {
            let run = self.fac_run[p.run_off + slot];
            let ctg1 = self.ctg_row(p.run_off + slot)[1];
            let key = if run.sum != 0.0 { ctg1 / run.sum } else { 0.0 };
            heap::insert(
                &mut self.b_heap[p.heap_off..p.heap_off + p.heap_cap],
                slot,
                slot as u32,
                key,
            );
        }
    }

    /// Prime the heap with the precomputed uniform draws (wide multi-class
    /// subsampling).
    pub fn heap_random(&mut self, i: usize) {
        let p = self.pairs[i];
        for slot in 0..p.run_count {
            let key = self.rv_wide[p.heap_off + slot];
            heap::insert(
                &mut self.b_heap[p.heap_off..p.heap_off + p.heap_cap],
                slot,
                slot as u32,
                key,
            );
        }
    }

    /// Emit the `pop` smallest-key slots (ascending) into the out-slot list.
    pub fn de_pop(&mut self, i: usize, pop: usize) {
        let p = self.pairs[i];
        debug_assert!(pop <= p.run_count);
        heap::depopulate(
            &mut self.b_heap[p.heap_off..p.heap_off + p.heap_cap],
            p.run_count,
            &mut self.lh_out[p.out_off..p.out_off + p.out_cap],
            pop,
        );
    }

    /// If `runCount > MAX_WIDTH`, subsample down to `MAX_WIDTH` runs via
    /// `heap_random` + `de_pop`, compacting the sampled runs (and their
    /// category strips) into the first `MAX_WIDTH` slots. Otherwise a no-op.
    /// Returns the resulting `runCount`.
    pub fn de_wide(&mut self, i: usize) -> usize {
        let run_count = self.pairs[i].run_count;
        let max_width = self.max_width;
        if run_count <= max_width {
            return run_count;
        }
        self.heap_random(i);
        self.de_pop(i, max_width);

        let p = self.pairs[i];
        let mut new_runs = Vec::with_capacity(max_width);
        let mut new_ctg = Vec::with_capacity(max_width * self.ctg_width);
        for k in 0..max_width {
            let chosen_slot = self.lh_out[p.out_off + k] as usize;
            new_runs.push(self.fac_run[p.run_off + chosen_slot]);
            if self.ctg_width > 0 {
                new_ctg.extend_from_slice(self.ctg_row(p.run_off + chosen_slot));
            }
        }
        for (k, run) in new_runs.into_iter().enumerate() {
            self.fac_run[p.run_off + k] = run;
        }
        if self.ctg_width > 0 {
            let base = p.run_off * self.ctg_width;
            self.ctg_sum[base..base + max_width * self.ctg_width].copy_from_slice(&new_ctg);
        }
        self.pairs[i].run_count = max_width;
        max_width
    }

    /// Resolve a subset split chosen by explicit enumeration: bit `k` of
    /// `mask` selects run slot `k` for LH. `mask` ranges over
    /// `[0, 2^(run_count-1) - 1]` in the caller.
    pub fn lh_bits(&mut self, i: usize, mask: u32) {
        let p_snapshot = self.pairs[i];
        let mut lh_idx_count = 0u32;
        let mut lh_samp_ct = 0u32;
        let mut runs_lh = 0usize;
        let mut chosen = Vec::with_capacity(p_snapshot.run_count);
        for k in 0..p_snapshot.run_count {
            if mask & (1 << k) != 0 {
                let run = self.fac_run[p_snapshot.run_off + k];
                lh_idx_count += run.end - run.start;
                lh_samp_ct += run.s_count;
                runs_lh += 1;
                chosen.push(k as u32);
            }
        }
        let p = &mut self.pairs[i];
        p.lh_idx_count = lh_idx_count;
        p.lh_samp_ct = lh_samp_ct;
        p.runs_lh = runs_lh;
        let out_off = p.out_off;
        for (slot, &k) in chosen.iter().enumerate() {
            self.lh_out[out_off + slot] = k;
        }
    }

    /// Resolve a monotone cut over the heap-ordered out list: LH is the
    /// first `cut + 1` entries of `lh_out`.
    pub fn lh_slots(&mut self, i: usize, cut: usize) {
        let p_snapshot = self.pairs[i];
        let take = cut + 1;
        debug_assert!(take <= p_snapshot.run_count);
        let mut lh_idx_count = 0u32;
        let mut lh_samp_ct = 0u32;
        for slot in 0..take {
            let run_idx = self.lh_out[p_snapshot.out_off + slot] as usize;
            let run = self.fac_run[p_snapshot.run_off + run_idx];
            lh_idx_count += run.end - run.start;
            lh_samp_ct += run.s_count;
        }
        let p = &mut self.pairs[i];
        p.lh_idx_count = lh_idx_count;
        p.lh_samp_ct = lh_samp_ct;
        p.runs_lh = take;
    }

    /// Dereference the `out_slot`-th chosen run for pair `i`, returning its
    /// rank interval for the restage driver.
    pub fn bounds(&self, i: usize, out_slot: usize) -> (u32, u32, u32) {
        let p = self.pairs[i];
        let run_idx = self.lh_out[p.out_off + out_slot] as usize;
        let run = self.fac_run[p.run_off + run_idx];
        (run.start, run.end, run.rank)
    }

    /// The run node the `out_slot`-th heap-ordered entry of pair `i` points
    /// at, for callers that need `(sCount, sum)` rather than the rank
    /// interval `bounds` projects.
    pub fn run_at_out_slot(&self, i: usize, out_slot: usize) -> FRNode {
        let p = self.pairs[i];
        let run_idx = self.lh_out[p.out_off + out_slot] as usize;
        self.fac_run[p.run_off + run_idx]
    }

    /// The category-sum row the `out_slot`-th heap-ordered entry of pair `i`
    /// points at.
    pub fn ctg_at_out_slot(&self, i: usize, out_slot: usize) -> &[f64] {
        let p = self.pairs[i];
        let run_idx = self.lh_out[p.out_off + out_slot] as usize;
        self.ctg_row(p.run_off + run_idx)
    }

    /// The factor level (carried in `FRNode::rank`) of run slot `slot` of
    /// pair `i`, bypassing the `lh_out` indirection — used when a split is
    /// resolved directly over run slots (`lh_bits`) rather than over the
    /// heap-ordered out list.
    pub fn run_level(&self, i: usize, slot: usize) -> u32 {
        let p = self.pairs[i];
        self.fac_run[p.run_off + slot].rank
    }

    /// The run node at slot `slot` of pair `i`, for callers (the split
    /// search) that need the run's `(sCount, sum)` directly rather than
    /// through `bounds`' rank-interval projection.
    pub fn run_at(&self, i: usize, slot: usize) -> FRNode {
        let p = self.pairs[i];
        self.fac_run[p.run_off + slot]
    }

    /// The `ctgWidth`-wide category-sum row for run slot `slot` of pair `i`.
    pub fn ctg_at(&self, i: usize, slot: usize) -> &[f64] {
        let p = self.pairs[i];
        self.ctg_row(p.run_off + slot)
    }

    /// Total `(sCount, sum)` across all runs written for pair `i` so far,
    /// used by property tests to check against the node total.
    pub fn totals(&self, i: usize) -> (u32, f64) {
        let p = self.pairs[i];
        let mut s_count = 0u32;
        let mut sum = 0.0f64;
        for slot in 0..p.run_count {
            let run = self.fac_run[p.run_off + slot];
            s_count += run.s_count;
            sum += run.sum;
        }
        (s_count, sum)
    }

    /// Total per-category sum across all runs written for pair `i` so far
    /// (classification only; `ctgWidth`-wide).
    pub fn ctg_totals(&self, i: usize) -> Vec<f64> {
        let p = self.pairs[i];
        let mut total = vec![0.0f64; self.ctg_width];
        for slot in 0..p.run_count {
            let row = self.ctg_row(p.run_off + slot);
            for (t, v) in total.iter_mut().zip(row) {
                *t += v;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(start: u32, end: u32, s_count: u32, sum: f64, rank: u32) -> FRNode {
        FRNode {
            start,
            end,
            s_count,
            sum,
            rank,
        }
    }

    #[test]
    fn binary_classification_orders_runs_by_concentration() {
        // 6 rows, factor levels [A,A,B,B,C,C], yCtg = [0,0,1,1,0,1]
        // runs: A -> (2,0), B -> (0,2), C -> (1,1)
        let mut rng = StdRng::seed_from_u64(0);
        let mut arena = LevelArena::build(&[3], SplitMode::BinaryClassification, &mut rng);
        arena.accumulate(0, run(0, 2, 2, 0.0, 0), Some(&[2.0, 0.0]));
        arena.accumulate(0, run(2, 4, 2, 2.0, 1), Some(&[0.0, 2.0]));
        arena.accumulate(0, run(4, 6, 2, 1.0, 2), Some(&[1.0, 1.0]));

        arena.heap_binary(0);
        arena.de_pop(0, 3);

        let order: Vec<u32> = (0..3).map(|k| arena.bounds(0, k).2).collect();
        // keys: A=0/0=0.0, B=2/2=1.0, C=1/2=0.5 -> ascending order A, C, B -> ranks 0, 2, 1
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn ctg_sum_matches_run_sum() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut arena = LevelArena::build(&[1], SplitMode::BinaryClassification, &mut rng);
        arena.accumulate(0, run(0, 5, 5, 3.0, 0), Some(&[1.0, 2.0]));
        let row = arena.ctg_row(0);
        assert_eq!(row.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn de_wide_identity_below_cap() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut arena = LevelArena::build(&[3], SplitMode::WideClassification { ctg_width: 5 }, &mut rng);
        for i in 0..3 {
            arena.accumulate(0, run(i, i + 1, 1, 1.0, i), None);
        }
        assert_eq!(arena.de_wide(0), 3);
        assert_eq!(arena.pair(0).run_count(), 3);
    }

    #[test]
    fn de_wide_deterministic_selection() {
        // fixed draws rvWide = [0.9, 0.1, 0.5, 0.3, 0.7], maxWidth = 3
        // expect selection of original slots {1, 3, 2} in that order
        let mut rng = StdRng::seed_from_u64(3);
        let safe_counts = [5usize];
        let mut arena = LevelArena::build_with_max_width(
            &safe_counts,
            SplitMode::WideClassification { ctg_width: 2 },
            3,
            &mut rng,
        );
        // override the arena's random draws with fixed values for a deterministic check
        arena.rv_wide = vec![0.9, 0.1, 0.5, 0.3, 0.7];
        for i in 0..5u32 {
            arena.accumulate(0, run(i, i + 1, 1, 1.0, i), Some(&[0.0, 0.0]));
        }
        assert_eq!(arena.de_wide(0), 3);
        let selected_ranks: Vec<u32> = (0..3).map(|k| arena.bounds(0, k).2).collect();
        assert_eq!(selected_ranks, vec![1, 3, 2]);
    }

    #[test]
    fn de_wide_caps_at_max_width() {
        let mut rng = StdRng::seed_from_u64(4);
        let n = DEFAULT_MAX_WIDTH + 4;
        let mut arena = LevelArena::build(&[n], SplitMode::WideClassification { ctg_width: 0 }, &mut rng);
        for i in 0..n as u32 {
            arena.accumulate(0, run(i, i + 1, 1, 1.0, i), None);
        }
        let result = arena.de_wide(0);
        assert_eq!(result, DEFAULT_MAX_WIDTH);
        assert_eq!(arena.pair(0).run_count(), DEFAULT_MAX_WIDTH);

        let mut seen = std::collections::HashSet::new();
        for k in 0..DEFAULT_MAX_WIDTH {
            let (_, _, rank) = arena.bounds(0, k);
            seen.insert(rank);
        }
        assert_eq!(seen.len(), DEFAULT_MAX_WIDTH);
    }

    #[test]
    fn lh_bits_selects_subset() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut arena = LevelArena::build(&[3], SplitMode::Regression, &mut rng);
        arena.accumulate(0, run(0, 2, 2, 4.0, 0), None);
        arena.accumulate(0, run(2, 5, 3, 9.0, 1), None);
        arena.accumulate(0, run(5, 6, 1, 1.0, 2), None);

        // select slots 0 and 2 -> mask 0b101 = 5
        arena.lh_bits(0, 0b101);
        assert_eq!(arena.pair(0).runs_lh(), 2);
        assert_eq!(arena.pair(0).lh_samp_ct(), 3);
        assert_eq!(arena.pair(0).lh_idx_count(), 3);
    }

    #[test]
    fn run_count_never_exceeds_safe_count() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut arena = LevelArena::build(&[2], SplitMode::Regression, &mut rng);
        arena.accumulate(0, run(0, 1, 1, 1.0, 0), None);
        arena.accumulate(0, run(1, 2, 1, 1.0, 1), None);
        assert_eq!(arena.pair(0).run_count(), arena.pair(0).safe_count());
    }
}
