use std::sync::Arc;

use log::debug;

use super::kway_fm::fm_pass;
use super::{repair_balance, PassState, Refiner, Scope};
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};

/// K-way pairwise FM: each pass picks disjoint block pairs and runs FM
/// restricted to moves inside every selected pair, all pairs at once.
pub struct KpmRefiner {
    evaluator: Arc<Evaluator>,
    config: RefineConfig,
}

impl KpmRefiner {
    pub fn new(evaluator: Arc<Evaluator>, config: RefineConfig) -> Self {
        Self { evaluator, config }
    }
}

fn pair_index(num_parts: usize, a: usize, b: usize) -> usize {
    let (a, b) = (a.min(b), a.max(b));
    a * num_parts - a * (a + 1) / 2 + (b - a - 1)
}

/// Ranks block pairs by the cost of the hyperedges spanning them, minus the
/// score the pair had at the previous pass, and greedily takes disjoint
/// pairs from the top. `prev_scores` is updated to the current scores.
pub(crate) fn find_pairs(state: &PassState, prev_scores: &mut [f32]) -> Vec<(usize, usize)> {
    let num_parts = state.num_parts();
    let mut ranked = vec![];
    for a in 0..num_parts {
        for b in a + 1..num_parts {
            let idx = pair_index(num_parts, a, b);
            let score = state
                .ev
                .pair_span(state.hg, state.ctx, &state.net_degs, a, b);
            ranked.push((score - prev_scores[idx], score, a, b));
            prev_scores[idx] = score;
        }
    }
    ranked.sort_by(|x, y| y.0.total_cmp(&x.0).then(y.1.total_cmp(&x.1)));

    let mut taken = vec![false; num_parts];
    let mut pairs = vec![];
    for (_, score, a, b) in ranked {
        if score <= 0.0 || taken[a] || taken[b] {
            continue;
        }
        taken[a] = true;
        taken[b] = true;
        pairs.push((a, b));
    }
    pairs
}

impl Refiner for KpmRefiner {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        if self.config.max_moves == 0 {
            return 0.0;
        }
        let num_parts = self.evaluator.num_parts();
        let mut state = PassState::new(hg, ctx, &self.evaluator, solution);
        let mut prev_scores = vec![0.0; num_parts * (num_parts - 1) / 2];
        let mut stagnation = 0;
        let mut total = 0.0;
        for i in 0..self.config.refiner_iters {
            state.reset_visited();
            let pairs = find_pairs(&state, &mut prev_scores);
            if pairs.is_empty() {
                break;
            }
            let gain = fm_pass(&mut state, bounds, &self.config, &Scope::pairs(num_parts, &pairs));
            debug!(
                "kpm pass {i}: pairs {pairs:?}, gain {gain:.4}, cost {:.4}",
                state.cost()
            );
            // A pass rolls back to its best prefix, so it never loses cost.
            if gain > 0.0 {
                stagnation = 0;
                total += gain;
            } else {
                stagnation += 1;
                if stagnation >= self.config.max_stagnation {
                    break;
                }
            }
        }
        total
    }

    fn balance_partition(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) {
        let mut state = PassState::new(hg, ctx, &self.evaluator, solution);
        repair_balance(&mut state, bounds);
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::config::CostFactors;
    use crate::refine::tests::unit;

    #[test]
    fn pair_indices_are_dense() {
        let mut seen = vec![];
        for a in 0..5 {
            for b in a + 1..5 {
                seen.push(pair_index(5, a, b));
                assert_eq!(pair_index(5, a, b), pair_index(5, b, a));
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn pairs_are_disjoint_and_ranked() {
        // Blocks 0 and 1 share two hyperedges, blocks 2 and 3 one.
        let h = Hypergraph::new(
            unit(8),
            vec![vec![0, 2], vec![1, 3], vec![4, 6], vec![5, 7]],
            unit(4),
        )
        .unwrap();
        let ev = Evaluator::new(4, CostFactors::default());
        let ctx = ev.context(&h);
        let mut solution = vec![0, 0, 1, 1, 2, 3, 2, 2];
        let state = PassState::new(&h, &ctx, &ev, &mut solution);
        let mut prev = vec![0.0; 6];
        let pairs = find_pairs(&state, &mut prev);
        assert_eq!(pairs, vec![(0, 1), (2, 3)]);
        assert_eq!(prev[pair_index(4, 0, 1)], 2.0);
        assert_eq!(prev[pair_index(4, 0, 2)], 0.0);
    }

    #[test]
    fn improves_four_way_partition() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut nets: Vec<Vec<usize>> = vec![];
        // Four planted clusters of 10 vertices plus some noise.
        for c in 0..4 {
            for _ in 0..30 {
                nets.push((0..3).map(|_| c * 10 + rng.gen_range(0..10)).collect());
            }
        }
        for _ in 0..6 {
            nets.push(vec![rng.gen_range(0..40), rng.gen_range(0..40)]);
        }
        let n = nets.len();
        let h = Hypergraph::new(unit(40), nets, unit(n)).unwrap();
        let ev = Arc::new(Evaluator::new(4, CostFactors::default()));
        let kpm = KpmRefiner::new(ev.clone(), RefineConfig::default());
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(4, 10.0, &[0.25; 4]);
        let mut solution: Vec<usize> = (0..40).map(|v| (v / 10 + usize::from(v % 10 < 2)) % 4).collect();
        let before = ev.cut_evaluator(&h, &ctx, &solution).cost;
        let gain = kpm.refine(&h, &ctx, &bounds, &mut solution);
        let after = ev.cut_evaluator(&h, &ctx, &solution).cost;
        assert!(gain > 0.0);
        assert!(after < before);
        assert!((before - after - gain).abs() < 1e-3);
        assert!(bounds.satisfies(&ev.block_balance(&h, &solution)));
    }

    #[test]
    fn stagnation_stops_without_moving() {
        // Every block sits at two vertices and the bounds allow neither
        // three nor one, so no move is legal.
        let h = Hypergraph::new(unit(6), vec![vec![0, 1, 2], vec![3, 4, 5], vec![2, 3]], unit(3)).unwrap();
        let ev = Arc::new(Evaluator::new(3, CostFactors::default()));
        let config = RefineConfig {
            max_stagnation: 1,
            ..Default::default()
        };
        let kpm = KpmRefiner::new(ev.clone(), config);
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(3, 5.0, &[1.0 / 3.0; 3]);
        let mut solution = vec![0, 0, 1, 1, 2, 2];
        let before = ev.cut_evaluator(&h, &ctx, &solution).cost;
        let gain = kpm.refine(&h, &ctx, &bounds, &mut solution);
        assert_eq!(gain, 0.0);
        assert_eq!(solution, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(ev.cut_evaluator(&h, &ctx, &solution).cost, before);
    }
}
