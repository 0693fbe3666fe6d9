use std::sync::Arc;

use bitvec::prelude::*;
use log::{debug, warn};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rayon::prelude::*;

use crate::config::{InitialConfig, RefineConfig};
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};
use crate::ilp::{IlpModel, IlpOutcome, IlpSolver};
use crate::refine::{KWayFmRefiner, Refiner};
use crate::weights;

/// A block stops taking vertices in one go once this share of its upper
/// bound has been handed to it.
const CHUNK_SHARE: f32 = 0.1;

/// Builds the candidate solutions of the coarsest level.
pub struct InitialPartitioner {
    evaluator: Arc<Evaluator>,
    config: InitialConfig,
    refine: RefineConfig,
    solver: Arc<dyn IlpSolver>,
}

impl InitialPartitioner {
    pub fn new(
        evaluator: Arc<Evaluator>,
        config: InitialConfig,
        refine: RefineConfig,
        solver: Arc<dyn IlpSolver>,
    ) -> Self {
        Self {
            evaluator,
            config,
            refine,
            solver,
        }
    }

    /// Random, random-vile and vile candidates, each polished by FM, plus an
    /// exact one on small instances. Returns the best few, cheapest first.
    pub fn partition(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        rng: &mut SmallRng,
    ) -> Vec<Vec<usize>> {
        let fm = KWayFmRefiner::new(
            self.evaluator.clone(),
            RefineConfig {
                max_moves: hg.num_vertices(),
                ..self.refine.clone()
            },
        );
        let polish = |solution: &mut Vec<usize>| {
            if !bounds.satisfies(&self.evaluator.block_balance(hg, &*solution)) {
                fm.balance_partition(hg, ctx, bounds, solution);
            }
            fm.refine(hg, ctx, bounds, solution);
        };

        let num = self.config.num_initial_solutions;
        let seeds: Vec<u64> = (0..2 * num).map(|_| rng.gen()).collect();
        let mut candidates: Vec<Vec<usize>> = seeds
            .par_iter()
            .enumerate()
            .map(|(i, &seed)| {
                let mut rng = SmallRng::seed_from_u64(seed);
                let mut solution = if i < num {
                    self.random(hg, bounds, &mut rng)
                } else {
                    self.random_vile(hg, bounds, &mut rng)
                };
                polish(&mut solution);
                solution
            })
            .collect();
        let mut vile = self.vile(hg, ctx, bounds);
        polish(&mut vile);
        candidates.push(vile);

        if hg.num_vertices() <= self.config.ilp_vertex_threshold {
            let hint = self.select_best(hg, ctx, bounds, candidates.clone()).into_iter().next();
            if let Some(mut exact) = self.ilp(hg, ctx, bounds, hint) {
                polish(&mut exact);
                candidates.push(exact);
            }
        }

        self.select_best(hg, ctx, bounds, candidates)
    }

    /// Visits free vertices in random order, timing-path vertices first, and
    /// deals them to the blocks round-robin in chunks.
    pub fn random(&self, hg: &Hypergraph, bounds: &BalanceBounds, rng: &mut SmallRng) -> Vec<usize> {
        let num_parts = self.evaluator.num_parts();
        let (mut solution, mut balance, free) = self.preassign(hg);
        let chunk_limit: Vec<Vec<f32>> = bounds
            .upper
            .iter()
            .map(|u| u.iter().map(|x| x * CHUNK_SHARE).collect())
            .collect();

        let mut cursor = 0;
        let mut chunk = vec![0.0; hg.vertex_dimensions()];
        for v in visit_order(hg, free, rng) {
            let w = hg.vertex_weights(v);
            let block = (0..num_parts)
                .map(|i| (cursor + i) % num_parts)
                .find(|&b| weights::fits_with(&balance[b], w, &bounds.upper[b]))
                .unwrap_or_else(|| self.lightest(&balance));
            if block != cursor {
                cursor = block;
                chunk.fill(0.0);
            }
            solution[v] = block;
            weights::add_assign(&mut balance[block], w);
            weights::add_assign(&mut chunk, w);
            if chunk.iter().zip(&chunk_limit[block]).any(|(c, l)| c > l) {
                cursor = (cursor + 1) % num_parts;
                chunk.fill(0.0);
            }
        }
        solution
    }

    /// Every free vertex in block 0, then moved out by the best-gain balance
    /// repair.
    pub fn vile(&self, hg: &Hypergraph, ctx: &EvalContext, bounds: &BalanceBounds) -> Vec<usize> {
        let (mut solution, _, _) = self.preassign(hg);
        let fm = KWayFmRefiner::new(self.evaluator.clone(), self.refine.clone());
        fm.balance_partition(hg, ctx, bounds, &mut solution);
        solution
    }

    /// Like [`Self::vile`], except that block 0 is emptied in random order,
    /// each vertex going to the lightest block that can take it.
    pub fn random_vile(&self, hg: &Hypergraph, bounds: &BalanceBounds, rng: &mut SmallRng) -> Vec<usize> {
        let num_parts = self.evaluator.num_parts();
        let (mut solution, mut balance, free) = self.preassign(hg);
        for &v in &free {
            weights::add_assign(&mut balance[0], hg.vertex_weights(v));
        }
        for v in visit_order(hg, free, rng) {
            let over = !weights::le(&balance[0], &bounds.upper[0]);
            let starved = (1..num_parts).any(|b| !weights::ge(&balance[b], &bounds.lower[b]));
            if !over && !starved {
                break;
            }
            let w = hg.vertex_weights(v);
            let mut targets: Vec<usize> = (1..num_parts).collect();
            targets.sort_by(|&a, &b| {
                let na = self.evaluator.vertex_weight_norm(&balance[a]);
                let nb = self.evaluator.vertex_weight_norm(&balance[b]);
                na.total_cmp(&nb)
            });
            if let Some(&to) = targets
                .iter()
                .find(|&&b| weights::fits_with(&balance[b], w, &bounds.upper[b]))
            {
                solution[v] = to;
                weights::sub_assign(&mut balance[0], w);
                weights::add_assign(&mut balance[to], w);
            }
        }
        solution
    }

    /// Solves the whole level exactly, warm-started from `hint`.
    pub fn ilp(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        hint: Option<Vec<usize>>,
    ) -> Option<Vec<usize>> {
        let model = IlpModel::from_hypergraph(hg, ctx, bounds, self.config.ilp_max_hyperedges, hint);
        match self.solver.solve(&model) {
            IlpOutcome::Solved { assignment, optimal } => {
                debug!("initial ilp solution (optimal: {optimal})");
                Some(assignment)
            }
            IlpOutcome::Infeasible => {
                warn!("initial ilp model is infeasible");
                None
            }
        }
    }

    /// Sorts the candidates by cost and keeps the cheapest ones inside the
    /// upper bounds. Without any such candidate the cheapest one is kept
    /// alone.
    pub fn select_best(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        candidates: Vec<Vec<usize>>,
    ) -> Vec<Vec<usize>> {
        let mut scored: Vec<(f32, bool, Vec<usize>)> = candidates
            .into_iter()
            .map(|s| {
                let token = self.evaluator.cut_evaluator(hg, ctx, &s);
                (token.cost, bounds.satisfies_upper(&token.block_balance), s)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((cost, ..)) = scored.first() {
            debug!("best initial cost {cost:.4} among {} candidates", scored.len());
        }

        if scored.iter().any(|(_, feasible, _)| *feasible) {
            scored
                .into_iter()
                .filter(|(_, feasible, _)| *feasible)
                .take(self.config.num_best_initial_solutions.max(1))
                .map(|(_, _, s)| s)
                .collect()
        } else {
            warn!("no initial solution satisfies the balance bounds, keeping the cheapest");
            scored.into_iter().take(1).map(|(_, _, s)| s).collect()
        }
    }

    /// Places the fixed vertices. Returns the solution with every free vertex
    /// in block 0, the balance of the fixed vertices alone, and the free
    /// vertices.
    fn preassign(&self, hg: &Hypergraph) -> (Vec<usize>, Vec<Vec<f32>>, Vec<usize>) {
        let mut solution = vec![0; hg.num_vertices()];
        let mut balance = vec![vec![0.0; hg.vertex_dimensions()]; self.evaluator.num_parts()];
        let mut free = vec![];
        for v in 0..hg.num_vertices() {
            match hg.fixed_block(v) {
                Some(b) => {
                    solution[v] = b;
                    weights::add_assign(&mut balance[b], hg.vertex_weights(v));
                }
                None => free.push(v),
            }
        }
        (solution, balance, free)
    }

    fn lightest(&self, balance: &[Vec<f32>]) -> usize {
        (0..balance.len())
            .min_by(|&a, &b| {
                self.evaluator
                    .vertex_weight_norm(&balance[a])
                    .total_cmp(&self.evaluator.vertex_weight_norm(&balance[b]))
            })
            .unwrap_or(0)
    }
}

/// `free` shuffled, with the vertices of timing paths (taken in random path
/// order) pulled to the front so every path stays contiguous.
fn visit_order(hg: &Hypergraph, mut free: Vec<usize>, rng: &mut SmallRng) -> Vec<usize> {
    free.shuffle(rng);
    if !hg.has_timing() {
        return free;
    }
    let mut is_free = bitvec![usize, Lsb0; 0; hg.num_vertices()];
    for &v in &free {
        is_free.set(v, true);
    }
    let mut paths: Vec<usize> = (0..hg.num_timing_paths()).collect();
    paths.shuffle(rng);

    let mut order = Vec::with_capacity(free.len());
    for p in paths {
        for &v in hg.path_vertices(p) {
            if is_free[v] {
                is_free.set(v, false);
                order.push(v);
            }
        }
    }
    order.extend(free.into_iter().filter(|&v| is_free[v]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostFactors;
    use crate::hypergraph::Matrix;
    use crate::ilp::BranchAndBound;

    fn unit(n: usize) -> Matrix<f32> {
        vec![vec![1.0]; n]
    }

    fn partitioner(num_parts: usize, num_initial_solutions: usize) -> InitialPartitioner {
        InitialPartitioner::new(
            Arc::new(Evaluator::new(num_parts, CostFactors::default())),
            InitialConfig {
                num_initial_solutions,
                num_best_initial_solutions: 3,
                ..InitialConfig::default()
            },
            RefineConfig::default(),
            Arc::new(BranchAndBound::default()),
        )
    }

    fn ring(n: usize) -> Hypergraph {
        let nets: Vec<Vec<usize>> = (0..n).map(|v| vec![v, (v + 1) % n]).collect();
        Hypergraph::new(unit(n), nets, unit(n)).unwrap()
    }

    #[test]
    fn random_keeps_fixed_and_upper_bounds() {
        let mut fixed = vec![-1; 40];
        fixed[3] = 2;
        fixed[17] = 0;
        let h = ring(40).with_fixed(fixed);
        let init = partitioner(4, 1);
        let bounds = h.balance_bounds(4, 5.0, &[0.25; 4]);
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..10 {
            let solution = init.random(&h, &bounds, &mut rng);
            assert_eq!(solution[3], 2);
            assert_eq!(solution[17], 0);
            let balance = init.evaluator.block_balance(&h, &solution);
            assert!(bounds.satisfies_upper(&balance));
            assert!(balance.iter().all(|b| b[0] > 0.0));
        }
    }

    #[test]
    fn random_fills_blocks_in_chunks() {
        // 10% of an upper bound of 51 is 5.1, so six vertices go to a block
        // before the cursor moves on.
        let h = ring(100);
        let init = partitioner(2, 1);
        let bounds = h.balance_bounds(2, 1.0, &[0.5, 0.5]);
        let mut rng = SmallRng::seed_from_u64(3);
        let free: Vec<usize> = (0..100).collect();
        let order = visit_order(&h, free, &mut SmallRng::seed_from_u64(3));
        let solution = init.random(&h, &bounds, &mut rng);
        let first: Vec<usize> = order[..12].iter().map(|&v| solution[v]).collect();
        assert_eq!(first, vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn timing_paths_are_visited_first() {
        let h = ring(12)
            .with_timing(vec![vec![4, 5, 6], vec![9, 10]], vec![], vec![0.5, 0.5], vec![])
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let order = visit_order(&h, (0..12).collect(), &mut rng);
        let mut head = order[..5].to_vec();
        head.sort_unstable();
        assert_eq!(head, vec![4, 5, 6, 9, 10]);
        let at = |v| order.iter().position(|&u| u == v).unwrap();
        assert_eq!(at(5), at(4) + 1);
        assert_eq!(at(6), at(5) + 1);
        assert_eq!(order.len(), 12);
    }

    #[test]
    fn vile_solutions_are_balanced() {
        let h = ring(20);
        let init = partitioner(2, 1);
        let ctx = init.evaluator.context(&h);
        let bounds = h.balance_bounds(2, 5.0, &[0.5, 0.5]);
        let vile = init.vile(&h, &ctx, &bounds);
        assert!(bounds.satisfies(&init.evaluator.block_balance(&h, &vile)));

        let mut rng = SmallRng::seed_from_u64(5);
        let random_vile = init.random_vile(&h, &bounds, &mut rng);
        assert!(bounds.satisfies(&init.evaluator.block_balance(&h, &random_vile)));
    }

    #[test]
    fn select_best_prefers_feasible_and_cheap() {
        let h = ring(8);
        let init = partitioner(2, 1);
        let ctx = init.evaluator.context(&h);
        let bounds = h.balance_bounds(2, 1.0, &[0.5, 0.5]);
        let cheap_but_heavy = vec![0; 8];
        let alternating = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let halves = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let kept = init.select_best(
            &h,
            &ctx,
            &bounds,
            vec![cheap_but_heavy.clone(), alternating.clone(), halves.clone()],
        );
        assert_eq!(kept, vec![halves, alternating]);

        let kept = init.select_best(&h, &ctx, &bounds, vec![vec![1; 8], cheap_but_heavy]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn small_instance_reaches_the_optimum() {
        // Two 4-cliques joined by one hyperedge.
        let mut nets = vec![];
        for base in [0, 4] {
            for a in base..base + 4 {
                for b in a + 1..base + 4 {
                    nets.push(vec![a, b]);
                }
            }
        }
        nets.push(vec![3, 4]);
        let n = nets.len();
        let h = Hypergraph::new(unit(8), nets, unit(n)).unwrap();
        let init = partitioner(2, 4);
        let ctx = init.evaluator.context(&h);
        let bounds = h.balance_bounds(2, 1.0, &[0.5, 0.5]);
        let mut rng = SmallRng::seed_from_u64(11);
        let candidates = init.partition(&h, &ctx, &bounds, &mut rng);
        assert!(!candidates.is_empty() && candidates.len() <= 3);
        let best = &candidates[0];
        assert_eq!(init.evaluator.cut_evaluator(&h, &ctx, best).cost, 1.0);
        assert!(bounds.satisfies(&init.evaluator.block_balance(&h, best)));
    }

    #[test]
    fn exact_solution_honours_fixed_vertices() {
        let h = Hypergraph::new(unit(4), vec![vec![0, 1], vec![2, 3]], unit(2))
            .unwrap()
            .with_fixed(vec![1, -1, -1, -1]);
        let init = partitioner(2, 1);
        let ctx = init.evaluator.context(&h);
        let bounds = h.balance_bounds(2, 1.0, &[0.5, 0.5]);
        let solution = init.ilp(&h, &ctx, &bounds, None).unwrap();
        assert_eq!(solution, vec![1, 1, 0, 0]);
    }
}
