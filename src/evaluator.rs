use std::collections::HashMap;

use log::debug;

use crate::config::CostFactors;
use crate::hypergraph::{BalanceBounds, Hypergraph, Matrix};
use crate::weights;

/// Read access to a block assignment. Lets the evaluator score a tentative
/// move without touching the solution it was given.
pub trait Assignment: Sync {
    fn block_of(&self, v: usize) -> usize;
}

impl Assignment for [usize] {
    fn block_of(&self, v: usize) -> usize {
        self[v]
    }
}

impl Assignment for Vec<usize> {
    fn block_of(&self, v: usize) -> usize {
        self[v]
    }
}

/// `solution` with `vertex` moved to block `to`.
#[derive(Clone, Copy, Debug)]
pub struct Tentative<'a> {
    pub solution: &'a [usize],
    pub vertex: usize,
    pub to: usize,
}

impl Assignment for Tentative<'_> {
    fn block_of(&self, v: usize) -> usize {
        if v == self.vertex {
            self.to
        } else {
            self.solution[v]
        }
    }
}

/// Number of vertices of every hyperedge inside every block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetDegrees {
    num_parts: usize,
    degs: Vec<u32>,
}

impl NetDegrees {
    pub fn get(&self, e: usize, block: usize) -> u32 {
        self.degs[e * self.num_parts + block]
    }

    pub fn row(&self, e: usize) -> &[u32] {
        &self.degs[e * self.num_parts..(e + 1) * self.num_parts]
    }

    /// Number of blocks hyperedge `e` touches.
    pub fn connectivity(&self, e: usize) -> usize {
        self.row(e).iter().filter(|&&n| n > 0).count()
    }

    pub fn is_cut(&self, e: usize) -> bool {
        self.connectivity(e) > 1
    }

    pub(crate) fn move_vertex(&mut self, hg: &Hypergraph, v: usize, from: usize, to: usize) {
        for &e in hg.edges(v) {
            self.degs[e * self.num_parts + from] -= 1;
            self.degs[e * self.num_parts + to] += 1;
        }
    }
}

/// Canonical fitness of a solution.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionToken {
    pub cost: f32,
    pub block_balance: Matrix<f32>,
}

/// Cut statistics over the timing paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathStats {
    pub tot_num_path: usize,
    pub tot_num_critical_path: usize,
    pub tot_num_noncritical_path: usize,
    pub worst_cut_critical_path: usize,
    pub avg_cut_critical_path: f32,
    /// Non-critical paths pushed negative by the delay of their cuts.
    pub number_non2critical_path: usize,
    pub worst_cut_non2critical_path: usize,
    pub avg_cut_non2critical_path: f32,
}

/// Mutable per-level evaluation state: working slack values and the costs
/// derived from them. Each run owns its own copy; the hypergraph stays
/// untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalContext {
    pub(crate) hyperedge_slack: Vec<f32>,
    pub(crate) path_slack: Vec<f32>,
    pub(crate) path_timing_cost: Vec<f32>,
    pub(crate) hyperedge_timing_cost: Vec<f32>,
    pub(crate) hyperedge_cost: Vec<f32>,
}

impl EvalContext {
    pub fn hyperedge_cost(&self, e: usize) -> f32 {
        self.hyperedge_cost[e]
    }

    pub fn path_slack(&self, p: usize) -> f32 {
        self.path_slack[p]
    }

    pub fn path_timing_cost(&self, p: usize) -> f32 {
        self.path_timing_cost[p]
    }
}

/// Cost, balance and timing evaluation for solutions of one part count.
#[derive(Clone, Debug)]
pub struct Evaluator {
    num_parts: usize,
    factors: CostFactors,
}

impl Evaluator {
    pub fn new(num_parts: usize, factors: CostFactors) -> Self {
        Self { num_parts, factors }
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    pub fn factors(&self) -> &CostFactors {
        &self.factors
    }

    /// Builds the evaluation context of `hg` from its recorded slack.
    pub fn context(&self, hg: &Hypergraph) -> EvalContext {
        let (hyperedge_slack, path_slack) = match hg.timing() {
            Some(t) => (t.hyperedge_slack.clone(), t.path_slack.clone()),
            None => (vec![], vec![]),
        };
        let mut ctx = EvalContext {
            hyperedge_slack,
            path_slack,
            path_timing_cost: vec![],
            hyperedge_timing_cost: vec![],
            hyperedge_cost: vec![],
        };
        self.initialize_timing(hg, &mut ctx);
        ctx
    }

    /// Converts slack into path and hyperedge timing costs, overlays every
    /// path's cost on its hyperedges, then refreshes the hyperedge costs.
    fn initialize_timing(&self, hg: &Hypergraph, ctx: &mut EvalContext) {
        let exp = self.factors.timing_exp_factor;
        if hg.has_timing() {
            ctx.path_timing_cost = ctx
                .path_slack
                .iter()
                .map(|s| (1.0 - s).powf(exp))
                .collect();
            ctx.hyperedge_timing_cost = ctx
                .hyperedge_slack
                .iter()
                .map(|s| (1.0 - s).powf(exp))
                .collect();
            for p in 0..hg.num_timing_paths() {
                for &e in hg.path_edges(p) {
                    ctx.hyperedge_timing_cost[e] += ctx.path_timing_cost[p];
                }
            }
        } else {
            ctx.path_timing_cost.clear();
            ctx.hyperedge_timing_cost = vec![0.0; hg.num_hyperedges()];
        }
        ctx.hyperedge_cost = (0..hg.num_hyperedges())
            .map(|e| {
                let mut cost = weights::weighted_sum(hg.hyperedge_weights(e), &self.factors.e_wt_factors);
                if hg.has_timing() {
                    cost += self.factors.net_timing_factor * ctx.hyperedge_timing_cost[e];
                }
                cost
            })
            .collect();
    }

    /// Charges the cut delay to every cut hyperedge, lets each path inherit
    /// the worst slack among its hyperedges, and recomputes the costs.
    pub fn update_timing(&self, hg: &Hypergraph, ctx: &mut EvalContext, solution: &[usize]) {
        if !hg.has_timing() {
            return;
        }
        for e in self.cut_hyperedges(hg, solution) {
            ctx.hyperedge_slack[e] -= self.factors.extra_cut_delay;
        }
        for p in 0..hg.num_timing_paths() {
            let worst = hg
                .path_edges(p)
                .iter()
                .map(|&e| ctx.hyperedge_slack[e])
                .fold(f32::INFINITY, f32::min);
            if worst.is_finite() {
                ctx.path_slack[p] = worst;
            }
        }
        self.initialize_timing(hg, ctx);
    }

    /// Criticality of path `p` used to bias clustering.
    pub fn path_timing_score(&self, ctx: &EvalContext, p: usize) -> f32 {
        ctx.path_timing_cost.get(p).copied().unwrap_or(0.0)
    }

    /// Hyperedge cost spread over the hyperedge's other vertices.
    pub fn norm_edge_score(&self, hg: &Hypergraph, ctx: &EvalContext, e: usize) -> f32 {
        let size = hg.vertices(e).len();
        if size <= 1 {
            return 0.0;
        }
        ctx.hyperedge_cost(e) / (size - 1) as f32
    }

    pub fn vertex_weight_norm(&self, w: &[f32]) -> f32 {
        weights::weighted_sum(w, &self.factors.v_wt_factors)
    }

    /// Inverse weighted distance between two placements.
    pub fn placement_score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dist: f32 = a
            .iter()
            .zip(b)
            .enumerate()
            .map(|(i, (x, y))| {
                let f = self.factors.placement_wt_factors.get(i).copied().unwrap_or(1.0);
                f * (x - y) * (x - y)
            })
            .sum::<f32>()
            .sqrt();
        if dist == 0.0 {
            f32::MAX / 2.0
        } else {
            1.0 / dist
        }
    }

    /// Weight-averaged location of two merged placements.
    pub fn avg_placement_loc(&self, wa: &[f32], wb: &[f32], pa: &[f32], pb: &[f32]) -> Vec<f32> {
        let a = self.vertex_weight_norm(wa);
        let b = self.vertex_weight_norm(wb);
        let total = a + b;
        if total == 0.0 {
            return pa.iter().zip(pb).map(|(x, y)| (x + y) / 2.0).collect();
        }
        pa.iter()
            .zip(pb)
            .map(|(x, y)| x * a / total + y * b / total)
            .collect()
    }

    pub fn block_balance<A: Assignment + ?Sized>(&self, hg: &Hypergraph, solution: &A) -> Matrix<f32> {
        let mut balance = vec![vec![0.0; hg.vertex_dimensions()]; self.num_parts];
        for v in 0..hg.num_vertices() {
            weights::add_assign(&mut balance[solution.block_of(v)], hg.vertex_weights(v));
        }
        balance
    }

    pub fn net_degrees<A: Assignment + ?Sized>(&self, hg: &Hypergraph, solution: &A) -> NetDegrees {
        let mut degs = vec![0; hg.num_hyperedges() * self.num_parts];
        for e in 0..hg.num_hyperedges() {
            for &v in hg.vertices(e) {
                degs[e * self.num_parts + solution.block_of(v)] += 1;
            }
        }
        NetDegrees {
            num_parts: self.num_parts,
            degs,
        }
    }

    fn is_cut<A: Assignment + ?Sized>(&self, hg: &Hypergraph, solution: &A, e: usize) -> bool {
        match hg.vertices(e).split_first() {
            Some((&first, rest)) => {
                let block = solution.block_of(first);
                rest.iter().any(|&v| solution.block_of(v) != block)
            }
            None => false,
        }
    }

    pub fn cut_hyperedges<A: Assignment + ?Sized>(&self, hg: &Hypergraph, solution: &A) -> Vec<usize> {
        (0..hg.num_hyperedges())
            .filter(|&e| self.is_cut(hg, solution, e))
            .collect()
    }

    /// Cost of the cut hyperedges alone.
    pub fn cut_cost<A: Assignment + ?Sized>(&self, hg: &Hypergraph, ctx: &EvalContext, solution: &A) -> f32 {
        (0..hg.num_hyperedges())
            .filter(|&e| self.is_cut(hg, solution, e))
            .map(|e| ctx.hyperedge_cost(e))
            .sum()
    }

    /// Timing and snaking cost of path `p`. Consecutive vertices in the same
    /// block collapse into one entry of the block path; a path that never
    /// leaves its block costs nothing.
    pub fn path_cost<A: Assignment + ?Sized>(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        solution: &A,
        p: usize,
    ) -> f32 {
        if p >= hg.num_timing_paths() {
            return 0.0;
        }
        let mut block_path: Vec<usize> = vec![];
        for &v in hg.path_vertices(p) {
            let block = solution.block_of(v);
            if block_path.last() != Some(&block) {
                block_path.push(block);
            }
        }
        if block_path.len() <= 1 {
            return 0.0;
        }

        let mut crossings: Vec<(usize, usize)> = block_path
            .windows(2)
            .map(|w| (w[0].min(w[1]), w[0].max(w[1])))
            .collect();
        crossings.sort_unstable();
        crossings.dedup();
        let exponent = 2 * crossings.len() as i32;
        let mut cost = self.factors.path_timing_factor * ctx.path_slack(p).powi(exponent);

        let mut counter: HashMap<usize, usize> = HashMap::new();
        for &b in &block_path {
            *counter.entry(b).or_default() += 1;
        }
        let snaking = counter.values().copied().max().unwrap_or(1);
        cost += self.factors.path_snaking_factor * (snaking - 1) as f32;
        cost
    }

    pub fn paths_cost<A: Assignment + ?Sized>(&self, hg: &Hypergraph, ctx: &EvalContext, solution: &A) -> Vec<f32> {
        (0..hg.num_timing_paths())
            .map(|p| self.path_cost(hg, ctx, solution, p))
            .collect()
    }

    /// Total cost (cut hyperedges plus paths) and the block balance.
    pub fn cut_evaluator<A: Assignment + ?Sized>(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        solution: &A,
    ) -> PartitionToken {
        let block_balance = self.block_balance(hg, solution);
        let edge_cost = self.cut_cost(hg, ctx, solution);
        let path_cost: f32 = self.paths_cost(hg, ctx, solution).iter().sum();
        PartitionToken {
            cost: edge_cost + path_cost,
            block_balance,
        }
    }

    /// Whether `solution` honours the balance bounds, keeps every group in
    /// one block and keeps every fixed vertex in its block.
    pub fn constraint_and_cut_evaluator(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        solution: &[usize],
        bounds: &BalanceBounds,
        groups: &[Vec<usize>],
    ) -> bool {
        let token = self.cut_evaluator(hg, ctx, solution);
        let balance_ok = bounds.satisfies(&token.block_balance);
        let group_ok = groups.iter().all(|group| match group.split_first() {
            Some((&first, rest)) => rest.iter().all(|&v| solution[v] == solution[first]),
            None => true,
        });
        let fixed_ok =
            (0..hg.num_vertices()).all(|v| hg.fixed_block(v).map_or(true, |b| solution[v] == b));
        debug!(
            "cost {:.3}: balance {balance_ok}, groups {group_ok}, fixed {fixed_ok}",
            token.cost
        );
        balance_ok && group_ok && fixed_ok
    }

    pub fn path_stats(&self, hg: &Hypergraph, ctx: &EvalContext, solution: &[usize]) -> PathStats {
        let mut stats = PathStats {
            tot_num_path: hg.num_timing_paths(),
            ..Default::default()
        };
        let mut critical_cuts = 0;
        let mut non2critical_cuts = 0;
        for p in 0..hg.num_timing_paths() {
            let mut block_path: Vec<usize> = vec![];
            for &v in hg.path_vertices(p) {
                if block_path.last() != Some(&solution[v]) {
                    block_path.push(solution[v]);
                }
            }
            let cuts = block_path.len().saturating_sub(1);
            let slack = ctx.path_slack(p);
            if slack < 0.0 {
                stats.tot_num_critical_path += 1;
                if cuts > 0 {
                    stats.worst_cut_critical_path = stats.worst_cut_critical_path.max(cuts);
                    critical_cuts += cuts;
                }
            } else {
                stats.tot_num_noncritical_path += 1;
                if slack - self.factors.extra_cut_delay * (cuts as f32) < 0.0 {
                    stats.number_non2critical_path += 1;
                    stats.worst_cut_non2critical_path = stats.worst_cut_non2critical_path.max(cuts);
                    non2critical_cuts += cuts;
                }
            }
        }
        if stats.tot_num_critical_path > 0 {
            stats.avg_cut_critical_path = critical_cuts as f32 / stats.tot_num_critical_path as f32;
        }
        if stats.number_non2critical_path > 0 {
            stats.avg_cut_non2critical_path =
                non2critical_cuts as f32 / stats.number_non2critical_path as f32;
        }
        stats
    }

    /// Cost of the hyperedges touching both block `a` and block `b`.
    pub fn pair_span(&self, hg: &Hypergraph, ctx: &EvalContext, net_degs: &NetDegrees, a: usize, b: usize) -> f32 {
        (0..hg.num_hyperedges())
            .filter(|&e| net_degs.get(e, a) > 0 && net_degs.get(e, b) > 0)
            .map(|e| ctx.hyperedge_cost(e))
            .sum()
    }

    /// Symmetric matrix of `pair_span` over all block pairs.
    pub fn matching_connectivity(&self, hg: &Hypergraph, ctx: &EvalContext, solution: &[usize]) -> Matrix<f32> {
        let net_degs = self.net_degrees(hg, solution);
        let mut scores = vec![vec![0.0; self.num_parts]; self.num_parts];
        for a in 0..self.num_parts {
            for b in a + 1..self.num_parts {
                let score = self.pair_span(hg, ctx, &net_degs, a, b);
                scores[a][b] = score;
                scores[b][a] = score;
            }
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::prelude::*;
    use rand::rngs::SmallRng;
    use rand::Rng;

    use super::*;

    fn unit(n: usize) -> Matrix<f32> {
        vec![vec![1.0]; n]
    }

    fn two_pairs() -> Hypergraph {
        Hypergraph::new(unit(4), vec![vec![0, 1], vec![2, 3]], unit(2)).unwrap()
    }

    fn chain_with_path(slack: f32) -> Hypergraph {
        Hypergraph::new(unit(3), vec![vec![0, 1], vec![1, 2]], unit(2))
            .unwrap()
            .with_timing(vec![vec![0, 1, 2]], vec![], vec![slack], vec![1.0, 1.0])
            .unwrap()
    }

    #[test]
    fn separated_pairs_cost_nothing() {
        let h = two_pairs();
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        let token = ev.cut_evaluator(&h, &ctx, &vec![0, 0, 1, 1]);
        assert_eq!(token.cost, 0.0);
        assert_eq!(token.block_balance, vec![vec![2.0], vec![2.0]]);
        assert_eq!(ev.cut_evaluator(&h, &ctx, &vec![0, 1, 0, 1]).cost, 2.0);
    }

    #[test]
    fn single_spanning_hyperedge_costs_its_weight() {
        let h = Hypergraph::new(unit(6), vec![(0..6).collect()], vec![vec![3.0]]).unwrap();
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        for split in 1..6 {
            let solution: Vec<usize> = (0..6).map(|v| usize::from(v >= split)).collect();
            assert_eq!(ev.cut_evaluator(&h, &ctx, &solution).cost, 3.0);
        }
    }

    #[test]
    fn path_cost_counts_block_crossings() {
        let h = chain_with_path(1.0);
        let mut factors = CostFactors::default();
        factors.path_snaking_factor = 0.0;
        let ev = Evaluator::new(2, factors);
        let ctx = ev.context(&h);
        let solution = vec![0, 0, 0];
        assert_eq!(ev.path_cost(&h, &ctx, &solution, 0), 0.0);
        let moved = Tentative {
            solution: &solution,
            vertex: 1,
            to: 1,
        };
        assert_eq!(ev.path_cost(&h, &ctx, &moved, 0), 1.0);
    }

    #[test]
    fn snaking_penalises_returning_paths() {
        let h = chain_with_path(0.5);
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        // Block path 0,1,0 crosses one block pair and revisits block 0 once.
        let cost = ev.path_cost(&h, &ctx, &vec![0, 1, 0], 0);
        assert!((cost - (0.25 + 1.0)).abs() < 1e-6);
        let cost = ev.path_cost(&h, &ctx, &vec![0, 0, 1], 0);
        assert!((cost - 0.25).abs() < 1e-6);
    }

    #[test]
    fn timing_costs_overlay_paths_on_hyperedges() {
        let h = chain_with_path(0.5);
        let ev = Evaluator::new(2, CostFactors::default());
        let mut ctx = ev.context(&h);
        // (1 - 0.5)^2 from the path on top of (1 - 1)^2 from the hyperedge.
        assert!((ctx.hyperedge_timing_cost[0] - 0.25).abs() < 1e-6);
        assert!((ctx.hyperedge_cost(0) - 1.25).abs() < 1e-6);

        ev.update_timing(&h, &mut ctx, &[0, 1, 1]);
        assert_eq!(ctx.hyperedge_slack, vec![0.0, 1.0]);
        assert_eq!(ctx.path_slack(0), 0.0);
        assert!((ctx.hyperedge_cost(0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn tentative_matches_applied_move() {
        let mut rng = SmallRng::seed_from_u64(7);
        let nets: Vec<Vec<usize>> = (0..40)
            .map(|_| (0..4).map(|_| rng.gen_range(0..20)).collect())
            .collect();
        let h = Hypergraph::new(unit(20), nets, unit(40)).unwrap();
        let ev = Evaluator::new(3, CostFactors::default());
        let ctx = ev.context(&h);
        let solution: Vec<usize> = (0..20).map(|_| rng.gen_range(0..3)).collect();
        for v in 0..20 {
            let to = (solution[v] + 1) % 3;
            let mut applied = solution.clone();
            applied[v] = to;
            let tentative = Tentative {
                solution: &solution,
                vertex: v,
                to,
            };
            assert_eq!(
                ev.cut_evaluator(&h, &ctx, &tentative),
                ev.cut_evaluator(&h, &ctx, &applied)
            );
            assert_eq!(ev.net_degrees(&h, &tentative), ev.net_degrees(&h, &applied));
        }
    }

    #[test]
    fn net_degrees_follow_moves() {
        let h = two_pairs();
        let ev = Evaluator::new(2, CostFactors::default());
        let mut degs = ev.net_degrees(&h, &vec![0, 0, 1, 1]);
        assert_eq!(degs.row(0), &[2, 0]);
        assert!(!degs.is_cut(0));
        degs.move_vertex(&h, 1, 0, 1);
        assert_eq!(degs.row(0), &[1, 1]);
        assert_eq!(degs.connectivity(0), 2);
        assert_eq!(degs, ev.net_degrees(&h, &vec![0, 1, 1, 1]));
    }

    #[test]
    fn constraints_and_stats() {
        let h = chain_with_path(-0.5).with_fixed(vec![0, -1, -1]);
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(2, 20.0, &[0.5, 0.5]);
        assert!(ev.constraint_and_cut_evaluator(&h, &ctx, &[0, 0, 1], &bounds, &[]));
        assert!(!ev.constraint_and_cut_evaluator(&h, &ctx, &[0, 0, 1], &bounds, &[vec![1, 2]]));
        assert!(!ev.constraint_and_cut_evaluator(&h, &ctx, &[1, 0, 0], &bounds, &[]));
        assert!(!ev.constraint_and_cut_evaluator(&h, &ctx, &[0, 0, 0], &bounds, &[]));

        let stats = ev.path_stats(&h, &ctx, &[0, 1, 0]);
        assert_eq!(stats.tot_num_path, 1);
        assert_eq!(stats.tot_num_critical_path, 1);
        assert_eq!(stats.worst_cut_critical_path, 2);
        assert_eq!(stats.avg_cut_critical_path, 2.0);

        let h = chain_with_path(0.5);
        let stats = ev.path_stats(&h, &ev.context(&h), &[0, 1, 1]);
        assert_eq!(stats.tot_num_noncritical_path, 1);
        assert_eq!(stats.number_non2critical_path, 1);
        assert_eq!(stats.worst_cut_non2critical_path, 1);
    }

    #[test]
    fn matching_connectivity_is_symmetric() {
        let h = Hypergraph::new(unit(4), vec![vec![0, 1], vec![1, 2], vec![2, 3]], unit(3)).unwrap();
        let ev = Evaluator::new(3, CostFactors::default());
        let ctx = ev.context(&h);
        let m = ev.matching_connectivity(&h, &ctx, &[0, 1, 1, 2]);
        assert_eq!(m[0][1], 1.0);
        assert_eq!(m[1][0], 1.0);
        assert_eq!(m[1][2], 1.0);
        assert_eq!(m[0][2], 0.0);
    }

    #[test]
    fn placement_helpers() {
        let ev = Evaluator::new(2, CostFactors::default());
        assert_eq!(ev.placement_score(&[0.0, 0.0], &[3.0, 4.0]), 0.2);
        assert_eq!(ev.placement_score(&[1.0], &[1.0]), f32::MAX / 2.0);
        assert_eq!(ev.avg_placement_loc(&[1.0], &[3.0], &[0.0], &[4.0]), vec![3.0]);
    }

    proptest! {
        #[test]
        fn balance_sums_to_total(
            seed in any::<u64>(),
            num_parts in 2usize..6,
        ) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let n = 25;
            let vw: Matrix<f32> = (0..n).map(|_| vec![rng.gen_range(1..10) as f32, rng.gen_range(0..3) as f32]).collect();
            let nets: Vec<Vec<usize>> = (0..30).map(|_| (0..3).map(|_| rng.gen_range(0..n)).collect()).collect();
            let h = Hypergraph::new(vw, nets, unit(30)).unwrap();
            let ev = Evaluator::new(num_parts, CostFactors::default());
            let ctx = ev.context(&h);
            let solution: Vec<usize> = (0..n).map(|_| rng.gen_range(0..num_parts)).collect();

            let first = ev.cut_evaluator(&h, &ctx, &solution);
            let mut summed = vec![0.0; 2];
            for row in &first.block_balance {
                weights::add_assign(&mut summed, row);
            }
            prop_assert_eq!(summed, h.total_vertex_weights());
            prop_assert!(first.cost >= 0.0);
            prop_assert_eq!(first, ev.cut_evaluator(&h, &ctx, &solution));
        }
    }
}
