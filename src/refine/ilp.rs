use std::sync::Arc;

use log::{debug, warn};

use super::{repair_balance, PassState, Refiner, Scope};
use crate::coarsen::{group_vertices, project};
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};
use crate::ilp::{IlpModel, IlpOutcome, IlpSolver};

/// Solves a residual problem exactly: the boundary vertices with the best
/// single-move gains stay free, everything else is folded into one fixed
/// super-vertex per block.
pub struct IlpRefiner {
    evaluator: Arc<Evaluator>,
    config: RefineConfig,
    solver: Arc<dyn IlpSolver>,
    max_hyperedges: usize,
}

impl IlpRefiner {
    pub fn new(
        evaluator: Arc<Evaluator>,
        config: RefineConfig,
        solver: Arc<dyn IlpSolver>,
        max_hyperedges: usize,
    ) -> Self {
        Self {
            evaluator,
            config,
            solver,
            max_hyperedges: if max_hyperedges == 0 { usize::MAX } else { max_hyperedges },
        }
    }

    /// Free vertices on the cut, best single-move gain first.
    fn wavefront(&self, hg: &Hypergraph, ctx: &EvalContext, solution: &mut [usize]) -> Vec<usize> {
        let state = PassState::new(hg, ctx, &self.evaluator, solution);
        let mut scored: Vec<(f32, usize)> = state
            .boundary_vertices(&Scope::All)
            .into_iter()
            .map(|v| {
                let from = state.solution[v];
                let gain = (0..state.num_parts())
                    .filter(|&to| to != from)
                    .map(|to| state.vertex_gain(v, from, to).gain)
                    .fold(f32::NEG_INFINITY, f32::max);
                (gain, v)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(self.config.ilp_wavefront);
        scored.into_iter().map(|(_, v)| v).collect()
    }
}

impl Refiner for IlpRefiner {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        let ev = &*self.evaluator;
        let num_parts = ev.num_parts();
        let free = self.wavefront(hg, ctx, solution);
        if free.is_empty() {
            return 0.0;
        }
        let mut is_free = vec![false; hg.num_vertices()];
        for &v in &free {
            is_free[v] = true;
        }

        // Groups 0..K are the blocks; the wavefront vertices follow as
        // singletons in vertex order.
        let mut groups: Vec<Vec<usize>> = vec![vec![]; num_parts];
        for v in (0..hg.num_vertices()).filter(|&v| !is_free[v]) {
            groups[solution[v]].push(v);
        }
        let empty: Vec<bool> = groups.iter().map(Vec::is_empty).collect();
        let mut residual = group_vertices(ev, hg, ctx, &groups);
        let mut fixed = vec![None; residual.num_vertices()];
        let mut hint = vec![0; residual.num_vertices()];
        let mut next = 0;
        for (b, &e) in empty.iter().enumerate() {
            if !e {
                fixed[next] = Some(b);
                hint[next] = b;
                next += 1;
            }
        }
        for c in next..residual.num_vertices() {
            let v = residual.cluster_members(c)[0];
            fixed[c] = hg.fixed_block(v);
            hint[c] = solution[v];
        }
        residual.fixed_attr = Some(fixed);

        let residual_ctx = ev.context(&residual);
        let model = IlpModel::from_hypergraph(&residual, &residual_ctx, bounds, self.max_hyperedges, Some(hint));
        let assignment = match self.solver.solve(&model) {
            IlpOutcome::Solved { assignment, optimal } => {
                debug!(
                    "ilp refinement over {} free vertices (optimal: {optimal})",
                    free.len()
                );
                assignment
            }
            IlpOutcome::Infeasible => {
                warn!("ilp refinement found no feasible assignment, keeping the current solution");
                return 0.0;
            }
        };

        let candidate = project(&residual, &assignment, hg.num_vertices());
        let before = ev.cut_evaluator(hg, ctx, &*solution);
        let after = ev.cut_evaluator(hg, ctx, &candidate);
        if after.cost <= before.cost && bounds.satisfies(&after.block_balance) {
            solution.copy_from_slice(&candidate);
            before.cost - after.cost
        } else {
            0.0
        }
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
