use std::sync::Arc;

use log::{debug, warn};

use super::kway_fm::fm_pass;
use super::{repair_balance, PassState, Refiner, Scope};
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};

/// Bipartition FM. Every iteration runs an exploratory pass under loosened
/// balance bounds, which lets the search cross cost hills a strict pass
/// cannot, then repairs balance and polishes with a strict pass. Iterations
/// stop once one fails to beat the best solution so far, which is what the
/// refiner returns.
pub struct TwoWayFmRefiner {
    evaluator: Arc<Evaluator>,
    config: RefineConfig,
}

impl TwoWayFmRefiner {
    pub fn new(evaluator: Arc<Evaluator>, config: RefineConfig) -> Self {
        Self { evaluator, config }
    }
}

impl Refiner for TwoWayFmRefiner {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        let ev = &*self.evaluator;
        if ev.num_parts() != 2 {
            warn!(
                "two-way refinement asked for {} parts, refining over all blocks",
                ev.num_parts()
            );
        }
        if self.config.max_moves == 0 {
            return 0.0;
        }
        let input = ev.cut_evaluator(hg, ctx, &*solution);
        let input_feasible = bounds.satisfies(&input.block_balance);
        let relaxed = bounds.relaxed(self.config.exploration_slack);

        let mut best_cost = input.cost;
        let mut best = solution.to_vec();
        {
            let mut state = PassState::new(hg, ctx, ev, solution);
            for i in 0..self.config.refiner_iters {
                state.reset_visited();
                let explored = fm_pass(&mut state, &relaxed, &self.config, &Scope::All);
                repair_balance(&mut state, bounds);
                state.reset_visited();
                let polished = fm_pass(&mut state, bounds, &self.config, &Scope::All);

                let cost = state.cost();
                let feasible = bounds.satisfies(&state.block_balance);
                debug!(
                    "two-way iteration {i}: explored {explored:.4}, polished {polished:.4}, cost {cost:.4}"
                );
                if cost >= best_cost || (input_feasible && !feasible) {
                    break;
                }
                best_cost = cost;
                best.copy_from_slice(&*state.solution);
            }
        }
        solution.copy_from_slice(&best);
        input.cost - best_cost
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
