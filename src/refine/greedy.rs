use std::sync::Arc;

use super::{repair_balance, run_passes, HyperedgeGain, PassState, Refiner};
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};

/// Pulls whole cut hyperedges into one of the blocks they touch whenever
/// that does not increase the cost.
pub struct GreedyRefiner {
    evaluator: Arc<Evaluator>,
    config: RefineConfig,
}

impl GreedyRefiner {
    pub fn new(evaluator: Arc<Evaluator>, config: RefineConfig) -> Self {
        Self { evaluator, config }
    }
}

impl Refiner for GreedyRefiner {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        let mut state = PassState::new(hg, ctx, &self.evaluator, solution);
        run_passes(&self.config, &mut state, |s| {
            greedy_pass(s, bounds, self.config.max_moves)
        })
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

fn greedy_pass(state: &mut PassState, bounds: &BalanceBounds, max_moves: usize) -> f32 {
    let mut total = 0.0;
    let mut moves = 0;
    for e in 0..state.hg.num_hyperedges() {
        if moves >= max_moves {
            break;
        }
        if !state.net_degs.is_cut(e) {
            continue;
        }
        let mut best: Option<HyperedgeGain> = None;
        for to in 0..state.num_parts() {
            if state.net_degs.get(e, to) == 0 || !state.hyperedge_legal(e, to, bounds) {
                continue;
            }
            let gain = state.hyperedge_gain(e, to);
            if gain.gain >= 0.0 && best.as_ref().map_or(true, |b| gain.gain > b.gain) {
                best = Some(gain);
            }
        }
        if let Some(gain) = best {
            state.accept_hyperedge(&gain);
            total += gain.gain;
            moves += 1;
        }
    }
    total
}
