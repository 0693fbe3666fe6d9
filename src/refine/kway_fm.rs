use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use super::bucket::{GainBucket, GainCell};
use super::{repair_balance, run_passes, PassState, Refiner, Scope};
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{BalanceBounds, Hypergraph};

/// FM refinement over all blocks with one gain bucket per destination block.
pub struct KWayFmRefiner {
    evaluator: Arc<Evaluator>,
    config: RefineConfig,
}

impl KWayFmRefiner {
    pub fn new(evaluator: Arc<Evaluator>, config: RefineConfig) -> Self {
        Self { evaluator, config }
    }
}

impl Refiner for KWayFmRefiner {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        let mut state = PassState::new(hg, ctx, &self.evaluator, solution);
        run_passes(&self.config, &mut state, |s| {
            fm_pass(s, bounds, &self.config, &Scope::All)
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

/// One FM pass: repeatedly take the best legal move, lock the vertex, and
/// finally roll back to the prefix of moves with the highest cumulative gain.
/// Returns that gain, never negative.
pub(crate) fn fm_pass(
    state: &mut PassState,
    bounds: &BalanceBounds,
    config: &RefineConfig,
    scope: &Scope,
) -> f32 {
    let num_vertices = state.hg.num_vertices();
    let mut buckets: Vec<GainBucket> = (0..state.num_parts())
        .map(|b| {
            let mut bucket = GainBucket::new(num_vertices);
            bucket.set_active(scope.block_active(b));
            bucket
        })
        .collect();

    let boundary = state.boundary_vertices(scope);
    {
        let state = &*state;
        buckets
            .par_iter_mut()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_active())
            .for_each(|(to, bucket)| {
                for &v in &boundary {
                    let from = state.solution[v];
                    if scope.allows(from, to) {
                        bucket.insert(state.vertex_gain(v, from, to), state.vertex_norms[v]);
                    }
                }
            });
    }

    let window = ((config.early_stop_ratio * num_vertices as f32) as usize).max(1);
    let mut moves: Vec<GainCell> = vec![];
    let mut cumulative = 0.0;
    let mut best_gain = 0.0;
    let mut best_len = 0;
    while moves.len() < config.max_moves {
        let Some(cell) = pick_move(state, &buckets, bounds, config.total_corking_passes) else {
            break;
        };
        let v = cell.vertex;
        buckets.par_iter_mut().for_each(|bucket| {
            bucket.remove(v);
        });
        state.accept(&cell);
        cumulative += cell.gain;
        moves.push(cell);
        if cumulative > best_gain {
            best_gain = cumulative;
            best_len = moves.len();
        }
        update_neighbors(state, &mut buckets, v, scope);
        if moves.len() - best_len >= window {
            break;
        }
    }

    debug!(
        "fm pass: {} moves tried, keeping {best_len} for gain {best_gain:.4}",
        moves.len()
    );
    for cell in moves.drain(best_len..).rev() {
        state.rollback(&cell);
    }
    best_gain
}

/// Best legal move among the bucket maxima. When every maximum is illegal,
/// walks the first few heap slots of the bucket of the lightest block.
fn pick_move(
    state: &PassState,
    buckets: &[GainBucket],
    bounds: &BalanceBounds,
    corking_passes: usize,
) -> Option<GainCell> {
    let legal = |cell: &GainCell| {
        !state.visited[cell.vertex]
            && state.is_legal(cell.vertex, cell.source, cell.destination, bounds)
    };

    let mut best: Option<&GainCell> = None;
    for bucket in buckets.iter().filter(|b| b.is_active()) {
        if let Some(top) = bucket.max() {
            if legal(top) && best.map_or(true, |b| top.gain > b.gain) {
                best = Some(top);
            }
        }
    }
    if best.is_some() {
        return best.cloned();
    }

    let lightest = buckets
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_active() && !b.is_empty())
        .min_by(|(a, _), (b, _)| {
            let wa = state.ev.vertex_weight_norm(&state.block_balance[*a]);
            let wb = state.ev.vertex_weight_norm(&state.block_balance[*b]);
            wa.total_cmp(&wb)
        })
        .map(|(_, bucket)| bucket)?;
    (0..corking_passes.min(lightest.len()))
        .filter_map(|i| lightest.slot(i))
        .filter(|cell| legal(cell))
        .fold(None, |best: Option<&GainCell>, cell| match best {
            Some(b) if b.gain >= cell.gain => Some(b),
            _ => Some(cell),
        })
        .cloned()
}

/// Refreshes the cells of the unlocked neighbours of `v` after it moved, and
/// inserts the ones that just reached the boundary.
fn update_neighbors(state: &PassState, buckets: &mut [GainBucket], v: usize, scope: &Scope) {
    let nbrs = state.neighbors(v, scope);
    if nbrs.is_empty() {
        return;
    }
    buckets
        .par_iter_mut()
        .enumerate()
        .filter(|(_, bucket)| bucket.is_active())
        .for_each(|(to, bucket)| {
            for &u in &nbrs {
                let from = state.solution[u];
                if !scope.allows(from, to) {
                    continue;
                }
                if bucket.contains(u) {
                    bucket.update(state.vertex_gain(u, from, to));
                } else if state.is_boundary(u, scope) {
                    bucket.insert(state.vertex_gain(u, from, to), state.vertex_norms[u]);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::config::CostFactors;
    use crate::refine::tests::{two_clusters, unit};

    fn refiner(num_parts: usize) -> (KWayFmRefiner, Arc<Evaluator>) {
        let ev = Arc::new(Evaluator::new(num_parts, CostFactors::default()));
        (KWayFmRefiner::new(ev.clone(), RefineConfig::default()), ev)
    }

    #[test]
    fn recovers_natural_split() {
        let h = two_clusters();
        let (fm, ev) = refiner(2);
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(2, 20.0, &[0.5, 0.5]);
        let mut solution = vec![0, 0, 0, 1, 0, 1, 1, 1];
        let before = ev.cut_evaluator(&h, &ctx, &solution).cost;
        let gain = fm.refine(&h, &ctx, &bounds, &mut solution);
        let after = ev.cut_evaluator(&h, &ctx, &solution).cost;
        assert_eq!(after, 1.0);
        assert_eq!(before - after, gain);
        assert!(bounds.satisfies(&ev.block_balance(&h, &solution)));
    }

    #[test]
    fn fixed_vertices_stay() {
        let h = two_clusters().with_fixed(vec![-1, -1, -1, 1, -1, -1, -1, -1]);
        let (fm, ev) = refiner(2);
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(2, 20.0, &[0.5, 0.5]);
        let mut solution = vec![0, 0, 0, 1, 0, 1, 1, 1];
        fm.refine(&h, &ctx, &bounds, &mut solution);
        assert_eq!(solution[3], 1);
    }

    #[test]
    fn zero_moves_is_a_no_op() {
        let h = two_clusters();
        let ev = Arc::new(Evaluator::new(2, CostFactors::default()));
        let config = RefineConfig {
            max_moves: 0,
            ..Default::default()
        };
        let fm = KWayFmRefiner::new(ev.clone(), config);
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(2, 10.0, &[0.5, 0.5]);
        let mut solution = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let original = solution.clone();
        assert_eq!(fm.refine(&h, &ctx, &bounds, &mut solution), 0.0);
        assert_eq!(solution, original);
    }

    #[test]
    fn pair_scope_only_moves_between_partners() {
        let mut rng = SmallRng::seed_from_u64(11);
        let nets: Vec<Vec<usize>> = (0..80)
            .map(|_| (0..3).map(|_| rng.gen_range(0..40)).collect())
            .collect();
        let h = Hypergraph::new(unit(40), nets, unit(80)).unwrap();
        let ev = Evaluator::new(4, CostFactors::default());
        let ctx = ev.context(&h);
        let bounds = h.balance_bounds(4, 10.0, &[0.25; 4]);
        let mut solution: Vec<usize> = (0..40).map(|v| v % 4).collect();
        let original = solution.clone();
        let mut state = PassState::new(&h, &ctx, &ev, &mut solution);
        let gain = fm_pass(&mut state, &bounds, &RefineConfig::default(), &Scope::pairs(4, &[(0, 2)]));
        assert!(gain >= 0.0);
        for v in 0..40 {
            if original[v] == 1 || original[v] == 3 {
                assert_eq!(state.solution[v], original[v]);
            } else {
                assert!(state.solution[v] == 0 || state.solution[v] == 2);
            }
        }
    }

    #[test]
    fn pass_never_worsens_cost() {
        let mut rng = SmallRng::seed_from_u64(5);
        for num_parts in [2, 3, 4] {
            let nets: Vec<Vec<usize>> = (0..120)
                .map(|_| (0..rng.gen_range(2..5)).map(|_| rng.gen_range(0..60)).collect())
                .collect();
            let h = Hypergraph::new(unit(60), nets, unit(120)).unwrap();
            let (fm, ev) = refiner(num_parts);
            let ctx = ev.context(&h);
            let bounds = h.balance_bounds(num_parts, 5.0, &vec![1.0 / num_parts as f32; num_parts]);
            let mut solution: Vec<usize> = (0..60).map(|v| v % num_parts).collect();
            let before = ev.cut_evaluator(&h, &ctx, &solution).cost;
            let gain = fm.refine(&h, &ctx, &bounds, &mut solution);
            let after = ev.cut_evaluator(&h, &ctx, &solution).cost;
            assert!(gain >= 0.0);
            assert!(after <= before);
            assert!((before - after - gain).abs() < 1e-3);
            assert!(bounds.satisfies(&ev.block_balance(&h, &solution)));
        }
    }
}
