//! Multilevel driver: coarsen, partition the coarsest level, then project
//! and refine level by level. Several such cycles are combined through a
//! cut-overlay cleanup and optional V-cycles.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;

use bitvec::prelude::*;
use log::{debug, info, warn};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rayon::prelude::*;

use crate::coarsen::{cluster_based_group_info, group_vertices, project, Coarsener};
use crate::config::PartitionConfig;
use crate::error::{PartitionError, Result};
use crate::evaluator::{EvalContext, Evaluator, PartitionToken, PathStats};
use crate::hypergraph::{BalanceBounds, Hypergraph, Matrix};
use crate::ilp::{BranchAndBound, IlpModel, IlpOutcome, IlpSolver};
use crate::initial::InitialPartitioner;
use crate::refine::{IlpRefiner, RefineChain, Refiner};

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionResult {
    pub solution: Vec<usize>,
    pub cost: f32,
    pub block_balance: Matrix<f32>,
    /// Whether every block lies within its bounds. An unbalanced result is
    /// the cheapest solution found when no balanced one was.
    pub balanced: bool,
    pub path_stats: Option<PathStats>,
}

pub struct Partitioner {
    config: PartitionConfig,
    solver: Arc<dyn IlpSolver>,
}

impl Partitioner {
    pub fn new(config: PartitionConfig) -> Self {
        let solver = Arc::new(BranchAndBound::new(config.multilevel.ilp_node_limit));
        Self { config, solver }
    }

    /// Replaces the built-in branch and bound used for exact solves.
    pub fn with_solver(mut self, solver: Arc<dyn IlpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn partition(&self, hg: &Hypergraph) -> Result<PartitionResult> {
        self.partition_with_groups(hg, &[])
    }

    /// Partitions `hg` keeping the vertices of every group in one block.
    /// Overlapping groups are merged.
    pub fn partition_with_groups(
        &self,
        hg: &Hypergraph,
        groups: &[Vec<usize>],
    ) -> Result<PartitionResult> {
        self.config.validate()?;
        if hg.num_vertices() == 0 {
            return Err(PartitionError::EmptyHypergraph);
        }
        let hg = self.drop_invalid_fixed(hg);
        let ev = Arc::new(Evaluator::new(self.config.num_parts, self.config.factors.clone()));
        let bounds = hg.balance_bounds(
            self.config.num_parts,
            self.config.ub_factor,
            &self.config.base_balance(),
        );
        info!(
            "partitioning {} vertices, {} hyperedges into {} blocks",
            hg.num_vertices(),
            hg.num_hyperedges(),
            self.config.num_parts
        );

        let solution = self.install(|| {
            if groups.is_empty() {
                return self.run(&ev, &hg, &bounds);
            }
            let merged = cluster_based_group_info(&hg, groups);
            let ctx = ev.context(&hg);
            let grouped = group_vertices(&ev, &hg, &ctx, &merged);
            info!(
                "{} groups contracted: {} vertices left",
                merged.len(),
                grouped.num_vertices()
            );
            let coarse = self.run(&ev, &grouped, &bounds);
            project(&grouped, &coarse, hg.num_vertices())
        });
        Ok(self.summarize(&ev, &hg, &bounds, solution))
    }

    fn drop_invalid_fixed<'a>(&self, hg: &'a Hypergraph) -> Cow<'a, Hypergraph> {
        let num_parts = self.config.num_parts;
        let invalid = (0..hg.num_vertices())
            .filter(|&v| hg.fixed_block(v).is_some_and(|b| b >= num_parts))
            .count();
        if invalid == 0 {
            return Cow::Borrowed(hg);
        }
        warn!("ignoring {invalid} fixed vertices assigned to a block >= {num_parts}");
        let mut owned = hg.clone();
        if let Some(fixed) = owned.fixed_attr.as_mut() {
            for block in fixed.iter_mut() {
                if block.is_some_and(|b| b >= num_parts) {
                    *block = None;
                }
            }
        }
        Cow::Owned(owned)
    }

    /// Runs `f` on a dedicated pool when a thread count is configured.
    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        let threads = self.config.multilevel.num_threads;
        if threads == 0 {
            return f();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(f),
            Err(err) => {
                warn!("cannot build a pool of {threads} threads ({err}), using the global one");
                f()
            }
        }
    }

    fn run(&self, ev: &Arc<Evaluator>, hg: &Hypergraph, bounds: &BalanceBounds) -> Vec<usize> {
        let engine = Engine::new(ev.clone(), &self.config, self.solver.clone());
        let ctx = ev.context(hg);
        let ml = &self.config.multilevel;

        let candidates: Vec<Vec<usize>> = (0..ml.num_coarsen_solutions.max(1))
            .map(|i| {
                let mut rng = SmallRng::seed_from_u64(self.config.seed.wrapping_add(i as u64));
                let solution = engine.single_cycle(hg, &ctx, bounds, &mut rng, None);
                info!(
                    "cycle {i}: cost {:.4}",
                    ev.cut_evaluator(hg, &ctx, &solution).cost
                );
                solution
            })
            .collect();

        let mut best = engine.best_of(hg, &ctx, bounds, &candidates);
        if candidates.len() > 1 {
            let mut rng = SmallRng::seed_from_u64(self.config.seed.wrapping_add(candidates.len() as u64));
            best = engine.cut_overlay(hg, &ctx, bounds, &candidates, best, &mut rng);
        }

        if ml.v_cycle {
            for i in 0..ml.max_num_vcycle {
                let seed = self.config.seed.wrapping_add((ml.num_coarsen_solutions + 1 + i) as u64);
                let mut rng = SmallRng::seed_from_u64(seed);
                let next = engine.v_cycle(hg, &ctx, bounds, &best, &mut rng);
                let before = ev.cut_evaluator(hg, &ctx, &best);
                let after = ev.cut_evaluator(hg, &ctx, &next);
                info!("v-cycle {i}: cost {:.4} -> {:.4}", before.cost, after.cost);
                if !improves(&after, &before, bounds) {
                    break;
                }
                best = next;
            }
        }
        best
    }

    fn summarize(
        &self,
        ev: &Evaluator,
        hg: &Hypergraph,
        bounds: &BalanceBounds,
        solution: Vec<usize>,
    ) -> PartitionResult {
        let mut ctx = ev.context(hg);
        let PartitionToken {
            cost,
            block_balance,
        } = ev.cut_evaluator(hg, &ctx, &solution);
        let balanced = bounds.satisfies(&block_balance);
        let path_stats = hg.has_timing().then(|| {
            ev.update_timing(hg, &mut ctx, &solution);
            ev.path_stats(hg, &ctx, &solution)
        });
        info!("final cost {cost:.4}, balanced: {balanced}");
        for (b, w) in block_balance.iter().enumerate() {
            info!("block {b}: {w:?}");
        }
        if !balanced {
            warn!("no solution within the balance bounds was found");
        }
        PartitionResult {
            solution,
            cost,
            block_balance,
            balanced,
            path_stats,
        }
    }
}

/// Balanced beats unbalanced, then lower cost wins.
fn improves(new: &PartitionToken, old: &PartitionToken, bounds: &BalanceBounds) -> bool {
    let new_ok = bounds.satisfies(&new.block_balance);
    let old_ok = bounds.satisfies(&old.block_balance);
    (new_ok && !old_ok) || (new_ok == old_ok && new.cost < old.cost)
}

/// Assigns every coarse vertex the block of its first finer member.
fn restrict(coarse: &Hypergraph, fine_solution: &[usize]) -> Vec<usize> {
    (0..coarse.num_vertices())
        .map(|c| {
            coarse
                .cluster_members(c)
                .first()
                .map_or(0, |&v| fine_solution[v])
        })
        .collect()
}

/// Connected components over the hyperedges that no candidate cuts.
pub(crate) fn overlay_components(
    ev: &Evaluator,
    hg: &Hypergraph,
    candidates: &[Vec<usize>],
) -> Vec<Vec<usize>> {
    let mut cut = bitvec![usize, Lsb0; 0; hg.num_hyperedges()];
    for solution in candidates {
        for e in ev.cut_hyperedges(hg, solution) {
            cut.set(e, true);
        }
    }

    let mut seen = bitvec![usize, Lsb0; 0; hg.num_vertices()];
    let mut components = vec![];
    for start in 0..hg.num_vertices() {
        if seen[start] {
            continue;
        }
        seen.set(start, true);
        let mut component = vec![];
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            component.push(v);
            for &e in hg.edges(v) {
                if cut[e] {
                    continue;
                }
                for &u in hg.vertices(e) {
                    if !seen[u] {
                        seen.set(u, true);
                        queue.push_back(u);
                    }
                }
            }
        }
        components.push(component);
    }
    components
}

/// Everything one run shares across its cycles.
struct Engine<'a> {
    ev: Arc<Evaluator>,
    config: &'a PartitionConfig,
    solver: Arc<dyn IlpSolver>,
    coarsener: Coarsener,
    initial: InitialPartitioner,
    refiner: RefineChain,
    exact: IlpRefiner,
}

impl<'a> Engine<'a> {
    fn new(ev: Arc<Evaluator>, config: &'a PartitionConfig, solver: Arc<dyn IlpSolver>) -> Self {
        Self {
            coarsener: Coarsener::new(ev.clone(), config.coarsen.clone()),
            initial: InitialPartitioner::new(
                ev.clone(),
                config.initial.clone(),
                config.refine.clone(),
                solver.clone(),
            ),
            refiner: RefineChain::from_config(
                ev.clone(),
                &config.refine,
                solver.clone(),
                config.initial.ilp_max_hyperedges,
            ),
            exact: IlpRefiner::new(
                ev.clone(),
                config.refine.clone(),
                solver.clone(),
                config.initial.ilp_max_hyperedges,
            ),
            ev,
            config,
            solver,
        }
    }

    /// Coarsen, partition the coarsest level, then walk back up refining
    /// every candidate. `seed_solution`, a solution of `hg`, joins the
    /// initial candidates.
    fn single_cycle(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        rng: &mut SmallRng,
        seed_solution: Option<&[usize]>,
    ) -> Vec<usize> {
        let levels = self.coarsener.coarsen(hg, ctx, rng);
        let (coarsest, coarsest_ctx) = levels
            .last()
            .map_or((hg, ctx), |l| (&l.hgraph, &l.ctx));
        let mut solutions = self.initial.partition(coarsest, coarsest_ctx, bounds, rng);
        if let Some(seed) = seed_solution {
            let mut restricted = seed.to_vec();
            for level in &levels {
                restricted = restrict(&level.hgraph, &restricted);
            }
            solutions.push(restricted);
        }
        info!(
            "initial partitioning: {} candidates on {} vertices",
            solutions.len(),
            coarsest.num_vertices()
        );

        for depth in (0..=levels.len()).rev() {
            let (level_hg, level_ctx) = match depth {
                0 => (hg, ctx),
                d => (&levels[d - 1].hgraph, &levels[d - 1].ctx),
            };
            if let Some(coarse) = levels.get(depth) {
                solutions = solutions
                    .iter()
                    .map(|s| project(&coarse.hgraph, s, level_hg.num_vertices()))
                    .collect();
            }
            let exact = self.refines_exactly(level_hg);
            solutions.par_iter_mut().for_each(|solution| {
                if !bounds.satisfies(&self.ev.block_balance(level_hg, &*solution)) {
                    self.refiner.balance_partition(level_hg, level_ctx, bounds, solution);
                }
                self.refiner.refine(level_hg, level_ctx, bounds, solution);
                if exact {
                    self.exact.refine(level_hg, level_ctx, bounds, solution);
                }
            });
            let best = self.best_of(level_hg, level_ctx, bounds, &solutions);
            info!(
                "level {depth}: {} vertices, best cost {:.4}",
                level_hg.num_vertices(),
                self.ev.cut_evaluator(level_hg, level_ctx, &best).cost
            );
        }
        self.best_of(hg, ctx, bounds, &solutions)
    }

    /// Small levels without timing paths get an extra exact refinement
    /// after the chain.
    fn refines_exactly(&self, hg: &Hypergraph) -> bool {
        hg.num_vertices() < self.config.refine.ilp_vertex_threshold && !hg.has_timing()
    }

    /// Re-coarsens with `best` as the community of every vertex, so clusters
    /// never straddle its blocks, and seeds the cycle with it.
    fn v_cycle(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        best: &[usize],
        rng: &mut SmallRng,
    ) -> Vec<usize> {
        let guided = hg.clone().with_community(best.to_vec());
        self.single_cycle(&guided, ctx, bounds, rng, Some(best))
    }

    /// Contracts the regions no candidate cuts and solves the rest again,
    /// exactly when it is small enough.
    fn cut_overlay(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        candidates: &[Vec<usize>],
        best: Vec<usize>,
        rng: &mut SmallRng,
    ) -> Vec<usize> {
        let components = overlay_components(&self.ev, hg, candidates);
        let residual = group_vertices(&self.ev, hg, ctx, &components);
        let residual_ctx = self.ev.context(&residual);
        let hint = restrict(&residual, &best);
        info!(
            "cut overlay: {} vertices, {} hyperedges",
            residual.num_vertices(),
            residual.num_hyperedges()
        );

        let solved = if residual.num_vertices() <= self.config.initial.ilp_vertex_threshold {
            let model = IlpModel::from_hypergraph(
                &residual,
                &residual_ctx,
                bounds,
                self.config.initial.ilp_max_hyperedges,
                Some(hint),
            );
            match self.solver.solve(&model) {
                IlpOutcome::Solved { assignment, optimal } => {
                    debug!("cut overlay solved exactly (optimal: {optimal})");
                    assignment
                }
                IlpOutcome::Infeasible => {
                    warn!("cut overlay model is infeasible, keeping the best candidate");
                    return best;
                }
            }
        } else {
            let guided = residual.clone().with_community(hint.clone());
            self.single_cycle(&guided, &residual_ctx, bounds, rng, Some(&hint))
        };

        let expanded = project(&residual, &solved, hg.num_vertices());
        let before = self.ev.cut_evaluator(hg, ctx, &best);
        let after = self.ev.cut_evaluator(hg, ctx, &expanded);
        let keeps_balance = bounds.satisfies(&after.block_balance) || !bounds.satisfies(&before.block_balance);
        if after.cost <= before.cost && keeps_balance {
            info!("cut overlay: cost {:.4} -> {:.4}", before.cost, after.cost);
            expanded
        } else {
            best
        }
    }

    /// The cheapest balanced solution, or the cheapest one if none is
    /// balanced.
    fn best_of(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solutions: &[Vec<usize>],
    ) -> Vec<usize> {
        let mut best: Option<(PartitionToken, &Vec<usize>)> = None;
        for solution in solutions {
            let token = self.ev.cut_evaluator(hg, ctx, solution);
            if best.as_ref().map_or(true, |(b, _)| improves(&token, b, bounds)) {
                best = Some((token, solution));
            }
        }
        best.map(|(_, s)| s.clone())
            .unwrap_or_else(|| vec![0; hg.num_vertices()])
    }
}
