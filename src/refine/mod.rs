//! Local-search and exact refiners operating on one hypergraph level.

pub mod bucket;
pub mod greedy;
pub mod ilp;
pub mod kpm;
pub mod kway_fm;
pub mod two_way_fm;

use std::collections::HashMap;
use std::sync::Arc;

use bitvec::prelude::*;
use log::{debug, warn};
use rayon::prelude::*;

pub use crate::config::RefinerKind;
use crate::config::RefineConfig;
use crate::evaluator::{EvalContext, Evaluator, NetDegrees, Tentative};
use crate::hypergraph::{BalanceBounds, Hypergraph, Matrix};
use crate::ilp::IlpSolver;
use crate::weights;

use bucket::{GainBucket, GainCell};
pub use greedy::GreedyRefiner;
pub use ilp::IlpRefiner;
pub use kpm::KpmRefiner;
pub use kway_fm::KWayFmRefiner;
pub use two_way_fm::TwoWayFmRefiner;

/// Improves a solution of one hypergraph level in place.
pub trait Refiner: Send + Sync {
    /// Refines `solution` and returns the total gain (cost decrease).
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32;

    /// Moves vertices until every block sits inside its bounds, or no legal
    /// repair move is left.
    fn balance_partition(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    );
}

pub fn build_refiner(
    kind: RefinerKind,
    evaluator: Arc<Evaluator>,
    config: &RefineConfig,
    solver: Arc<dyn IlpSolver>,
    ilp_max_hyperedges: usize,
) -> Box<dyn Refiner> {
    let config = config.clone();
    match kind {
        RefinerKind::TwoWayFm => Box::new(TwoWayFmRefiner::new(evaluator, config)),
        RefinerKind::KWayFm => Box::new(KWayFmRefiner::new(evaluator, config)),
        RefinerKind::Greedy => Box::new(GreedyRefiner::new(evaluator, config)),
        RefinerKind::Kpm => Box::new(KpmRefiner::new(evaluator, config)),
        RefinerKind::Ilp => Box::new(IlpRefiner::new(evaluator, config, solver, ilp_max_hyperedges)),
    }
}

/// Runs several refiners back to back.
pub struct RefineChain {
    refiners: Vec<Box<dyn Refiner>>,
}

impl RefineChain {
    pub fn new(refiners: Vec<Box<dyn Refiner>>) -> Self {
        Self { refiners }
    }

    /// Pairwise FM when there are more than two blocks, then FM over all
    /// blocks, then greedy hyperedge moves.
    pub fn standard(evaluator: Arc<Evaluator>, config: &RefineConfig, solver: Arc<dyn IlpSolver>) -> Self {
        let kinds = default_kinds(evaluator.num_parts());
        Self::from_kinds(&kinds, evaluator, config, solver, 0)
    }

    /// The chain listed in `config.refiners`, or the standard one when the
    /// list is empty.
    pub fn from_config(
        evaluator: Arc<Evaluator>,
        config: &RefineConfig,
        solver: Arc<dyn IlpSolver>,
        ilp_max_hyperedges: usize,
    ) -> Self {
        let kinds = if config.refiners.is_empty() {
            default_kinds(evaluator.num_parts())
        } else {
            config.refiners.clone()
        };
        debug!("refiner chain: {kinds:?}");
        Self::from_kinds(&kinds, evaluator, config, solver, ilp_max_hyperedges)
    }

    fn from_kinds(
        kinds: &[RefinerKind],
        evaluator: Arc<Evaluator>,
        config: &RefineConfig,
        solver: Arc<dyn IlpSolver>,
        ilp_max_hyperedges: usize,
    ) -> Self {
        Self::new(
            kinds
                .iter()
                .map(|&k| build_refiner(k, evaluator.clone(), config, solver.clone(), ilp_max_hyperedges))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.refiners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refiners.is_empty()
    }
}

fn default_kinds(num_parts: usize) -> Vec<RefinerKind> {
    let mut kinds = if num_parts > 2 {
        vec![RefinerKind::Kpm, RefinerKind::KWayFm]
    } else {
        vec![RefinerKind::TwoWayFm]
    };
    kinds.push(RefinerKind::Greedy);
    kinds
}

impl Refiner for RefineChain {
    fn refine(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) -> f32 {
        self.refiners
            .iter()
            .map(|r| r.refine(hg, ctx, bounds, solution))
            .sum()
    }

    fn balance_partition(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        solution: &mut [usize],
    ) {
        if let Some(first) = self.refiners.first() {
            first.balance_partition(hg, ctx, bounds, solution);
        }
    }
}

/// Which moves a pass may consider.
#[derive(Clone, Debug)]
pub(crate) enum Scope {
    All,
    /// `partner[b]` is the only block vertices of `b` may move to.
    Pairs(Vec<Option<usize>>),
}

impl Scope {
    pub(crate) fn pairs(num_parts: usize, pairs: &[(usize, usize)]) -> Self {
        let mut partner = vec![None; num_parts];
        for &(a, b) in pairs {
            partner[a] = Some(b);
            partner[b] = Some(a);
        }
        Scope::Pairs(partner)
    }

    pub(crate) fn block_active(&self, b: usize) -> bool {
        match self {
            Scope::All => true,
            Scope::Pairs(partner) => partner[b].is_some(),
        }
    }

    pub(crate) fn allows(&self, from: usize, to: usize) -> bool {
        from != to
            && match self {
                Scope::All => true,
                Scope::Pairs(partner) => partner[from] == Some(to),
            }
    }
}

/// The gain of moving every vertex of `hyperedge` into `destination`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HyperedgeGain {
    pub(crate) hyperedge: usize,
    pub(crate) destination: usize,
    pub(crate) gain: f32,
    pub(crate) path_delta: Vec<(usize, f32)>,
}

/// Incrementally maintained state of one refinement run over one solution.
pub(crate) struct PassState<'a> {
    pub(crate) hg: &'a Hypergraph,
    pub(crate) ctx: &'a EvalContext,
    pub(crate) ev: &'a Evaluator,
    pub(crate) solution: &'a mut [usize],
    pub(crate) block_balance: Matrix<f32>,
    pub(crate) net_degs: NetDegrees,
    pub(crate) paths_cost: Vec<f32>,
    pub(crate) visited: BitVec,
    pub(crate) vertex_norms: Vec<f32>,
}

impl<'a> PassState<'a> {
    pub(crate) fn new(
        hg: &'a Hypergraph,
        ctx: &'a EvalContext,
        ev: &'a Evaluator,
        solution: &'a mut [usize],
    ) -> Self {
        let block_balance = ev.block_balance(hg, &*solution);
        let net_degs = ev.net_degrees(hg, &*solution);
        let paths_cost = ev.paths_cost(hg, ctx, &*solution);
        let vertex_norms = (0..hg.num_vertices())
            .map(|v| ev.vertex_weight_norm(hg.vertex_weights(v)))
            .collect();
        let mut state = Self {
            hg,
            ctx,
            ev,
            solution,
            block_balance,
            net_degs,
            paths_cost,
            visited: bitvec![usize, Lsb0; 0; hg.num_vertices()],
            vertex_norms,
        };
        state.reset_visited();
        state
    }

    /// Clears the visited flags, except for fixed vertices which stay put.
    pub(crate) fn reset_visited(&mut self) {
        self.visited.fill(false);
        if self.hg.has_fixed_vertices() {
            for v in 0..self.hg.num_vertices() {
                if self.hg.fixed_block(v).is_some() {
                    self.visited.set(v, true);
                }
            }
        }
    }

    pub(crate) fn num_parts(&self) -> usize {
        self.ev.num_parts()
    }

    /// Full cost of the current solution.
    pub(crate) fn cost(&self) -> f32 {
        self.ev.cut_evaluator(self.hg, self.ctx, &*self.solution).cost
    }

    /// Gain of moving `v` from `from` to `to`: hyperedge connectivity deltas
    /// plus the cost reduction of every path through `v`.
    pub(crate) fn vertex_gain(&self, v: usize, from: usize, to: usize) -> GainCell {
        let mut cell = GainCell::new(v, from, to, 0.0);
        if from == to {
            return cell;
        }
        let mut cut_score = 0.0;
        for &e in self.hg.edges(v) {
            let connectivity = self.net_degs.connectivity(e);
            if connectivity == 0 {
                continue;
            }
            let cost = self.ctx.hyperedge_cost(e);
            if connectivity == 1 && self.net_degs.get(e, from) > 1 {
                cut_score -= cost;
            } else if connectivity == 2
                && self.net_degs.get(e, from) == 1
                && self.net_degs.get(e, to) > 0
            {
                cut_score += cost;
            }
        }
        let mut path_score = 0.0;
        let moved = Tentative {
            solution: &*self.solution,
            vertex: v,
            to,
        };
        for &p in self.hg.paths_through(v) {
            let cost = self.ev.path_cost(self.hg, self.ctx, &moved, p);
            cell.path_delta.push((p, cost - self.paths_cost[p]));
            path_score += self.paths_cost[p] - cost;
        }
        cell.gain = cut_score + path_score;
        cell
    }

    fn relocate(&mut self, v: usize, from: usize, to: usize) {
        self.solution[v] = to;
        let w = self.hg.vertex_weights(v);
        weights::sub_assign(&mut self.block_balance[from], w);
        weights::add_assign(&mut self.block_balance[to], w);
        self.net_degs.move_vertex(self.hg, v, from, to);
    }

    pub(crate) fn accept(&mut self, cell: &GainCell) {
        self.visited.set(cell.vertex, true);
        for &(p, delta) in &cell.path_delta {
            self.paths_cost[p] += delta;
        }
        self.relocate(cell.vertex, cell.source, cell.destination);
    }

    pub(crate) fn rollback(&mut self, cell: &GainCell) {
        self.visited.set(cell.vertex, false);
        for &(p, delta) in &cell.path_delta {
            self.paths_cost[p] -= delta;
        }
        self.relocate(cell.vertex, cell.destination, cell.source);
    }

    /// Whether moving `v` keeps `to` under its upper bound and `from` over
    /// its lower bound. Fixed vertices never move.
    pub(crate) fn is_legal(&self, v: usize, from: usize, to: usize, bounds: &BalanceBounds) -> bool {
        if self.hg.fixed_block(v).is_some() || from == to {
            return false;
        }
        let w = self.hg.vertex_weights(v);
        weights::fits_with(&self.block_balance[to], w, &bounds.upper[to])
            && weights::stays_above(&self.block_balance[from], w, &bounds.lower[from])
    }

    /// Gain of moving every vertex of `e` outside `to` into `to`. The moves
    /// are simulated one after another on a private copy of the affected
    /// net degrees.
    pub(crate) fn hyperedge_gain(&mut self, e: usize, to: usize) -> HyperedgeGain {
        let hg = self.hg;
        let movers: Vec<(usize, usize)> = hg
            .vertices(e)
            .iter()
            .filter(|&&v| self.solution[v] != to)
            .map(|&v| (v, self.solution[v]))
            .collect();
        let mut gain = HyperedgeGain {
            hyperedge: e,
            destination: to,
            gain: 0.0,
            path_delta: vec![],
        };
        if movers.is_empty() {
            return gain;
        }

        let mut degs: HashMap<usize, Vec<u32>> = HashMap::new();
        for &(v, _) in &movers {
            for &f in hg.edges(v) {
                degs.entry(f).or_insert_with(|| self.net_degs.row(f).to_vec());
            }
        }
        let mut cut_score = 0.0;
        for &(v, from) in &movers {
            for &f in hg.edges(v) {
                let Some(row) = degs.get_mut(&f) else {
                    continue;
                };
                let connectivity = row.iter().filter(|&&n| n > 0).count();
                if connectivity == 0 {
                    continue;
                }
                let cost = self.ctx.hyperedge_cost(f);
                if connectivity == 1 && row[from] > 1 {
                    cut_score -= cost;
                } else if connectivity == 2 && row[from] == 1 && row[to] > 0 {
                    cut_score += cost;
                }
                row[from] -= 1;
                row[to] += 1;
            }
        }

        let mut path_score = 0.0;
        if hg.has_timing() {
            for &(v, _) in &movers {
                self.solution[v] = to;
            }
            for &(v, _) in &movers {
                for &p in hg.paths_through(v) {
                    if gain.path_delta.iter().any(|(q, _)| *q == p) {
                        continue;
                    }
                    let cost = self.ev.path_cost(hg, self.ctx, &*self.solution, p);
                    gain.path_delta.push((p, cost - self.paths_cost[p]));
                    path_score += self.paths_cost[p] - cost;
                }
            }
            for &(v, from) in &movers {
                self.solution[v] = from;
            }
        }
        gain.gain = cut_score + path_score;
        gain
    }

    /// Moves the pins of the hyperedge and locks them for the rest of the
    /// pass.
    pub(crate) fn accept_hyperedge(&mut self, gain: &HyperedgeGain) {
        for &(p, delta) in &gain.path_delta {
            self.paths_cost[p] += delta;
        }
        let hg = self.hg;
        let to = gain.destination;
        for &v in hg.vertices(gain.hyperedge) {
            let from = self.solution[v];
            if from != to {
                self.relocate(v, from, to);
                self.visited.set(v, true);
            }
        }
    }

    /// Whether moving all of `e` into `to` respects fixed vertices, vertices
    /// already moved in this pass, and the balance bounds.
    pub(crate) fn hyperedge_legal(&self, e: usize, to: usize, bounds: &BalanceBounds) -> bool {
        let mut balance = self.block_balance.clone();
        for &v in self.hg.vertices(e) {
            if self.hg.fixed_block(v).is_some_and(|b| b != to) {
                return false;
            }
            let from = self.solution[v];
            if from != to && self.visited[v] {
                return false;
            }
            if from != to {
                let w = self.hg.vertex_weights(v);
                weights::add_assign(&mut balance[to], w);
                weights::sub_assign(&mut balance[from], w);
            }
        }
        if !weights::le(&balance[to], &bounds.upper[to]) {
            return false;
        }
        (0..self.num_parts())
            .filter(|&b| b != to)
            .all(|b| weights::ge(&balance[b], &bounds.lower[b]))
    }

    /// Whether `v` touches a hyperedge that spans its block and a block it
    /// may move to.
    pub(crate) fn is_boundary(&self, v: usize, scope: &Scope) -> bool {
        let own = self.solution[v];
        self.hg.edges(v).iter().any(|&e| match scope {
            Scope::All => self.net_degs.connectivity(e) > 1,
            Scope::Pairs(partner) => partner[own]
                .is_some_and(|p| self.net_degs.get(e, own) > 0 && self.net_degs.get(e, p) > 0),
        })
    }

    /// Unvisited vertices on the cut.
    pub(crate) fn boundary_vertices(&self, scope: &Scope) -> Vec<usize> {
        (0..self.hg.num_vertices())
            .filter(|&v| !self.visited[v] && self.is_boundary(v, scope))
            .collect()
    }

    /// Unvisited vertices whose gain may change once `v` moves: hyperedge
    /// neighbours plus the vertices sharing a timing path with `v`.
    pub(crate) fn neighbors(&self, v: usize, scope: &Scope) -> Vec<usize> {
        let mut nbrs: Vec<usize> = self
            .hg
            .edges(v)
            .iter()
            .flat_map(|&e| self.hg.vertices(e).iter().copied())
            .chain(
                self.hg
                    .paths_through(v)
                    .iter()
                    .flat_map(|&p| self.hg.path_vertices(p).iter().copied()),
            )
            .filter(|&u| u != v && !self.visited[u] && scope.block_active(self.solution[u]))
            .collect();
        nbrs.sort_unstable();
        nbrs.dedup();
        nbrs
    }
}

/// Repeats `pass` until it stops gaining, at most `refiner_iters` times.
pub(crate) fn run_passes(
    config: &RefineConfig,
    state: &mut PassState,
    mut pass: impl FnMut(&mut PassState) -> f32,
) -> f32 {
    if config.max_moves == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..config.refiner_iters {
        state.reset_visited();
        let gain = pass(state);
        debug!("pass {i}: gain {gain:.4}");
        if gain <= 0.0 {
            break;
        }
        total += gain;
    }
    total
}

/// Blocks vertices may leave and blocks they may enter while repairing.
/// Overweight blocks are emptied first; once none is left, underweight blocks
/// are filled from every block that can spare weight.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RepairPhase {
    sources: Vec<bool>,
    targets: Vec<bool>,
    // Sources must also stay above their lower bound.
    keep_lower: bool,
}

impl RepairPhase {
    fn of(state: &PassState, bounds: &BalanceBounds) -> Option<Self> {
        let num_parts = state.num_parts();
        let over: Vec<bool> = (0..num_parts)
            .map(|b| !weights::le(&state.block_balance[b], &bounds.upper[b]))
            .collect();
        if over.iter().any(|&o| o) {
            let targets = over.iter().map(|&o| !o).collect();
            return Some(Self {
                sources: over,
                targets,
                keep_lower: false,
            });
        }
        let under: Vec<bool> = (0..num_parts)
            .map(|b| !weights::ge(&state.block_balance[b], &bounds.lower[b]))
            .collect();
        if under.iter().any(|&u| u) {
            let sources = under.iter().map(|&u| !u).collect();
            return Some(Self {
                sources,
                targets: under,
                keep_lower: true,
            });
        }
        None
    }

    /// Within one phase targets only gain weight and sources only lose it,
    /// so a move that is illegal now stays illegal until the phase changes.
    fn legal(&self, state: &PassState, cell: &GainCell, bounds: &BalanceBounds) -> bool {
        let (v, from, to) = (cell.vertex, cell.source, cell.destination);
        let w = state.hg.vertex_weights(v);
        state.solution[v] == from
            && weights::fits_with(&state.block_balance[to], w, &bounds.upper[to])
            && (!self.keep_lower || weights::stays_above(&state.block_balance[from], w, &bounds.lower[from]))
    }

    fn seed(&self, state: &PassState, buckets: &mut [GainBucket]) {
        buckets.par_iter_mut().enumerate().for_each(|(to, bucket)| {
            bucket.clear();
            if !self.targets[to] {
                return;
            }
            bucket.set_active(true);
            for v in 0..state.hg.num_vertices() {
                let from = state.solution[v];
                if !state.visited[v] && from != to && self.sources[from] {
                    bucket.insert(state.vertex_gain(v, from, to), state.vertex_norms[v]);
                }
            }
        });
    }
}

/// Moves vertices out of overweight blocks and into underweight ones,
/// always taking the best-gain legal move. Candidates sit in one gain bucket
/// per target block; only the neighbours of a moved vertex are rescored, and
/// every vertex moves at most once.
pub(crate) fn repair_balance(state: &mut PassState, bounds: &BalanceBounds) {
    state.reset_visited();
    let num_vertices = state.hg.num_vertices();
    let mut buckets: Vec<GainBucket> = (0..state.num_parts())
        .map(|_| GainBucket::new(num_vertices))
        .collect();
    let mut phase: Option<RepairPhase> = None;
    let mut moves = 0;
    loop {
        let Some(current) = RepairPhase::of(state, bounds) else {
            break;
        };
        if phase.as_ref() != Some(&current) {
            current.seed(state, &mut buckets);
        }

        let mut best: Option<GainCell> = None;
        for bucket in buckets.iter_mut().filter(|b| b.is_active()) {
            while let Some(top) = bucket.max() {
                if current.legal(state, top, bounds) {
                    if best.as_ref().map_or(true, |b| top.gain > b.gain) {
                        best = Some(top.clone());
                    }
                    break;
                }
                bucket.extract_max();
            }
        }
        let Some(cell) = best else {
            warn!("balance repair stuck after {moves} moves: no legal move left");
            break;
        };

        let v = cell.vertex;
        buckets.par_iter_mut().for_each(|bucket| {
            bucket.remove(v);
        });
        state.accept(&cell);
        moves += 1;
        for u in state.neighbors(v, &Scope::All) {
            let from = state.solution[u];
            for (to, bucket) in buckets.iter_mut().enumerate() {
                if bucket.contains(u) {
                    bucket.update(state.vertex_gain(u, from, to));
                }
            }
        }
        phase = Some(current);
    }
    debug!("balance repair: {moves} moves");
}
