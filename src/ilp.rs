//! Exact partitioning of small hypergraphs.
//!
//! A partition is modelled as a 0/1 program: `x[v][b] = 1` when vertex `v`
//! sits in block `b`, and `y[e][b] = 1` when hyperedge `e` lies entirely
//! inside block `b`. The program maximises the weight of uncut hyperedges
//! subject to
//!
//! * `Σ_b x[v][b] = 1` for every vertex,
//! * `lower[b] <= Σ_v w[v] x[v][b] <= upper[b]` for every block and weight
//!   dimension,
//! * `y[e][b] <= x[v][b]` for every pin `v` of `e`,
//! * `x[v][f] = 1` for every vertex fixed to block `f`.
//!
//! Any solver implementing [`IlpSolver`] can be plugged in; the crate ships a
//! depth-first [`BranchAndBound`] with a node budget.

use log::{debug, warn};

use crate::evaluator::EvalContext;
use crate::hypergraph::{BalanceBounds, Hypergraph, Matrix};
use crate::weights;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Var {
    X { vertex: usize, block: usize },
    Y { hyperedge: usize, block: usize },
}

/// `lower <= Σ coefficient * var <= upper`
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub terms: Vec<(Var, f32)>,
    pub lower: f32,
    pub upper: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IlpModel {
    pub num_vertices: usize,
    pub num_parts: usize,
    pub vertex_weights: Matrix<f32>,
    /// Modelled hyperedges; those left out never count as uncut.
    pub hyperedges: Vec<Vec<usize>>,
    pub hyperedge_weights: Vec<f32>,
    pub upper: Matrix<f32>,
    pub lower: Matrix<f32>,
    pub fixed: Vec<Option<usize>>,
    /// A starting assignment handed to the solver as a warm start.
    pub hint: Option<Vec<usize>>,
}

impl IlpModel {
    /// Models `hg` with hyperedge costs taken from `ctx`. Only the
    /// `max_hyperedges` most expensive hyperedges with at least two pins
    /// enter the objective.
    pub fn from_hypergraph(
        hg: &Hypergraph,
        ctx: &EvalContext,
        bounds: &BalanceBounds,
        max_hyperedges: usize,
        hint: Option<Vec<usize>>,
    ) -> Self {
        let mut candidates: Vec<usize> = (0..hg.num_hyperedges())
            .filter(|&e| hg.vertices(e).len() > 1)
            .collect();
        if candidates.len() > max_hyperedges {
            candidates.sort_by(|&a, &b| ctx.hyperedge_cost(b).total_cmp(&ctx.hyperedge_cost(a)));
            candidates.truncate(max_hyperedges);
            candidates.sort_unstable();
            debug!(
                "ilp model keeps {max_hyperedges} of {} hyperedges",
                hg.num_hyperedges()
            );
        }
        Self {
            num_vertices: hg.num_vertices(),
            num_parts: bounds.num_parts(),
            vertex_weights: (0..hg.num_vertices())
                .map(|v| hg.vertex_weights(v).to_vec())
                .collect(),
            hyperedges: candidates.iter().map(|&e| hg.vertices(e).to_vec()).collect(),
            hyperedge_weights: candidates.iter().map(|&e| ctx.hyperedge_cost(e)).collect(),
            upper: bounds.upper.clone(),
            lower: bounds.lower.clone(),
            fixed: (0..hg.num_vertices()).map(|v| hg.fixed_block(v)).collect(),
            hint,
        }
    }

    pub fn constraints(&self) -> Vec<Constraint> {
        let mut rows = vec![];
        for v in 0..self.num_vertices {
            rows.push(Constraint {
                terms: (0..self.num_parts)
                    .map(|block| (Var::X { vertex: v, block }, 1.0))
                    .collect(),
                lower: 1.0,
                upper: 1.0,
            });
            if let Some(block) = self.fixed[v] {
                rows.push(Constraint {
                    terms: vec![(Var::X { vertex: v, block }, 1.0)],
                    lower: 1.0,
                    upper: 1.0,
                });
            }
        }
        let dims = self.vertex_weights.first().map_or(0, Vec::len);
        for block in 0..self.num_parts {
            for d in 0..dims {
                rows.push(Constraint {
                    terms: (0..self.num_vertices)
                        .map(|v| (Var::X { vertex: v, block }, self.vertex_weights[v][d]))
                        .collect(),
                    lower: self.lower[block][d],
                    upper: self.upper[block][d],
                });
            }
        }
        for (hyperedge, pins) in self.hyperedges.iter().enumerate() {
            for block in 0..self.num_parts {
                for &v in pins {
                    rows.push(Constraint {
                        terms: vec![
                            (Var::Y { hyperedge, block }, 1.0),
                            (Var::X { vertex: v, block }, -1.0),
                        ],
                        lower: f32::NEG_INFINITY,
                        upper: 0.0,
                    });
                }
            }
        }
        rows
    }

    /// Coefficients of the maximised objective.
    pub fn objective(&self) -> Vec<(Var, f32)> {
        self.hyperedge_weights
            .iter()
            .enumerate()
            .flat_map(|(hyperedge, &w)| {
                (0..self.num_parts).map(move |block| (Var::Y { hyperedge, block }, w))
            })
            .collect()
    }

    /// Warm-start values of the `x` variables.
    pub fn hints(&self) -> Vec<(Var, bool)> {
        let Some(hint) = &self.hint else {
            return vec![];
        };
        hint.iter()
            .enumerate()
            .flat_map(|(vertex, &b)| {
                (0..self.num_parts).map(move |block| (Var::X { vertex, block }, block == b))
            })
            .collect()
    }

    pub fn block_balance(&self, assignment: &[usize]) -> Matrix<f32> {
        let dims = self.vertex_weights.first().map_or(0, Vec::len);
        let mut balance = vec![vec![0.0; dims]; self.num_parts];
        for (v, &b) in assignment.iter().enumerate() {
            weights::add_assign(&mut balance[b], &self.vertex_weights[v]);
        }
        balance
    }

    pub fn is_feasible(&self, assignment: &[usize]) -> bool {
        if assignment.len() != self.num_vertices || assignment.iter().any(|&b| b >= self.num_parts) {
            return false;
        }
        if (0..self.num_vertices).any(|v| self.fixed[v].is_some_and(|f| assignment[v] != f)) {
            return false;
        }
        let balance = self.block_balance(assignment);
        (0..self.num_parts).all(|b| {
            weights::le(&balance[b], &self.upper[b]) && weights::ge(&balance[b], &self.lower[b])
        })
    }

    /// Objective value: the weight of modelled hyperedges left uncut. A
    /// hyperedge of negative weight is better off cut, so it never counts.
    pub fn objective_value(&self, assignment: &[usize]) -> f32 {
        self.hyperedges
            .iter()
            .zip(&self.hyperedge_weights)
            .filter(|(pins, w)| {
                **w > 0.0 && pins.iter().all(|&v| assignment[v] == assignment[pins[0]])
            })
            .map(|(_, &w)| w)
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IlpOutcome {
    /// `optimal` is false when the search budget ran out first.
    Solved { assignment: Vec<usize>, optimal: bool },
    Infeasible,
}

pub trait IlpSolver: Send + Sync {
    fn solve(&self, model: &IlpModel) -> IlpOutcome;
}

/// Depth-first branch and bound over vertex assignments. The bound is the
/// weight of the hyperedges not yet split between two blocks.
#[derive(Clone, Debug)]
pub struct BranchAndBound {
    pub node_limit: usize,
}

impl BranchAndBound {
    pub fn new(node_limit: usize) -> Self {
        Self { node_limit }
    }
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self::new(200_000)
    }
}

impl IlpSolver for BranchAndBound {
    fn solve(&self, model: &IlpModel) -> IlpOutcome {
        let mut search = Search::new(model, self.node_limit);
        if let Some(hint) = &model.hint {
            if model.is_feasible(hint) {
                search.best = Some((model.objective_value(hint), hint.clone()));
            } else {
                debug!("ilp hint is infeasible, searching from scratch");
            }
        }
        search.descend(0);
        match search.best {
            Some((value, assignment)) => {
                debug!(
                    "ilp: objective {value:.3} after {} nodes{}",
                    search.nodes,
                    if search.exhausted { " (budget exhausted)" } else { "" }
                );
                IlpOutcome::Solved {
                    assignment,
                    optimal: !search.exhausted,
                }
            }
            None => {
                if search.exhausted {
                    warn!("ilp: node budget exhausted before finding a feasible assignment");
                }
                IlpOutcome::Infeasible
            }
        }
    }
}

struct Search<'m> {
    model: &'m IlpModel,
    order: Vec<usize>,
    edges_of: Vec<Vec<usize>>,
    // Block shared by the assigned pins of each hyperedge.
    edge_block: Vec<Option<usize>>,
    edge_split: Vec<bool>,
    open_weight: f32,
    balance: Matrix<f32>,
    // Weight still unassigned after the first `depth` vertices of `order`.
    remaining: Matrix<f32>,
    assignment: Vec<usize>,
    symmetric: bool,
    best: Option<(f32, Vec<usize>)>,
    nodes: usize,
    node_limit: usize,
    exhausted: bool,
}

impl<'m> Search<'m> {
    fn new(model: &'m IlpModel, node_limit: usize) -> Self {
        let n = model.num_vertices;
        let mut edges_of = vec![vec![]; n];
        for (e, pins) in model.hyperedges.iter().enumerate() {
            for &v in pins {
                edges_of[v].push(e);
            }
        }
        // Fixed vertices first, then by the weight of the hyperedges they
        // touch, heaviest first.
        let incident = |v: usize| -> f32 {
            edges_of[v]
                .iter()
                .map(|&e| model.hyperedge_weights[e].max(0.0))
                .sum()
        };
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            model.fixed[b]
                .is_some()
                .cmp(&model.fixed[a].is_some())
                .then(incident(b).total_cmp(&incident(a)))
                .then(a.cmp(&b))
        });

        let dims = model.vertex_weights.first().map_or(0, Vec::len);
        let mut remaining = vec![vec![0.0; dims]; n + 1];
        for depth in (0..n).rev() {
            remaining[depth] = weights::sum(&remaining[depth + 1], &model.vertex_weights[order[depth]]);
        }
        let symmetric = model.fixed.iter().all(Option::is_none)
            && model.upper.windows(2).all(|w| w[0] == w[1])
            && model.lower.windows(2).all(|w| w[0] == w[1]);
        let open_weight = model.hyperedge_weights.iter().map(|w| w.max(0.0)).sum();

        Self {
            model,
            order,
            edges_of,
            edge_block: vec![None; model.hyperedges.len()],
            edge_split: vec![false; model.hyperedges.len()],
            open_weight,
            balance: vec![vec![0.0; dims]; model.num_parts],
            remaining,
            assignment: vec![0; n],
            symmetric,
            best: None,
            nodes: 0,
            node_limit,
            exhausted: false,
        }
    }

    fn best_value(&self) -> Option<f32> {
        self.best.as_ref().map(|(value, _)| *value)
    }

    /// Whether the still unassigned weight can lift every block to its
    /// lower bound.
    fn lower_reachable(&self, depth: usize) -> bool {
        let remaining = &self.remaining[depth];
        (0..remaining.len()).all(|d| {
            let deficit: f32 = (0..self.model.num_parts)
                .map(|b| (self.model.lower[b][d] - self.balance[b][d]).max(0.0))
                .sum();
            deficit <= remaining[d] + 1e-4
        })
    }

    fn candidates(&self, v: usize, used: usize) -> Vec<usize> {
        if let Some(f) = self.model.fixed[v] {
            return vec![f];
        }
        let limit = if self.symmetric {
            (used + 1).min(self.model.num_parts)
        } else {
            self.model.num_parts
        };
        let mut blocks: Vec<usize> = (0..limit).collect();
        if let Some(h) = self.model.hint.as_ref().map(|h| h[v]) {
            if let Some(pos) = blocks.iter().position(|&b| b == h) {
                blocks.remove(pos);
                blocks.insert(0, h);
            }
        }
        blocks
    }

    fn assign(&mut self, v: usize, block: usize) -> (Vec<usize>, Vec<usize>) {
        self.assignment[v] = block;
        weights::add_assign(&mut self.balance[block], &self.model.vertex_weights[v]);
        let mut opened = vec![];
        let mut split = vec![];
        for &e in &self.edges_of[v] {
            if self.edge_split[e] {
                continue;
            }
            match self.edge_block[e] {
                None => {
                    self.edge_block[e] = Some(block);
                    opened.push(e);
                }
                Some(b) if b != block => {
                    self.edge_split[e] = true;
                    self.open_weight -= self.model.hyperedge_weights[e].max(0.0);
                    split.push(e);
                }
                Some(_) => {}
            }
        }
        (opened, split)
    }

    fn unassign(&mut self, v: usize, block: usize, opened: &[usize], split: &[usize]) {
        weights::sub_assign(&mut self.balance[block], &self.model.vertex_weights[v]);
        for &e in split {
            self.edge_split[e] = false;
            self.open_weight += self.model.hyperedge_weights[e].max(0.0);
        }
        for &e in opened {
            self.edge_block[e] = None;
        }
    }

    fn descend(&mut self, depth: usize) {
        self.descend_with(depth, 0);
    }

    fn descend_with(&mut self, depth: usize, used: usize) {
        if self.nodes >= self.node_limit {
            self.exhausted = true;
            return;
        }
        self.nodes += 1;

        let n = self.model.num_vertices;
        if depth == n {
            let feasible =
                (0..self.model.num_parts).all(|b| weights::ge(&self.balance[b], &self.model.lower[b]));
            if feasible && self.best_value().map_or(true, |best| self.open_weight > best) {
                self.best = Some((self.open_weight, self.assignment.clone()));
            }
            return;
        }

        let v = self.order[depth];
        for block in self.candidates(v, used) {
            if !weights::fits_with(&self.balance[block], &self.model.vertex_weights[v], &self.model.upper[block]) {
                continue;
            }
            let (opened, split) = self.assign(v, block);
            let promising = self.best_value().map_or(true, |best| self.open_weight > best);
            if promising && self.lower_reachable(depth + 1) {
                self.descend_with(depth + 1, used.max(block + 1));
            }
            self.unassign(v, block, &opened, &split);
            if self.exhausted {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::config::CostFactors;
    use crate::evaluator::Evaluator;

    fn unit(n: usize) -> Matrix<f32> {
        vec![vec![1.0]; n]
    }

    fn model_of(hg: &Hypergraph, num_parts: usize, ub: f32, hint: Option<Vec<usize>>) -> IlpModel {
        let ev = Evaluator::new(num_parts, CostFactors::default());
        let ctx = ev.context(hg);
        let bounds = hg.balance_bounds(num_parts, ub, &vec![1.0 / num_parts as f32; num_parts]);
        IlpModel::from_hypergraph(hg, &ctx, &bounds, 1000, hint)
    }

    fn brute_force(model: &IlpModel) -> Option<f32> {
        let n = model.num_vertices;
        let k = model.num_parts;
        let mut best: Option<f32> = None;
        for code in 0..k.pow(n as u32) {
            let assignment: Vec<usize> = (0..n).map(|v| code / k.pow(v as u32) % k).collect();
            if model.is_feasible(&assignment) {
                let value = model.objective_value(&assignment);
                best = Some(best.map_or(value, |b: f32| b.max(value)));
            }
        }
        best
    }

    #[test]
    fn model_rows() {
        let h = Hypergraph::new(unit(3), vec![vec![0, 1], vec![1, 2], vec![0]], unit(3))
            .unwrap()
            .with_fixed(vec![-1, 1, -1]);
        let model = model_of(&h, 2, 20.0, Some(vec![0, 1, 1]));
        // The single-pin hyperedge is left out.
        assert_eq!(model.hyperedges, vec![vec![0, 1], vec![1, 2]]);
        // 3 assignment rows, 1 fixed row, 2 balance rows, 2 * 2 * 2 linking rows.
        assert_eq!(model.constraints().len(), 3 + 1 + 2 + 8);
        assert_eq!(model.objective().len(), 4);
        let hints = model.hints();
        assert!(hints.contains(&(Var::X { vertex: 1, block: 1 }, true)));
        assert!(hints.contains(&(Var::X { vertex: 0, block: 1 }, false)));
        assert!(model.is_feasible(&[0, 1, 1]));
        assert!(!model.is_feasible(&[0, 0, 1]));
        assert_eq!(model.objective_value(&[0, 1, 1]), 1.0);
    }

    #[test]
    fn solves_two_pairs() {
        let h = Hypergraph::new(unit(4), vec![vec![0, 1], vec![2, 3], vec![0, 2]], unit(3)).unwrap();
        let model = model_of(&h, 2, 1.0, None);
        let IlpOutcome::Solved { assignment, optimal } = BranchAndBound::default().solve(&model) else {
            panic!("expected a solution");
        };
        assert!(optimal);
        assert_eq!(assignment[0], assignment[1]);
        assert_eq!(assignment[2], assignment[3]);
        assert_ne!(assignment[0], assignment[2]);
    }

    #[test]
    fn detects_infeasibility() {
        let h = Hypergraph::new(vec![vec![5.0], vec![1.0], vec![1.0]], vec![vec![0, 1]], unit(1)).unwrap();
        let model = model_of(&h, 2, 1.0, None);
        assert_eq!(BranchAndBound::default().solve(&model), IlpOutcome::Infeasible);
    }

    #[test]
    fn budget_keeps_the_hint() {
        let h = Hypergraph::new(unit(6), vec![vec![0, 1, 2], vec![3, 4, 5], vec![2, 3]], unit(3)).unwrap();
        let hint = vec![0, 1, 0, 1, 0, 1];
        let model = model_of(&h, 2, 1.0, Some(hint.clone()));
        let IlpOutcome::Solved { assignment, optimal } = BranchAndBound::new(1).solve(&model) else {
            panic!("expected the hint back");
        };
        assert!(!optimal);
        assert_eq!(assignment, hint);
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = SmallRng::seed_from_u64(13);
        for _ in 0..20 {
            let n = rng.gen_range(4..9);
            let k = rng.gen_range(2..4);
            let nets: Vec<Vec<usize>> = (0..rng.gen_range(3..12))
                .map(|_| (0..rng.gen_range(2..4)).map(|_| rng.gen_range(0..n)).collect())
                .collect();
            let m = nets.len();
            let vw: Matrix<f32> = (0..n).map(|_| vec![rng.gen_range(1..4) as f32]).collect();
            let ew: Matrix<f32> = (0..m).map(|_| vec![rng.gen_range(1..5) as f32]).collect();
            let h = Hypergraph::new(vw, nets, ew).unwrap();
            let model = model_of(&h, k, 15.0, None);
            match (BranchAndBound::default().solve(&model), brute_force(&model)) {
                (IlpOutcome::Solved { assignment, optimal }, Some(best)) => {
                    assert!(optimal);
                    assert!(model.is_feasible(&assignment));
                    assert_eq!(model.objective_value(&assignment), best);
                }
                (IlpOutcome::Infeasible, None) => {}
                (outcome, best) => panic!("solver {outcome:?} disagrees with brute force {best:?}"),
            }
        }
    }
}
