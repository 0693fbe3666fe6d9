use bitvec::prelude::*;
use log::warn;

use crate::error::{PartitionError, Result};
use crate::weights;

pub type Matrix<T> = Vec<Vec<T>>;

/// Builds a compressed adjacency (pointer + index arrays) out of nested lists.
fn compress(lists: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>) {
    let mut ptr = Vec::with_capacity(lists.len() + 1);
    let mut ind = Vec::with_capacity(lists.iter().map(Vec::len).sum());
    ptr.push(0);
    for list in lists {
        ind.extend_from_slice(list);
        ptr.push(ind.len());
    }
    (ptr, ind)
}

/// Mirrors a compressed adjacency: row `r` listing column `c` becomes row `c`
/// listing `r`. Rows are visited in order, so the mirror lists are sorted.
fn transpose(ptr: &[usize], ind: &[usize], num_cols: usize) -> (Vec<usize>, Vec<usize>) {
    let mut counts = vec![0usize; num_cols + 1];
    for &c in ind {
        counts[c + 1] += 1;
    }
    for i in 0..num_cols {
        counts[i + 1] += counts[i];
    }
    let t_ptr = counts.clone();
    let mut t_ind = vec![0; ind.len()];
    for r in 0..ptr.len().saturating_sub(1) {
        for &c in &ind[ptr[r]..ptr[r + 1]] {
            t_ind[counts[c]] = r;
            counts[c] += 1;
        }
    }
    (t_ptr, t_ind)
}

/// Timing overlay: ordered paths through the hypergraph and their slack.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingPaths {
    // path -> vertices, in signal order
    pub(crate) vptr_p: Vec<usize>,
    pub(crate) vind_p: Vec<usize>,
    // path -> hyperedges
    pub(crate) eptr_p: Vec<usize>,
    pub(crate) eind_p: Vec<usize>,
    // vertex -> paths and hyperedge -> paths
    pub(crate) pptr_v: Vec<usize>,
    pub(crate) pind_v: Vec<usize>,
    pub(crate) pptr_e: Vec<usize>,
    pub(crate) pind_e: Vec<usize>,
    pub(crate) path_slack: Vec<f32>,
    pub(crate) hyperedge_slack: Vec<f32>,
}

impl TimingPaths {
    pub(crate) fn build(
        num_vertices: usize,
        num_hyperedges: usize,
        paths: &[Vec<usize>],
        path_edges: &[Vec<usize>],
        path_slack: Vec<f32>,
        hyperedge_slack: Vec<f32>,
    ) -> Self {
        let (vptr_p, vind_p) = compress(paths);
        let (eptr_p, eind_p) = compress(path_edges);
        // A path may visit a vertex more than once; list it once per vertex.
        let unique: Vec<Vec<usize>> = paths
            .iter()
            .map(|p| {
                let mut p = p.clone();
                p.sort_unstable();
                p.dedup();
                p
            })
            .collect();
        let (uptr, uind) = compress(&unique);
        let (pptr_v, pind_v) = transpose(&uptr, &uind, num_vertices);
        let unique: Vec<Vec<usize>> = path_edges
            .iter()
            .map(|p| {
                let mut p = p.clone();
                p.sort_unstable();
                p.dedup();
                p
            })
            .collect();
        let (uptr, uind) = compress(&unique);
        let (pptr_e, pind_e) = transpose(&uptr, &uind, num_hyperedges);
        Self {
            vptr_p,
            vind_p,
            eptr_p,
            eind_p,
            pptr_v,
            pind_v,
            pptr_e,
            pind_e,
            path_slack,
            hyperedge_slack,
        }
    }

    pub fn num_paths(&self) -> usize {
        self.vptr_p.len() - 1
    }
}

/// Per-block bounds on summed vertex weight.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceBounds {
    pub upper: Matrix<f32>,
    pub lower: Matrix<f32>,
}

impl BalanceBounds {
    pub fn num_parts(&self) -> usize {
        self.upper.len()
    }

    /// Whether every block of `balance` sits under its upper bound.
    pub fn satisfies_upper(&self, balance: &Matrix<f32>) -> bool {
        balance.iter().zip(&self.upper).all(|(b, u)| weights::le(b, u))
    }

    pub fn satisfies(&self, balance: &Matrix<f32>) -> bool {
        self.satisfies_upper(balance)
            && balance.iter().zip(&self.lower).all(|(b, l)| weights::ge(b, l))
    }

    /// Upper bounds scaled by `1 + slack`, lower bounds by `1 - slack`.
    pub fn relaxed(&self, slack: f32) -> Self {
        let scale = |m: &Matrix<f32>, f: f32| -> Matrix<f32> {
            m.iter().map(|row| row.iter().map(|x| x * f).collect()).collect()
        };
        Self {
            upper: scale(&self.upper, 1.0 + slack),
            lower: scale(&self.lower, (1.0 - slack).max(0.0)),
        }
    }
}

/// A hypergraph stored as compressed hyperedge->vertex and vertex->hyperedge
/// arrays, together with the optional partitioning attributes. Immutable once
/// built; the coarsener produces new instances rather than editing old ones.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypergraph {
    pub(crate) vertex_dimensions: usize,
    pub(crate) hyperedge_dimensions: usize,
    pub(crate) vertex_weights: Matrix<f32>,
    pub(crate) hyperedge_weights: Matrix<f32>,

    pub(crate) eptr: Vec<usize>,
    pub(crate) eind: Vec<usize>,
    pub(crate) vptr: Vec<usize>,
    pub(crate) vind: Vec<usize>,

    pub(crate) fixed_attr: Option<Vec<Option<usize>>>,
    pub(crate) community_attr: Option<Vec<usize>>,
    pub(crate) placement_attr: Option<Matrix<f32>>,
    pub(crate) timing: Option<TimingPaths>,

    // Finer-level vertices represented by each vertex of this level.
    pub(crate) vertex_c_attr: Vec<Vec<usize>>,
}

impl Hypergraph {
    /// Builds a hypergraph, checking every id and weight dimension. Repeated
    /// vertices inside one hyperedge are kept once.
    pub fn new(
        vertex_weights: Matrix<f32>,
        hyperedges: Vec<Vec<usize>>,
        hyperedge_weights: Matrix<f32>,
    ) -> Result<Self> {
        let num_vertices = vertex_weights.len();
        if num_vertices == 0 {
            return Err(PartitionError::EmptyHypergraph);
        }
        let vertex_dimensions = vertex_weights[0].len();
        if let Some((v, w)) = vertex_weights
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != vertex_dimensions)
        {
            return Err(PartitionError::DimensionMismatch {
                what: format!("weight vector of vertex {v}"),
                expected: vertex_dimensions,
                found: w.len(),
            });
        }
        if hyperedge_weights.len() != hyperedges.len() {
            return Err(PartitionError::DimensionMismatch {
                what: "hyperedge weight list".into(),
                expected: hyperedges.len(),
                found: hyperedge_weights.len(),
            });
        }
        let hyperedge_dimensions = hyperedge_weights.first().map_or(1, Vec::len);
        if let Some((e, w)) = hyperedge_weights
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != hyperedge_dimensions)
        {
            return Err(PartitionError::DimensionMismatch {
                what: format!("weight vector of hyperedge {e}"),
                expected: hyperedge_dimensions,
                found: w.len(),
            });
        }

        let mut seen = bitvec![usize, Lsb0; 0; num_vertices];
        let mut cleaned = Vec::with_capacity(hyperedges.len());
        for (e, pins) in hyperedges.into_iter().enumerate() {
            let mut kept = Vec::with_capacity(pins.len());
            for v in pins {
                if v >= num_vertices {
                    return Err(PartitionError::VertexOutOfRange {
                        hyperedge: e,
                        vertex: v,
                        num_vertices,
                    });
                }
                if !seen[v] {
                    seen.set(v, true);
                    kept.push(v);
                }
            }
            for &v in &kept {
                seen.set(v, false);
            }
            cleaned.push(kept);
        }

        Ok(Self::build(vertex_weights, &cleaned, hyperedge_weights))
    }

    /// Assembles a hypergraph from already validated parts.
    pub(crate) fn build(
        vertex_weights: Matrix<f32>,
        hyperedges: &[Vec<usize>],
        hyperedge_weights: Matrix<f32>,
    ) -> Self {
        let num_vertices = vertex_weights.len();
        let vertex_dimensions = vertex_weights.first().map_or(1, Vec::len);
        let hyperedge_dimensions = hyperedge_weights.first().map_or(1, Vec::len);
        let (eptr, eind) = compress(hyperedges);
        let (vptr, vind) = transpose(&eptr, &eind, num_vertices);
        Self {
            vertex_dimensions,
            hyperedge_dimensions,
            vertex_weights,
            hyperedge_weights,
            eptr,
            eind,
            vptr,
            vind,
            fixed_attr: None,
            community_attr: None,
            placement_attr: None,
            timing: None,
            vertex_c_attr: (0..num_vertices).map(|v| vec![v]).collect(),
        }
    }

    /// Attaches fixed blocks (`-1` = free). A list of the wrong length is
    /// discarded.
    pub fn with_fixed(mut self, fixed: Vec<i32>) -> Self {
        if fixed.len() != self.num_vertices() {
            warn!(
                "discarding fixed-vertex attribute: {} entries for {} vertices",
                fixed.len(),
                self.num_vertices()
            );
            return self;
        }
        self.fixed_attr = Some(
            fixed
                .into_iter()
                .map(|b| usize::try_from(b).ok())
                .collect(),
        );
        self
    }

    /// Attaches community ids. A list of the wrong length is discarded.
    pub fn with_community(mut self, community: Vec<usize>) -> Self {
        if community.len() != self.num_vertices() {
            warn!(
                "discarding community attribute: {} entries for {} vertices",
                community.len(),
                self.num_vertices()
            );
            return self;
        }
        self.community_attr = Some(community);
        self
    }

    /// Attaches placement coordinates. A list of the wrong length, or with
    /// vectors of differing dimension, is discarded.
    pub fn with_placement(mut self, placement: Matrix<f32>) -> Self {
        if placement.len() != self.num_vertices() {
            warn!(
                "discarding placement attribute: {} entries for {} vertices",
                placement.len(),
                self.num_vertices()
            );
            return self;
        }
        let dims = placement.first().map_or(0, Vec::len);
        if placement.iter().any(|p| p.len() != dims) {
            warn!("discarding placement attribute: inconsistent dimensions");
            return self;
        }
        self.placement_attr = Some(placement);
        self
    }

    /// Installs a timing overlay. `path_edges` may be empty, in which case
    /// each path's hyperedges are derived from consecutive vertex pairs.
    pub fn with_timing(
        mut self,
        paths: Vec<Vec<usize>>,
        path_edges: Vec<Vec<usize>>,
        path_slack: Vec<f32>,
        hyperedge_slack: Vec<f32>,
    ) -> Result<Self> {
        let num_vertices = self.num_vertices();
        let num_hyperedges = self.num_hyperedges();
        for (p, path) in paths.iter().enumerate() {
            if let Some(&v) = path.iter().find(|&&v| v >= num_vertices) {
                return Err(PartitionError::PathVertexOutOfRange {
                    path: p,
                    vertex: v,
                    num_vertices,
                });
            }
        }
        let path_edges = if path_edges.len() == paths.len() {
            for (p, edges) in path_edges.iter().enumerate() {
                if let Some(&e) = edges.iter().find(|&&e| e >= num_hyperedges) {
                    return Err(PartitionError::HyperedgeOutOfRange {
                        path: p,
                        hyperedge: e,
                        num_hyperedges,
                    });
                }
            }
            path_edges
        } else {
            if !path_edges.is_empty() {
                warn!(
                    "discarding path hyperedges: {} lists for {} paths",
                    path_edges.len(),
                    paths.len()
                );
            }
            paths.iter().map(|p| self.derive_path_edges(p)).collect()
        };
        let path_slack = if path_slack.len() == paths.len() {
            path_slack
        } else {
            warn!(
                "discarding path slack: {} entries for {} paths",
                path_slack.len(),
                paths.len()
            );
            vec![0.0; paths.len()]
        };
        let hyperedge_slack = if hyperedge_slack.len() == num_hyperedges {
            hyperedge_slack
        } else {
            warn!(
                "discarding hyperedge slack: {} entries for {} hyperedges",
                hyperedge_slack.len(),
                num_hyperedges
            );
            vec![1.0; num_hyperedges]
        };
        self.timing = Some(TimingPaths::build(
            num_vertices,
            num_hyperedges,
            &paths,
            &path_edges,
            path_slack,
            hyperedge_slack,
        ));
        Ok(self)
    }

    /// The hyperedges joining consecutive vertices of a path.
    fn derive_path_edges(&self, path: &[usize]) -> Vec<usize> {
        let mut edges = vec![];
        for pair in path.windows(2) {
            let found = self
                .edges(pair[0])
                .iter()
                .find(|&&e| self.vertices(e).contains(&pair[1]));
            if let Some(&e) = found {
                if edges.last() != Some(&e) {
                    edges.push(e);
                }
            }
        }
        edges
    }

    pub fn num_vertices(&self) -> usize {
        self.vptr.len() - 1
    }

    pub fn num_hyperedges(&self) -> usize {
        self.eptr.len() - 1
    }

    pub fn vertex_dimensions(&self) -> usize {
        self.vertex_dimensions
    }

    pub fn hyperedge_dimensions(&self) -> usize {
        self.hyperedge_dimensions
    }

    /// Vertices of hyperedge `e`.
    pub fn vertices(&self, e: usize) -> &[usize] {
        &self.eind[self.eptr[e]..self.eptr[e + 1]]
    }

    /// Hyperedges incident to vertex `v`.
    pub fn edges(&self, v: usize) -> &[usize] {
        &self.vind[self.vptr[v]..self.vptr[v + 1]]
    }

    pub fn vertex_weights(&self, v: usize) -> &[f32] {
        &self.vertex_weights[v]
    }

    pub fn hyperedge_weights(&self, e: usize) -> &[f32] {
        &self.hyperedge_weights[e]
    }

    pub fn total_vertex_weights(&self) -> Vec<f32> {
        let mut total = vec![0.0; self.vertex_dimensions];
        for w in &self.vertex_weights {
            weights::add_assign(&mut total, w);
        }
        total
    }

    pub fn has_fixed_vertices(&self) -> bool {
        self.fixed_attr.is_some()
    }

    pub fn fixed_block(&self, v: usize) -> Option<usize> {
        self.fixed_attr.as_ref().and_then(|f| f[v])
    }

    pub fn has_community(&self) -> bool {
        self.community_attr.is_some()
    }

    pub fn community(&self, v: usize) -> Option<usize> {
        self.community_attr.as_ref().map(|c| c[v])
    }

    pub fn has_placement(&self) -> bool {
        self.placement_attr.is_some()
    }

    pub fn placement(&self, v: usize) -> Option<&[f32]> {
        self.placement_attr.as_ref().map(|p| p[v].as_slice())
    }

    pub fn has_timing(&self) -> bool {
        self.timing.is_some()
    }

    pub fn timing(&self) -> Option<&TimingPaths> {
        self.timing.as_ref()
    }

    pub fn num_timing_paths(&self) -> usize {
        self.timing.as_ref().map_or(0, TimingPaths::num_paths)
    }

    /// Vertices of path `p` in signal order. Empty without an overlay.
    pub fn path_vertices(&self, p: usize) -> &[usize] {
        match &self.timing {
            Some(t) => &t.vind_p[t.vptr_p[p]..t.vptr_p[p + 1]],
            None => &[],
        }
    }

    pub fn path_edges(&self, p: usize) -> &[usize] {
        match &self.timing {
            Some(t) => &t.eind_p[t.eptr_p[p]..t.eptr_p[p + 1]],
            None => &[],
        }
    }

    /// Paths running through vertex `v`.
    pub fn paths_through(&self, v: usize) -> &[usize] {
        match &self.timing {
            Some(t) => &t.pind_v[t.pptr_v[v]..t.pptr_v[v + 1]],
            None => &[],
        }
    }

    /// Paths running through hyperedge `e`.
    pub fn paths_through_edge(&self, e: usize) -> &[usize] {
        match &self.timing {
            Some(t) => &t.pind_e[t.pptr_e[e]..t.pptr_e[e + 1]],
            None => &[],
        }
    }

    pub fn path_slack(&self, p: usize) -> f32 {
        self.timing.as_ref().map_or(0.0, |t| t.path_slack[p])
    }

    pub fn hyperedge_slack(&self, e: usize) -> f32 {
        self.timing.as_ref().map_or(1.0, |t| t.hyperedge_slack[e])
    }

    /// Finer-level vertices folded into `v`; just `[v]` for an input graph.
    pub fn cluster_members(&self, v: usize) -> &[usize] {
        &self.vertex_c_attr[v]
    }

    /// Distinct vertices sharing at least one hyperedge with `v`.
    pub fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut nbrs: Vec<usize> = self
            .edges(v)
            .iter()
            .flat_map(|&e| self.vertices(e).iter().copied())
            .filter(|&u| u != v)
            .collect();
        nbrs.sort_unstable();
        nbrs.dedup();
        nbrs
    }

    pub fn upper_vertex_balance(
        &self,
        num_parts: usize,
        ub_factor: f32,
        base_balance: &[f32],
    ) -> Matrix<f32> {
        let total = self.total_vertex_weights();
        (0..num_parts)
            .map(|b| {
                let share = base_balance.get(b).copied().unwrap_or(1.0 / num_parts as f32)
                    + ub_factor * 0.01;
                total.iter().map(|t| t * share).collect()
            })
            .collect()
    }

    pub fn lower_vertex_balance(
        &self,
        num_parts: usize,
        ub_factor: f32,
        base_balance: &[f32],
    ) -> Matrix<f32> {
        let total = self.total_vertex_weights();
        (0..num_parts)
            .map(|b| {
                let share = (base_balance.get(b).copied().unwrap_or(1.0 / num_parts as f32)
                    - ub_factor * 0.01)
                    .max(0.0);
                total.iter().map(|t| t * share).collect()
            })
            .collect()
    }

    pub fn balance_bounds(
        &self,
        num_parts: usize,
        ub_factor: f32,
        base_balance: &[f32],
    ) -> BalanceBounds {
        BalanceBounds {
            upper: self.upper_vertex_balance(num_parts, ub_factor, base_balance),
            lower: self.lower_vertex_balance(num_parts, ub_factor, base_balance),
        }
    }

    /// Checks that both compressed directions describe the same incidence.
    pub fn is_consistent(&self) -> bool {
        let forward = (0..self.num_hyperedges())
            .all(|e| self.vertices(e).iter().all(|&v| self.edges(v).contains(&e)));
        let backward = (0..self.num_vertices())
            .all(|v| self.edges(v).iter().all(|&e| self.vertices(e).contains(&v)));
        forward && backward && self.eind.len() == self.vind.len()
    }
}
