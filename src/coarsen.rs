use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use rand::prelude::*;
use rand::rngs::SmallRng;

use crate::config::{CoarsenConfig, VertexOrder};
use crate::evaluator::{EvalContext, Evaluator};
use crate::hypergraph::{Hypergraph, Matrix, TimingPaths};
use crate::weights;

/// One coarse level together with its evaluation context.
#[derive(Clone, Debug)]
pub struct Level {
    pub hgraph: Hypergraph,
    pub ctx: EvalContext,
}

/// First-choice clustering, applied level after level.
pub struct Coarsener {
    evaluator: Arc<Evaluator>,
    config: CoarsenConfig,
}

impl Coarsener {
    pub fn new(evaluator: Arc<Evaluator>, config: CoarsenConfig) -> Self {
        Self { evaluator, config }
    }

    /// Builds the coarse levels of `hg`, finest first. `hg` itself is not
    /// part of the result.
    pub fn coarsen(&self, hg: &Hypergraph, ctx: &EvalContext, rng: &mut SmallRng) -> Vec<Level> {
        let num_parts = self.evaluator.num_parts();
        let per_part = (self.config.min_vertices_each_part * num_parts).max(1) as f32;
        let cap: Vec<f32> = hg.total_vertex_weights().iter().map(|t| t / per_part).collect();
        let thr_vertices = self
            .config
            .thr_coarsen_vertices
            .max(self.config.min_vertices_each_part * num_parts);

        let mut levels: Vec<Level> = vec![];
        for iter in 0..self.config.max_coarsen_iters {
            let (cur, cur_ctx) = match levels.last() {
                Some(level) => (&level.hgraph, &level.ctx),
                None => (hg, ctx),
            };
            if cur.num_vertices() <= thr_vertices
                || cur.num_hyperedges() <= self.config.thr_coarsen_hyperedges
            {
                break;
            }
            let (cluster_of, num_clusters) = self.first_choice(cur, cur_ctx, &cap, rng);
            if num_clusters == cur.num_vertices() {
                break;
            }
            let next = contract(
                &self.evaluator,
                cur,
                cur_ctx,
                &cluster_of,
                num_clusters,
                self.config.size_skip,
            );
            let shrink = cur.num_vertices() - next.num_vertices();
            let stalled = shrink as f32 <= cur.num_vertices() as f32 * self.config.adj_diff_ratio;
            info!(
                "coarsening level {}: {} vertices, {} hyperedges",
                iter + 1,
                next.num_vertices(),
                next.num_hyperedges()
            );
            let next_ctx = self.evaluator.context(&next);
            levels.push(Level {
                hgraph: next,
                ctx: next_ctx,
            });
            if stalled {
                break;
            }
        }
        levels
    }

    /// Clusters one level. Returns the cluster of every vertex and the
    /// number of clusters.
    pub(crate) fn first_choice(
        &self,
        hg: &Hypergraph,
        ctx: &EvalContext,
        cap: &[f32],
        rng: &mut SmallRng,
    ) -> (Vec<usize>, usize) {
        let ev = &*self.evaluator;
        let n = hg.num_vertices();
        let mut cluster_of: Vec<Option<usize>> = vec![None; n];
        let mut cluster_weight: Matrix<f32> = vec![];
        let mut clustered = 0;

        let mut unvisited = vec![];
        for v in 0..n {
            if hg.fixed_block(v).is_some() {
                cluster_of[v] = Some(cluster_weight.len());
                cluster_weight.push(hg.vertex_weights(v).to_vec());
                clustered += 1;
            } else {
                unvisited.push(v);
            }
        }
        self.order_vertices(hg, &mut unvisited, rng);
        let algebraic = self.algebraic_weights(hg, rng);
        let target = unvisited.len() as f32 / self.config.coarsening_ratio;

        let mut score = vec![0.0f32; n];
        let mut candidate = vec![false; n];
        let mut touched: Vec<usize> = vec![];
        for &v in &unvisited {
            if cluster_of[v].is_some() {
                continue;
            }
            let remaining = cluster_weight.len() + (n - clustered);
            if remaining as f32 <= target {
                break;
            }

            let vw = hg.vertex_weights(v);
            for &e in hg.edges(v) {
                let size = hg.vertices(e).len();
                if size <= 1 || size > self.config.size_skip {
                    continue;
                }
                let s = ev.norm_edge_score(hg, ctx, e) * algebraic[e];
                for &u in hg.vertices(e) {
                    if u == v {
                        continue;
                    }
                    if candidate[u] {
                        score[u] += s;
                        continue;
                    }
                    if hg.fixed_block(u).is_some() || hg.community(u) != hg.community(v) {
                        continue;
                    }
                    let uw = match cluster_of[u] {
                        Some(c) => cluster_weight[c].as_slice(),
                        None => hg.vertex_weights(u),
                    };
                    if !weights::fits_with(vw, uw, cap) {
                        continue;
                    }
                    candidate[u] = true;
                    score[u] = s;
                    touched.push(u);
                }
            }
            if touched.is_empty() {
                cluster_of[v] = Some(cluster_weight.len());
                cluster_weight.push(vw.to_vec());
                clustered += 1;
                continue;
            }

            for &p in hg.paths_through(v) {
                let bonus = ev.path_timing_score(ctx, p);
                let path = hg.path_vertices(p);
                for (i, _) in path.iter().enumerate().filter(|&(_, &x)| x == v) {
                    for hop in 1..=self.config.timing_hops {
                        let around = [i.checked_sub(hop), Some(i + hop)];
                        for &u in around.iter().flatten().filter_map(|&j| path.get(j)) {
                            if candidate[u] {
                                score[u] += bonus * hop as f32;
                            }
                        }
                    }
                }
            }
            if let Some(pv) = hg.placement(v) {
                for &u in &touched {
                    if let Some(pu) = hg.placement(u) {
                        score[u] += ev.placement_score(pv, pu);
                    }
                }
            }

            let mut best = touched[0];
            for &u in &touched[1..] {
                if score[u] > score[best]
                    || (score[u] == score[best] && cluster_of[best].is_some() && cluster_of[u].is_none())
                {
                    best = u;
                }
            }
            match cluster_of[best] {
                Some(c) => {
                    cluster_of[v] = Some(c);
                    weights::add_assign(&mut cluster_weight[c], vw);
                    clustered += 1;
                }
                None => {
                    let c = cluster_weight.len();
                    cluster_of[v] = Some(c);
                    cluster_of[best] = Some(c);
                    cluster_weight.push(weights::sum(vw, hg.vertex_weights(best)));
                    clustered += 2;
                }
            }
            for &u in &touched {
                candidate[u] = false;
            }
            touched.clear();
        }

        let mut num_clusters = cluster_weight.len();
        let cluster_of: Vec<usize> = cluster_of
            .into_iter()
            .map(|c| {
                c.unwrap_or_else(|| {
                    num_clusters += 1;
                    num_clusters - 1
                })
            })
            .collect();
        debug!("first choice: {n} vertices into {num_clusters} clusters");
        (cluster_of, num_clusters)
    }

    fn order_vertices(&self, hg: &Hypergraph, vertices: &mut Vec<usize>, rng: &mut SmallRng) {
        match self.config.vertex_order {
            VertexOrder::Random => vertices.shuffle(rng),
            VertexOrder::Degree => {
                vertices.sort_by_key(|&v| std::cmp::Reverse(hg.neighbors(v).len()));
            }
            VertexOrder::Size => {
                let ev = &self.evaluator;
                vertices.sort_by(|&a, &b| {
                    ev.vertex_weight_norm(hg.vertex_weights(a))
                        .total_cmp(&ev.vertex_weight_norm(hg.vertex_weights(b)))
                });
            }
            VertexOrder::Default => {}
            VertexOrder::Timing => {
                let mut free = vec![false; hg.num_vertices()];
                for &v in vertices.iter() {
                    free[v] = true;
                }
                let mut ordered = vec![];
                for p in 0..hg.num_timing_paths() {
                    for &v in hg.path_vertices(p) {
                        if free[v] {
                            free[v] = false;
                            ordered.push(v);
                        }
                    }
                }
                let mut rest: Vec<usize> = vertices.iter().copied().filter(|&v| free[v]).collect();
                rest.shuffle(rng);
                ordered.extend(rest);
                *vertices = ordered;
            }
        }
    }

    /// Smooths random vertex values over the hyperedges; hyperedges whose
    /// vertices stay far apart get a low weight.
    fn algebraic_weights(&self, hg: &Hypergraph, rng: &mut SmallRng) -> Vec<f32> {
        if self.config.algebraic_sweeps == 0 {
            return vec![1.0; hg.num_hyperedges()];
        }
        let mean = |values: &[f32], items: &[usize]| -> Option<f32> {
            if items.is_empty() {
                None
            } else {
                Some(items.iter().map(|&i| values[i]).sum::<f32>() / items.len() as f32)
            }
        };
        let mut values: Vec<f32> = (0..hg.num_vertices()).map(|_| rng.gen_range(-0.5..0.5)).collect();
        for _ in 0..self.config.algebraic_sweeps {
            let edge_mean: Vec<f32> = (0..hg.num_hyperedges())
                .map(|e| mean(&values, hg.vertices(e)).unwrap_or(0.0))
                .collect();
            values = (0..hg.num_vertices())
                .map(|v| match mean(&edge_mean, hg.edges(v)) {
                    Some(m) => 0.5 * values[v] + 0.5 * m,
                    None => values[v],
                })
                .collect();
        }
        (0..hg.num_hyperedges())
            .map(|e| {
                let (lo, hi) = hg
                    .vertices(e)
                    .iter()
                    .map(|&v| values[v])
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
                if lo.is_finite() {
                    1.0 / (1.0 + hi - lo)
                } else {
                    1.0
                }
            })
            .collect()
    }
}

/// Builds the hypergraph whose vertices are the clusters of `hg`.
///
/// Hyperedges become the set of clusters they touch; those left with at most
/// one cluster, or more than `size_skip`, are dropped and identical ones are
/// merged with their weights summed. Timing paths follow their vertices with
/// consecutive repeats collapsed, and take their slack from `ctx`.
pub fn contract(
    ev: &Evaluator,
    hg: &Hypergraph,
    ctx: &EvalContext,
    cluster_of: &[usize],
    num_clusters: usize,
    size_skip: usize,
) -> Hypergraph {
    let mut members: Vec<Vec<usize>> = vec![vec![]; num_clusters];
    for (v, &c) in cluster_of.iter().enumerate() {
        members[c].push(v);
    }

    let mut vertex_weights = vec![vec![0.0; hg.vertex_dimensions()]; num_clusters];
    for (v, &c) in cluster_of.iter().enumerate() {
        weights::add_assign(&mut vertex_weights[c], hg.vertex_weights(v));
    }

    let mut hyperedges: Vec<Vec<usize>> = vec![];
    let mut hyperedge_weights: Matrix<f32> = vec![];
    let mut hyperedge_slack: Vec<f32> = vec![];
    let mut edge_map: Vec<Option<usize>> = vec![None; hg.num_hyperedges()];
    let mut by_hash: HashMap<u64, Vec<usize>> = HashMap::new();
    for e in 0..hg.num_hyperedges() {
        let mut set: Vec<usize> = hg.vertices(e).iter().map(|&v| cluster_of[v]).collect();
        set.sort_unstable();
        set.dedup();
        if set.len() <= 1 || set.len() > size_skip {
            continue;
        }
        let hash = set
            .iter()
            .fold(0u64, |h, &c| h.wrapping_add((c as u64).wrapping_mul(c as u64)));
        let slack = ctx.hyperedge_slack.get(e).copied().unwrap_or(1.0);
        let bucket = by_hash.entry(hash).or_default();
        match bucket.iter().copied().find(|&id| hyperedges[id] == set) {
            Some(id) => {
                weights::add_assign(&mut hyperedge_weights[id], hg.hyperedge_weights(e));
                hyperedge_slack[id] = hyperedge_slack[id].min(slack);
                edge_map[e] = Some(id);
            }
            None => {
                let id = hyperedges.len();
                bucket.push(id);
                hyperedges.push(set);
                hyperedge_weights.push(hg.hyperedge_weights(e).to_vec());
                hyperedge_slack.push(slack);
                edge_map[e] = Some(id);
            }
        }
    }

    let mut coarse = Hypergraph::build(vertex_weights, &hyperedges, hyperedge_weights);
    coarse.hyperedge_dimensions = hg.hyperedge_dimensions();

    if hg.has_fixed_vertices() {
        coarse.fixed_attr = Some(
            members
                .iter()
                .map(|m| m.iter().filter_map(|&v| hg.fixed_block(v)).max())
                .collect(),
        );
    }
    if hg.has_community() {
        coarse.community_attr = Some(
            members
                .iter()
                .map(|m| m.first().and_then(|&v| hg.community(v)).unwrap_or(0))
                .collect(),
        );
    }
    if hg.has_placement() {
        coarse.placement_attr = Some(
            members
                .iter()
                .map(|m| {
                    let mut acc_w: Vec<f32> = vec![];
                    let mut acc_loc: Vec<f32> = vec![];
                    for &v in m {
                        let loc = hg.placement(v).unwrap_or(&[]);
                        if acc_w.is_empty() {
                            acc_w = hg.vertex_weights(v).to_vec();
                            acc_loc = loc.to_vec();
                        } else {
                            acc_loc = ev.avg_placement_loc(&acc_w, hg.vertex_weights(v), &acc_loc, loc);
                            weights::add_assign(&mut acc_w, hg.vertex_weights(v));
                        }
                    }
                    acc_loc
                })
                .collect(),
        );
    }
    if hg.has_timing() {
        let mut paths = vec![];
        let mut path_edges = vec![];
        for p in 0..hg.num_timing_paths() {
            let mut path: Vec<usize> = vec![];
            for &v in hg.path_vertices(p) {
                if path.last() != Some(&cluster_of[v]) {
                    path.push(cluster_of[v]);
                }
            }
            let mut edges: Vec<usize> = vec![];
            for id in hg.path_edges(p).iter().filter_map(|&e| edge_map[e]) {
                if edges.last() != Some(&id) {
                    edges.push(id);
                }
            }
            paths.push(path);
            path_edges.push(edges);
        }
        let path_slack = (0..hg.num_timing_paths())
            .map(|p| ctx.path_slack.get(p).copied().unwrap_or_else(|| hg.path_slack(p)))
            .collect();
        coarse.timing = Some(TimingPaths::build(
            num_clusters,
            hyperedges.len(),
            &paths,
            &path_edges,
            path_slack,
            hyperedge_slack,
        ));
    }
    coarse.vertex_c_attr = members;
    coarse
}

/// Contracts each of the disjoint `groups` into one vertex; every vertex in
/// no group stays on its own. No hyperedge is dropped for its size.
pub fn group_vertices(ev: &Evaluator, hg: &Hypergraph, ctx: &EvalContext, groups: &[Vec<usize>]) -> Hypergraph {
    let n = hg.num_vertices();
    let mut cluster_of: Vec<Option<usize>> = vec![None; n];
    let mut num_clusters = 0;
    for group in groups {
        let mut opened = false;
        for &v in group {
            if v < n && cluster_of[v].is_none() {
                cluster_of[v] = Some(num_clusters);
                opened = true;
            }
        }
        if opened {
            num_clusters += 1;
        }
    }
    let cluster_of: Vec<usize> = cluster_of
        .into_iter()
        .map(|c| {
            c.unwrap_or_else(|| {
                num_clusters += 1;
                num_clusters - 1
            })
        })
        .collect();
    contract(ev, hg, ctx, &cluster_of, num_clusters, usize::MAX)
}

/// Copies every coarse vertex's block to the finer vertices it represents.
pub fn project(coarse: &Hypergraph, coarse_solution: &[usize], num_fine: usize) -> Vec<usize> {
    let mut fine = vec![0; num_fine];
    for (c, &block) in coarse_solution.iter().enumerate() {
        for &v in coarse.cluster_members(c) {
            fine[v] = block;
        }
    }
    fine
}

/// Merges the fixed vertices of each block and every pair of groups that
/// share a vertex. Returns the resulting disjoint groups of two or more
/// vertices, each sorted, ordered by their smallest vertex.
pub fn cluster_based_group_info(hg: &Hypergraph, group_attr: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = hg.num_vertices();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], mut v: usize) -> usize {
        while parent[v] != v {
            parent[v] = parent[parent[v]];
            v = parent[v];
        }
        v
    }
    fn union(parent: &mut [usize], a: usize, b: usize) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent[ra.max(rb)] = ra.min(rb);
        }
    }

    let mut anchor: HashMap<usize, usize> = HashMap::new();
    for v in 0..n {
        if let Some(b) = hg.fixed_block(v) {
            let first = *anchor.entry(b).or_insert(v);
            union(&mut parent, first, v);
        }
    }
    for group in group_attr {
        let mut valid = group.iter().copied().filter(|&v| {
            let ok = v < n;
            if !ok {
                warn!("ignoring out-of-range vertex {v} in group");
            }
            ok
        });
        if let Some(first) = valid.next() {
            for v in valid {
                union(&mut parent, first, v);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for v in 0..n {
        let root = find(&mut parent, v);
        groups.entry(root).or_default().push(v);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() > 1).collect();
    groups.sort_unstable_by_key(|g| g[0]);
    groups
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use rand::Rng;
    use crate::config::CostFactors;

    fn unit(n: usize) -> Matrix<f32> {
        vec![vec![1.0]; n]
    }

    fn small_config() -> CoarsenConfig {
        CoarsenConfig {
            thr_coarsen_vertices: 4,
            thr_coarsen_hyperedges: 1,
            min_vertices_each_part: 1,
            ..Default::default()
        }
    }

    fn random_hypergraph(rng: &mut SmallRng, n: usize, m: usize) -> Hypergraph {
        let nets: Vec<Vec<usize>> = (0..m)
            .map(|_| (0..rng.gen_range(2..5)).map(|_| rng.gen_range(0..n)).collect())
            .collect();
        Hypergraph::new(unit(n), nets, unit(m)).unwrap()
    }

    fn check_partition(fine: usize, coarse: &Hypergraph) {
        let mut seen = vec![0; fine];
        for c in 0..coarse.num_vertices() {
            assert!(!coarse.cluster_members(c).is_empty());
            for &v in coarse.cluster_members(c) {
                seen[v] += 1;
            }
        }
        assert!(seen.iter().all(|&s| s == 1));
    }

    #[test]
    fn contraction_merges_and_drops() {
        let h = Hypergraph::new(
            unit(4),
            vec![vec![0, 1], vec![0, 2], vec![1, 3], vec![2, 3], vec![0, 1, 2]],
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]],
        )
        .unwrap();
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        // {0,1} and {2,3}
        let coarse = contract(&ev, &h, &ctx, &[0, 0, 1, 1], 2, usize::MAX);
        assert_eq!(coarse.num_vertices(), 2);
        assert_eq!(coarse.num_hyperedges(), 1);
        assert_eq!(coarse.vertices(0), &[0, 1]);
        assert_eq!(coarse.hyperedge_weights(0), &[10.0]);
        assert_eq!(coarse.vertex_weights(1), &[2.0]);
        assert_eq!(coarse.cluster_members(0), &[0, 1]);
        assert!(coarse.is_consistent());
        // The size cap drops everything with more than one cluster.
        let capped = contract(&ev, &h, &ctx, &[0, 1, 2, 3], 4, 2);
        assert_eq!(capped.num_hyperedges(), 4);
    }

    #[test]
    fn contraction_carries_attributes() {
        let h = Hypergraph::new(unit(4), vec![vec![0, 1], vec![1, 2], vec![2, 3]], unit(3))
            .unwrap()
            .with_fixed(vec![-1, 1, -1, -1])
            .with_community(vec![5, 5, 7, 7])
            .with_placement(vec![vec![0.0], vec![2.0], vec![4.0], vec![4.0]])
            .with_timing(vec![vec![0, 1, 2, 3]], vec![], vec![0.25], vec![0.5, 0.3, 0.9])
            .unwrap();
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        let coarse = contract(&ev, &h, &ctx, &[0, 0, 1, 1], 2, usize::MAX);
        assert_eq!(coarse.fixed_block(0), Some(1));
        assert_eq!(coarse.fixed_block(1), None);
        assert_eq!(coarse.community(1), Some(7));
        assert_eq!(coarse.placement(0), Some(&[1.0][..]));
        assert_eq!(coarse.num_timing_paths(), 1);
        assert_eq!(coarse.path_vertices(0), &[0, 1]);
        assert_eq!(coarse.path_edges(0), &[0]);
        assert_eq!(coarse.path_slack(0), 0.25);
        assert_eq!(coarse.hyperedge_slack(0), 0.3);
    }

    #[test]
    fn fixed_and_community_respected() {
        let mut rng = SmallRng::seed_from_u64(2);
        let h = random_hypergraph(&mut rng, 60, 150);
        let fixed: Vec<i32> = (0..60).map(|v| if v % 10 == 0 { 1 } else { -1 }).collect();
        let community: Vec<usize> = (0..60).map(|v| v / 30).collect();
        let h = h.with_fixed(fixed).with_community(community);
        let ev = Arc::new(Evaluator::new(2, CostFactors::default()));
        let coarsener = Coarsener::new(ev.clone(), small_config());
        let levels = coarsener.coarsen(&h, &ev.context(&h), &mut rng);
        assert!(!levels.is_empty());
        let first = &levels[0].hgraph;
        for c in 0..first.num_vertices() {
            let members = first.cluster_members(c);
            if members.iter().any(|&v| v % 10 == 0) {
                assert_eq!(members.len(), 1);
                assert_eq!(first.fixed_block(c), Some(1));
            }
            assert!(members.iter().all(|&v| v / 30 == members[0] / 30));
        }
    }

    #[test]
    fn cluster_weight_is_capped() {
        let mut rng = SmallRng::seed_from_u64(4);
        let h = random_hypergraph(&mut rng, 80, 200);
        let ev = Arc::new(Evaluator::new(4, CostFactors::default()));
        let config = CoarsenConfig {
            min_vertices_each_part: 5,
            thr_coarsen_vertices: 1,
            thr_coarsen_hyperedges: 1,
            ..Default::default()
        };
        let coarsener = Coarsener::new(ev.clone(), config);
        let levels = coarsener.coarsen(&h, &ev.context(&h), &mut rng);
        let last = &levels.last().unwrap().hgraph;
        // 80 / (5 * 4)
        for c in 0..last.num_vertices() {
            assert!(last.vertex_weights(c)[0] <= 4.0);
        }
        assert!(last.num_vertices() >= 20);
    }

    #[test]
    fn timing_order_visits_paths_first() {
        let h = Hypergraph::new(unit(6), vec![vec![0, 1], vec![4, 5]], unit(2))
            .unwrap()
            .with_timing(vec![vec![5, 4]], vec![], vec![0.0], vec![])
            .unwrap();
        let ev = Arc::new(Evaluator::new(2, CostFactors::default()));
        let config = CoarsenConfig {
            vertex_order: VertexOrder::Timing,
            ..Default::default()
        };
        let coarsener = Coarsener::new(ev, config);
        let mut order: Vec<usize> = (0..6).collect();
        coarsener.order_vertices(&h, &mut order, &mut SmallRng::seed_from_u64(0));
        assert_eq!(&order[..2], &[5, 4]);
        let mut rest = order[2..].to_vec();
        rest.sort_unstable();
        assert_eq!(rest, vec![0, 1, 2, 3]);
    }

    #[test]
    fn groups_contract_and_project() {
        let h = Hypergraph::new(unit(5), vec![vec![0, 1], vec![1, 2], vec![3, 4]], unit(3)).unwrap();
        let ev = Evaluator::new(2, CostFactors::default());
        let ctx = ev.context(&h);
        let grouped = group_vertices(&ev, &h, &ctx, &[vec![0, 1, 2]]);
        assert_eq!(grouped.num_vertices(), 3);
        assert_eq!(grouped.cluster_members(0), &[0, 1, 2]);
        assert_eq!(grouped.cluster_members(2), &[4]);
        assert_eq!(project(&grouped, &[1, 0, 0], 5), vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn group_info_merges_overlaps_and_fixed() {
        let h = Hypergraph::new(unit(8), vec![], vec![])
            .unwrap()
            .with_fixed(vec![0, -1, -1, 0, -1, -1, 1, -1]);
        let groups = cluster_based_group_info(&h, &[vec![1, 2], vec![2, 4], vec![5, 7], vec![9]]);
        assert_eq!(groups, vec![vec![0, 3], vec![1, 2, 4], vec![5, 7]]);
    }

    proptest! {
        #[test]
        fn levels_partition_and_mirror(seed in any::<u64>(), n in 20usize..80) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let m = 2 * n;
            let h = random_hypergraph(&mut rng, n, m);
            let ev = Arc::new(Evaluator::new(2, CostFactors::default()));
            let coarsener = Coarsener::new(ev.clone(), small_config());
            let levels = coarsener.coarsen(&h, &ev.context(&h), &mut rng);

            let mut fine = &h;
            for level in &levels {
                prop_assert!(level.hgraph.is_consistent());
                check_partition(fine.num_vertices(), &level.hgraph);
                prop_assert!(level.hgraph.num_vertices() < fine.num_vertices());

                // Round trip: a coarse solution expands to a full, balance
                // computable solution with the same cost.
                let coarse_solution: Vec<usize> = (0..level.hgraph.num_vertices()).map(|c| c % 2).collect();
                let fine_solution = project(&level.hgraph, &coarse_solution, fine.num_vertices());
                let fine_ctx = ev.context(fine);
                let fine_token = ev.cut_evaluator(fine, &fine_ctx, &fine_solution);
                let coarse_token = ev.cut_evaluator(&level.hgraph, &level.ctx, &coarse_solution);
                prop_assert_eq!(fine_token.block_balance, coarse_token.block_balance);
                prop_assert!((fine_token.cost - coarse_token.cost).abs() < 1e-3);
                fine = &level.hgraph;
            }
        }
    }
}
