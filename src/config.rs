use crate::error::{PartitionError, Result};

/// Weighting knobs shared by every cost computation.
#[derive(Clone, Debug, PartialEq)]
pub struct CostFactors {
    /// Per-dimension factors applied to hyperedge weights. Missing entries
    /// count as 1.0.
    pub e_wt_factors: Vec<f32>,
    /// Per-dimension factors used when a vertex weight vector must be reduced
    /// to a scalar.
    pub v_wt_factors: Vec<f32>,
    pub placement_wt_factors: Vec<f32>,
    pub net_timing_factor: f32,
    pub path_timing_factor: f32,
    pub path_snaking_factor: f32,
    pub timing_exp_factor: f32,
    /// Slack lost by a hyperedge every time it is cut.
    pub extra_cut_delay: f32,
}

impl Default for CostFactors {
    fn default() -> Self {
        Self {
            e_wt_factors: vec![],
            v_wt_factors: vec![],
            placement_wt_factors: vec![],
            net_timing_factor: 1.0,
            path_timing_factor: 1.0,
            path_snaking_factor: 1.0,
            timing_exp_factor: 2.0,
            extra_cut_delay: 1.0,
        }
    }
}

/// Order in which the coarsener visits vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexOrder {
    Random,
    Degree,
    Size,
    Default,
    Timing,
}

/// Refinement algorithms that can be chained at every level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefinerKind {
    TwoWayFm,
    KWayFm,
    Greedy,
    Kpm,
    Ilp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoarsenConfig {
    pub vertex_order: VertexOrder,
    /// Hyperedges larger than this are ignored while scoring and dropped
    /// while contracting.
    pub size_skip: usize,
    pub thr_coarsen_vertices: usize,
    pub thr_coarsen_hyperedges: usize,
    pub coarsening_ratio: f32,
    pub max_coarsen_iters: usize,
    pub adj_diff_ratio: f32,
    pub min_vertices_each_part: usize,
    /// Smoothing sweeps for algebraic hyperedge weights; 0 disables them.
    pub algebraic_sweeps: usize,
    pub timing_hops: usize,
}

impl Default for CoarsenConfig {
    fn default() -> Self {
        Self {
            vertex_order: VertexOrder::Random,
            size_skip: 1000,
            thr_coarsen_vertices: 200,
            thr_coarsen_hyperedges: 50,
            coarsening_ratio: 1.6,
            max_coarsen_iters: 30,
            adj_diff_ratio: 0.0001,
            min_vertices_each_part: 4,
            algebraic_sweeps: 3,
            timing_hops: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InitialConfig {
    pub num_initial_solutions: usize,
    pub num_best_initial_solutions: usize,
    /// Instances with at most this many vertices are also solved exactly.
    pub ilp_vertex_threshold: usize,
    pub ilp_max_hyperedges: usize,
}

impl Default for InitialConfig {
    fn default() -> Self {
        Self {
            num_initial_solutions: 50,
            num_best_initial_solutions: 10,
            ilp_vertex_threshold: 50,
            ilp_max_hyperedges: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefineConfig {
    pub refiner_iters: usize,
    pub max_moves: usize,
    /// A pass stops once this fraction of the vertex count has been moved
    /// without beating the best cumulative gain.
    pub early_stop_ratio: f32,
    /// Heap slots walked when the top of every bucket is illegal.
    pub total_corking_passes: usize,
    /// Consecutive zero-gain KPM passes tolerated before giving up.
    pub max_stagnation: usize,
    pub ilp_wavefront: usize,
    /// Relaxation of the balance bounds during the exploratory two-way pass.
    pub exploration_slack: f32,
    /// Refiners run in order at every level. Empty picks pairwise and
    /// k-way FM for more than two blocks, two-way FM otherwise, followed by
    /// greedy hyperedge moves.
    pub refiners: Vec<RefinerKind>,
    /// Levels with fewer vertices than this and no timing paths are also
    /// refined exactly; 0 disables it.
    pub ilp_vertex_threshold: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            refiner_iters: 10,
            max_moves: 60,
            early_stop_ratio: 0.5,
            total_corking_passes: 25,
            max_stagnation: 3,
            ilp_wavefront: 50,
            exploration_slack: 0.25,
            refiners: vec![],
            ilp_vertex_threshold: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MultilevelConfig {
    pub num_coarsen_solutions: usize,
    pub v_cycle: bool,
    pub max_num_vcycle: usize,
    /// Worker threads; 0 uses the global rayon pool.
    pub num_threads: usize,
    pub ilp_node_limit: usize,
}

impl Default for MultilevelConfig {
    fn default() -> Self {
        Self {
            num_coarsen_solutions: 3,
            v_cycle: true,
            max_num_vcycle: 1,
            num_threads: 0,
            ilp_node_limit: 200_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionConfig {
    pub num_parts: usize,
    /// Allowed imbalance, in percent of the total vertex weight.
    pub ub_factor: f32,
    /// Target share of each block; empty means 1/K everywhere.
    pub base_balance: Vec<f32>,
    pub seed: u64,
    pub factors: CostFactors,
    pub coarsen: CoarsenConfig,
    pub initial: InitialConfig,
    pub refine: RefineConfig,
    pub multilevel: MultilevelConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            num_parts: 2,
            ub_factor: 1.0,
            base_balance: vec![],
            seed: 0,
            factors: CostFactors::default(),
            coarsen: CoarsenConfig::default(),
            initial: InitialConfig::default(),
            refine: RefineConfig::default(),
            multilevel: MultilevelConfig::default(),
        }
    }
}

impl PartitionConfig {
    pub fn with_parts(mut self, num_parts: usize) -> Self {
        self.num_parts = num_parts;
        self
    }

    pub fn with_imbalance(mut self, ub_factor: f32) -> Self {
        self.ub_factor = ub_factor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_parts < 2 {
            return Err(PartitionError::InvalidPartCount(self.num_parts));
        }
        if !self.ub_factor.is_finite() || self.ub_factor < 0.0 {
            return Err(PartitionError::InvalidBalance(format!(
                "imbalance factor {} must be a non-negative number",
                self.ub_factor
            )));
        }
        if !self.base_balance.is_empty() {
            if self.base_balance.len() != self.num_parts {
                return Err(PartitionError::InvalidBalance(format!(
                    "{} base balance entries for {} parts",
                    self.base_balance.len(),
                    self.num_parts
                )));
            }
            let sum: f32 = self.base_balance.iter().sum();
            if self.base_balance.iter().any(|b| *b < 0.0) || (sum - 1.0).abs() > 1e-3 {
                return Err(PartitionError::InvalidBalance(format!(
                    "base balance must be non-negative and sum to 1, sums to {sum}"
                )));
            }
        }
        Ok(())
    }

    /// Target share of every block.
    pub fn base_balance(&self) -> Vec<f32> {
        if self.base_balance.len() == self.num_parts {
            self.base_balance.clone()
        } else {
            vec![1.0 / self.num_parts as f32; self.num_parts]
        }
    }
}
