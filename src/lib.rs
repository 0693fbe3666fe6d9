pub mod coarsen;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod hypergraph;
pub mod ilp;
pub mod initial;
pub mod io;
pub mod multilevel;
pub mod refine;
mod weights;

pub use config::{
    CoarsenConfig, CostFactors, InitialConfig, MultilevelConfig, PartitionConfig, RefineConfig,
    VertexOrder,
};
pub use error::{PartitionError, Result};
pub use evaluator::{EvalContext, Evaluator, PartitionToken, PathStats};
pub use hypergraph::{BalanceBounds, Hypergraph, Matrix};
pub use ilp::{BranchAndBound, IlpModel, IlpOutcome, IlpSolver};
pub use multilevel::{PartitionResult, Partitioner};
pub use refine::{Refiner, RefinerKind};
