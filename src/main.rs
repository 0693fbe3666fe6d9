use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;

use hpart::io::{
    read_community, read_fixed, read_groups, read_hmetis, read_placement, solution_path,
    write_solution,
};
use hpart::{PartitionConfig, Partitioner};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// hMetis hypergraph file
    hgraph: PathBuf,

    /// Number of blocks
    num_parts: usize,

    /// Allowed imbalance, in percent
    balance_factor: f32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Fixed block per vertex, -1 for free vertices
    #[arg(long)]
    fixed: Option<PathBuf>,

    /// Community id per vertex
    #[arg(long)]
    community: Option<PathBuf>,

    /// Placement coordinates per vertex
    #[arg(long)]
    placement: Option<PathBuf>,

    /// Vertices that must share a block, one group per line
    #[arg(long)]
    group: Option<PathBuf>,

    /// Maximum number of V-cycles, 0 disables them
    #[arg(long, default_value_t = 1)]
    vcycles: usize,

    #[arg(long, default_value_t = 10)]
    refiner_iters: usize,

    #[arg(long, default_value_t = 60)]
    max_moves: usize,

    /// Worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Solution file, defaults to <hgraph>.part.<num_parts>
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut hg = read_hmetis(&args.hgraph)?;
    let n = hg.num_vertices();
    if let Some(path) = &args.fixed {
        if let Some(fixed) = read_fixed(path, n)? {
            hg = hg.with_fixed(fixed);
        }
    }
    if let Some(path) = &args.community {
        if let Some(community) = read_community(path, n)? {
            hg = hg.with_community(community);
        }
    }
    if let Some(path) = &args.placement {
        if let Some(placement) = read_placement(path, n)? {
            hg = hg.with_placement(placement);
        }
    }
    let groups = match &args.group {
        Some(path) => read_groups(path, n)?,
        None => vec![],
    };

    let mut config = PartitionConfig::default()
        .with_parts(args.num_parts)
        .with_imbalance(args.balance_factor)
        .with_seed(args.seed);
    config.refine.refiner_iters = args.refiner_iters;
    config.refine.max_moves = args.max_moves;
    config.multilevel.v_cycle = args.vcycles > 0;
    config.multilevel.max_num_vcycle = args.vcycles;
    config.multilevel.num_threads = args.threads;

    let start = Instant::now();
    let result = Partitioner::new(config).partition_with_groups(&hg, &groups)?;
    info!("partitioned in {:?}", start.elapsed());

    let output = args
        .output
        .unwrap_or_else(|| solution_path(&args.hgraph, args.num_parts));
    write_solution(&output, &result.solution)?;

    println!("Cut cost {:.4}", result.cost);
    for (b, w) in result.block_balance.iter().enumerate() {
        println!("Block {b} balance {w:?}");
    }
    if !result.balanced {
        println!("Warning: balance constraints not met");
    }
    if let Some(stats) = &result.path_stats {
        println!(
            "Critical paths {} (worst cut {}, average {:.2})",
            stats.tot_num_critical_path, stats.worst_cut_critical_path, stats.avg_cut_critical_path
        );
    }
    println!("Solution written to {}", output.display());
    Ok(())
}
