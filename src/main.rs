//! scatter - node decomposition planner and scattering pipeline driver
//!
//! # Usage
//!
//! ```bash
//! # Show the partition geometry for 8 nodes, 3 vectors, 10 frames of 500 atoms
//! scatter plan --nodes 8 --vectors 3 --frames 10 --atoms 500
//!
//! # Run the partition containing rank 0 on a synthetic trajectory
//! scatter run --nodes 8 --vectors 3 --frames 10 --atoms 500 --output spectra.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `SCATTER_CONFIG`: Path to the TOML config file (default: ./scatter.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use scatter_decomp::config::{self, defaults::COORDINATE_ELEMENT_BYTES, PartitionConfig};
use scatter_decomp::pipeline::{
    JsonLinesWriter, NullMonitor, PipelineController, PipelineInputs, ProcessGroup,
    ProgressMonitor, SharedMemoryGroup, TracingMonitor,
};
use scatter_decomp::trajectory::{scan_along_z, PlaneWaveKernel, Trajectory};
use scatter_decomp::{DecompositionPlan, ScatterConfig};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "scatter")]
#[command(about = "Node decomposition planner and scattering pipeline")]
#[command(version)]
struct CliArgs {
    /// Config file, overriding SCATTER_CONFIG and ./scatter.toml
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

/// Problem size shared by every subcommand.
#[derive(clap::Args, Debug)]
struct Workload {
    /// Compute nodes available
    #[arg(long)]
    nodes: u64,

    /// Scattering vectors to compute
    #[arg(long)]
    vectors: u64,

    /// Trajectory frames (work units split inside a partition)
    #[arg(long)]
    frames: u64,

    /// Atoms per frame
    #[arg(long)]
    atoms: u64,

    /// Fixed partition size instead of the automatic search
    #[arg(long)]
    partition_size: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Print the decomposition report as JSON
    Plan {
        #[command(flatten)]
        workload: Workload,
    },
    /// Compute spectra for the partition containing RANK
    Run {
        #[command(flatten)]
        workload: Workload,

        /// Global rank whose partition is run in this process
        #[arg(long, default_value = "0")]
        rank: u64,

        /// Seed of the synthetic trajectory
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Largest scattering vector length
        #[arg(long, default_value = "2.0")]
        q_max: f64,

        /// Output file, overriding output.path
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<ScatterConfig> {
    match path {
        Some(p) => ScatterConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(ScatterConfig::load()),
    }
}

fn plan_workload(cfg: &ScatterConfig, workload: &Workload) -> Result<DecompositionPlan> {
    let mut decomposition = cfg.decomposition.clone();
    if let Some(size) = workload.partition_size {
        decomposition.partitions = PartitionConfig::fixed(size);
    }

    let elbytesize = workload
        .atoms
        .checked_mul(COORDINATE_ELEMENT_BYTES)
        .context("Frame size overflows u64")?;
    workload
        .frames
        .checked_mul(elbytesize)
        .context("Partition payload (frames x frame size) overflows u64")?;

    DecompositionPlan::new(
        workload.nodes,
        workload.vectors,
        workload.frames,
        elbytesize,
        decomposition.max_partition_bytes,
        &decomposition,
    )
    .context("Decomposition failed")
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).with_context(|| format!("{what} ({value}) does not fit in usize"))
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_plan(workload: &Workload) -> Result<()> {
    let plan = plan_workload(config::get(), workload)?;
    let json = serde_json::to_string_pretty(&plan.report())
        .context("Failed to serialize decomposition report")?;
    println!("{json}");
    Ok(())
}

async fn run_pipeline(
    workload: Workload,
    rank: u64,
    seed: u64,
    q_max: f64,
    output: Option<PathBuf>,
) -> Result<()> {
    let cfg = config::get();
    let plan = plan_workload(cfg, &workload)?;

    if rank >= workload.nodes {
        bail!("Rank {rank} is outside the {} available nodes", workload.nodes);
    }
    let Some(pid) = plan.partition_of(rank) else {
        warn!(rank, "Rank is left idle by the decomposition, nothing to do");
        return Ok(());
    };

    let all_vectors = scan_along_z(workload.vectors, q_max);
    let vectors: Vec<_> = plan
        .vectors_for_partition(pid)
        .into_iter()
        .filter_map(|id| all_vectors.get(usize::try_from(id).ok()?).copied())
        .collect();

    let total_frames = to_usize(workload.frames, "Frame count")?;
    let atoms = to_usize(workload.atoms, "Atom count")?;
    let trajectory = Arc::new(Trajectory::synthetic(atoms, total_frames, seed));
    let kernel = Arc::new(PlaneWaveKernel::new(trajectory));

    let path = output.unwrap_or_else(|| PathBuf::from(&cfg.output.path));
    let writer = Arc::new(JsonLinesWriter::create(&path).context("Failed to open output file")?);

    info!(
        partition = pid,
        partition_size = plan.partition_size(),
        vectors = vectors.len(),
        frames = total_frames,
        output = %path.display(),
        "Running partition"
    );

    let mut controllers = Vec::new();
    for group in SharedMemoryGroup::create(to_usize(plan.partition_size(), "Partition size")?) {
        let local_rank = group.rank() as u64;
        let frames = plan
            .work_units_for(local_rank)
            .into_iter()
            .map(|f| to_usize(f, "Frame index"))
            .collect::<Result<Vec<_>>>()?;
        let monitor: Arc<dyn ProgressMonitor> = if local_rank == 0 {
            Arc::new(TracingMonitor)
        } else {
            Arc::new(NullMonitor)
        };

        controllers.push(PipelineController::new(
            PipelineInputs {
                group: Arc::new(group),
                kernel: kernel.clone(),
                vectors: vectors.clone(),
                frames,
                total_frames,
                writer: writer.clone(),
                monitor,
            },
            &cfg.pipeline,
        )?);
    }

    // Graceful shutdown via Ctrl+C
    let aborts: Vec<_> = controllers.iter().map(PipelineController::abort_handle).collect();
    let shutdown = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, aborting pipeline...");
            for handle in &aborts {
                handle.abort();
            }
        }
    });

    let results = tokio::task::spawn_blocking(move || {
        thread::scope(|scope| {
            let running: Vec<_> = controllers
                .iter_mut()
                .map(|controller| scope.spawn(move || controller.run()))
                .collect();
            running
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow::anyhow!("Rank thread panicked")))
                .collect::<Vec<_>>()
        })
    })
    .await
    .context("Pipeline task failed")?;
    shutdown.abort();

    for (local_rank, result) in results.into_iter().enumerate() {
        if let Err(e) = result? {
            error!(local_rank, error = %e, "Rank failed");
            return Err(e).context(format!("Pipeline failed on local rank {local_rank}"));
        }
    }

    info!(path = %path.display(), "Scattering run complete");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    config::init(load_config(args.config.as_ref())?);

    match args.command {
        SubCommand::Plan { workload } => run_plan(&workload),
        SubCommand::Run {
            workload,
            rank,
            seed,
            q_max,
            output,
        } => run_pipeline(workload, rank, seed, q_max, output).await,
    }
}
