use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbmt_splits::dataset::io;
use gbmt_splits::runtime;
use gbmt_splits::{
    ClusteringStrategy, GloballyBalancedSplit, LeaderPickerClustering, MaxMinClustering, RandomClustering,
    SolverBackend, SolverSettings, SplitConfig, SplitRequest,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Clustering {
    Maxmin,
    Leader,
    Random,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Solver {
    Bnb,
    Microlp,
}

/// Globally balanced, chemically dissimilar splits of a CSV dataset.
#[derive(Debug, Parser)]
#[command(name = "gbmt-splits", version)]
struct Cli {
    /// Input CSV with a structure column and task columns.
    input: PathBuf,

    /// Output CSV; defaults to `<input>_split.csv` next to the input.
    #[arg(short, long, env = "GBMT_OUTPUT")]
    output: Option<PathBuf>,

    #[arg(long, default_value = "SMILES")]
    smiles_column: String,

    /// Task columns to balance; every eligible column when omitted.
    #[arg(long, value_delimiter = ',')]
    tasks: Option<Vec<String>>,

    /// Columns never used as tasks.
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,

    #[arg(long, value_delimiter = ',', default_values_t = [0.8, 0.1, 0.1])]
    sizes: Vec<f64>,

    #[arg(long, value_enum, default_value_t = Clustering::Maxmin)]
    clustering: Clustering,

    /// Initial clusters for maxmin/random; N/10 when omitted.
    #[arg(long)]
    n_clusters: Option<usize>,

    #[arg(long, default_value_t = 2022)]
    seed: u64,

    /// Leader picker similarity threshold.
    #[arg(long, default_value_t = 0.6)]
    similarity_threshold: f64,

    /// Precomputed per-row cluster labels (.npy, or .npz with `clusters`).
    #[arg(long, conflicts_with = "clustering")]
    clusters: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    n_splits: usize,

    /// Let the record-count row weigh as much as all tasks together.
    #[arg(long)]
    unequal_weights: bool,

    #[arg(long, default_value_t = 0.1)]
    relative_gap: f64,

    /// Solver time limit in seconds.
    #[arg(long, default_value_t = 60)]
    time_limit: u64,

    /// Solver threads; scheduler hints or available parallelism when omitted.
    #[arg(long, env = "GBMT_SOLVER_THREADS")]
    threads: Option<usize>,

    #[arg(long)]
    no_min_distance: bool,

    #[arg(long, value_enum, default_value_t = Solver::Bnb)]
    solver: Solver,

    /// Write the machine-readable report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also export split and distance columns to an .npz archive.
    #[arg(long)]
    npz_out: Option<PathBuf>,
}

fn default_output_path(input: &Path) -> PathBuf {
    let parent = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    parent.join(format!("{stem}_split.csv"))
}

fn strategy(cli: &Cli) -> Box<dyn ClusteringStrategy> {
    match cli.clustering {
        Clustering::Maxmin => {
            let s = MaxMinClustering::new(cli.seed);
            Box::new(match cli.n_clusters {
                Some(k) => s.with_clusters(k),
                None => s,
            })
        }
        Clustering::Random => Box::new(match cli.n_clusters {
            Some(k) => RandomClustering::with_clusters(cli.seed, k),
            None => RandomClustering::new(cli.seed),
        }),
        Clustering::Leader => Box::new(LeaderPickerClustering::new(cli.similarity_threshold)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    runtime::configure_thread_pool();

    let cli = Cli::parse();
    let output = cli.output.clone().unwrap_or_else(|| default_output_path(&cli.input));

    info!("[io] reading {}", cli.input.display());
    let data = io::read_csv(&cli.input)?;
    info!("[io] {} rows, {} columns", data.n_rows(), data.n_columns());

    let config = SplitConfig {
        sizes: cli.sizes.clone(),
        n_splits: cli.n_splits,
        equal_task_weights: !cli.unequal_weights,
        solver: SolverSettings {
            relative_gap: cli.relative_gap,
            time_limit: Duration::from_secs(cli.time_limit),
            threads: cli.threads.unwrap_or_else(|| runtime::detect_thread_config().count),
            backend: match cli.solver {
                Solver::Bnb => SolverBackend::BranchAndBound,
                Solver::Microlp => SolverBackend::MicroLp,
            },
        },
        min_distance: !cli.no_min_distance,
    };

    let builder = GloballyBalancedSplit::builder().config(config);
    let builder = match &cli.clusters {
        Some(path) => {
            let clusters = io::read_cluster_labels(path)
                .with_context(|| format!("load clusters from {}", path.display()))?;
            builder.clusters(clusters)
        }
        None => builder.boxed_clustering(strategy(&cli)),
    };
    let mut splitter = builder.build()?;

    let mut request = SplitRequest::default()
        .structure_column(cli.smiles_column.clone())
        .ignore(cli.ignore.clone());
    request.tasks = cli.tasks.clone();

    let outcome = splitter.split(&data, &request)?;

    io::write_csv(&output, &outcome.data)?;
    info!("[io] wrote {}", output.display());

    if let Some(path) = &cli.npz_out {
        let columns: Vec<String> = outcome
            .report
            .iterations
            .iter()
            .flat_map(|it| std::iter::once(it.split_column.clone()).chain(it.distance_column.clone()))
            .collect();
        io::write_splits_npz(path, &outcome.data, &columns)?;
        info!("[io] wrote {}", path.display());
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&outcome.report).context("serialise report")?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        info!("[io] wrote {}", path.display());
    }

    Ok(())
}
