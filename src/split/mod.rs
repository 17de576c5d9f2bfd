//! Globally balanced splits: cluster, tabulate, merge, write back, verify.
//!
//! Iterations run strictly one after another; between iterations the
//! clustering strategy's seed is advanced by one.

pub mod report;

use serde::Serialize;
use tracing::{info, warn};

use crate::balance::{BalanceProblem, SolveOutcome, SolverBackend, SolverSettings, fractional_sizes, merge_clusters, tabulate};
use crate::clustering::{ClusteringStrategy, Clusters};
use crate::dataset::{ColumnValues, Dataset};
use crate::dissimilarity::{self, DissimilarityReport, rule};
use crate::error::{ConfigError, SplitError};
use crate::fingerprint::{Fingerprint, Fingerprinter, SmilesFingerprinter};
use crate::tasks::{BalancingTask, expand_tasks, resolve_original_tasks};

pub use report::{BalanceReport, TaskBalance, balance_report};

pub const SPLIT_COLUMN: &str = "Split";
pub const DISTANCE_COLUMN: &str = "MinIntersetDistance";

#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Target subset sizes, normalised internally.
    pub sizes: Vec<f64>,
    pub n_splits: usize,
    /// Weigh the record-count row like any task row.
    pub equal_task_weights: bool,
    pub solver: SolverSettings,
    /// Run the minimum inter-subset distance pass after every split.
    pub min_distance: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            sizes: vec![0.8, 0.1, 0.1],
            n_splits: 1,
            equal_task_weights: true,
            solver: SolverSettings::default(),
            min_distance: true,
        }
    }
}

enum ClusterSource {
    Precomputed(Clusters),
    Strategy(Box<dyn ClusteringStrategy>),
}

#[derive(Default)]
pub struct GloballyBalancedSplitBuilder {
    config: SplitConfig,
    clusters: Option<Clusters>,
    strategy: Option<Box<dyn ClusteringStrategy>>,
}

impl GloballyBalancedSplitBuilder {
    pub fn config(mut self, config: SplitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sizes(mut self, sizes: impl Into<Vec<f64>>) -> Self {
        self.config.sizes = sizes.into();
        self
    }

    pub fn n_splits(mut self, n_splits: usize) -> Self {
        self.config.n_splits = n_splits;
        self
    }

    pub fn equal_task_weights(mut self, equal: bool) -> Self {
        self.config.equal_task_weights = equal;
        self
    }

    pub fn solver(mut self, solver: SolverSettings) -> Self {
        self.config.solver = solver;
        self
    }

    pub fn relative_gap(mut self, gap: f64) -> Self {
        self.config.solver.relative_gap = gap;
        self
    }

    pub fn time_limit(mut self, limit: std::time::Duration) -> Self {
        self.config.solver.time_limit = limit;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.solver.threads = threads;
        self
    }

    pub fn backend(mut self, backend: SolverBackend) -> Self {
        self.config.solver.backend = backend;
        self
    }

    pub fn min_distance(mut self, enabled: bool) -> Self {
        self.config.min_distance = enabled;
        self
    }

    pub fn clusters(mut self, clusters: Clusters) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn clustering(mut self, strategy: impl ClusteringStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn boxed_clustering(mut self, strategy: Box<dyn ClusteringStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<GloballyBalancedSplit, ConfigError> {
        let Self {
            config,
            clusters,
            strategy,
        } = self;
        fractional_sizes(&config.sizes)?;
        config.solver.validate()?;
        if config.n_splits == 0 {
            return Err(ConfigError::ZeroSplits);
        }

        let source = match (clusters, strategy) {
            (None, None) => return Err(ConfigError::MissingClusterSource),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingClusterSource),
            (Some(clusters), None) => {
                if config.n_splits > 1 {
                    return Err(ConfigError::MultiSplitWithPrecomputed);
                }
                if config.sizes.len() > clusters.len() {
                    return Err(ConfigError::TooManySubsets {
                        subsets: config.sizes.len(),
                        clusters: clusters.len(),
                    });
                }
                ClusterSource::Precomputed(clusters)
            }
            (None, Some(mut strategy)) => {
                if config.n_splits > 1 && strategy.reseedable().is_none() {
                    return Err(ConfigError::NotReseedable(strategy.name()));
                }
                ClusterSource::Strategy(strategy)
            }
        };
        Ok(GloballyBalancedSplit { config, source })
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub structure_column: String,
    /// Explicit task columns; every eligible column when `None`.
    pub tasks: Option<Vec<String>>,
    pub ignore_columns: Vec<String>,
}

impl Default for SplitRequest {
    fn default() -> Self {
        Self {
            structure_column: "SMILES".to_string(),
            tasks: None,
            ignore_columns: Vec::new(),
        }
    }
}

impl SplitRequest {
    pub fn structure_column(mut self, column: impl Into<String>) -> Self {
        self.structure_column = column.into();
        self
    }

    pub fn tasks<S: Into<String>>(mut self, tasks: impl IntoIterator<Item = S>) -> Self {
        self.tasks = Some(tasks.into_iter().map(Into::into).collect());
        self
    }

    pub fn ignore<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.ignore_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub split_column: String,
    /// `None` when the distance pass was disabled or undefined.
    pub distance_column: Option<String>,
    pub clustering: String,
    /// Seed the clustering strategy ran with, when it has one.
    pub seed: Option<u64>,
    pub n_clusters: usize,
    pub solve: SolveOutcome,
    pub balance: BalanceReport,
    pub dissimilarity: Option<DissimilarityReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub original_tasks: Vec<String>,
    pub balancing_tasks: Vec<String>,
    /// Normalised target sizes.
    pub sizes: Vec<f64>,
    pub iterations: Vec<IterationReport>,
}

#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// Input columns plus one split (and distance) column per iteration.
    pub data: Dataset,
    pub report: SplitReport,
}

pub struct GloballyBalancedSplit {
    config: SplitConfig,
    source: ClusterSource,
}

fn column_name(base: &str, iteration: usize, n_splits: usize) -> String {
    if n_splits == 1 {
        base.to_string()
    } else {
        format!("{base}_{iteration}")
    }
}

impl GloballyBalancedSplit {
    pub fn builder() -> GloballyBalancedSplitBuilder {
        GloballyBalancedSplitBuilder::default()
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Current seed of the clustering strategy, if it is reseedable.
    pub fn seed(&mut self) -> Option<u64> {
        match &mut self.source {
            ClusterSource::Strategy(s) => s.reseedable().map(|r| r.seed()),
            ClusterSource::Precomputed(_) => None,
        }
    }

    fn clustering_name(&self) -> String {
        match &self.source {
            ClusterSource::Precomputed(_) => "precomputed clusters".to_string(),
            ClusterSource::Strategy(s) => s.name(),
        }
    }

    fn fingerprints(&self, structures: &[&str]) -> Result<Vec<Fingerprint>, SplitError> {
        let strategy_fp = match &self.source {
            ClusterSource::Strategy(s) => s.fingerprinter(),
            ClusterSource::Precomputed(_) => None,
        };
        match strategy_fp {
            Some(fp) => fp.fingerprint_all(structures),
            None => SmilesFingerprinter::default().fingerprint_all(structures),
        }
    }

    fn advance_seed(&mut self) {
        if let ClusterSource::Strategy(s) = &mut self.source {
            if let Some(r) = s.reseedable() {
                let next = r.seed().wrapping_add(1);
                r.set_seed(next);
            }
        }
    }

    /// Splits a copy of `data`; the input is left untouched.
    pub fn split(&mut self, data: &Dataset, request: &SplitRequest) -> Result<SplitOutcome, SplitError> {
        let n_rows = data.n_rows();
        let targets = fractional_sizes(&self.config.sizes)?;

        let original_tasks = resolve_original_tasks(
            data,
            &request.structure_column,
            request.tasks.as_deref(),
            &request.ignore_columns,
        )?;
        let balancing: Vec<BalancingTask> = expand_tasks(data, &original_tasks)?;
        let balancing_names: Vec<String> = balancing.iter().map(|t| t.name.clone()).collect();

        let structures: Vec<&str> = data
            .text(&request.structure_column)?
            .iter()
            .enumerate()
            .map(|(row, s)| {
                s.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| SplitError::MissingStructure {
                    row,
                    column: request.structure_column.clone(),
                })
            })
            .collect::<Result<_, _>>()?;

        if let ClusterSource::Precomputed(clusters) = &self.source {
            clusters.validate(n_rows)?;
        }

        let fps = if self.config.min_distance {
            Some(self.fingerprints(&structures)?)
        } else {
            None
        };

        let mut out = data.clone();
        let n_splits = self.config.n_splits;
        let mut iterations = Vec::with_capacity(n_splits);

        for iteration in 0..n_splits {
            let split_column = column_name(SPLIT_COLUMN, iteration, n_splits);
            let clustering = self.clustering_name();
            let seed = self.seed();

            info!("{}", rule(&format!(" {split_column} "), '='));
            info!("[split] Clustering method: {clustering}");
            info!("[split] Original tasks: {original_tasks:?}");
            info!("[split] Tasks for balancing: {balancing_names:?}");
            info!("[split] Subset sizes: {:?}", self.config.sizes);

            let computed;
            let clusters = match &self.source {
                ClusterSource::Precomputed(c) => c,
                ClusterSource::Strategy(s) => {
                    computed = s.cluster(&structures)?;
                    computed.validate(n_rows)?;
                    &computed
                }
            };
            info!("[split] Number of initial clusters: {}", clusters.len());

            let table = tabulate(&balancing, clusters);
            let problem = BalanceProblem::new(&table, &self.config.sizes, self.config.equal_task_weights)?;
            let solve = merge_clusters(&problem, &self.config.solver)?;

            let mut row_subset = vec![0usize; n_rows];
            for ((_, members), &subset) in clusters.iter().zip(&solve.mapping) {
                for &row in members {
                    row_subset[row] = subset - 1;
                }
            }
            out.insert(
                split_column.clone(),
                ColumnValues::Int(row_subset.iter().map(|&k| Some(k as i64)).collect()),
            )?;

            let balance = balance_report(&split_column, &balancing, &row_subset, &targets);
            balance.log();

            let mut distance_column = None;
            let mut dissimilarity = None;
            if let Some(fps) = &fps {
                if let Some((distances, summary)) = dissimilarity::verify(&split_column, fps, &row_subset) {
                    let name = column_name(DISTANCE_COLUMN, iteration, n_splits);
                    out.insert(name.clone(), ColumnValues::Float(distances.into_iter().map(Some).collect()))?;
                    distance_column = Some(name);
                    dissimilarity = Some(summary);
                }
            }

            iterations.push(IterationReport {
                split_column,
                distance_column,
                clustering,
                seed,
                n_clusters: clusters.len(),
                solve,
                balance,
                dissimilarity,
            });

            if n_splits > 1 {
                self.advance_seed();
            }
        }

        if balancing.is_empty() {
            warn!("[split] no balancing tasks; subsets were balanced on record counts only");
        }

        Ok(SplitOutcome {
            data: out,
            report: SplitReport {
                original_tasks,
                balancing_tasks: balancing_names,
                sizes: targets,
                iterations,
            },
        })
    }
}
