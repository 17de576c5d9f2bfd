//! Merging initial clusters into balanced subsets.
//!
//! Given the tasks-vs-clusters table and target subset sizes, every cluster
//! is assigned to exactly one subset so that the weighted absolute deviation
//! between achieved and target fractions is minimal (or within the relative
//! gap when the time budget runs out first).

pub mod branch;
pub mod milp;
pub mod problem;
pub mod table;

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ConfigError, SplitError};

pub use problem::{BalanceProblem, fractional_sizes};
pub use table::tabulate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverBackend {
    /// In-crate branch-and-bound honouring time limit, gap and threads.
    BranchAndBound,
    /// The MILP formulation solved by `microlp`; no time or gap control.
    MicroLp,
}

#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub relative_gap: f64,
    pub time_limit: Duration,
    pub threads: usize,
    pub backend: SolverBackend,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            relative_gap: 0.1,
            time_limit: Duration::from_secs(60),
            threads: 1,
            backend: SolverBackend::BranchAndBound,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.relative_gap) {
            return Err(ConfigError::InvalidGap(self.relative_gap));
        }
        if self.time_limit.is_zero() {
            return Err(ConfigError::ZeroTimeLimit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    Optimal,
    /// Search finished, incumbent proven within the relative gap.
    WithinGap,
    /// Time budget exhausted; best incumbent returned.
    TimeLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolveOutcome {
    /// Final subset (1-indexed) of every initial cluster, in table column order.
    pub mapping: Vec<usize>,
    pub objective: f64,
    /// Proven lower bound on the optimal objective.
    pub bound: f64,
    pub status: SolveStatus,
    pub nodes: u64,
    pub elapsed_secs: f64,
}

impl SolveOutcome {
    /// 0-based subset per cluster column.
    pub fn zero_based(&self) -> Vec<usize> {
        self.mapping.iter().map(|s| s - 1).collect()
    }
}

/// Assigns every cluster column of `problem` to one subset.
pub fn merge_clusters(problem: &BalanceProblem, settings: &SolverSettings) -> Result<SolveOutcome, SplitError> {
    settings.validate()?;
    let outcome = match settings.backend {
        SolverBackend::BranchAndBound => branch::solve(problem, settings)?,
        SolverBackend::MicroLp => milp::solve(problem, settings)?,
    };

    let s = problem.n_subsets();
    if outcome.mapping.len() != problem.n_clusters() || outcome.mapping.iter().any(|&k| k == 0 || k > s) {
        return Err(SplitError::Solver(format!(
            "solver returned an invalid mapping for {} clusters into {} subsets",
            problem.n_clusters(),
            s
        )));
    }

    match outcome.status {
        SolveStatus::TimeLimit => warn!(
            "[balance] time limit reached after {} nodes ({:.2}s): objective {:.6}, bound {:.6}",
            outcome.nodes, outcome.elapsed_secs, outcome.objective, outcome.bound
        ),
        status => info!(
            "[balance] {:?} after {} nodes ({:.2}s): objective {:.6}, bound {:.6}",
            status, outcome.nodes, outcome.elapsed_secs, outcome.objective, outcome.bound
        ),
    }
    Ok(outcome)
}
