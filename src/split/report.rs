use serde::Serialize;
use tracing::info;

use crate::dissimilarity::rule;
use crate::tasks::BalancingTask;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskBalance {
    pub task: String,
    pub observed: usize,
    /// Share of the task's observed rows per subset.
    pub fractions: Vec<f64>,
}

/// How the observed values of every balancing task ended up over subsets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    pub column: String,
    pub tasks: Vec<TaskBalance>,
    /// Share of all balancing observations per subset (rows when there are
    /// no balancing tasks).
    pub overall: Vec<f64>,
    /// Mean absolute difference between `overall` and the target fractions.
    pub score: f64,
}

fn shares(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// `assignment` is the 0-based subset of every row, `targets` the
/// normalised subset sizes.
pub fn balance_report(
    column: &str,
    tasks: &[BalancingTask],
    assignment: &[usize],
    targets: &[f64],
) -> BalanceReport {
    let s = targets.len();
    let mut overall_counts = vec![0usize; s];
    let tasks: Vec<TaskBalance> = tasks
        .iter()
        .map(|task| {
            let mut counts = vec![0usize; s];
            for (row, &k) in assignment.iter().enumerate() {
                if task.is_observed(row) {
                    counts[k] += 1;
                }
            }
            for (o, c) in overall_counts.iter_mut().zip(&counts) {
                *o += c;
            }
            TaskBalance {
                task: task.name.clone(),
                observed: counts.iter().sum(),
                fractions: shares(&counts),
            }
        })
        .collect();

    if tasks.is_empty() {
        for &k in assignment {
            overall_counts[k] += 1;
        }
    }
    let overall = shares(&overall_counts);
    let score = overall
        .iter()
        .zip(targets)
        .map(|(o, t)| (o - t).abs())
        .sum::<f64>()
        / s as f64;

    BalanceReport {
        column: column.to_string(),
        tasks,
        overall,
        score,
    }
}

fn ratios(fractions: &[f64]) -> String {
    fractions
        .iter()
        .enumerate()
        .map(|(k, f)| format!("{k}: {f:.2}"))
        .collect::<Vec<_>>()
        .join("  ")
}

impl BalanceReport {
    pub fn log(&self) {
        info!("{}", rule(&format!(" {} balance ", self.column), '-'));
        let width = self
            .tasks
            .iter()
            .map(|t| t.task.len())
            .max()
            .unwrap_or(0)
            .max("Overall".len());
        for t in &self.tasks {
            info!("[balance] {:<width$}  {}", t.task, ratios(&t.fractions));
        }
        info!("[balance] {:<width$}  {}", "Overall", ratios(&self.overall));
        info!("[balance] Balance score: {:.4}", self.score);
    }
}
