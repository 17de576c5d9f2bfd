//! Minimum inter-subset distance per molecule and its per-subset summary.

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetDistance {
    pub subset: usize,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 for fewer than two members.
    pub std: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DissimilarityReport {
    pub column: String,
    /// Non-empty subsets, ascending.
    pub subsets: Vec<SubsetDistance>,
    /// Smallest per-subset median distance.
    pub score: f64,
}

impl DissimilarityReport {
    pub fn log(&self) {
        info!("{}", rule(" Min. inter-set Tanimoto distance ", '-'));
        for s in &self.subsets {
            info!("[distance] Subset {}: {:.2} +/- {:.2} | {:.2}", s.subset, s.mean, s.std, s.median);
        }
        info!("[distance] Chemical dissimilarity score: {:.2}", self.score);
    }
}

/// `txt` centred in an 80-column rule of `fill`.
pub(crate) fn rule(txt: &str, fill: char) -> String {
    let n = 80usize.saturating_sub(txt.chars().count()) / 2;
    let side: String = std::iter::repeat_n(fill, n).collect();
    format!("{side}{txt}{side}")
}

fn progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} molecules {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Per row, `1 − max similarity` to any row assigned to another subset.
///
/// `None` when fewer than two subsets are occupied, since the distance is
/// undefined then.
pub fn min_interset_distances(fps: &[Fingerprint], assignment: &[usize]) -> Option<Vec<f64>> {
    debug_assert_eq!(fps.len(), assignment.len());
    if assignment.iter().unique().count() < 2 {
        return None;
    }

    let pb = progress(fps.len());
    let distances = fps
        .par_iter()
        .enumerate()
        .map(|(i, fp)| {
            let own = assignment[i];
            let pool = fps
                .iter()
                .zip(assignment)
                .filter(|&(_, &s)| s != own)
                .map(|(other, _)| other);
            let sim = fp.max_similarity(pool).unwrap_or(0.0);
            pb.inc(1);
            1.0 - sim
        })
        .collect();
    pb.finish_and_clear();
    Some(distances)
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
    }
}

/// Mean, sample std and median of the distances in every occupied subset.
pub fn summarize(column: &str, assignment: &[usize], distances: &[f64]) -> DissimilarityReport {
    let subsets: Vec<SubsetDistance> = assignment
        .iter()
        .copied()
        .unique()
        .sorted()
        .map(|subset| {
            let mut d: Vec<f64> = assignment
                .iter()
                .zip(distances)
                .filter(|&(&s, _)| s == subset)
                .map(|(_, &x)| x)
                .collect();
            d.sort_by(f64::total_cmp);
            let count = d.len();
            let mean = d.iter().sum::<f64>() / count as f64;
            let std = if count < 2 {
                0.0
            } else {
                (d.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
            };
            SubsetDistance {
                subset,
                count,
                mean,
                std,
                median: median(&d),
            }
        })
        .collect();
    let score = subsets.iter().map(|s| s.median).fold(f64::INFINITY, f64::min);
    DissimilarityReport {
        column: column.to_string(),
        subsets,
        score,
    }
}

/// Distances plus their summary for one split column.
pub fn verify(column: &str, fps: &[Fingerprint], assignment: &[usize]) -> Option<(Vec<f64>, DissimilarityReport)> {
    let Some(distances) = min_interset_distances(fps, assignment) else {
        warn!("[distance] {column}: fewer than two occupied subsets, distances are undefined");
        return None;
    };
    let report = summarize(column, assignment, &distances);
    report.log();
    Some((distances, report))
}
