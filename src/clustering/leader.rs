use tracing::debug;

use super::{ClusteringStrategy, Clusters, assign_to_centres};
use crate::error::SplitError;
use crate::fingerprint::{Fingerprinter, SmilesFingerprinter};

/// Sequential leader picking: a molecule becomes a leader when it is less
/// similar than `similarity_threshold` to every existing leader.
///
/// Order-dependent and seedless, so it cannot drive multi-split runs.
pub struct LeaderPickerClustering {
    pub similarity_threshold: f64,
    fingerprinter: Box<dyn Fingerprinter>,
}

impl LeaderPickerClustering {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            fingerprinter: Box::new(SmilesFingerprinter::default()),
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Box<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }
}

impl Default for LeaderPickerClustering {
    fn default() -> Self {
        Self::new(0.6)
    }
}

impl ClusteringStrategy for LeaderPickerClustering {
    fn name(&self) -> String {
        "LeaderPickerClustering".to_string()
    }

    fn cluster(&self, structures: &[&str]) -> Result<Clusters, SplitError> {
        let fps = self.fingerprinter.fingerprint_all(structures)?;
        let mut leaders: Vec<usize> = Vec::new();
        for (i, fp) in fps.iter().enumerate() {
            let closest = fp.max_similarity(leaders.iter().map(|&l| &fps[l]));
            if closest.is_none_or(|s| s < self.similarity_threshold) {
                leaders.push(i);
            }
        }
        debug!(
            "[cluster] leader picker found {} leaders at threshold {:.2}",
            leaders.len(),
            self.similarity_threshold
        );
        let assignment = assign_to_centres(&fps, &leaders);
        Ok(Clusters::from_assignment(&assignment, leaders.len()))
    }

    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        Some(self.fingerprinter.as_ref())
    }
}
