//! Initial structural grouping of molecules.
//!
//! A strategy turns the ordered structure column into a total partition of
//! row indices. Splitting only depends on that contract; multi-split runs
//! additionally need the `Reseedable` capability.

pub mod leader;
pub mod maxmin;
pub mod random;

use std::collections::BTreeMap;

use crate::error::{ConfigError, SplitError};
use crate::fingerprint::{Fingerprint, Fingerprinter};

pub use leader::LeaderPickerClustering;
pub use maxmin::MaxMinClustering;
pub use random::RandomClustering;

pub type ClusterId = usize;

/// Partition of row indices into named clusters, ordered by cluster id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clusters {
    groups: BTreeMap<ClusterId, Vec<usize>>,
}

impl Clusters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates that `groups` partitions `0..n_rows`.
    pub fn from_groups(
        groups: impl IntoIterator<Item = (ClusterId, Vec<usize>)>,
        n_rows: usize,
    ) -> Result<Self, ConfigError> {
        let mut seen = vec![false; n_rows];
        let mut out = BTreeMap::new();
        for (id, members) in groups {
            for &row in &members {
                if row >= n_rows {
                    return Err(ConfigError::InvalidClusters(format!(
                        "cluster {id} holds row {row}, dataset has {n_rows} rows"
                    )));
                }
                if seen[row] {
                    return Err(ConfigError::InvalidClusters(format!(
                        "row {row} belongs to more than one cluster"
                    )));
                }
                seen[row] = true;
            }
            if out.insert(id, members).is_some() {
                return Err(ConfigError::InvalidClusters(format!(
                    "cluster id {id} appears twice"
                )));
            }
        }
        if let Some(row) = seen.iter().position(|s| !s) {
            return Err(ConfigError::InvalidClusters(format!(
                "row {row} is not assigned to any cluster"
            )));
        }
        Ok(Self { groups: out })
    }

    /// One cluster per distinct label, in label order.
    pub fn from_labels(labels: &[i64]) -> Self {
        let mut by_label: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, &label) in labels.iter().enumerate() {
            by_label.entry(label).or_default().push(row);
        }
        Self {
            groups: by_label.into_values().enumerate().collect(),
        }
    }

    /// Clusters built from a per-row label vector with labels already in `0..k`.
    pub(crate) fn from_assignment(assignment: &[usize], k: usize) -> Self {
        let mut groups: BTreeMap<ClusterId, Vec<usize>> = (0..k).map(|c| (c, Vec::new())).collect();
        for (row, &c) in assignment.iter().enumerate() {
            groups.entry(c).or_default().push(row);
        }
        Self { groups }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn n_rows(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.groups.keys().copied()
    }

    pub fn members(&self, id: ClusterId) -> Option<&[usize]> {
        self.groups.get(&id).map(Vec::as_slice)
    }

    /// `(id, members)` in id order; the position is the cluster's column in
    /// the tasks-vs-clusters table.
    pub fn iter(&self) -> impl Iterator<Item = (ClusterId, &[usize])> + '_ {
        self.groups.iter().map(|(&id, m)| (id, m.as_slice()))
    }

    /// Rows outside `0..n_rows` or uncovered rows are reported as errors.
    pub fn validate(&self, n_rows: usize) -> Result<(), ConfigError> {
        Self::from_groups(self.groups.clone(), n_rows).map(|_| ())
    }
}

/// Strategies whose random seed can be advanced between split iterations.
pub trait Reseedable {
    fn seed(&self) -> u64;
    fn set_seed(&mut self, seed: u64);
}

pub trait ClusteringStrategy: Send {
    fn name(&self) -> String;

    fn cluster(&self, structures: &[&str]) -> Result<Clusters, SplitError>;

    /// `Some` only for strategies that support deterministic re-seeding.
    fn reseedable(&mut self) -> Option<&mut dyn Reseedable> {
        None
    }

    /// Fingerprint provider used by the strategy, if any, so the distance
    /// pass measures dissimilarity the same way clustering did.
    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        None
    }
}

/// Default number of clusters for strategies that need one.
pub(crate) fn default_cluster_count(n_rows: usize) -> usize {
    (n_rows / 10).max(1)
}

/// Assigns every fingerprint to its most similar centre; ties go to the
/// earlier centre.
pub(crate) fn assign_to_centres(fps: &[Fingerprint], centres: &[usize]) -> Vec<usize> {
    use rayon::prelude::*;

    fps.par_iter()
        .map(|fp| {
            let mut best = 0usize;
            let mut best_sim = f64::NEG_INFINITY;
            for (k, &c) in centres.iter().enumerate() {
                let sim = fp.tanimoto(&fps[c]);
                if sim > best_sim {
                    best_sim = sim;
                    best = k;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_groups_rejects_overlap_and_gaps() {
        let dup = Clusters::from_groups([(0, vec![0, 1]), (1, vec![1, 2])], 3);
        assert!(matches!(dup, Err(ConfigError::InvalidClusters(_))));

        let gap = Clusters::from_groups([(0, vec![0]), (1, vec![2])], 3);
        assert!(matches!(gap, Err(ConfigError::InvalidClusters(_))));

        let oob = Clusters::from_groups([(0, vec![0, 1, 7])], 3);
        assert!(matches!(oob, Err(ConfigError::InvalidClusters(_))));
    }

    #[test]
    fn from_groups_accepts_empty_clusters() {
        let c = Clusters::from_groups([(0, vec![0, 1]), (3, vec![]), (5, vec![2])], 3).unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.ids().collect::<Vec<_>>(), vec![0, 3, 5]);
        assert_eq!(c.members(3), Some(&[][..]));
    }

    #[test]
    fn labels_become_dense_ids() {
        let c = Clusters::from_labels(&[7, -1, 7, 3]);
        let groups: Vec<_> = c.iter().map(|(id, m)| (id, m.to_vec())).collect();
        assert_eq!(groups, vec![(0, vec![1]), (1, vec![3]), (2, vec![0, 2])]);
        assert!(c.validate(4).is_ok());
    }
}
