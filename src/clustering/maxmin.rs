use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use super::{ClusteringStrategy, Clusters, Reseedable, assign_to_centres, default_cluster_count};
use crate::error::SplitError;
use crate::fingerprint::{Fingerprinter, SmilesFingerprinter};

/// Diverse centroids by greedy farthest-point picking, every molecule joins
/// its most similar centroid.
pub struct MaxMinClustering {
    pub seed: u64,
    pub n_clusters: Option<usize>,
    fingerprinter: Box<dyn Fingerprinter>,
}

impl MaxMinClustering {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            n_clusters: None,
            fingerprinter: Box::new(SmilesFingerprinter::default()),
        }
    }

    pub fn with_clusters(mut self, n_clusters: usize) -> Self {
        self.n_clusters = Some(n_clusters);
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Box<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Indices of `k` picks: a seeded first pick, then repeatedly the
    /// molecule farthest from everything picked so far.
    pub(crate) fn pick(&self, fps: &[crate::fingerprint::Fingerprint], k: usize) -> Vec<usize> {
        let n = fps.len();
        if n == 0 || k == 0 {
            return Vec::new();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let first = rng.gen_range(0..n);
        let mut picks = vec![first];
        let mut nearest: Vec<f64> = fps.par_iter().map(|fp| 1.0 - fp.tanimoto(&fps[first])).collect();
        nearest[first] = f64::NEG_INFINITY;

        while picks.len() < k.min(n) {
            // ties resolve to the lowest index
            let (next, _) = nearest
                .iter()
                .enumerate()
                .fold((usize::MAX, f64::NEG_INFINITY), |(bi, bd), (i, &d)| {
                    if d > bd { (i, d) } else { (bi, bd) }
                });
            if next == usize::MAX || nearest[next] == f64::NEG_INFINITY {
                break;
            }
            picks.push(next);
            let chosen = &fps[next];
            nearest.par_iter_mut().enumerate().for_each(|(i, d)| {
                if *d != f64::NEG_INFINITY {
                    *d = d.min(1.0 - fps[i].tanimoto(chosen));
                }
            });
            nearest[next] = f64::NEG_INFINITY;
        }
        picks
    }
}

impl ClusteringStrategy for MaxMinClustering {
    fn name(&self) -> String {
        "MaxMinClustering".to_string()
    }

    fn cluster(&self, structures: &[&str]) -> Result<Clusters, SplitError> {
        let n = structures.len();
        let k = self.n_clusters.unwrap_or_else(|| default_cluster_count(n));
        let fps = self.fingerprinter.fingerprint_all(structures)?;
        let centres = self.pick(&fps, k);
        debug!("[cluster] maxmin picked {} centroids (seed {})", centres.len(), self.seed);
        let assignment = assign_to_centres(&fps, &centres);
        Ok(Clusters::from_assignment(&assignment, centres.len()))
    }

    fn reseedable(&mut self) -> Option<&mut dyn Reseedable> {
        Some(self)
    }

    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        Some(self.fingerprinter.as_ref())
    }
}

impl Reseedable for MaxMinClustering {
    fn seed(&self) -> u64 {
        self.seed
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILIES: [&str; 4] = ["CCCCCCCC", "c1ccccc1", "OCC(O)CO", "N#CC#N"];

    fn family_smiles() -> Vec<String> {
        let mut out = Vec::new();
        for fam in FAMILIES {
            for i in 0..5 {
                out.push(format!("{fam}{}", "F".repeat(i % 2)));
            }
        }
        out
    }

    #[test]
    fn picks_one_centroid_per_family() {
        let owned = family_smiles();
        let s: Vec<&str> = owned.iter().map(String::as_str).collect();
        let clustering = MaxMinClustering::new(2022).with_clusters(4);
        let clusters = clustering.cluster(&s).unwrap();
        assert_eq!(clusters.len(), 4);
        assert!(clusters.validate(s.len()).is_ok());
        // members of one family never straddle two clusters
        for (_, members) in clusters.iter() {
            let fams: std::collections::BTreeSet<usize> = members.iter().map(|r| r / 5).collect();
            assert!(fams.len() <= 1, "cluster mixes families: {members:?}");
        }
    }

    #[test]
    fn pick_caps_at_dataset_size() {
        let owned = family_smiles();
        let s: Vec<&str> = owned.iter().map(String::as_str).collect();
        let clustering = MaxMinClustering::new(1).with_clusters(100);
        let fps = clustering.fingerprinter.fingerprint_all(&s).unwrap();
        let picks = clustering.pick(&fps, 100);
        assert!(picks.len() <= s.len());
        let unique: std::collections::BTreeSet<_> = picks.iter().collect();
        assert_eq!(unique.len(), picks.len());
    }
}
