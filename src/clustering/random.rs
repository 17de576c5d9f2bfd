use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::{ClusteringStrategy, Clusters, Reseedable, default_cluster_count};
use crate::error::SplitError;

/// Structure-blind clustering: seeded shuffle, then contiguous chunks.
#[derive(Debug, Clone)]
pub struct RandomClustering {
    pub seed: u64,
    pub n_clusters: Option<usize>,
}

impl RandomClustering {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            n_clusters: None,
        }
    }

    pub fn with_clusters(seed: u64, n_clusters: usize) -> Self {
        Self {
            seed,
            n_clusters: Some(n_clusters),
        }
    }
}

impl ClusteringStrategy for RandomClustering {
    fn name(&self) -> String {
        "RandomClustering".to_string()
    }

    fn cluster(&self, structures: &[&str]) -> Result<Clusters, SplitError> {
        let n = structures.len();
        let k = self
            .n_clusters
            .unwrap_or_else(|| default_cluster_count(n))
            .clamp(1, n.max(1));

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);

        // first `n % k` chunks take one extra row
        let base = n / k;
        let extra = n % k;
        let mut assignment = vec![0usize; n];
        let mut pos = 0usize;
        for c in 0..k {
            let len = base + usize::from(c < extra);
            for &row in &order[pos..pos + len] {
                assignment[row] = c;
            }
            pos += len;
        }
        Ok(Clusters::from_assignment(&assignment, k))
    }

    fn reseedable(&mut self) -> Option<&mut dyn Reseedable> {
        Some(self)
    }
}

impl Reseedable for RandomClustering {
    fn seed(&self) -> u64 {
        self.seed
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }
}
