use ndarray::{Array2, Axis};

use crate::error::ConfigError;

/// Normalises target sizes to fractions summing to one.
pub fn fractional_sizes(sizes: &[f64]) -> Result<Vec<f64>, ConfigError> {
    if sizes.is_empty() || sizes.iter().any(|&s| !s.is_finite() || s <= 0.0) {
        return Err(ConfigError::InvalidSizes(sizes.to_vec()));
    }
    let total: f64 = sizes.iter().sum();
    Ok(sizes.iter().map(|s| s / total).collect())
}

/// Data of the cluster-merging MILP.
///
/// `a[t, c]` is the share of quantity `t` (row 0: records, then one row per
/// balancing task) held by initial cluster `c`; each row sums to one, or is
/// all zero when the quantity was never observed. The objective is
/// `Σ_s Σ_t subset_weight[s] · task_weight[t] · |Σ_c a[t,c]·x[c,s] − target[s]|`.
#[derive(Debug, Clone)]
pub struct BalanceProblem {
    a: Array2<f64>,
    targets: Vec<f64>,
    subset_weights: Vec<f64>,
    task_weights: Vec<f64>,
}

impl BalanceProblem {
    /// `table` is the raw tasks-vs-clusters count table.
    ///
    /// With `equal_weights == false` and more than one row, the record row
    /// weighs as much as all task rows together.
    pub fn new(table: &Array2<f64>, sizes: &[f64], equal_weights: bool) -> Result<Self, ConfigError> {
        let targets = fractional_sizes(sizes)?;
        let (m, n) = table.dim();
        let s = targets.len();
        if s > n {
            return Err(ConfigError::TooManySubsets {
                subsets: s,
                clusters: n,
            });
        }

        let mut a = table.to_owned();
        for mut row in a.axis_iter_mut(Axis(0)) {
            let total = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            }
        }

        let mut task_weights = if m > 1 && !equal_weights {
            let mut w = vec![1.0; m];
            w[0] = (m - 1) as f64;
            w
        } else {
            vec![1.0; m]
        };
        let wsum: f64 = task_weights.iter().sum();
        task_weights.iter_mut().for_each(|w| *w /= wsum);

        let inv_sum: f64 = targets.iter().map(|f| 1.0 / f).sum();
        let subset_weights = targets.iter().map(|f| (1.0 / f) / inv_sum).collect();

        Ok(Self {
            a,
            targets,
            subset_weights,
            task_weights,
        })
    }

    #[inline]
    pub fn n_tasks(&self) -> usize {
        self.a.nrows()
    }

    #[inline]
    pub fn n_clusters(&self) -> usize {
        self.a.ncols()
    }

    #[inline]
    pub fn n_subsets(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn share(&self, task: usize, cluster: usize) -> f64 {
        self.a[[task, cluster]]
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.a
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn subset_weights(&self) -> &[f64] {
        &self.subset_weights
    }

    pub fn task_weights(&self) -> &[f64] {
        &self.task_weights
    }

    /// Objective coefficient of the deviation variable X[t, s].
    #[inline]
    pub fn coefficient(&self, task: usize, subset: usize) -> f64 {
        self.task_weights[task] * self.subset_weights[subset]
    }

    /// Achieved fraction of every quantity per subset (tasks × subsets) for
    /// a 0-based cluster → subset assignment.
    pub fn achieved(&self, assignment: &[usize]) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.n_tasks(), self.n_subsets()));
        for (c, &s) in assignment.iter().enumerate() {
            for t in 0..self.n_tasks() {
                out[[t, s]] += self.a[[t, c]];
            }
        }
        out
    }

    pub fn objective(&self, assignment: &[usize]) -> f64 {
        let achieved = self.achieved(assignment);
        let mut total = 0.0;
        for t in 0..self.n_tasks() {
            for s in 0..self.n_subsets() {
                total += self.coefficient(t, s) * (achieved[[t, s]] - self.targets[s]).abs();
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn sizes_are_normalised_and_validated() {
        assert_eq!(fractional_sizes(&[8.0, 1.0, 1.0]).unwrap(), vec![0.8, 0.1, 0.1]);
        assert!(fractional_sizes(&[]).is_err());
        assert!(fractional_sizes(&[1.0, 0.0]).is_err());
        assert!(fractional_sizes(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn more_subsets_than_clusters_is_a_config_error() {
        let table = array![[3.0, 2.0]];
        let err = BalanceProblem::new(&table, &[1.0, 1.0, 1.0], true).unwrap_err();
        assert_eq!(err, ConfigError::TooManySubsets { subsets: 3, clusters: 2 });
    }

    #[test]
    fn rows_are_normalised_and_zero_rows_kept() {
        let table = array![[2.0, 6.0], [0.0, 0.0], [1.0, 3.0]];
        let p = BalanceProblem::new(&table, &[1.0, 1.0], true).unwrap();
        assert_eq!(p.matrix().row(0).to_vec(), vec![0.25, 0.75]);
        assert_eq!(p.matrix().row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(p.matrix().row(2).to_vec(), vec![0.25, 0.75]);
    }

    #[test]
    fn task_weights_follow_the_equal_weight_flag() {
        let table = array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let equal = BalanceProblem::new(&table, &[1.0, 1.0], true).unwrap();
        assert_eq!(equal.task_weights(), &[0.25, 0.25, 0.25, 0.25]);
        let dominant = BalanceProblem::new(&table, &[1.0, 1.0], false).unwrap();
        assert_eq!(dominant.task_weights(), &[0.5, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0]);

        let single = BalanceProblem::new(&array![[1.0, 1.0]], &[1.0, 1.0], false).unwrap();
        assert_eq!(single.task_weights(), &[1.0]);
    }

    #[test]
    fn smaller_subsets_get_larger_weights() {
        let table = array![[1.0, 1.0, 1.0]];
        let p = BalanceProblem::new(&table, &[0.8, 0.1, 0.1], true).unwrap();
        let w = p.subset_weights();
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w[1] > w[0]);
        assert!((w[1] - w[2]).abs() < 1e-12);
        // 1/0.8 : 1/0.1 : 1/0.1 = 1.25 : 10 : 10
        assert!((w[0] - 1.25 / 21.25).abs() < 1e-12);
    }

    #[test]
    fn objective_is_weighted_absolute_deviation() {
        let table = array![[1.0, 1.0, 2.0]];
        let p = BalanceProblem::new(&table, &[1.0, 1.0], true).unwrap();
        // {0,1} vs {2}: 0.5 / 0.5, perfect
        assert!(p.objective(&[0, 0, 1]).abs() < 1e-12);
        // {0} vs {1,2}: 0.25 / 0.75, deviation 0.25 on both sides, weights 0.5 each
        assert!((p.objective(&[0, 1, 1]) - 0.25).abs() < 1e-12);
        let achieved = p.achieved(&[0, 1, 1]);
        assert!((achieved.sum() - 1.0).abs() < 1e-12);
    }
}
