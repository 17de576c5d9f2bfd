use ndarray::Array2;

use crate::clustering::Clusters;
use crate::tasks::BalancingTask;

/// Tasks-vs-clusters counts.
///
/// Row 0 holds the cluster sizes, row `t + 1` the number of rows in each
/// cluster with an observed value for balancing task `t`. Columns follow
/// cluster id order.
pub fn tabulate(tasks: &[BalancingTask], clusters: &Clusters) -> Array2<f64> {
    let mut table = Array2::<f64>::zeros((tasks.len() + 1, clusters.len()));
    for (col, (_, members)) in clusters.iter().enumerate() {
        table[[0, col]] = members.len() as f64;
        for (t, task) in tasks.iter().enumerate() {
            let observed = members.iter().filter(|&&r| task.is_observed(r)).count();
            table[[t + 1, col]] = observed as f64;
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, values: Vec<Option<f64>>) -> BalancingTask {
        BalancingTask {
            name: name.into(),
            parent: name.into(),
            class: None,
            values,
        }
    }

    #[test]
    fn counts_sizes_and_observations_per_cluster() {
        let tasks = vec![
            task("a", vec![Some(1.0), None, Some(2.0), Some(0.0), None]),
            task("b", vec![None, None, None, Some(5.0), Some(1.0)]),
        ];
        let clusters = Clusters::from_groups([(0, vec![0, 2]), (1, vec![]), (2, vec![1, 3, 4])], 5).unwrap();
        let table = tabulate(&tasks, &clusters);
        assert_eq!(table.shape(), &[3, 3]);
        assert_eq!(table.row(0).to_vec(), vec![2.0, 0.0, 3.0]);
        assert_eq!(table.row(1).to_vec(), vec![2.0, 0.0, 1.0]);
        assert_eq!(table.row(2).to_vec(), vec![0.0, 0.0, 2.0]);
        // no entry exceeds its cluster size
        for col in 0..3 {
            assert!(table.column(col).iter().all(|&v| v <= table[[0, col]]));
        }
    }
}
