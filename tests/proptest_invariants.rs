use std::time::Duration;

use gbmt_splits::balance::{BalanceProblem, merge_clusters, tabulate};
use gbmt_splits::tasks::BalancingTask;
use gbmt_splits::{Clusters, SolverBackend, SolverSettings};
use ndarray::Array2;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const MIN_PROPTEST_CASES: u32 = 64;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn settings() -> SolverSettings {
    SolverSettings {
        relative_gap: 0.0,
        time_limit: Duration::from_secs(20),
        threads: 1,
        backend: SolverBackend::BranchAndBound,
    }
}

/// Cluster sizes plus, per task, an observed count no larger than the size.
fn table_strategy() -> impl Strategy<Value = Array2<f64>> {
    (3usize..9, 0usize..4).prop_flat_map(|(n, tasks)| {
        prop::collection::vec(1usize..20, n).prop_flat_map(move |sizes| {
            let rows = prop::collection::vec(
                sizes.iter().map(|&s| 0..=s).collect::<Vec<_>>(),
                tasks,
            );
            (Just(sizes), rows).prop_map(|(sizes, rows)| {
                let n = sizes.len();
                let mut t = Array2::<f64>::zeros((rows.len() + 1, n));
                for (c, &s) in sizes.iter().enumerate() {
                    t[[0, c]] = s as f64;
                }
                for (r, row) in rows.iter().enumerate() {
                    for (c, &v) in row.iter().enumerate() {
                        t[[r + 1, c]] = v as f64;
                    }
                }
                t
            })
        })
    })
}

fn sizes_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1u32..10, 2..=3).prop_map(|v| v.into_iter().map(f64::from).collect())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        .. ProptestConfig::default()
    })]

    #[test]
    fn mapping_is_total_and_within_range(table in table_strategy(), sizes in sizes_strategy(), equal in any::<bool>()) {
        let problem = BalanceProblem::new(&table, &sizes, equal).expect("S <= N by construction");
        let outcome = merge_clusters(&problem, &settings()).expect("solver returns a mapping");
        prop_assert_eq!(outcome.mapping.len(), table.ncols());
        prop_assert!(outcome.mapping.iter().all(|&k| k >= 1 && k <= sizes.len()));
        prop_assert!(outcome.bound <= outcome.objective + 1e-9);
    }

    #[test]
    fn record_fractions_sum_to_one(table in table_strategy(), sizes in sizes_strategy()) {
        let problem = BalanceProblem::new(&table, &sizes, true).expect("valid problem");
        let outcome = merge_clusters(&problem, &settings()).expect("solver returns a mapping");
        let achieved = problem.achieved(&outcome.zero_based());
        let total: f64 = achieved.row(0).sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_threaded_search_is_repeatable(table in table_strategy(), sizes in sizes_strategy()) {
        let problem = BalanceProblem::new(&table, &sizes, false).expect("valid problem");
        let first = merge_clusters(&problem, &settings()).expect("first run");
        let second = merge_clusters(&problem, &settings()).expect("second run");
        prop_assert_eq!(first.mapping, second.mapping);
    }

    #[test]
    fn tabulated_counts_never_exceed_cluster_sizes(
        labels in prop::collection::vec(0i64..6, 1..60),
        masks in prop::collection::vec(prop::collection::vec(any::<bool>(), 60), 0..4),
    ) {
        let n = labels.len();
        let clusters = Clusters::from_labels(&labels);
        let tasks: Vec<BalancingTask> = masks
            .iter()
            .enumerate()
            .map(|(i, mask)| BalancingTask {
                name: format!("t{i}"),
                parent: format!("t{i}"),
                class: None,
                values: mask[..n].iter().map(|&m| m.then_some(1.0)).collect(),
            })
            .collect();
        let table = tabulate(&tasks, &clusters);
        prop_assert_eq!(table.row(0).sum() as usize, n);
        for c in 0..table.ncols() {
            prop_assert!(table.column(c).iter().all(|&v| v <= table[[0, c]]));
        }
    }
}
