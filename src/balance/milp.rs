//! The cluster-merging MILP handed to `microlp` through `good_lp`.
//!
//! Variables: binary `x[c, s]` (cluster `c` goes to subset `s`) and
//! continuous `dev[t, s] ≥ 0` bounding `|Σ_c a[t,c]·x[c,s] − target[s]|`.

use std::time::Instant;

use good_lp::{Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, variable};
use tracing::warn;

use super::problem::BalanceProblem;
use super::{SolveOutcome, SolveStatus, SolverSettings};
use crate::error::SplitError;

pub fn solve(problem: &BalanceProblem, settings: &SolverSettings) -> Result<SolveOutcome, SplitError> {
    let started = Instant::now();
    let (m, n, s) = (problem.n_tasks(), problem.n_clusters(), problem.n_subsets());
    if n == 0 || s == 0 {
        return Err(SplitError::Solver("nothing to assign".to_string()));
    }
    warn!(
        "[balance] microlp does not enforce the {:.0}s time limit, relative gap {} or {} threads; solving to optimality",
        settings.time_limit.as_secs_f64(),
        settings.relative_gap,
        settings.threads
    );

    let mut vars = ProblemVariables::new();
    let x: Vec<Variable> = (0..n * s).map(|_| vars.add(variable().binary())).collect();
    let dev: Vec<Variable> = (0..m * s).map(|_| vars.add(variable().min(0.0))).collect();

    let mut objective = Expression::with_capacity(m * s);
    for t in 0..m {
        for k in 0..s {
            objective += problem.coefficient(t, k) * dev[t * s + k];
        }
    }

    let mut model = vars.minimise(objective).using(good_lp::solvers::microlp::microlp);

    for c in 0..n {
        let mut one = Expression::with_capacity(s);
        for k in 0..s {
            one += x[c * s + k];
        }
        model.add_constraint(constraint!(one == 1.0));
    }

    let targets = problem.targets();
    for t in 0..m {
        for k in 0..s {
            let mut share = Expression::with_capacity(n);
            for c in 0..n {
                let a = problem.share(t, c);
                if a != 0.0 {
                    share += a * x[c * s + k];
                }
            }
            let d = dev[t * s + k];
            model.add_constraint(constraint!(share.clone() - d <= targets[k]));
            model.add_constraint(constraint!(share + d >= targets[k]));
        }
    }

    let solution = model.solve().map_err(|e| SplitError::Solver(e.to_string()))?;

    let mut assignment = Vec::with_capacity(n);
    for c in 0..n {
        let chosen = (0..s).find(|&k| solution.value(x[c * s + k]) > 0.5);
        match chosen {
            Some(k) => assignment.push(k),
            None => {
                return Err(SplitError::Solver(format!("cluster {c} left unassigned by microlp")));
            }
        }
    }
    let objective = problem.objective(&assignment);

    Ok(SolveOutcome {
        mapping: assignment.iter().map(|k| k + 1).collect(),
        objective,
        bound: objective,
        status: SolveStatus::Optimal,
        nodes: 0,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{SolverBackend, branch};
    use ndarray::array;
    use std::time::Duration;

    #[test]
    fn agrees_with_exact_branch_and_bound() {
        let table = array![
            [6.0, 2.0, 4.0, 3.0, 5.0],
            [2.0, 0.0, 1.0, 3.0, 1.0],
            [0.0, 2.0, 2.0, 0.0, 1.0],
        ];
        let problem = BalanceProblem::new(&table, &[0.6, 0.2, 0.2], false).unwrap();
        let settings = SolverSettings {
            relative_gap: 0.0,
            time_limit: Duration::from_secs(30),
            threads: 1,
            backend: SolverBackend::MicroLp,
        };
        let lp = solve(&problem, &settings).unwrap();
        let bb = branch::solve(&problem, &settings).unwrap();
        assert_eq!(lp.mapping.len(), 5);
        assert!(lp.mapping.iter().all(|&k| (1..=3).contains(&k)));
        assert!((lp.objective - bb.objective).abs() < 1e-6);
    }
}
