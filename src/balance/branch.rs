//! Depth-first branch-and-bound over cluster → subset assignments.
//!
//! Clusters are branched on in order of decreasing weighted mass. The bound
//! of a partial assignment relaxes the problem per quantity: the mass of the
//! still-unassigned clusters may be spread freely over subsets, so overshoot
//! already committed is paid in full and the remaining mass fills deficits
//! from the most expensive subset down. At a leaf the bound equals the
//! objective.
//!
//! A greedy dive plus move/swap local search provides the first incumbent.
//! Nodes are pruned when their bound reaches `incumbent · (1 − gap)`. With
//! more than one thread, the top of the tree is cut into subproblems that
//! are searched on a dedicated rayon pool sharing one incumbent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

use super::problem::BalanceProblem;
use super::{SolveOutcome, SolveStatus, SolverSettings};
use crate::error::SplitError;
use crate::runtime;

const EPS: f64 = 1e-9;

/// Nodes between two wall-clock checks.
const CHECK_EVERY: u64 = 1024;

/// Subproblems per thread when the tree is cut for parallel search.
const ROOTS_PER_THREAD: usize = 8;

type Children = SmallVec<[(f64, usize); 8]>;

struct Frame {
    depth: usize,
    children: Children,
    cursor: usize,
}

#[derive(Clone)]
struct Subproblem {
    /// Subset of `order[i]` for every `i < path.len()`.
    path: Vec<usize>,
    partial: Vec<f64>,
    occupied: Vec<usize>,
    bound: f64,
}

struct Incumbent {
    assignment: Vec<usize>,
}

struct Shared {
    best: AtomicU64,
    incumbent: Mutex<Incumbent>,
    stop: AtomicBool,
    nodes: AtomicU64,
    deadline: Instant,
    gap: f64,
}

impl Shared {
    fn new(objective: f64, assignment: Vec<usize>, deadline: Instant, gap: f64) -> Self {
        Self {
            best: AtomicU64::new(objective.to_bits()),
            incumbent: Mutex::new(Incumbent { assignment }),
            stop: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
            deadline,
            gap,
        }
    }

    #[inline]
    fn objective(&self) -> f64 {
        f64::from_bits(self.best.load(Ordering::Acquire))
    }

    /// Bounds at or above this value cannot improve the incumbent by more
    /// than the relative gap.
    #[inline]
    fn cutoff(&self) -> f64 {
        self.objective() * (1.0 - self.gap) - EPS
    }

    fn offer(&self, objective: f64, assignment: Vec<usize>) {
        if objective >= self.objective() - EPS {
            return;
        }
        let mut guard = self.incumbent.lock().unwrap_or_else(PoisonError::into_inner);
        // re-check under the lock, another worker may have won meanwhile
        if objective < self.objective() - EPS {
            guard.assignment = assignment;
            self.best.store(objective.to_bits(), Ordering::Release);
        }
    }

    fn should_stop(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        if Instant::now() >= self.deadline {
            self.stop.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn into_parts(self) -> (f64, Vec<usize>, bool, u64) {
        let objective = self.objective();
        let timed_out = self.stop.load(Ordering::Relaxed);
        let nodes = self.nodes.load(Ordering::Relaxed);
        let inc = self.incumbent.into_inner().unwrap_or_else(PoisonError::into_inner);
        (objective, inc.assignment, timed_out, nodes)
    }
}

struct Tree<'a> {
    problem: &'a BalanceProblem,
    m: usize,
    n: usize,
    s: usize,
    /// Clusters in branching order.
    order: Vec<usize>,
    /// `suffix[k * m + t]`: mass of quantity `t` in clusters `order[k..]`.
    suffix: Vec<f64>,
    /// Subsets by ascending weight.
    by_weight: Vec<usize>,
}

impl<'a> Tree<'a> {
    fn new(problem: &'a BalanceProblem) -> Self {
        let (m, n, s) = (problem.n_tasks(), problem.n_clusters(), problem.n_subsets());
        let tw = problem.task_weights();
        let mass = |c: usize| (0..m).map(|t| tw[t] * problem.share(t, c)).sum::<f64>();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&x, &y| mass(y).total_cmp(&mass(x)).then(x.cmp(&y)));

        let mut suffix = vec![0.0; (n + 1) * m];
        for k in (0..n).rev() {
            for t in 0..m {
                suffix[k * m + t] = suffix[(k + 1) * m + t] + problem.share(t, order[k]);
            }
        }

        let sw = problem.subset_weights();
        let mut by_weight: Vec<usize> = (0..s).collect();
        by_weight.sort_by(|&x, &y| sw[x].total_cmp(&sw[y]).then(x.cmp(&y)));

        Self {
            problem,
            m,
            n,
            s,
            order,
            suffix,
            by_weight,
        }
    }

    #[inline]
    fn assign(&self, partial: &mut [f64], cluster: usize, subset: usize) {
        for t in 0..self.m {
            partial[t * self.s + subset] += self.problem.share(t, cluster);
        }
    }

    #[inline]
    fn unassign(&self, partial: &mut [f64], cluster: usize, subset: usize) {
        for t in 0..self.m {
            partial[t * self.s + subset] -= self.problem.share(t, cluster);
        }
    }

    /// Lower bound for any completion of `partial` once `order[..depth]`
    /// are assigned.
    fn bound(&self, depth: usize, partial: &[f64]) -> f64 {
        let targets = self.problem.targets();
        let sw = self.problem.subset_weights();
        let tw = self.problem.task_weights();
        let mut total = 0.0;
        for t in 0..self.m {
            let row = &partial[t * self.s..(t + 1) * self.s];
            let remaining = self.suffix[depth * self.m + t];
            let mut cost = 0.0;
            let mut deficit = 0.0;
            for k in 0..self.s {
                let d = targets[k] - row[k];
                if d < 0.0 {
                    cost -= sw[k] * d;
                } else {
                    deficit += d;
                }
            }
            let mut unfilled = deficit - remaining;
            if unfilled < 0.0 {
                // more mass left than room: the excess overshoots somewhere
                cost -= unfilled * sw[self.by_weight[0]];
            } else {
                for &k in &self.by_weight {
                    if unfilled <= 0.0 {
                        break;
                    }
                    let d = (targets[k] - row[k]).max(0.0);
                    let u = d.min(unfilled);
                    cost += sw[k] * u;
                    unfilled -= u;
                }
            }
            total += tw[t] * cost;
        }
        total
    }

    /// Children of the node at `depth`, cheapest bound first. Among subsets
    /// that are still empty and share a target size only the first is tried.
    fn expand(&self, depth: usize, partial: &mut [f64], occupied: &[usize]) -> Children {
        let targets = self.problem.targets();
        let c = self.order[depth];
        let mut children = Children::new();
        for k in 0..self.s {
            if occupied[k] == 0 && (0..k).any(|j| occupied[j] == 0 && targets[j] == targets[k]) {
                continue;
            }
            self.assign(partial, c, k);
            let lb = self.bound(depth + 1, partial);
            self.unassign(partial, c, k);
            children.push((lb, k));
        }
        children.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
        children
    }

    fn decode(&self, path: &[usize]) -> Vec<usize> {
        let mut assignment = vec![0usize; self.n];
        for (pos, &k) in path.iter().enumerate() {
            assignment[self.order[pos]] = k;
        }
        assignment
    }

    fn root(&self) -> Subproblem {
        let partial = vec![0.0; self.m * self.s];
        Subproblem {
            bound: self.bound(0, &partial),
            path: Vec::with_capacity(self.n),
            partial,
            occupied: vec![0; self.s],
        }
    }

    /// Follows the cheapest child all the way down.
    fn greedy(&self) -> Vec<usize> {
        let Subproblem {
            mut path,
            mut partial,
            mut occupied,
            ..
        } = self.root();
        for depth in 0..self.n {
            let children = self.expand(depth, &mut partial, &occupied);
            let k = children.first().map_or(0, |&(_, k)| k);
            self.assign(&mut partial, self.order[depth], k);
            occupied[k] += 1;
            path.push(k);
        }
        self.decode(&path)
    }

    /// Single-cluster moves, then pairwise swaps, until no step improves
    /// the objective or the deadline passes.
    fn improve(&self, assignment: &mut [usize], deadline: Instant) -> f64 {
        let (m, s) = (self.m, self.s);
        let p = self.problem;
        let targets = p.targets();
        let term = |t: usize, k: usize, v: f64| p.coefficient(t, k) * (v - targets[k]).abs();

        let mut q = vec![0.0; m * s];
        for (c, &k) in assignment.iter().enumerate() {
            for t in 0..m {
                q[t * s + k] += p.share(t, c);
            }
        }

        'passes: loop {
            let mut improved = false;

            for c in 0..self.n {
                if Instant::now() >= deadline {
                    break 'passes;
                }
                let from = assignment[c];
                let mut best = (-EPS, from);
                for to in 0..s {
                    if to == from {
                        continue;
                    }
                    let mut delta = 0.0;
                    for t in 0..m {
                        let v = p.share(t, c);
                        if v == 0.0 {
                            continue;
                        }
                        let (qf, qt) = (q[t * s + from], q[t * s + to]);
                        delta += term(t, from, qf - v) - term(t, from, qf) + term(t, to, qt + v)
                            - term(t, to, qt);
                    }
                    if delta < best.0 {
                        best = (delta, to);
                    }
                }
                let to = best.1;
                if to != from {
                    for t in 0..m {
                        let v = p.share(t, c);
                        q[t * s + from] -= v;
                        q[t * s + to] += v;
                    }
                    assignment[c] = to;
                    improved = true;
                }
            }

            if !improved {
                for c1 in 0..self.n {
                    if Instant::now() >= deadline {
                        break 'passes;
                    }
                    for c2 in (c1 + 1)..self.n {
                        let (s1, s2) = (assignment[c1], assignment[c2]);
                        if s1 == s2 {
                            continue;
                        }
                        let mut delta = 0.0;
                        for t in 0..m {
                            let d = p.share(t, c2) - p.share(t, c1);
                            if d == 0.0 {
                                continue;
                            }
                            let (q1, q2) = (q[t * s + s1], q[t * s + s2]);
                            delta += term(t, s1, q1 + d) - term(t, s1, q1) + term(t, s2, q2 - d)
                                - term(t, s2, q2);
                        }
                        if delta < -EPS {
                            for t in 0..m {
                                let d = p.share(t, c2) - p.share(t, c1);
                                q[t * s + s1] += d;
                                q[t * s + s2] -= d;
                            }
                            assignment.swap(c1, c2);
                            improved = true;
                        }
                    }
                }
            }

            if !improved {
                break;
            }
        }
        p.objective(assignment)
    }

    /// Cuts the top of the tree into at least `want` subproblems (when the
    /// tree is deep enough), dropping those already beaten by the incumbent.
    fn split_roots(&self, want: usize, shared: &Shared) -> Vec<Subproblem> {
        let mut frontier = vec![self.root()];
        while frontier.len() < want {
            let Some(depth) = frontier.first().map(|sp| sp.path.len()) else {
                break;
            };
            if depth + 1 >= self.n {
                break;
            }
            let mut next = Vec::with_capacity(frontier.len() * self.s);
            for mut sp in frontier {
                let children = self.expand(depth, &mut sp.partial, &sp.occupied);
                for (lb, k) in children {
                    if lb >= shared.cutoff() {
                        continue;
                    }
                    let mut child = sp.clone();
                    self.assign(&mut child.partial, self.order[depth], k);
                    child.occupied[k] += 1;
                    child.path.push(k);
                    child.bound = lb;
                    next.push(child);
                }
            }
            frontier = next;
        }
        frontier.sort_by(|a, b| a.bound.total_cmp(&b.bound));
        frontier
    }

    fn dive(&self, root: Subproblem, shared: &Shared) {
        if root.bound >= shared.cutoff() || shared.should_stop() {
            return;
        }
        let Subproblem {
            mut path,
            mut partial,
            mut occupied,
            ..
        } = root;
        let base = path.len();
        if base == self.n {
            let assignment = self.decode(&path);
            shared.offer(self.problem.objective(&assignment), assignment);
            return;
        }

        let mut stack = vec![Frame {
            depth: base,
            children: self.expand(base, &mut partial, &occupied),
            cursor: 0,
        }];
        let mut nodes = 0u64;

        while let Some(frame) = stack.last_mut() {
            if frame.cursor == frame.children.len() {
                stack.pop();
                if path.len() > base {
                    if let Some(k) = path.pop() {
                        self.unassign(&mut partial, self.order[path.len()], k);
                        occupied[k] -= 1;
                    }
                }
                continue;
            }
            let (lb, k) = frame.children[frame.cursor];
            frame.cursor += 1;
            // children are sorted, so the rest of this frame is pruned too
            if lb >= shared.cutoff() {
                frame.cursor = frame.children.len();
                continue;
            }
            let depth = frame.depth;

            nodes += 1;
            if nodes % CHECK_EVERY == 0 && shared.should_stop() {
                break;
            }

            if depth + 1 == self.n {
                path.push(k);
                let assignment = self.decode(&path);
                path.pop();
                shared.offer(self.problem.objective(&assignment), assignment);
                continue;
            }

            self.assign(&mut partial, self.order[depth], k);
            occupied[k] += 1;
            path.push(k);
            let children = self.expand(depth + 1, &mut partial, &occupied);
            stack.push(Frame {
                depth: depth + 1,
                children,
                cursor: 0,
            });
        }
        shared.nodes.fetch_add(nodes, Ordering::Relaxed);
    }
}

pub fn solve(problem: &BalanceProblem, settings: &SolverSettings) -> Result<SolveOutcome, SplitError> {
    let started = Instant::now();
    let deadline = started + settings.time_limit;
    if problem.n_clusters() == 0 || problem.n_subsets() == 0 {
        return Err(SplitError::Solver("nothing to assign".to_string()));
    }

    let tree = Tree::new(problem);
    let mut assignment = tree.greedy();
    let greedy_objective = problem.objective(&assignment);
    let warm = tree.improve(&mut assignment, deadline);
    debug!("[balance] warm start: greedy {greedy_objective:.6}, local search {warm:.6}");

    let root_bound = tree.root().bound;
    let shared = Shared::new(warm, assignment, deadline, settings.relative_gap);

    if root_bound < shared.cutoff() && !shared.should_stop() {
        let threads = settings.threads.max(1);
        let pool = if threads > 1 { runtime::solver_pool(threads) } else { None };
        match pool {
            Some(pool) => {
                let roots = tree.split_roots(threads * ROOTS_PER_THREAD, &shared);
                debug!("[balance] searching {} subproblems on {} threads", roots.len(), threads);
                pool.install(|| roots.into_par_iter().for_each(|sp| tree.dive(sp, &shared)));
            }
            None => tree.dive(tree.root(), &shared),
        }
    }

    let (objective, assignment, timed_out, nodes) = shared.into_parts();
    let (status, bound) = if timed_out {
        (SolveStatus::TimeLimit, root_bound.min(objective))
    } else if settings.relative_gap == 0.0 || objective - root_bound <= EPS {
        (SolveStatus::Optimal, objective)
    } else {
        (
            SolveStatus::WithinGap,
            root_bound.max(objective * (1.0 - settings.relative_gap)),
        )
    };

    Ok(SolveOutcome {
        mapping: assignment.iter().map(|k| k + 1).collect(),
        objective,
        bound,
        status,
        nodes,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::SolverBackend;
    use ndarray::{Array2, array};
    use std::time::Duration;

    fn exact() -> SolverSettings {
        SolverSettings {
            relative_gap: 0.0,
            time_limit: Duration::from_secs(30),
            threads: 1,
            backend: SolverBackend::BranchAndBound,
        }
    }

    /// Every assignment of `n` clusters to `s` subsets.
    fn brute_force(problem: &BalanceProblem) -> f64 {
        let (n, s) = (problem.n_clusters(), problem.n_subsets());
        let mut best = f64::INFINITY;
        let mut a = vec![0usize; n];
        loop {
            best = best.min(problem.objective(&a));
            let mut i = 0;
            loop {
                if i == n {
                    return best;
                }
                a[i] += 1;
                if a[i] < s {
                    break;
                }
                a[i] = 0;
                i += 1;
            }
        }
    }

    fn sample_table() -> Array2<f64> {
        array![
            [7.0, 3.0, 5.0, 2.0, 9.0, 4.0, 6.0, 1.0],
            [3.0, 1.0, 0.0, 2.0, 4.0, 1.0, 2.0, 1.0],
            [2.0, 2.0, 5.0, 0.0, 1.0, 3.0, 0.0, 0.0],
            [0.5, 1.5, 2.0, 1.0, 3.0, 0.0, 4.0, 1.0],
        ]
    }

    #[test]
    fn bound_is_exact_at_leaves_and_below_objective_inside() {
        let problem = BalanceProblem::new(&sample_table(), &[0.6, 0.25, 0.15], false).unwrap();
        let tree = Tree::new(&problem);
        let path = vec![0, 1, 0, 2, 0, 1, 0, 2];
        let mut partial = vec![0.0; tree.m * tree.s];
        for (depth, &k) in path.iter().enumerate() {
            // every prefix bound stays below the completed objective
            let assignment = tree.decode(&path);
            assert!(tree.bound(depth, &partial) <= problem.objective(&assignment) + 1e-12);
            tree.assign(&mut partial, tree.order[depth], k);
        }
        let leaf = tree.bound(path.len(), &partial);
        assert!((leaf - problem.objective(&tree.decode(&path))).abs() < 1e-12);
    }

    #[test]
    fn exact_search_matches_brute_force() {
        for sizes in [vec![0.5, 0.5], vec![0.6, 0.25, 0.15], vec![0.8, 0.1, 0.1]] {
            let problem = BalanceProblem::new(&sample_table(), &sizes, false).unwrap();
            let outcome = solve(&problem, &exact()).unwrap();
            assert_eq!(outcome.status, SolveStatus::Optimal);
            let optimum = brute_force(&problem);
            assert!(
                (outcome.objective - optimum).abs() < 1e-9,
                "sizes {sizes:?}: got {}, optimum {optimum}",
                outcome.objective
            );
        }
    }

    #[test]
    fn parallel_search_reaches_the_same_optimum() {
        let problem = BalanceProblem::new(&sample_table(), &[0.6, 0.25, 0.15], true).unwrap();
        let serial = solve(&problem, &exact()).unwrap();
        let parallel = solve(&problem, &SolverSettings { threads: 4, ..exact() }).unwrap();
        assert!((serial.objective - parallel.objective).abs() < 1e-9);
    }

    #[test]
    fn gap_solution_is_within_gap() {
        let problem = BalanceProblem::new(&sample_table(), &[0.6, 0.25, 0.15], false).unwrap();
        let gap = 0.3;
        let outcome = solve(&problem, &SolverSettings { relative_gap: gap, ..exact() }).unwrap();
        let optimum = brute_force(&problem);
        assert!(outcome.objective * (1.0 - gap) <= optimum + 1e-9);
        assert!(outcome.bound <= optimum + 1e-9);
    }

    #[test]
    fn as_many_subsets_as_clusters_is_feasible() {
        let table = array![[5.0, 3.0, 2.0], [1.0, 1.0, 1.0]];
        let problem = BalanceProblem::new(&table, &[0.5, 0.3, 0.2], true).unwrap();
        let outcome = solve(&problem, &exact()).unwrap();
        let mut seen = outcome.mapping.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(outcome.mapping, vec![1, 2, 3]);
    }

    #[test]
    fn repeated_runs_give_the_same_mapping() {
        let problem = BalanceProblem::new(&sample_table(), &[0.7, 0.15, 0.15], false).unwrap();
        let a = solve(&problem, &exact()).unwrap();
        let b = solve(&problem, &exact()).unwrap();
        assert_eq!(a.mapping, b.mapping);
    }

    #[test]
    fn equal_targets_are_not_explored_twice() {
        let problem = BalanceProblem::new(&sample_table(), &[0.5, 0.25, 0.25], true).unwrap();
        let tree = Tree::new(&problem);
        let mut partial = vec![0.0; tree.m * tree.s];
        let children = tree.expand(0, &mut partial, &[0, 0, 0]);
        let subsets: Vec<usize> = children.iter().map(|&(_, k)| k).collect();
        assert_eq!(subsets.len(), 2);
        assert!(subsets.contains(&0) && subsets.contains(&1));
    }

    #[test]
    fn tiny_time_limit_still_returns_a_feasible_mapping() {
        let table = Array2::from_shape_fn((3, 60), |(t, c)| ((t * 7 + c * 13) % 11) as f64 + 1.0);
        let problem = BalanceProblem::new(&table, &[0.8, 0.1, 0.1], false).unwrap();
        let settings = SolverSettings {
            time_limit: Duration::from_millis(1),
            ..exact()
        };
        let outcome = solve(&problem, &settings).unwrap();
        assert_eq!(outcome.mapping.len(), 60);
        assert!(outcome.mapping.iter().all(|&k| (1..=3).contains(&k)));
        assert!(outcome.bound <= outcome.objective + 1e-12);
    }
}
