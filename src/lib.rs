//! Globally balanced, chemistry-aware multi-task dataset splits.
//!
//! Molecules are grouped into initial clusters by a pluggable strategy, then
//! the clusters are merged into subsets by minimising the weighted deviation
//! of every task's label density from the target subset sizes.

pub mod balance;
pub mod clustering;
pub mod dataset;
pub mod dissimilarity;
pub mod error;
pub mod fingerprint;
pub mod runtime;
pub mod split;
pub mod tasks;

pub use balance::{SolveOutcome, SolveStatus, SolverBackend, SolverSettings};
pub use clustering::{ClusteringStrategy, Clusters, LeaderPickerClustering, MaxMinClustering, RandomClustering, Reseedable};
pub use dataset::{ColumnValues, Dataset};
pub use error::{ConfigError, SplitError};
pub use fingerprint::{Fingerprint, Fingerprinter, SmilesFingerprinter};
pub use split::{GloballyBalancedSplit, SplitConfig, SplitOutcome, SplitReport, SplitRequest};
