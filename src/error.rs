use thiserror::Error;

/// Everything that can stop a split run.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The solver finished without any feasible assignment.
    #[error("solver failed: {0}")]
    Solver(String),
    #[error("row {row}: missing structure in column {column:?}")]
    MissingStructure { row: usize, column: String },
    #[error("cannot fingerprint structure {0:?}")]
    InvalidStructure(String),
}

/// Checked eagerly, before any clustering or solving.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("either clusters or a clustering strategy must be provided")]
    MissingClusterSource,
    #[error("only one of clusters or a clustering strategy may be provided")]
    ConflictingClusterSource,
    #[error("n_splits must be at least 1")]
    ZeroSplits,
    #[error("n_splits > 1 does not work with precomputed clusters")]
    MultiSplitWithPrecomputed,
    #[error("n_splits > 1 does not work with clustering strategy {0}")]
    NotReseedable(String),
    #[error(
        "the requested number of subsets ({subsets}) cannot be larger than the number of initial clusters ({clusters})"
    )]
    TooManySubsets { subsets: usize, clusters: usize },
    #[error("subset sizes must be a non-empty list of positive finite numbers, got {0:?}")]
    InvalidSizes(Vec<f64>),
    #[error("relative gap must lie in [0, 1), got {0}")]
    InvalidGap(f64),
    #[error("time limit must be positive")]
    ZeroTimeLimit,
    #[error("column {0:?} not found")]
    UnknownColumn(String),
    #[error("column {0:?} is not numeric and cannot be balanced")]
    NonNumericTask(String),
    #[error("column {0:?} is not a text column")]
    NonTextColumn(String),
    #[error("column {column:?} has {rows} rows, dataset has {expected}")]
    ColumnLength {
        column: String,
        rows: usize,
        expected: usize,
    },
    #[error("invalid clusters: {0}")]
    InvalidClusters(String),
}

pub type Result<T, E = SplitError> = std::result::Result<T, E>;
