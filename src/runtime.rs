use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Once;
use tracing::{info, warn};

pub struct ThreadConfig {
    pub count: usize,
    pub source: String,
}

const ENV_HINTS: [&str; 6] = [
    "GBMT_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

fn parse_env_threads(keys: &[&str]) -> Option<ThreadConfig> {
    for &key in keys {
        if let Ok(v) = std::env::var(key) {
            if let Ok(val) = v.trim().parse::<usize>() {
                if val > 0 {
                    return Some(ThreadConfig {
                        count: val,
                        source: key.to_string(),
                    });
                }
            }
        }
    }
    None
}

/// Thread count from scheduler/env hints, else the machine's parallelism.
pub fn detect_thread_config() -> ThreadConfig {
    if let Some(cfg) = parse_env_threads(&ENV_HINTS) {
        return cfg;
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    ThreadConfig {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Sizes the global rayon pool (fingerprints, similarity scans) once.
pub fn configure_thread_pool() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = detect_thread_config();
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("gbmt-worker-{i}"))
            .build_global()
        {
            Ok(_) => {
                info!("[threads] rayon pool = {} threads (hint: {})", cfg.count, cfg.source);
            }
            Err(err) => {
                warn!("[threads] failed to configure rayon pool ({err}); continuing with default");
            }
        }
    });
}

/// Dedicated pool for one branch-and-bound run, sized by the solver's
/// thread hint. `None` when the pool cannot be built.
pub fn solver_pool(threads: usize) -> Option<ThreadPool> {
    match ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("gbmt-solver-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("[threads] failed to build solver pool ({err}); searching on the calling thread");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_count_is_positive() {
        assert!(detect_thread_config().count >= 1);
    }

    #[test]
    fn solver_pool_has_requested_size() {
        let pool = solver_pool(2).expect("pool");
        assert_eq!(pool.current_num_threads(), 2);
    }

    #[test]
    fn unset_hints_are_skipped() {
        assert!(parse_env_threads(&["GBMT_TEST_SURELY_UNSET_VARIABLE"]).is_none());
    }
}
