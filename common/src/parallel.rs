//! Ordered fan-out of owned jobs onto a rayon pool.
//!
//! Results always come back in job order, independent of which worker
//! finishes first.

use rayon::prelude::*;
use rayon::ThreadPool;

/// Builds a dedicated pool for `workers` threads.
///
/// Returns `Ok(None)` for 0 or 1 workers: callers then run jobs on their own thread.
pub fn build_pool(
    workers: usize,
    name: &str,
) -> Result<Option<ThreadPool>, rayon::ThreadPoolBuildError> {
    if workers <= 1 {
        return Ok(None);
    }
    let prefix = name.to_string();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |idx| format!("{prefix}-{idx}"))
        .build()?;
    Ok(Some(pool))
}

/// Maps `f` over `jobs`, in parallel on `pool` when one is given.
///
/// Semantically equivalent to `jobs.into_iter().map(f).collect()`.
pub fn ordered_map<T, R, F>(pool: Option<&ThreadPool>, jobs: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync + Send,
{
    match pool {
        Some(pool) => pool.install(|| jobs.into_par_iter().map(&f).collect()),
        None => jobs.into_iter().map(f).collect(),
    }
}
