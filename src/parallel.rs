//! Sizing of the Rayon pool used by pixel-level plugin work
//!
//! The orchestrators run synchronously; only nearest-neighbour interpolation fans out
//! over the global pool.

use crate::errors::{ProcflowError, Result};
use rayon::ThreadPoolBuilder;
use tracing::info;

/// Configure the global Rayon pool and return the number of worker threads in effect.
///
/// `None` leaves Rayon's default of one thread per core in place.
///
/// # Errors
///
/// Fails on a request for zero threads, or when the global pool was already built.
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    let Some(num_threads) = num_threads else {
        info!(
            "Interpolating on the default thread pool ({} cores available)",
            num_cpus::get()
        );
        return Ok(rayon::current_num_threads());
    };
    if num_threads == 0 {
        return Err(ProcflowError::ThreadPool(
            "Thread count must be at least 1".to_string(),
        ));
    }
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("procflow-interp-{}", i))
        .build_global()
        .map_err(|e| ProcflowError::ThreadPool(format!("{} threads: {}", num_threads, e)))?;
    info!("Interpolating with {} threads", num_threads);
    Ok(num_threads)
}
