//! Distributed Sieve of Eratosthenes.
//!
//! The odd values of `[3, N]` are block-partitioned across the workers. Each
//! worker strikes composites in its own block using the small primes
//! (`<= sqrt(N)`), counts the survivors, and a binomial-tree reduction brings
//! the total to rank 0. The value 2 is added back by rank 0 alone.
//!
//! # Small-prime strategies
//!
//! - **Recompute** (default): every worker sieves `[3, sqrt(N)]` itself.
//! - **Broadcast**: rank 0 broadcasts each prime as it is found. Requires
//!   rank 0's share of `[2, N]` to reach `sqrt(N)`.

pub mod coordinator;
pub mod local;
pub mod small;

use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};
use rowstripe_comm::{ChannelComm, Collectives, CommError, Communicator, JobError, World};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::Partition;

pub use coordinator::{check_capacity, SmallPrimeStrategy};
pub use local::{first_multiple_index, odd_candidates, slot_value, LocalSieve};
pub use small::{isqrt, sequential_prime_count, small_primes};

/// Errors raised by the distributed sieve.
#[derive(Debug, Error)]
pub enum SieveError {
    #[error(
        "Too many processes: sieving {max_num} needs the first of {workers} blocks to reach \
         {required}, but it only covers {first_block} values"
    )]
    CapacityExceeded {
        max_num: u64,
        workers: usize,
        first_block: u64,
        required: u64,
    },

    #[error("Cannot allocate a marked array of {elements} elements")]
    Allocation { elements: usize },

    #[error("Failed to build the local thread pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Parameters of one sieve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    /// Upper bound `N` of the range `[2, N]`.
    pub max_num: u64,
    /// Local marking threads per worker.
    pub threads: usize,
    pub strategy: SmallPrimeStrategy,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            max_num: 100,
            threads: 1,
            strategy: SmallPrimeStrategy::default(),
        }
    }
}

/// Result of a sieve run, produced by rank 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SieveReport {
    pub max_num: u64,
    pub workers: usize,
    pub threads: usize,
    pub strategy: SmallPrimeStrategy,
    /// Primes in `[2, max_num]`.
    pub total_primes: u64,
    /// Wall time between the start barrier and the final reduction.
    pub elapsed_secs: f64,
}

fn local_pool(threads: usize) -> Result<Option<ThreadPool>, SieveError> {
    if threads <= 1 {
        return Ok(None);
    }
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("sieve-{}", i))
        .build()
        .map(Some)
        .map_err(|e| SieveError::ThreadPool(e.to_string()))
}

/// Count the primes in `[2, config.max_num]` across every worker of `comm`.
///
/// All workers must call this together. Rank 0 returns the report; every
/// other rank returns `None`.
pub fn run_sieve<C: Communicator>(
    comm: &C,
    config: &SieveConfig,
) -> Result<Option<SieveReport>, SieveError> {
    let rank = comm.rank();
    let max_num = config.max_num;

    comm.barrier()?;
    let start = Instant::now();

    let partition = Partition::new(comm.size(), odd_candidates(max_num));
    let block = partition.block(rank);
    let mut local = match LocalSieve::new(block) {
        Ok(local) => local,
        Err(err) => {
            comm.abort(&err.to_string());
            return Err(err);
        }
    };
    log::debug!(
        "[rank {}] sieving {} odd candidates from {}",
        rank,
        local.len(),
        local.low_value()
    );

    let pool = local_pool(config.threads)?;
    let used = match config.strategy {
        SmallPrimeStrategy::Recompute => {
            coordinator::recompute(comm, max_num, &mut local, pool.as_ref())
        }
        SmallPrimeStrategy::Broadcast => {
            coordinator::broadcast_as_found(comm, max_num, &mut local, pool.as_ref())?
        }
    };

    let mut count = local.count_unmarked();
    if comm.is_root() && max_num >= 2 {
        count += 1;
    }
    log::debug!(
        "[rank {}] {} local primes after {} sieving primes",
        rank,
        count,
        used
    );

    let total = comm.reduce_sum(0, count)?;
    let elapsed_secs = start.elapsed().as_secs_f64();

    Ok(total.map(|total_primes| {
        log::info!(
            "[rank {}] {} primes up to {} in {:.6}s",
            rank,
            total_primes,
            max_num,
            elapsed_secs
        );
        SieveReport {
            max_num,
            workers: comm.size(),
            threads: config.threads,
            strategy: config.strategy,
            total_primes,
            elapsed_secs,
        }
    }))
}

/// Launch a world of `workers` threads and run the sieve on it.
pub fn run_sieve_job(
    config: &SieveConfig,
    workers: usize,
) -> Result<SieveReport, JobError<SieveError>> {
    let world = World::new(workers)?;
    let reports = world.run(|comm: ChannelComm| run_sieve(&comm, config))?;
    reports
        .into_iter()
        .flatten()
        .next()
        .ok_or(JobError::Comm(CommError::Disconnected { peer: 0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sieve_of_100() {
        for workers in [1, 2, 4] {
            let config = SieveConfig {
                max_num: 100,
                threads: 1,
                strategy: SmallPrimeStrategy::Recompute,
            };
            let report = run_sieve_job(&config, workers).unwrap();
            assert_eq!(report.total_primes, 25, "{} workers", workers);
            assert_eq!(report.workers, workers);
        }
    }

    #[test]
    fn test_tiny_ranges() {
        for (max_num, expected) in [(0, 0), (1, 0), (2, 1), (3, 2), (4, 2), (9, 4), (10, 4)] {
            let config = SieveConfig {
                max_num,
                ..SieveConfig::default()
            };
            let report = run_sieve_job(&config, 3).unwrap();
            assert_eq!(report.total_primes, expected, "N = {}", max_num);
        }
    }

    #[test]
    fn test_report_serializes() {
        let config = SieveConfig::default();
        let report = run_sieve_job(&config, 2).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total_primes"], 25);
        assert_eq!(json["strategy"], "recompute");
    }
}
