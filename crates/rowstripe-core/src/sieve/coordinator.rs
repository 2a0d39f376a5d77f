//! How the small primes reach every worker.
//!
//! Two strategies produce the same ordered set on every worker:
//!
//! - [`SmallPrimeStrategy::Recompute`] (default): each worker sieves
//!   `[3, sqrt(N)]` itself. No messages; the `O(sqrt N)` work is repeated P
//!   times, which is negligible next to the `O(N / P)` local share.
//! - [`SmallPrimeStrategy::Broadcast`]: rank 0 discovers primes one at a time
//!   with a full (not halved) array over `[2, sqrt(N)]` and broadcasts each
//!   before anyone marks with it. The loop ends when the broadcast prime
//!   squared exceeds `N`; there is no sentinel message.

use rayon::ThreadPool;
use rowstripe_comm::{Collectives, Communicator};
use serde::{Deserialize, Serialize};

use super::local::LocalSieve;
use super::small::{isqrt, small_primes};
use super::SieveError;

/// Source of the small-prime set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmallPrimeStrategy {
    #[default]
    Recompute,
    Broadcast,
}

impl std::str::FromStr for SmallPrimeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recompute" => Ok(Self::Recompute),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(format!(
                "unknown strategy '{}' (expected 'recompute' or 'broadcast')",
                other
            )),
        }
    }
}

/// The broadcast strategy needs every sieving prime to fall inside rank 0's
/// share of `[2, N]`.
pub fn check_capacity(max_num: u64, workers: usize) -> Result<(), SieveError> {
    let first_block = max_num.saturating_sub(1) / workers as u64;
    let required = isqrt(max_num);
    if 2 + first_block < required {
        return Err(SieveError::CapacityExceeded {
            max_num,
            workers,
            first_block,
            required,
        });
    }
    Ok(())
}

/// Mark `local` with independently recomputed small primes.
///
/// Returns how many primes were used.
pub fn recompute<C: Communicator>(
    comm: &C,
    max_num: u64,
    local: &mut LocalSieve,
    pool: Option<&ThreadPool>,
) -> usize {
    let primes = small_primes(max_num);
    log::debug!(
        "[rank {}] recomputed {} sieving primes up to {}",
        comm.rank(),
        primes.len(),
        isqrt(max_num)
    );
    local.mark_all(&primes, pool);
    primes.len()
}

/// Rank 0's sequential sieve over `[0, sqrt(N)]`.
struct LeaderSieve {
    marked: Vec<bool>,
}

impl LeaderSieve {
    fn new(limit: u64) -> Self {
        Self {
            marked: vec![false; limit as usize + 1],
        }
    }

    fn limit(&self) -> u64 {
        self.marked.len() as u64 - 1
    }

    /// Strike multiples of `prime` and return the next unmarked value, or
    /// `limit + 1` once the array is exhausted. Either way the caller can
    /// test `p * p > N` to decide whether to continue.
    fn advance(&mut self, prime: u64) -> u64 {
        let mut j = prime * prime;
        while j <= self.limit() {
            self.marked[j as usize] = true;
            j += prime;
        }
        let mut next = prime + 1;
        while next <= self.limit() && self.marked[next as usize] {
            next += 1;
        }
        next
    }
}

/// Mark `local` with primes broadcast one at a time from rank 0.
///
/// Rank 0 verifies the capacity precondition first and aborts the whole job
/// if it does not hold. Returns how many primes were used.
pub fn broadcast_as_found<C: Communicator>(
    comm: &C,
    max_num: u64,
    local: &mut LocalSieve,
    pool: Option<&ThreadPool>,
) -> Result<usize, SieveError> {
    let mut leader = None;
    if comm.is_root() {
        if let Err(err) = check_capacity(max_num, comm.size()) {
            comm.abort(&err.to_string());
            return Err(err);
        }
        leader = Some(LeaderSieve::new(isqrt(max_num)));
    }

    // Two never reaches the odd-only local arrays; start from the prime after it.
    let mut prime = leader.as_mut().map_or(0, |l| l.advance(2));
    let mut used = 0;
    loop {
        prime = comm.broadcast(0, prime)?;
        if prime.saturating_mul(prime) > max_num {
            break;
        }
        local.mark_all(&[prime], pool);
        used += 1;
        if let Some(leader) = leader.as_mut() {
            prime = leader.advance(prime);
        }
    }

    log::debug!(
        "[rank {}] received {} broadcast sieving primes",
        comm.rank(),
        used
    );
    Ok(used)
}
