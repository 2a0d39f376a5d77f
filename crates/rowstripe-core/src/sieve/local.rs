//! Local sieve engine: strike composites inside one worker's block.
//!
//! The global candidate array holds only odd values, slot `i` standing for
//! `2i + 3`. Halving the domain this way means an odd multiple of `p` recurs
//! every `p` slots, so marking strides by `p` rather than `2p`.

use rayon::prelude::*;
use rayon::ThreadPool;

use super::SieveError;
use crate::partition::Block;

/// Slots smaller than this are not worth splitting across threads.
const MIN_PARALLEL_CHUNK: usize = 1 << 14;

/// Number of odd candidates in `[3, max_num]`.
pub fn odd_candidates(max_num: u64) -> usize {
    if max_num < 3 {
        0
    } else {
        ((max_num - 1) / 2) as usize
    }
}

/// Odd value represented by global slot `index`.
pub fn slot_value(index: usize) -> u64 {
    2 * index as u64 + 3
}

/// Offset from `low` (odd) of the first slot to strike for prime `p`: the
/// smallest odd multiple of `p` that is both `>= low` and `>= p * p`.
pub fn first_multiple_index(low: u64, p: u64) -> u64 {
    let square = p * p;
    let first = if square > low {
        square
    } else {
        match low % p {
            0 => low,
            r => {
                let multiple = low + (p - r);
                if multiple % 2 == 0 {
                    multiple + p
                } else {
                    multiple
                }
            }
        }
    };
    (first - low) / 2
}

/// Strike every odd multiple of `p` in `marked`, whose first slot is `low`.
fn mark_multiples(marked: &mut [bool], low: u64, p: u64) {
    let start = first_multiple_index(low, p);
    if start >= marked.len() as u64 {
        return;
    }
    for slot in marked.iter_mut().skip(start as usize).step_by(p as usize) {
        *slot = true;
    }
}

/// A worker's marked array: `false` means still a prime candidate.
#[derive(Debug)]
pub struct LocalSieve {
    low: u64,
    marked: Vec<bool>,
}

impl LocalSieve {
    /// Zero-filled marked array for a block of odd-candidate slots.
    pub fn new(block: Block) -> Result<Self, SieveError> {
        let mut marked = Vec::new();
        marked
            .try_reserve_exact(block.len())
            .map_err(|_| SieveError::Allocation {
                elements: block.len(),
            })?;
        marked.resize(block.len(), false);
        Ok(Self {
            low: slot_value(block.low),
            marked,
        })
    }

    /// Value represented by the first slot.
    pub fn low_value(&self) -> u64 {
        self.low
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    /// Strike the multiples of a single prime.
    pub fn mark_prime(&mut self, p: u64) {
        mark_multiples(&mut self.marked, self.low, p);
    }

    /// Strike the multiples of every prime in `primes`.
    ///
    /// With a pool, the array is cut into disjoint chunks and each thread
    /// runs the whole prime list over its own chunk, so no two threads ever
    /// touch the same slot.
    pub fn mark_all(&mut self, primes: &[u64], pool: Option<&ThreadPool>) {
        let Some(pool) = pool.filter(|pool| pool.current_num_threads() > 1) else {
            for &p in primes {
                self.mark_prime(p);
            }
            return;
        };

        let chunk = (self.marked.len() / (pool.current_num_threads() * 4)).max(MIN_PARALLEL_CHUNK);
        let low = self.low;
        pool.install(|| {
            self.marked
                .par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, slots)| {
                    let chunk_low = low + 2 * (i * chunk) as u64;
                    for &p in primes {
                        mark_multiples(slots, chunk_low, p);
                    }
                });
        });
    }

    /// Number of unmarked slots.
    pub fn count_unmarked(&self) -> u64 {
        self.marked.iter().filter(|&&m| !m).count() as u64
    }
}
