//! Block partitioning of a regular domain across workers.
//!
//! Worker `i` of `p` owns the half-open index range
//! `[floor(i*n/p), floor((i+1)*n/p))`. The same arithmetic stripes sieve
//! candidates and matrix rows, so every worker can compute any other worker's
//! block without communicating.
//!
//! Callers must ensure `p > 0`.

use std::ops::Range;

use serde::Serialize;

/// First index owned by worker `id`.
pub fn block_low(id: usize, p: usize, n: usize) -> usize {
    // u128 keeps `id * n` exact for any usize domain.
    (id as u128 * n as u128 / p as u128) as usize
}

/// Number of indices owned by worker `id`.
pub fn block_size(id: usize, p: usize, n: usize) -> usize {
    block_low(id + 1, p, n) - block_low(id, p, n)
}

/// Worker owning `index`. Requires `index < n`.
pub fn block_owner(index: usize, p: usize, n: usize) -> usize {
    ((p as u128 * (index as u128 + 1) - 1) / n as u128) as usize
}

/// One worker's share of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    /// Owning worker.
    pub id: usize,
    /// First owned index.
    pub low: usize,
    /// One past the last owned index.
    pub end: usize,
}

impl Block {
    pub fn len(&self) -> usize {
        self.end - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.low
    }

    pub fn range(&self) -> Range<usize> {
        self.low..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

/// A domain of `len` indices split over `workers` workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    workers: usize,
    len: usize,
}

impl Partition {
    /// # Panics
    /// If `workers` is zero.
    pub fn new(workers: usize, len: usize) -> Self {
        assert!(workers > 0, "a partition needs at least one worker");
        Self { workers, len }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block owned by worker `id`.
    pub fn block(&self, id: usize) -> Block {
        Block {
            id,
            low: block_low(id, self.workers, self.len),
            end: block_low(id + 1, self.workers, self.len),
        }
    }

    /// Worker owning `index`, or `None` outside the domain.
    pub fn owner(&self, index: usize) -> Option<usize> {
        (index < self.len).then(|| block_owner(index, self.workers, self.len))
    }

    /// Largest block size; allocation bound for receive buffers.
    pub fn max_block_len(&self) -> usize {
        self.len.div_ceil(self.workers)
    }

    /// All blocks in worker order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.workers).map(move |id| self.block(id))
    }
}
