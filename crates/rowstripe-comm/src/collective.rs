//! Collective operations built from point-to-point messages.
//!
//! Every collective is a hard synchronisation point: a worker cannot return
//! from one until all participants have reached it. All workers must call the
//! same collectives in the same order.

use crate::backend::{encode, CommError, Communicator, Message, Tag};

/// Broadcast, reduce and barrier for any [`Communicator`].
pub trait Collectives: Communicator + Sized {
    /// Distribute `value` from `root` to every worker.
    ///
    /// Non-root callers pass a placeholder; they get the root's value back.
    fn broadcast<T: Message>(&self, root: usize, value: T) -> Result<T, CommError> {
        check_rank(root, self.size())?;
        if self.rank() == root {
            // Encoded once, shipped to every peer.
            let payload = encode(&value)?;
            for dest in (0..self.size()).filter(|&d| d != root) {
                self.send_bytes(dest, Tag::Broadcast, payload.clone())?;
            }
            Ok(value)
        } else {
            self.recv(root, Tag::Broadcast)
        }
    }

    /// Combine one value per worker with `op`, delivering the result to
    /// `root` only.
    ///
    /// Uses a binomial tree: in round `k` every worker whose relative rank
    /// has bit `2^k` set sends its partial result to the partner `2^k` below
    /// and drops out, so the root holds the total after `ceil(log2 P)`
    /// rounds.
    fn reduce<T, F>(&self, root: usize, value: T, op: F) -> Result<Option<T>, CommError>
    where
        T: Message,
        F: Fn(T, T) -> T,
    {
        let size = self.size();
        check_rank(root, size)?;
        let relative = (self.rank() + size - root) % size;

        let mut acc = value;
        let mut step = 1;
        while step < size {
            if relative & step != 0 {
                let dest = (relative - step + root) % size;
                self.send(dest, Tag::Reduce, acc)?;
                return Ok(None);
            }
            let partner = relative + step;
            if partner < size {
                let incoming: T = self.recv((partner + root) % size, Tag::Reduce)?;
                acc = op(acc, incoming);
            }
            step <<= 1;
        }
        Ok(Some(acc))
    }

    /// Sum of `value` over all workers, delivered to `root`.
    fn reduce_sum(&self, root: usize, value: u64) -> Result<Option<u64>, CommError> {
        self.reduce(root, value, |a, b| a + b)
    }

    /// Reduce to rank 0, then broadcast the result to everyone.
    fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T, CommError>
    where
        T: Message + Clone,
        F: Fn(T, T) -> T,
    {
        let reduced = self.reduce(0, value.clone(), op)?;
        self.broadcast(0, reduced.unwrap_or(value))
    }

    /// Block until every worker has entered the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        if self.rank() == 0 {
            for from in 1..self.size() {
                self.recv::<()>(from, Tag::Barrier)?;
            }
            for dest in 1..self.size() {
                self.send(dest, Tag::Barrier, ())?;
            }
            Ok(())
        } else {
            self.send(0, Tag::Barrier, ())?;
            self.recv::<()>(0, Tag::Barrier)
        }
    }
}

impl<C: Communicator + Sized> Collectives for C {}

fn check_rank(rank: usize, size: usize) -> Result<(), CommError> {
    if rank < size {
        Ok(())
    } else {
        Err(CommError::InvalidRank { rank, size })
    }
}
