//! Distributed square multiply by systolic rotation of B.
//!
//! Worker `r` keeps its band of A (`rows x size`) and starts with its own
//! band of B. In round `i` it holds the B band that originated on worker
//! `(r + i) % P`, multiplies it against the matching `rows x rows` column
//! window of A, and adds the partial product into its C band. Between
//! rounds every B band moves one step around the ring. After `P` rounds
//! each C band is complete and no worker ever held more than one B band.

use std::ops::{AddAssign, Mul};

use rayon::ThreadPool;
use rowstripe_comm::{Communicator, Message};

use super::halo::rotate_block;
use super::multiply::{BlockProduct, BlockedMultiply};
use super::store::SquarePair;
use super::{or_abort, Matrix, MatrixError};

/// Compute this worker's band of `C = A * B`.
///
/// All workers must call this together with bands from the same
/// [`scatter_square_pair`](super::store::scatter_square_pair).
pub fn systolic_multiply<C, T, W>(
    comm: &C,
    pair: SquarePair<T>,
    kernel: &BlockedMultiply,
    pool: Option<&ThreadPool>,
) -> Result<Matrix<W>, MatrixError>
where
    C: Communicator,
    T: Copy + Into<W> + Sync + Message,
    W: Copy + Default + AddAssign + Mul<Output = W> + Send,
{
    let workers = comm.size();
    let rank = comm.rank();
    let SquarePair { size, a, mut b, .. } = pair;
    let rows = size / workers;

    let shaped = |m: &Matrix<T>| m.shape() == (rows, size);
    if size % workers != 0 || !shaped(&a) || !shaped(&b) {
        return or_abort(
            comm,
            Err(MatrixError::DimensionMismatch(format!(
                "worker {} holds {:?} and {:?} bands, expected {}x{}",
                rank,
                a.shape(),
                b.shape(),
                rows,
                size
            ))),
        );
    }
    let mut c = or_abort(comm, Matrix::try_zeros(rows, size))?;

    for round in 0..workers {
        let origin = (round + rank) % workers;
        let product = BlockProduct {
            a_at: (0, origin * rows),
            b_at: (0, 0),
            c_at: (0, 0),
            l: rows,
            m: rows,
            n: size,
        };
        let partial = match pool {
            Some(pool) => kernel.accumulate_par(&a, &b, &mut c, product, pool),
            None => kernel.accumulate(&a, &b, &mut c, product),
        };
        or_abort(comm, partial)?;
        log::trace!("[rank {}] round {} used B band from {}", rank, round, origin);

        if round + 1 < workers {
            b = rotate_block(comm, b)?;
        }
    }

    Ok(c)
}
