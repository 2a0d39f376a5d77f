//! Ordered output of row-striped results on rank 0.
//!
//! Rank 0 handles its own band first, then prompts each worker in rank order
//! and waits for that worker's band as the response. Only one foreign band
//! is ever resident on rank 0, and workers never send unasked.

use std::fmt::Display;
use std::io::Write;

use rowstripe_comm::{Communicator, Message, Tag};

use crate::life::LIVE;
use crate::matrix::format::write_rows;
use crate::matrix::{or_abort, Matrix, MatrixError};

/// Feed every worker's band to `sink` on rank 0, in rank order.
///
/// All workers must call this together; only rank 0's `sink` is invoked. If
/// the sink fails, the job is aborted.
pub fn collect_rows<C, T, F>(comm: &C, local: &Matrix<T>, mut sink: F) -> Result<(), MatrixError>
where
    C: Communicator,
    T: Clone + Message,
    F: FnMut(&Matrix<T>) -> Result<(), MatrixError>,
{
    if !comm.is_root() {
        comm.recv::<()>(0, Tag::Prompt)?;
        comm.send(0, Tag::Response, local.clone())?;
        return Ok(());
    }

    or_abort(comm, sink(local))?;
    for worker in 1..comm.size() {
        comm.send(worker, Tag::Prompt, ())?;
        let band: Matrix<T> = comm.recv(worker, Tag::Response)?;
        or_abort(comm, sink(&band))?;
    }
    Ok(())
}

/// Assemble the full matrix on rank 0. Other ranks get `None`.
pub fn gather_rows<C, T>(comm: &C, local: &Matrix<T>) -> Result<Option<Matrix<T>>, MatrixError>
where
    C: Communicator,
    T: Clone + Message,
{
    let cols = local.cols();
    let mut rows = 0;
    let mut data: Vec<T> = Vec::new();
    collect_rows(comm, local, |band| {
        if band.cols() != cols {
            return Err(MatrixError::DimensionMismatch(format!(
                "band of width {} in a matrix of width {}",
                band.cols(),
                cols
            )));
        }
        data.try_reserve(band.len())
            .map_err(|_| MatrixError::Allocation {
                elements: data.len() + band.len(),
            })?;
        data.extend_from_slice(band.as_slice());
        rows += band.rows();
        Ok(())
    })?;

    if comm.is_root() {
        Ok(Some(Matrix::from_vec(rows, cols, data)?))
    } else {
        Ok(None)
    }
}

/// Print a matrix as whitespace-separated rows.
pub fn write_matrix<W: Write, T: Display>(out: &mut W, matrix: &Matrix<T>) -> std::io::Result<()> {
    write_rows(out, matrix.iter_rows())
}

/// Print a Life board: `+` for live cells, a space for anything else.
pub fn write_board<W: Write>(out: &mut W, board: &Matrix<u8>) -> std::io::Result<()> {
    for row in board.iter_rows() {
        let line: String = row
            .iter()
            .map(|&cell| if cell == LIVE { '+' } else { ' ' })
            .collect();
        writeln!(out, "{}", line)?;
    }
    Ok(())
}
