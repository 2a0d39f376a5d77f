//! Row-striped dense matrices.
//!
//! A [`Matrix`] is a flat owned buffer with a row stride, indexed by
//! `(row, col)` through bounds-checked accessors. Each worker of a job owns
//! one contiguous band of rows of a larger logical matrix:
//!
//! - [`store`] loads a matrix file on the highest rank and distributes the
//!   bands,
//! - [`halo`] refreshes ghost rows between neighbours and rotates whole
//!   bands around the ring,
//! - [`multiply`] is the cache-blocked recursive kernel,
//! - [`systolic`] combines the two into a distributed square multiply.

pub mod format;
pub mod halo;
pub mod multiply;
pub mod store;
pub mod systolic;

use std::ops::{Index, IndexMut};

use rowstripe_comm::{CommError, Communicator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use format::{Header, MatrixReader, ParseError};
pub use halo::{exchange_ghost_rows, rotate_block, GhostedBlock};
pub use multiply::{naive_multiply, BlockProduct, BlockedMultiply};
pub use store::{PairLayout, SquarePair, StripedMatrix};
pub use systolic::systolic_multiply;

/// Errors raised while loading, distributing or combining matrices.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot allocate a matrix of {elements} elements")]
    Allocation { elements: usize },

    #[error("Buffer of {len} elements does not hold a {rows}x{cols} matrix")]
    Shape { rows: usize, cols: usize, len: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Zero-length vector with room for exactly `len` elements, or an
/// [`MatrixError::Allocation`] if the memory is not available.
pub(crate) fn try_vec<T>(len: usize) -> Result<Vec<T>, MatrixError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| MatrixError::Allocation { elements: len })?;
    Ok(buffer)
}

/// Abort the job if `result` failed on this worker, passing the error on.
pub(crate) fn or_abort<C: Communicator, T>(
    comm: &C,
    result: Result<T, MatrixError>,
) -> Result<T, MatrixError> {
    result.map_err(|err| {
        comm.abort(&err.to_string());
        err
    })
}

/// Dense row-major matrix backed by a single allocation.
///
/// Serialises as its shape plus the flat buffer; decoding re-checks that the
/// buffer matches the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MatrixParts<T>")]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

#[derive(Deserialize)]
struct MatrixParts<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> TryFrom<MatrixParts<T>> for Matrix<T> {
    type Error = MatrixError;

    fn try_from(parts: MatrixParts<T>) -> Result<Self, MatrixError> {
        Self::from_vec(parts.rows, parts.cols, parts.data)
    }
}

impl<T> Matrix<T> {
    /// Wrap a row-major buffer of exactly `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, MatrixError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::Shape {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        (row < self.rows && col < self.cols).then(|| &self.data[row * self.cols + col])
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut T> {
        if row < self.rows && col < self.cols {
            Some(&mut self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Row `row` as a slice.
    ///
    /// # Panics
    /// If `row` is out of bounds.
    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows, "row {} out of {} rows", row, self.rows);
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        assert!(row < self.rows, "row {} out of {} rows", row, self.rows);
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.rows).map(move |r| &self.data[r * self.cols..(r + 1) * self.cols])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T: Clone> Matrix<T> {
    /// `rows x cols` matrix with every element set to `value`.
    pub fn try_filled(rows: usize, cols: usize, value: T) -> Result<Self, MatrixError> {
        let len = rows.checked_mul(cols).ok_or(MatrixError::Allocation {
            elements: usize::MAX,
        })?;
        let mut data = try_vec(len)?;
        data.resize(len, value);
        Ok(Self { rows, cols, data })
    }
}

impl<T: Clone + Default> Matrix<T> {
    /// `rows x cols` matrix of `T::default()`.
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self, MatrixError> {
        Self::try_filled(rows, cols, T::default())
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        assert!(
            row < self.rows && col < self.cols,
            "index ({}, {}) out of a {}x{} matrix",
            row,
            col,
            self.rows,
            self.cols
        );
        &self.data[row * self.cols + col]
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        assert!(
            row < self.rows && col < self.cols,
            "index ({}, {}) out of a {}x{} matrix",
            row,
            col,
            self.rows,
            self.cols
        );
        &mut self.data[row * self.cols + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_shape() {
        assert!(Matrix::from_vec(2, 3, vec![0; 6]).is_ok());
        assert!(matches!(
            Matrix::from_vec(2, 3, vec![0; 5]),
            Err(MatrixError::Shape { len: 5, .. })
        ));
    }

    #[test]
    fn test_indexing_and_rows() {
        let mut m = Matrix::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(m[(1, 0)], 4);
        assert_eq!(m.row(0), &[1, 2, 3]);
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.get(0, 3), None);
        m[(0, 2)] = 9;
        m.row_mut(1)[2] = 7;
        let rows: Vec<&[i32]> = m.iter_rows().collect();
        assert_eq!(rows, vec![&[1, 2, 9][..], &[4, 5, 7][..]]);
    }

    #[test]
    #[should_panic(expected = "out of a 2x2 matrix")]
    fn test_index_out_of_bounds_panics() {
        let m: Matrix<u8> = Matrix::try_zeros(2, 2).unwrap();
        let _ = m[(0, 2)];
    }

    #[test]
    fn test_serde_rechecks_shape() {
        let m = Matrix::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(serde_json::from_str::<Matrix<i32>>(&json).unwrap(), m);

        let bad = r#"{"rows":2,"cols":3,"data":[1,2,3,4,5]}"#;
        let err = serde_json::from_str::<Matrix<i32>>(bad).unwrap_err();
        assert!(err.to_string().contains("2x3"), "{}", err);
    }

    #[test]
    fn test_zero_sized_matrix() {
        let m: Matrix<i32> = Matrix::try_zeros(3, 0).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.iter_rows().count(), 3);
        assert!(m.iter_rows().all(|row| row.is_empty()));
    }
}
