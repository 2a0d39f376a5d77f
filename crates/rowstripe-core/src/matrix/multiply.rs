//! Cache-blocked recursive matrix multiply.
//!
//! [`BlockedMultiply`] accumulates `C[l x n] += A[l x m] * B[m x n]` where each
//! operand is a window at some `(row, col)` offset into a larger backing
//! matrix. While the `m x n` slab of B exceeds the threshold, every
//! dimension is halved (`k / 2` and `k - k / 2`) and the eight sub-products
//! run in a fixed order: halves of L outermost, then N, then M. Below the
//! threshold a triple loop accumulates each dot product in the wide element
//! type `W` before adding it to C.
//!
//! C is added to, never overwritten; start from zeros.

use std::ops::{AddAssign, Mul};

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use super::{Matrix, MatrixError};

/// Default cache-fit threshold, in elements of the B slab.
pub const DEFAULT_THRESHOLD: usize = 16_000;

/// Offsets and extents of one windowed product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockProduct {
    /// `(row, col)` of the window's top-left corner in A.
    pub a_at: (usize, usize),
    pub b_at: (usize, usize),
    pub c_at: (usize, usize),
    /// Rows of A and C.
    pub l: usize,
    /// Columns of A, rows of B.
    pub m: usize,
    /// Columns of B and C.
    pub n: usize,
}

impl BlockProduct {
    /// Whole-matrix product of an `l x m` and an `m x n` matrix.
    pub fn full(l: usize, m: usize, n: usize) -> Self {
        Self {
            a_at: (0, 0),
            b_at: (0, 0),
            c_at: (0, 0),
            l,
            m,
            n,
        }
    }

    fn check<T, W>(&self, a: &Matrix<T>, b: &Matrix<T>, c: &Matrix<W>) -> Result<(), MatrixError> {
        let fits = |name: &str, (row, col): (usize, usize), rows: usize, cols: usize, m: (usize, usize)| {
            if row + rows <= m.0 && col + cols <= m.1 {
                Ok(())
            } else {
                Err(MatrixError::DimensionMismatch(format!(
                    "{} window {}x{} at ({}, {}) exceeds a {}x{} matrix",
                    name, rows, cols, row, col, m.0, m.1
                )))
            }
        };
        fits("A", self.a_at, self.l, self.m, a.shape())?;
        fits("B", self.b_at, self.m, self.n, b.shape())?;
        fits("C", self.c_at, self.l, self.n, c.shape())
    }
}

/// Borrowed row-major storage with its row stride.
#[derive(Clone, Copy)]
struct Strided<'a, T> {
    data: &'a [T],
    stride: usize,
}

/// The recursive multiply kernel and its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedMultiply {
    /// Largest `m * n` handled by the direct loop.
    pub threshold: usize,
}

impl Default for BlockedMultiply {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl BlockedMultiply {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// `C[window] += A[window] * B[window]`.
    pub fn accumulate<T, W>(
        &self,
        a: &Matrix<T>,
        b: &Matrix<T>,
        c: &mut Matrix<W>,
        product: BlockProduct,
    ) -> Result<(), MatrixError>
    where
        T: Copy + Into<W>,
        W: Copy + Default + AddAssign + Mul<Output = W>,
    {
        product.check(a, b, c)?;
        let stride = c.cols();
        self.recurse(
            Strided { data: a.as_slice(), stride: a.cols() },
            Strided { data: b.as_slice(), stride: b.cols() },
            c.as_mut_slice(),
            stride,
            product,
        );
        Ok(())
    }

    /// [`accumulate`](Self::accumulate) with the rows of the C window split
    /// into disjoint bands, one rayon task per band.
    pub fn accumulate_par<T, W>(
        &self,
        a: &Matrix<T>,
        b: &Matrix<T>,
        c: &mut Matrix<W>,
        product: BlockProduct,
        pool: &ThreadPool,
    ) -> Result<(), MatrixError>
    where
        T: Copy + Into<W> + Sync,
        W: Copy + Default + AddAssign + Mul<Output = W> + Send,
    {
        product.check(a, b, c)?;
        let threads = pool.current_num_threads();
        if threads <= 1 || product.l < 2 || product.n == 0 {
            return self.accumulate(a, b, c, product);
        }

        let stride = c.cols();
        let a = Strided { data: a.as_slice(), stride: a.cols() };
        let b = Strided { data: b.as_slice(), stride: b.cols() };
        let (c_row, c_col) = product.c_at;
        let band = product.l.div_ceil(threads);
        let rows = &mut c.as_mut_slice()[c_row * stride..(c_row + product.l) * stride];

        pool.install(|| {
            rows.par_chunks_mut(band * stride)
                .enumerate()
                .for_each(|(i, c_band)| {
                    let first = i * band;
                    let sub = BlockProduct {
                        a_at: (product.a_at.0 + first, product.a_at.1),
                        b_at: product.b_at,
                        c_at: (0, c_col),
                        l: c_band.len() / stride,
                        m: product.m,
                        n: product.n,
                    };
                    self.recurse(a, b, c_band, stride, sub);
                });
        });
        Ok(())
    }

    /// `A * B` into a fresh zeroed matrix.
    pub fn multiply<T, W>(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<W>, MatrixError>
    where
        T: Copy + Into<W>,
        W: Copy + Default + AddAssign + Mul<Output = W>,
    {
        check_inner(a, b)?;
        let mut c = Matrix::try_zeros(a.rows(), b.cols())?;
        self.accumulate(a, b, &mut c, BlockProduct::full(a.rows(), a.cols(), b.cols()))?;
        Ok(c)
    }

    fn recurse<T, W>(
        &self,
        a: Strided<'_, T>,
        b: Strided<'_, T>,
        c: &mut [W],
        c_stride: usize,
        p: BlockProduct,
    ) where
        T: Copy + Into<W>,
        W: Copy + Default + AddAssign + Mul<Output = W>,
    {
        let BlockProduct { l, m, n, .. } = p;
        if l == 0 || m == 0 || n == 0 {
            return;
        }
        if m * n <= self.threshold || (l <= 1 && m <= 1 && n <= 1) {
            direct(a, b, c, c_stride, p);
            return;
        }

        let halves = |k: usize| [(0, k / 2), (k / 2, k - k / 2)];
        for (li, lk) in halves(l) {
            for (nj, nk) in halves(n) {
                for (mi, mk) in halves(m) {
                    self.recurse(
                        a,
                        b,
                        c,
                        c_stride,
                        BlockProduct {
                            a_at: (p.a_at.0 + li, p.a_at.1 + mi),
                            b_at: (p.b_at.0 + mi, p.b_at.1 + nj),
                            c_at: (p.c_at.0 + li, p.c_at.1 + nj),
                            l: lk,
                            m: mk,
                            n: nk,
                        },
                    );
                }
            }
        }
    }
}

fn direct<T, W>(a: Strided<'_, T>, b: Strided<'_, T>, c: &mut [W], c_stride: usize, p: BlockProduct)
where
    T: Copy + Into<W>,
    W: Copy + Default + AddAssign + Mul<Output = W>,
{
    let (a_row, a_col) = p.a_at;
    let (b_row, b_col) = p.b_at;
    let (c_row, c_col) = p.c_at;
    for i in 0..p.l {
        let a_line = &a.data[(a_row + i) * a.stride + a_col..][..p.m];
        for j in 0..p.n {
            let mut sum = W::default();
            for (k, &x) in a_line.iter().enumerate() {
                let x: W = x.into();
                let y: W = b.data[(b_row + k) * b.stride + b_col + j].into();
                sum += x * y;
            }
            c[(c_row + i) * c_stride + c_col + j] += sum;
        }
    }
}

fn check_inner<T>(a: &Matrix<T>, b: &Matrix<T>) -> Result<(), MatrixError> {
    if a.cols() != b.rows() {
        return Err(MatrixError::DimensionMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    Ok(())
}

/// Textbook `A * B`, for checking the blocked kernel.
pub fn naive_multiply<T, W>(a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<W>, MatrixError>
where
    T: Copy + Into<W>,
    W: Copy + Default + AddAssign + Mul<Output = W>,
{
    check_inner(a, b)?;
    let mut c = Matrix::try_zeros(a.rows(), b.cols())?;
    for i in 0..a.rows() {
        for k in 0..a.cols() {
            let x: W = a[(i, k)].into();
            for j in 0..b.cols() {
                let y: W = b[(k, j)].into();
                c[(i, j)] += x * y;
            }
        }
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rows: usize, cols: usize, seed: i32) -> Matrix<i32> {
        let data = (0..rows * cols)
            .map(|i| (i as i32 * 37 + seed) % 23 - 11)
            .collect();
        Matrix::from_vec(rows, cols, data).unwrap()
    }

    #[test]
    fn test_ones_4x4() {
        let ones = Matrix::try_filled(4, 4, 1i32).unwrap();
        let c: Matrix<i64> = BlockedMultiply::new(4).multiply(&ones, &ones).unwrap();
        assert!(c.as_slice().iter().all(|&v| v == 4));
    }

    #[test]
    fn test_blocked_matches_naive_odd_shapes() {
        let a = sample(13, 7, 3);
        let b = sample(7, 11, 5);
        let expected: Matrix<i64> = naive_multiply(&a, &b).unwrap();
        for threshold in [0, 1, 5, 20, 77, 16_000] {
            let c: Matrix<i64> = BlockedMultiply::new(threshold).multiply(&a, &b).unwrap();
            assert_eq!(c, expected, "threshold {}", threshold);
        }
    }

    #[test]
    fn test_accumulates_into_window() {
        // Multiply the middle 2x2 of A by the top-right 2x3 of B into C at (1, 1).
        let a = sample(4, 4, 1);
        let b = sample(3, 5, 2);
        let mut c = Matrix::try_filled(4, 5, 100i64).unwrap();
        let product = BlockProduct {
            a_at: (1, 1),
            b_at: (0, 2),
            c_at: (1, 1),
            l: 2,
            m: 2,
            n: 3,
        };
        BlockedMultiply::new(1).accumulate(&a, &b, &mut c, product).unwrap();

        for i in 0..4 {
            for j in 0..5 {
                let mut want = 100i64;
                if (1..3).contains(&i) && (1..4).contains(&j) {
                    for k in 0..2 {
                        want += a[(i, 1 + k)] as i64 * b[(k, j + 1)] as i64;
                    }
                }
                assert_eq!(c[(i, j)], want, "({}, {})", i, j);
            }
        }
    }

    #[test]
    fn test_window_bounds_checked() {
        let a = sample(2, 2, 0);
        let mut c: Matrix<i64> = Matrix::try_zeros(2, 2).unwrap();
        let product = BlockProduct {
            a_at: (1, 0),
            ..BlockProduct::full(2, 2, 2)
        };
        let err = BlockedMultiply::default().accumulate(&a, &a, &mut c, product).unwrap_err();
        assert!(err.to_string().contains("A window"));
    }

    #[test]
    fn test_parallel_bands_match() {
        let a = sample(37, 19, 7);
        let b = sample(19, 29, 9);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let expected: Matrix<i64> = naive_multiply(&a, &b).unwrap();

        let mut c = Matrix::try_zeros(37, 29).unwrap();
        BlockedMultiply::new(50)
            .accumulate_par(&a, &b, &mut c, BlockProduct::full(37, 19, 29), &pool)
            .unwrap();
        assert_eq!(c, expected);
    }

    #[test]
    fn test_wide_accumulator() {
        let big = Matrix::try_filled(2, 2, i32::MAX).unwrap();
        let c: Matrix<i64> = BlockedMultiply::default().multiply(&big, &big).unwrap();
        assert_eq!(c[(0, 0)], 2 * (i32::MAX as i64) * (i32::MAX as i64));
    }
}
