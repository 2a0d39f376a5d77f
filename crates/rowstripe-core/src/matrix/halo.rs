//! Neighbour exchange between row-striped workers.
//!
//! Two patterns share the same ring arithmetic:
//!
//! - **Ghost rows** (line topology): each worker mirrors the boundary row of
//!   the worker above into its top ghost row and the boundary row of the
//!   worker below into its bottom ghost row.
//! - **Block rotation** (ring topology): every worker hands its whole block
//!   to `rank - 1` and takes the block of `rank + 1`, wrapping around.
//!
//! All sends are buffered, so the fixed order below never has two workers
//! waiting on each other.

use rowstripe_comm::{Communicator, Message, Tag};

use super::{Matrix, MatrixError};
use crate::partition::Block;

/// A worker's row band framed by one ghost cell on every side.
///
/// Row 0 and row `real_rows + 1` are ghost rows owned by the neighbours;
/// column 0 and column `cols + 1` hold the border sentinel. Real cells live
/// at `1..=real_rows` by `1..=cols`.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostedBlock<T> {
    block: Block,
    global_rows: usize,
    cells: Matrix<T>,
}

impl<T> GhostedBlock<T> {
    /// Wrap a framed buffer of `(block.len() + 2) x (cols + 2)` cells.
    pub fn new(block: Block, global_rows: usize, cells: Matrix<T>) -> Result<Self, MatrixError> {
        if cells.rows() != block.len() + 2 || cells.cols() < 2 {
            return Err(MatrixError::DimensionMismatch(format!(
                "a framed block of {} rows needs {} storage rows and at least 2 columns, got {}x{}",
                block.len(),
                block.len() + 2,
                cells.rows(),
                cells.cols()
            )));
        }
        Ok(Self {
            block,
            global_rows,
            cells,
        })
    }

    /// Global rows owned by this worker.
    pub fn block(&self) -> Block {
        self.block
    }

    pub fn global_rows(&self) -> usize {
        self.global_rows
    }

    pub fn real_rows(&self) -> usize {
        self.block.len()
    }

    /// Real columns, excluding the two border columns.
    pub fn cols(&self) -> usize {
        self.cells.cols() - 2
    }

    /// Framed storage, ghost rows and border columns included.
    pub fn cells(&self) -> &Matrix<T> {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut Matrix<T> {
        &mut self.cells
    }

    pub fn top_ghost(&self) -> &[T] {
        self.cells.row(0)
    }

    pub fn bottom_ghost(&self) -> &[T] {
        self.cells.row(self.real_rows() + 1)
    }

    /// Real row `i` (0-based within the block), with its border cells.
    pub fn real_row(&self, i: usize) -> &[T] {
        assert!(i < self.real_rows(), "real row {} out of {}", i, self.real_rows());
        self.cells.row(i + 1)
    }
}

impl<T: Clone> GhostedBlock<T> {
    /// Real cells only, as a `real_rows x cols` matrix.
    pub fn interior(&self) -> Result<Matrix<T>, MatrixError> {
        let cols = self.cols();
        let mut data = super::try_vec(self.real_rows() * cols)?;
        for i in 0..self.real_rows() {
            data.extend_from_slice(&self.real_row(i)[1..=cols]);
        }
        Matrix::from_vec(self.real_rows(), cols, data)
    }
}

/// Refresh both ghost rows of `grid` from the neighbouring workers.
///
/// After the call the top ghost row holds the last real row of `rank - 1`
/// and the bottom ghost row holds the first real row of `rank + 1`. The first
/// and last workers keep their outer ghost rows untouched. Every worker must
/// own at least one real row.
pub fn exchange_ghost_rows<C, T>(comm: &C, grid: &mut GhostedBlock<T>) -> Result<(), MatrixError>
where
    C: Communicator,
    T: Clone + Message,
{
    let rank = comm.rank();
    let last = grid.real_rows();
    if last == 0 {
        return Err(MatrixError::InvalidMatrix(format!(
            "worker {} owns no rows to exchange",
            rank
        )));
    }
    let has_above = rank > 0;
    let has_below = rank + 1 < comm.size();

    if has_above {
        comm.send(rank - 1, Tag::Data, grid.cells.row(1).to_vec())?;
    }
    if has_below {
        let incoming: Vec<T> = comm.recv(rank + 1, Tag::Data)?;
        copy_row(grid.cells.row_mut(last + 1), &incoming, rank + 1)?;
        comm.send(rank + 1, Tag::Data, grid.cells.row(last).to_vec())?;
    }
    if has_above {
        let incoming: Vec<T> = comm.recv(rank - 1, Tag::Data)?;
        copy_row(grid.cells.row_mut(0), &incoming, rank - 1)?;
    }
    Ok(())
}

fn copy_row<T: Clone>(dest: &mut [T], incoming: &[T], from: usize) -> Result<(), MatrixError> {
    if dest.len() != incoming.len() {
        return Err(MatrixError::DimensionMismatch(format!(
            "ghost row from worker {} has {} cells, expected {}",
            from,
            incoming.len(),
            dest.len()
        )));
    }
    dest.clone_from_slice(incoming);
    Ok(())
}

/// Pass `block` one step around the ring: it goes to `rank - 1` and the
/// block of `rank + 1` comes back.
pub fn rotate_block<C, T>(comm: &C, block: Matrix<T>) -> Result<Matrix<T>, MatrixError>
where
    C: Communicator,
    T: Message,
{
    let size = comm.size();
    if size == 1 {
        return Ok(block);
    }
    let rank = comm.rank();
    let dest = (rank + size - 1) % size;
    let from = (rank + 1) % size;
    Ok(comm.send_recv(block, dest, from, Tag::Data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use rowstripe_comm::{CommError, World};

    fn tagged_block(rank: usize, partition: &Partition, cols: usize) -> GhostedBlock<i64> {
        let block = partition.block(rank);
        let mut cells = Matrix::try_filled(block.len() + 2, cols + 2, -1i64).unwrap();
        for i in 0..block.len() {
            for j in 1..=cols {
                cells[(i + 1, j)] = ((block.low + i) * 100 + rank) as i64;
            }
        }
        GhostedBlock::new(block, partition.len(), cells).unwrap()
    }

    #[test]
    fn test_rejects_unframed_storage() {
        let block = Partition::new(1, 3).block(0);
        let cells: Matrix<u8> = Matrix::try_zeros(3, 4).unwrap();
        assert!(GhostedBlock::new(block, 3, cells).is_err());
    }

    #[test]
    fn test_interior_strips_frame() {
        let part = Partition::new(1, 2);
        let grid = tagged_block(0, &part, 3);
        let inner = grid.interior().unwrap();
        assert_eq!(inner.shape(), (2, 3));
        assert_eq!(inner.row(1), &[100, 100, 100]);
    }

    #[test]
    fn test_ghost_rows_mirror_neighbours() {
        let world = World::new(4).unwrap();
        let part = Partition::new(4, 10);
        let grids = world
            .run(|comm| -> Result<_, MatrixError> {
                let mut grid = tagged_block(comm.rank(), &part, 3);
                exchange_ghost_rows(&comm, &mut grid)?;
                Ok(grid)
            })
            .unwrap();

        for (rank, grid) in grids.iter().enumerate() {
            if rank == 0 {
                assert!(grid.top_ghost().iter().all(|&v| v == -1));
            } else {
                let above = part.block(rank - 1);
                let expected = ((above.end - 1) * 100 + rank - 1) as i64;
                assert_eq!(grid.top_ghost()[1], expected, "rank {}", rank);
            }
            if rank == 3 {
                assert!(grid.bottom_ghost().iter().all(|&v| v == -1));
            } else {
                let below = part.block(rank + 1);
                let expected = (below.low * 100 + rank + 1) as i64;
                assert_eq!(grid.bottom_ghost()[1], expected, "rank {}", rank);
            }
            // Border columns travel with the row.
            assert_eq!(grid.top_ghost()[0], -1);
        }
    }

    #[test]
    fn test_rotation_visits_every_block() {
        let world = World::new(5).unwrap();
        let seen = world
            .run(|comm| -> Result<Vec<usize>, MatrixError> {
                let mut block = Matrix::from_vec(1, 1, vec![comm.rank()])?;
                let mut seen = vec![block[(0, 0)]];
                for _ in 1..comm.size() {
                    block = rotate_block(&comm, block)?;
                    seen.push(block[(0, 0)]);
                }
                Ok(seen)
            })
            .unwrap();

        for (rank, order) in seen.iter().enumerate() {
            let expected: Vec<usize> = (0..5).map(|i| (rank + i) % 5).collect();
            assert_eq!(order, &expected);
        }
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let world = World::new(3).unwrap();
        let part = Partition::new(3, 2);
        let err = world
            .run(|comm| {
                let mut grid = tagged_block(comm.rank(), &part, 2);
                exchange_ghost_rows(&comm, &mut grid)
            })
            .unwrap_err();
        assert!(matches!(
            err.worker_error(),
            Some(MatrixError::InvalidMatrix(_)) | Some(MatrixError::Comm(CommError::Aborted { .. }))
        ));
    }
}
