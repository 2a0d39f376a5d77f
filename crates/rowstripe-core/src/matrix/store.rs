//! Loading a matrix file and striping it across workers.
//!
//! The highest rank is the loader. It opens the file, validates the declared
//! dimensions, broadcasts them, then reads the rows block by block in rank
//! order and sends each block to its owner, keeping its own. Every other
//! worker blocks on one receive of exactly its block.
//!
//! Any failure on the loader (missing file, bad header, short data, failed
//! allocation) aborts the whole job, so no worker is left waiting for a block
//! that will never come.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use rowstripe_comm::{Collectives, Communicator, Message, Tag};
use serde::{Deserialize, Serialize};

use super::format::{Header, MatrixReader};
use super::halo::GhostedBlock;
use super::{or_abort, try_vec, Matrix, MatrixError};
use crate::partition::{Block, Partition};

/// Rank that reads matrix files.
pub fn loader_rank(workers: usize) -> usize {
    workers - 1
}

/// One worker's band of a row-striped matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StripedMatrix<T> {
    pub global_rows: usize,
    /// Global rows held in `local`.
    pub block: Block,
    pub local: Matrix<T>,
}

/// How the two operands of a square product are laid out in one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairLayout {
    /// Each line holds row `i` of A followed by row `i` of B.
    #[default]
    Interleaved,
    /// All rows of A, then all rows of B.
    Sequential,
}

impl std::str::FromStr for PairLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interleaved" => Ok(Self::Interleaved),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!(
                "unknown layout '{}' (expected 'interleaved' or 'sequential')",
                other
            )),
        }
    }
}

/// One worker's bands of the two square operands `A` and `B`.
#[derive(Debug, Clone, PartialEq)]
pub struct SquarePair<T> {
    pub size: usize,
    pub block: Block,
    pub a: Matrix<T>,
    pub b: Matrix<T>,
}

fn open_file(path: &Path) -> Result<BufReader<File>, MatrixError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| MatrixError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn open_with_header<R, F>(open: F) -> Result<(MatrixReader<R>, Header), MatrixError>
where
    R: BufRead,
    F: FnOnce() -> Result<R, MatrixError>,
{
    let mut reader = MatrixReader::new(open()?);
    let header = reader.read_header()?;
    Ok((reader, header))
}

/// Number of elements in a `rows x cols` block, rejecting headers whose
/// product does not fit in `usize`.
fn element_count(rows: usize, cols: usize) -> Result<usize, MatrixError> {
    rows.checked_mul(cols).ok_or_else(|| {
        MatrixError::InvalidMatrix(format!("{}x{} elements cannot be addressed", rows, cols))
    })
}

fn read_block<R: BufRead, T: FromStr>(
    reader: &mut MatrixReader<R>,
    count: usize,
) -> Result<Vec<T>, MatrixError> {
    let mut values = try_vec(count)?;
    reader.read_into(count, &mut values)?;
    Ok(values)
}

fn receive_block<C, T>(comm: &C, rows: usize, cols: usize) -> Result<Matrix<T>, MatrixError>
where
    C: Communicator,
    T: Message,
{
    let data: Vec<T> = comm.recv(loader_rank(comm.size()), Tag::Data)?;
    or_abort(comm, Matrix::from_vec(rows, cols, data))
}

/// Stripe a `<rows> <cols>` (or `<size>`) matrix across all workers.
///
/// `open` is only called on the loader.
pub fn scatter_rows<C, T, R, F>(comm: &C, open: F) -> Result<StripedMatrix<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Message,
    R: BufRead,
    F: FnOnce() -> Result<R, MatrixError>,
{
    let loader = loader_rank(comm.size());
    let mut source = None;
    let mut dims = (0, 0);
    if comm.rank() == loader {
        let (reader, header) = or_abort(comm, open_with_header(open))?;
        if header.rows() == 0 || header.cols() == 0 {
            return or_abort(
                comm,
                Err(MatrixError::InvalidMatrix(format!(
                    "dimensions must be positive, got {}x{}",
                    header.rows(),
                    header.cols()
                ))),
            );
        }
        or_abort(comm, element_count(header.rows(), header.cols()))?;
        dims = (header.rows(), header.cols());
        source = Some(reader);
    }

    let (rows, cols): (usize, usize) = comm.broadcast(loader, dims)?;
    let partition = Partition::new(comm.size(), rows);
    let block = partition.block(comm.rank());

    let local = match source {
        Some(mut reader) => {
            log::info!(
                "[rank {}] striping {}x{} matrix over {} workers",
                comm.rank(),
                rows,
                cols,
                comm.size()
            );
            let mut own = Vec::new();
            for target in partition.blocks() {
                let data: Vec<T> = or_abort(comm, read_block(&mut reader, target.len() * cols))?;
                if target.id == loader {
                    own = data;
                } else {
                    or_abort(comm, comm.send(target.id, Tag::Data, data).map_err(Into::into))?;
                }
            }
            Matrix::from_vec(block.len(), cols, own)?
        }
        None => receive_block(comm, block.len(), cols)?,
    };
    log::debug!("[rank {}] holds rows {:?}", comm.rank(), block.range());

    Ok(StripedMatrix {
        global_rows: rows,
        block,
        local,
    })
}

/// Stripe the two operands of a square product across all workers.
///
/// The size must be a positive multiple of the worker count so that every
/// band is square-compatible with every rotating block.
pub fn scatter_square_pair<C, T, R, F>(
    comm: &C,
    layout: PairLayout,
    open: F,
) -> Result<SquarePair<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Message,
    R: BufRead,
    F: FnOnce() -> Result<R, MatrixError>,
{
    let workers = comm.size();
    let loader = loader_rank(workers);
    let mut source = None;
    let mut size = 0;
    if comm.rank() == loader {
        let (reader, header) = or_abort(comm, open_with_header(open))?;
        let checked = match header {
            Header::Rect { rows, cols } if rows != cols => Err(MatrixError::InvalidMatrix(format!(
                "operands must be square, got {}x{}",
                rows, cols
            ))),
            _ if header.rows() == 0 || header.rows() % workers != 0 => {
                Err(MatrixError::InvalidMatrix(format!(
                    "size {} is not a positive multiple of {} workers",
                    header.rows(),
                    workers
                )))
            }
            _ => element_count(header.rows(), header.rows()).map(|_| header.rows()),
        };
        size = or_abort(comm, checked)?;
        source = Some(reader);
    }

    let size: usize = comm.broadcast(loader, size)?;
    let partition = Partition::new(workers, size);
    let block = partition.block(comm.rank());

    let (a, b) = match source {
        Some(mut reader) => {
            log::info!(
                "[rank {}] striping {:?} operand pair of size {} over {} workers",
                comm.rank(),
                layout,
                size,
                workers
            );
            or_abort(comm, distribute_pair(comm, &mut reader, &partition, size, layout))?
        }
        None => {
            let a = receive_block(comm, block.len(), size)?;
            let b = receive_block(comm, block.len(), size)?;
            (a, b)
        }
    };

    Ok(SquarePair { size, block, a, b })
}

/// Loader side of [`scatter_square_pair`]. Each worker receives its A band
/// before its B band under either layout.
fn distribute_pair<C, T, R>(
    comm: &C,
    reader: &mut MatrixReader<R>,
    partition: &Partition,
    size: usize,
    layout: PairLayout,
) -> Result<(Matrix<T>, Matrix<T>), MatrixError>
where
    C: Communicator,
    T: FromStr + Message,
    R: BufRead,
{
    let loader = comm.rank();
    let mut own_a = Vec::new();
    let mut own_b = Vec::new();

    match layout {
        PairLayout::Interleaved => {
            for target in partition.blocks() {
                let mut a = try_vec(target.len() * size)?;
                let mut b = try_vec(target.len() * size)?;
                for _ in target.range() {
                    reader.read_into(size, &mut a)?;
                    reader.read_into(size, &mut b)?;
                }
                if target.id == loader {
                    own_a = a;
                    own_b = b;
                } else {
                    comm.send(target.id, Tag::Data, a)?;
                    comm.send(target.id, Tag::Data, b)?;
                }
            }
        }
        PairLayout::Sequential => {
            for (pass, own) in [&mut own_a, &mut own_b].into_iter().enumerate() {
                for target in partition.blocks() {
                    let data: Vec<T> = read_block(reader, target.len() * size)?;
                    if target.id == loader {
                        *own = data;
                    } else {
                        comm.send(target.id, Tag::Data, data)?;
                    }
                }
                log::debug!("[rank {}] sent operand {}", loader, if pass == 0 { 'A' } else { 'B' });
            }
        }
    }

    let rows = partition.block(loader).len();
    Ok((
        Matrix::from_vec(rows, size, own_a)?,
        Matrix::from_vec(rows, size, own_b)?,
    ))
}

/// Stripe a `<rows> <cols>` grid across all workers, framing each band with
/// `border` on all four sides.
///
/// Ghost rows start out holding `border`; the halo exchange replaces the
/// inner ones. Every worker must own at least one row.
pub fn scatter_framed<C, T, R, F>(comm: &C, border: T, open: F) -> Result<GhostedBlock<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Clone + Message,
    R: BufRead,
    F: FnOnce() -> Result<R, MatrixError>,
{
    let workers = comm.size();
    let loader = loader_rank(workers);
    let mut source = None;
    let mut dims = (0, 0);
    if comm.rank() == loader {
        let (reader, header) = or_abort(comm, open_with_header(open))?;
        let (rows, cols) = (header.rows(), header.cols());
        if rows == 0 || cols == 0 || rows < workers {
            return or_abort(
                comm,
                Err(MatrixError::InvalidMatrix(format!(
                    "a {}x{} grid cannot give each of {} workers a row",
                    rows, cols, workers
                ))),
            );
        }
        or_abort(comm, element_count(rows.saturating_add(2), cols.saturating_add(2)))?;
        dims = (rows, cols);
        source = Some(reader);
    }

    let (rows, cols): (usize, usize) = comm.broadcast(loader, dims)?;
    let partition = Partition::new(workers, rows);
    let block = partition.block(comm.rank());
    let width = cols + 2;

    let cells = match source {
        Some(mut reader) => {
            let mut own = Vec::new();
            for target in partition.blocks() {
                let data = or_abort(comm, read_framed(&mut reader, target.len(), cols, &border))?;
                if target.id == loader {
                    own = data;
                } else {
                    or_abort(comm, comm.send(target.id, Tag::Data, data).map_err(Into::into))?;
                }
            }
            Matrix::from_vec(block.len() + 2, width, own)?
        }
        None => receive_block(comm, block.len() + 2, width)?,
    };

    GhostedBlock::new(block, rows, cells)
}

fn read_framed<R, T>(
    reader: &mut MatrixReader<R>,
    rows: usize,
    cols: usize,
    border: &T,
) -> Result<Vec<T>, MatrixError>
where
    R: BufRead,
    T: FromStr + Clone,
{
    let width = cols + 2;
    let mut data = try_vec((rows + 2) * width)?;
    data.resize(width, border.clone());
    for _ in 0..rows {
        data.push(border.clone());
        reader.read_into(cols, &mut data)?;
        data.push(border.clone());
    }
    data.resize((rows + 2) * width, border.clone());
    Ok(data)
}

/// [`scatter_rows`] from a file on disk.
pub fn load_rows<C, T>(comm: &C, path: &Path) -> Result<StripedMatrix<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Message,
{
    scatter_rows(comm, || open_file(path))
}

/// [`scatter_square_pair`] from a file on disk.
pub fn load_square_pair<C, T>(
    comm: &C,
    path: &Path,
    layout: PairLayout,
) -> Result<SquarePair<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Message,
{
    scatter_square_pair(comm, layout, || open_file(path))
}

/// [`scatter_framed`] from a file on disk.
pub fn load_framed<C, T>(comm: &C, path: &Path, border: T) -> Result<GhostedBlock<T>, MatrixError>
where
    C: Communicator,
    T: FromStr + Clone + Message,
{
    scatter_framed(comm, border, || open_file(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowstripe_comm::World;
    use std::io::Cursor;

    fn text(s: &'static str) -> impl Fn() -> Result<Cursor<&'static str>, MatrixError> {
        move || Ok(Cursor::new(s))
    }

    #[test]
    fn test_scatter_rows_blocks() {
        let world = World::new(3).unwrap();
        let source = text("4 2\n1 2\n3 4\n5 6\n7 8\n");
        let bands = world
            .run(|comm| scatter_rows::<_, i32, _, _>(&comm, &source))
            .unwrap();

        assert_eq!(bands[0].local.as_slice(), &[1, 2]);
        assert_eq!(bands[1].local.as_slice(), &[3, 4]);
        assert_eq!(bands[2].local.as_slice(), &[5, 6, 7, 8]);
        assert!(bands.iter().all(|b| b.global_rows == 4));
    }

    #[test]
    fn test_interleaved_pair() {
        let world = World::new(2).unwrap();
        let source = text("2\n1 2 10 20\n3 4 30 40\n");
        let pairs = world
            .run(|comm| scatter_square_pair::<_, i32, _, _>(&comm, PairLayout::Interleaved, &source))
            .unwrap();
        assert_eq!(pairs[0].a.as_slice(), &[1, 2]);
        assert_eq!(pairs[0].b.as_slice(), &[10, 20]);
        assert_eq!(pairs[1].a.as_slice(), &[3, 4]);
        assert_eq!(pairs[1].b.as_slice(), &[30, 40]);
    }

    #[test]
    fn test_sequential_pair() {
        let world = World::new(2).unwrap();
        let source = text("2\n1 2\n3 4\n10 20\n30 40\n");
        let pairs = world
            .run(|comm| scatter_square_pair::<_, i32, _, _>(&comm, PairLayout::Sequential, &source))
            .unwrap();
        assert_eq!(pairs[1].a.as_slice(), &[3, 4]);
        assert_eq!(pairs[1].b.as_slice(), &[30, 40]);
    }

    #[test]
    fn test_indivisible_size_aborts() {
        let world = World::new(3).unwrap();
        let source = text("4\n");
        let err = world
            .run(|comm| scatter_square_pair::<_, i32, _, _>(&comm, PairLayout::Interleaved, &source))
            .unwrap_err();
        assert_eq!(err.rank(), Some(2));
        assert!(matches!(err.worker_error(), Some(MatrixError::InvalidMatrix(_))));
    }

    #[test]
    fn test_short_file_aborts_everyone() {
        let world = World::new(4).unwrap();
        let source = text("4 1\n1\n2\n3\n");
        let err = world
            .run(|comm| scatter_rows::<_, i32, _, _>(&comm, &source))
            .unwrap_err();
        assert_eq!(err.rank(), Some(3));
        assert!(matches!(err.worker_error(), Some(MatrixError::Parse(_))));
    }

    #[test]
    fn test_unaddressable_dimensions_abort() {
        let world = World::new(3).unwrap();
        let rows = text("3 9223372036854775807\n1 2 3\n");
        let err = world
            .run(|comm| scatter_rows::<_, i32, _, _>(&comm, &rows))
            .unwrap_err();
        assert_eq!(err.rank(), Some(2));
        assert!(matches!(err.worker_error(), Some(MatrixError::InvalidMatrix(_))));

        let grid = text("3 18446744073709551615\n");
        let err = world
            .run(|comm| scatter_framed::<_, u8, _, _>(&comm, 0, &grid))
            .unwrap_err();
        assert!(matches!(err.worker_error(), Some(MatrixError::InvalidMatrix(_))));

        let pair = text("4294967298\n");
        let err = World::new(2)
            .unwrap()
            .run(|comm| scatter_square_pair::<_, i32, _, _>(&comm, PairLayout::Interleaved, &pair))
            .unwrap_err();
        assert!(matches!(err.worker_error(), Some(MatrixError::InvalidMatrix(_))));
    }

    #[test]
    fn test_framed_blocks_carry_border() {
        let world = World::new(2).unwrap();
        let source = text("3 2\n1 1\n0 1\n1 0\n");
        let grids = world
            .run(|comm| scatter_framed::<_, u8, _, _>(&comm, 9, &source))
            .unwrap();

        assert_eq!(grids[0].real_rows(), 1);
        assert_eq!(grids[0].cells().as_slice(), &[9, 9, 9, 9, 9, 1, 1, 9, 9, 9, 9, 9]);
        assert_eq!(grids[1].real_row(1), &[9, 1, 0, 9]);
        assert!(grids[1].bottom_ghost().iter().all(|&c| c == 9));
    }

    #[test]
    fn test_layout_names() {
        assert_eq!("sequential".parse::<PairLayout>(), Ok(PairLayout::Sequential));
        assert_eq!("interleaved".parse::<PairLayout>(), Ok(PairLayout::Interleaved));
        assert!("rows".parse::<PairLayout>().is_err());
    }

    #[test]
    fn test_missing_file() {
        let world = World::new(2).unwrap();
        let err = world
            .run(|comm| load_rows::<_, i32>(&comm, Path::new("/nonexistent/rowstripe.txt")))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rowstripe.txt"));
    }
}
