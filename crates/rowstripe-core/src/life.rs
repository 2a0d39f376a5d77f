//! Conway's Game of Life on a row-striped, ghost-framed grid.
//!
//! Each generation refreshes the ghost rows from the neighbouring workers,
//! counts the eight neighbours of every real cell, and applies the rule:
//! exactly 2 live neighbours keeps the cell as it is, exactly 3 makes it
//! live, anything else makes it dead. Cells outside the grid read as the
//! border sentinel.

use std::io::Write;
use std::time::Instant;

use rowstripe_comm::{Collectives, Communicator};
use serde::{Deserialize, Serialize};

use crate::collect::{collect_rows, write_board};
use crate::matrix::halo::{exchange_ghost_rows, GhostedBlock};
use crate::matrix::{or_abort, try_vec, MatrixError};

pub const LIVE: u8 = 1;
pub const DEAD: u8 = 0;

/// Parameters of a Life run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeConfig {
    pub generations: usize,
    /// Print the board every this many generations; 0 prints only the last.
    pub print_every: usize,
    /// Value of the cells framing the grid.
    pub border: u8,
}

impl Default for LifeConfig {
    fn default() -> Self {
        Self {
            generations: 10,
            print_every: 0,
            border: DEAD,
        }
    }
}

/// Summary of a Life run, produced by rank 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifeReport {
    pub rows: usize,
    pub cols: usize,
    pub workers: usize,
    pub generations: usize,
    /// Live cells after the last generation.
    pub live_cells: u64,
    pub elapsed_secs: f64,
}

/// Next state of a cell with `neighbours` live neighbours.
pub fn next_state(cell: u8, neighbours: u8) -> u8 {
    match neighbours {
        2 => cell,
        3 => LIVE,
        _ => DEAD,
    }
}

/// Advance `grid` by one generation.
pub fn step_generation<C: Communicator>(
    comm: &C,
    grid: &mut GhostedBlock<u8>,
) -> Result<(), MatrixError> {
    exchange_ghost_rows(comm, grid)?;

    let rows = grid.real_rows();
    let cols = grid.cols();
    let cells = grid.cells();
    let mut next = or_abort(comm, try_vec(rows * cols))?;
    for i in 1..=rows {
        for j in 1..=cols {
            let mut neighbours = 0;
            for r in i - 1..=i + 1 {
                for c in j - 1..=j + 1 {
                    if (r, c) != (i, j) && cells[(r, c)] == LIVE {
                        neighbours += 1;
                    }
                }
            }
            next.push(next_state(cells[(i, j)], neighbours));
        }
    }

    let cells = grid.cells_mut();
    for (i, row) in next.chunks(cols.max(1)).enumerate() {
        cells.row_mut(i + 1)[1..=cols].copy_from_slice(row);
    }
    Ok(())
}

fn live_cells(grid: &GhostedBlock<u8>) -> u64 {
    (0..grid.real_rows())
        .map(|i| grid.real_row(i)[1..=grid.cols()].iter().filter(|&&c| c == LIVE).count() as u64)
        .sum()
}

fn print_board<C: Communicator, W: Write>(
    comm: &C,
    grid: &GhostedBlock<u8>,
    out: &mut W,
) -> Result<(), MatrixError> {
    let band = or_abort(comm, grid.interior())?;
    collect_rows(comm, &band, |rows| Ok(write_board(out, rows)?))?;
    if comm.is_root() {
        or_abort(comm, writeln!(out).map_err(MatrixError::from))?;
    }
    Ok(())
}

/// Run `config.generations` generations, printing boards to `out` on rank 0.
///
/// Anything other than [`LIVE`] inside the grid is treated as dead. Boards
/// are printed every `print_every` generations and always after the last;
/// with zero generations the initial board is printed once.
pub fn run_life<C: Communicator, W: Write>(
    comm: &C,
    grid: &mut GhostedBlock<u8>,
    config: &LifeConfig,
    out: &mut W,
) -> Result<Option<LifeReport>, MatrixError> {
    let start = Instant::now();
    let cols = grid.cols();
    for i in 1..=grid.real_rows() {
        for cell in &mut grid.cells_mut().row_mut(i)[1..=cols] {
            if *cell != LIVE {
                *cell = DEAD;
            }
        }
    }

    if config.generations == 0 {
        print_board(comm, grid, out)?;
    }
    for generation in 1..=config.generations {
        step_generation(comm, grid)?;
        let due = generation == config.generations
            || (config.print_every > 0 && generation % config.print_every == 0);
        if due {
            log::debug!("[rank {}] printing generation {}", comm.rank(), generation);
            print_board(comm, grid, out)?;
        }
    }

    let total = comm.reduce_sum(0, live_cells(grid))?;
    Ok(total.map(|live_cells| LifeReport {
        rows: grid.global_rows(),
        cols,
        workers: comm.size(),
        generations: config.generations,
        live_cells,
        elapsed_secs: start.elapsed().as_secs_f64(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::store::scatter_framed;
    use crate::matrix::Matrix;
    use rowstripe_comm::World;
    use std::io::Cursor;

    fn grid_text(rows: usize, cols: usize, live: &[(usize, usize)]) -> String {
        let mut text = format!("{} {}\n", rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                text.push_str(if live.contains(&(i, j)) { "1 " } else { "0 " });
            }
            text.push('\n');
        }
        text
    }

    /// Single-worker reference on a plain matrix with dead surroundings.
    fn reference_step(board: &Matrix<u8>) -> Matrix<u8> {
        let (rows, cols) = board.shape();
        let mut next = board.clone();
        for i in 0..rows {
            for j in 0..cols {
                let mut n = 0;
                for r in i.saturating_sub(1)..=(i + 1).min(rows - 1) {
                    for c in j.saturating_sub(1)..=(j + 1).min(cols - 1) {
                        if (r, c) != (i, j) && board[(r, c)] == LIVE {
                            n += 1;
                        }
                    }
                }
                next[(i, j)] = next_state(board[(i, j)], n);
            }
        }
        next
    }

    fn run_board(text: &str, workers: usize, config: LifeConfig) -> (String, LifeReport) {
        let world = World::new(workers).unwrap();
        let outputs = world
            .run(|comm| {
                let mut grid = scatter_framed(&comm, config.border, || Ok(Cursor::new(text.as_bytes())))?;
                let mut out = Vec::new();
                let report = run_life(&comm, &mut grid, &config, &mut out)?;
                Ok::<_, MatrixError>((out, report))
            })
            .unwrap();
        let (out, report) = outputs.into_iter().next().unwrap();
        (String::from_utf8(out).unwrap(), report.unwrap())
    }

    #[test]
    fn test_rule() {
        assert_eq!(next_state(LIVE, 2), LIVE);
        assert_eq!(next_state(DEAD, 2), DEAD);
        assert_eq!(next_state(DEAD, 3), LIVE);
        assert_eq!(next_state(LIVE, 1), DEAD);
        assert_eq!(next_state(LIVE, 4), DEAD);
    }

    #[test]
    fn test_blinker_output() {
        let text = grid_text(3, 3, &[(0, 1), (1, 1), (2, 1)]);
        let config = LifeConfig {
            generations: 1,
            ..LifeConfig::default()
        };
        let (out, report) = run_board(&text, 1, config);
        assert_eq!(out, "   \n+++\n   \n\n");
        assert_eq!(report.live_cells, 3);
    }

    #[test]
    fn test_print_every() {
        let text = grid_text(3, 3, &[(0, 1), (1, 1), (2, 1)]);
        let config = LifeConfig {
            generations: 4,
            print_every: 2,
            border: DEAD,
        };
        let (out, _) = run_board(&text, 3, config);
        // Generations 2 and 4 both show the vertical phase.
        let vertical = " + \n + \n + \n\n";
        assert_eq!(out, format!("{}{}", vertical, vertical));
    }

    #[test]
    fn test_striped_matches_reference() {
        let live = [(0, 1), (1, 2), (2, 0), (2, 1), (2, 2), (5, 5), (5, 6), (6, 5), (6, 6), (4, 0)];
        let text = grid_text(8, 7, &live);
        let mut board = Matrix::try_zeros(8, 7).unwrap();
        for &(i, j) in &live {
            board[(i, j)] = LIVE;
        }
        for _ in 0..6 {
            board = reference_step(&board);
        }
        let mut expected = Vec::new();
        write_board(&mut expected, &board).unwrap();
        writeln!(expected).unwrap();
        let expected = String::from_utf8(expected).unwrap();

        for workers in [1, 2, 3, 4, 8] {
            let config = LifeConfig {
                generations: 6,
                ..LifeConfig::default()
            };
            let (out, report) = run_board(&text, workers, config);
            assert_eq!(out, expected, "{} workers", workers);
            assert_eq!(report.workers, workers);
        }
    }

    #[test]
    fn test_live_border_feeds_edges() {
        // A live frame gives each edge-middle cell 3 live neighbours and
        // each corner 5.
        let text = grid_text(3, 3, &[]);
        let config = LifeConfig {
            generations: 1,
            print_every: 0,
            border: LIVE,
        };
        let (out, report) = run_board(&text, 3, config);
        assert_eq!(out, " + \n+ +\n + \n\n");
        assert_eq!(report.live_cells, 4);
    }
}
