//! rowstripe command-line interface.
//!
//! Run distributed jobs from TOML configuration files or directly:
//! ```sh
//! rowstripe run job.toml
//! rowstripe validate job.toml
//! rowstripe sieve 1000000 --workers 4 --threads 2
//! rowstripe gen-matrix 512 pair.txt
//! rowstripe matmul pair.txt --workers 4
//! rowstripe life glider.txt --workers 3 --generations 20
//! mpirun -n 4 rowstripe sieve 1000000 --backend mpi
//! ```

mod config;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rowstripe_core::matrix::multiply::DEFAULT_THRESHOLD;
use rowstripe_core::matrix::PairLayout;
use rowstripe_core::sieve::SmallPrimeStrategy;

use crate::config::{Backend, LifeJob, MatmulJob, SieveJob};
use crate::runner::Cluster;

#[derive(Parser)]
#[command(name = "rowstripe")]
#[command(about = "rowstripe: row-striped distributed sieve, matrix multiply and Life")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Report JSON path (overrides config file setting).
        #[arg(short, long)]
        json: Option<PathBuf>,
    },
    /// Validate a configuration file without running the job.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Count the primes in [2, max_num].
    Sieve {
        max_num: u64,
        /// Number of cooperating workers.
        #[arg(short = 'p', long, default_value_t = 1)]
        workers: usize,
        /// "threads", or "mpi" to run as one rank of an `mpirun` job.
        #[arg(long, default_value = "threads")]
        backend: Backend,
        /// Sieve threads per worker.
        #[arg(short, long, default_value_t = 1)]
        threads: usize,
        /// Small-prime source: "recompute" or "broadcast".
        #[arg(long, default_value = "recompute")]
        strategy: SmallPrimeStrategy,
        /// Check the total against a sequential sieve.
        #[arg(long)]
        verify: bool,
        /// Print the report as JSON instead of the prime count.
        #[arg(long)]
        json: bool,
    },
    /// Multiply the square pair stored in a file and print the product.
    Matmul {
        file: PathBuf,
        #[arg(short = 'p', long, default_value_t = 1)]
        workers: usize,
        /// "threads", or "mpi" to run as one rank of an `mpirun` job.
        #[arg(long, default_value = "threads")]
        backend: Backend,
        /// Largest block (m * n elements) multiplied directly.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: usize,
        /// "interleaved" (A row then B row per line) or "sequential".
        #[arg(long, default_value = "interleaved")]
        layout: PairLayout,
        /// Multiply threads per worker.
        #[arg(short, long, default_value_t = 1)]
        threads: usize,
    },
    /// Play the Game of Life on the grid stored in a file.
    Life {
        file: PathBuf,
        #[arg(short = 'p', long, default_value_t = 1)]
        workers: usize,
        /// "threads", or "mpi" to run as one rank of an `mpirun` job.
        #[arg(long, default_value = "threads")]
        backend: Backend,
        #[arg(short, long, default_value_t = 10)]
        generations: usize,
        /// Print every this many generations (0: only the last).
        #[arg(long, default_value_t = 0)]
        print_every: usize,
        /// Value of the cells surrounding the grid.
        #[arg(long, default_value_t = 0)]
        border: u8,
    },
    /// Write a random square pair file for `matmul`.
    GenMatrix {
        size: usize,
        out: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json } => {
            let mut job = config::load_config(&config)?;
            log::info!("configuration: {}", config.display());
            if json.is_some() {
                job.output.json = json;
            }
            runner::run_job(&job)?;
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Sieve {
            max_num,
            workers,
            backend,
            threads,
            strategy,
            verify,
            json,
        } => {
            anyhow::ensure!(max_num > 0, "max number must be a positive integer");
            anyhow::ensure!(workers > 0 && threads > 0, "workers and threads must be positive");
            let job = SieveJob {
                max_num,
                threads,
                strategy,
                verify,
            };
            let cluster = Cluster::new(backend, workers)?;
            let Some(report) = runner::run_sieve(&cluster, &job)? else {
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Number of primes found: {}", report.total_primes);
            }
            Ok(())
        }
        Commands::Matmul {
            file,
            workers,
            backend,
            threshold,
            layout,
            threads,
        } => {
            anyhow::ensure!(workers > 0 && threads > 0, "workers and threads must be positive");
            let job = MatmulJob {
                file,
                threshold,
                layout,
                threads,
            };
            runner::run_matmul(&Cluster::new(backend, workers)?, &job, true)?;
            Ok(())
        }
        Commands::Life {
            file,
            workers,
            backend,
            generations,
            print_every,
            border,
        } => {
            anyhow::ensure!(workers > 0, "workers must be positive");
            let job = LifeJob {
                file,
                generations,
                print_every,
                border,
            };
            runner::run_life_job(&Cluster::new(backend, workers)?, &job, true)?;
            Ok(())
        }
        Commands::GenMatrix { size, out, seed } => {
            anyhow::ensure!(size > 0, "size must be a positive integer");
            runner::gen_matrix_file(&out, size, seed)
        }
    }
}
