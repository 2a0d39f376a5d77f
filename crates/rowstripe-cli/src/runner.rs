//! Job runner: launches the workers and reports results.
//!
//! Each job is written once as a per-rank function generic over the
//! [`Communicator`]; the [`Cluster`] decides whether the ranks are threads of
//! this process or separate MPI processes.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use rowstripe_comm::{ChannelComm, Collectives, Communicator, World};
#[cfg(feature = "distributed")]
use rowstripe_comm::MpiWorld;
use rowstripe_core::collect::{collect_rows, write_matrix};
use rowstripe_core::life::{run_life, LifeConfig, LifeReport};
use rowstripe_core::matrix::format::{write_header, write_rows};
use rowstripe_core::matrix::store::{load_framed, load_square_pair};
use rowstripe_core::matrix::{
    systolic_multiply, BlockedMultiply, Header, Matrix, MatrixError, PairLayout,
};
use rowstripe_core::sieve::{run_sieve_job, sequential_prime_count, SieveConfig, SieveReport};

use crate::config::{Backend, JobConfig, LifeJob, MatmulJob, SieveJob};

/// Summary of a distributed square multiply, produced by rank 0.
#[derive(Debug, Clone, Serialize)]
pub struct MatmulReport {
    pub size: usize,
    pub workers: usize,
    pub threshold: usize,
    pub layout: PairLayout,
    pub threads: usize,
    pub elapsed_secs: f64,
}

/// Everything a job produced, for JSON output.
#[derive(Debug, Default, Serialize)]
pub struct JobReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sieve: Option<SieveReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matmul: Option<MatmulReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub life: Option<LifeReport>,
}

/// Where the ranks of a job run.
pub enum Cluster {
    /// This many threads inside this process.
    Threads(usize),
    /// This process is one rank of an `mpirun` job.
    #[cfg(feature = "distributed")]
    Mpi(MpiWorld),
}

impl Cluster {
    /// Set up `backend`. MPI can only be initialised once per process, so
    /// build one cluster and reuse it for every job section.
    pub fn new(backend: Backend, workers: usize) -> Result<Self> {
        match backend {
            Backend::Threads => Ok(Self::Threads(workers)),
            #[cfg(feature = "distributed")]
            Backend::Mpi => {
                let world = MpiWorld::init()?;
                let launched = world.comm().size();
                if launched != workers {
                    log::warn!("mpirun launched {} ranks; ignoring workers = {}", launched, workers);
                }
                Ok(Self::Mpi(world))
            }
            #[cfg(not(feature = "distributed"))]
            Backend::Mpi => bail!("backend \"mpi\" needs rowstripe built with the `distributed` feature"),
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            Self::Threads(workers) => *workers,
            #[cfg(feature = "distributed")]
            Self::Mpi(world) => world.comm().size(),
        }
    }

    /// Whether this process hosts rank 0 and therefore prints and writes
    /// reports.
    pub fn is_root(&self) -> bool {
        match self {
            Self::Threads(_) => true,
            #[cfg(feature = "distributed")]
            Self::Mpi(world) => world.comm().is_root(),
        }
    }
}

/// Rank 0's report out of a threaded run.
fn rank_zero<R>(reports: Vec<Option<R>>) -> Result<Option<R>> {
    reports
        .into_iter()
        .flatten()
        .next()
        .context("rank 0 produced no report")
        .map(Some)
}

/// Run every section of a parsed job in turn. Returns `None` on processes
/// that do not host rank 0.
pub fn run_job(job: &JobConfig) -> Result<Option<JobReport>> {
    let cluster = Cluster::new(job.backend, job.workers)?;
    let print = job.output.print_result;
    let mut report = JobReport::default();

    if let Some(sieve) = &job.sieve {
        let result = run_sieve(&cluster, sieve)?;
        if let (true, Some(result)) = (print, &result) {
            println!("Number of primes found: {}", result.total_primes);
        }
        report.sieve = result;
    }
    if let Some(matmul) = &job.matmul {
        report.matmul = run_matmul(&cluster, matmul, print)?;
    }
    if let Some(life) = &job.life {
        report.life = run_life_job(&cluster, life, print)?;
    }

    if !cluster.is_root() {
        return Ok(None);
    }
    if let Some(path) = &job.output.json {
        write_json(&report, path)?;
    }
    Ok(Some(report))
}

/// Timing line on stderr: `<workers>,<size>,<seconds>`.
pub fn report_timing(workers: usize, size: impl std::fmt::Display, elapsed_secs: f64) {
    eprintln!("{},{},{:.15}", workers, size, elapsed_secs);
}

/// Count primes up to `job.max_num`, optionally checking the total.
pub fn run_sieve(cluster: &Cluster, job: &SieveJob) -> Result<Option<SieveReport>> {
    let config: SieveConfig = job.config();
    let report = match cluster {
        Cluster::Threads(workers) => Some(run_sieve_job(&config, *workers)?),
        #[cfg(feature = "distributed")]
        Cluster::Mpi(world) => world.run(|comm| rowstripe_core::sieve::run_sieve(comm, &config)),
    };
    let Some(report) = report else {
        return Ok(None);
    };
    report_timing(report.workers, report.max_num, report.elapsed_secs);

    if job.verify {
        let expected = sequential_prime_count(job.max_num);
        if expected != report.total_primes {
            bail!(
                "distributed count {} disagrees with sequential count {}",
                report.total_primes,
                expected
            );
        }
        log::info!("verified {} primes up to {}", expected, job.max_num);
    }
    Ok(Some(report))
}

fn build_pool(rank: usize, threads: usize) -> Result<Option<ThreadPool>> {
    if threads <= 1 {
        return Ok(None);
    }
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("matmul-{}-{}", rank, i))
        .build()
        .map(Some)
        .context("cannot build multiply thread pool")
}

/// One rank's share of a distributed square multiply.
fn matmul_rank<C: Communicator>(
    comm: &C,
    job: &MatmulJob,
    kernel: &BlockedMultiply,
    pool: Option<&ThreadPool>,
    print: bool,
) -> Result<Option<MatmulReport>, MatrixError> {
    let pair = load_square_pair::<_, i32>(comm, &job.file, job.layout)?;
    let size = pair.size;

    comm.barrier()?;
    let start = Instant::now();
    let band: Matrix<i64> = systolic_multiply(comm, pair, kernel, pool)?;
    comm.barrier()?;
    let elapsed_secs = start.elapsed().as_secs_f64();

    if print {
        let mut out = BufWriter::new(io::stdout());
        collect_rows(comm, &band, |rows| Ok(write_matrix(&mut out, rows)?))?;
        out.flush()?;
    }

    Ok(comm.is_root().then(|| MatmulReport {
        size,
        workers: comm.size(),
        threshold: kernel.threshold,
        layout: job.layout,
        threads: job.threads,
        elapsed_secs,
    }))
}

/// Multiply the square pair in `job.file` and print C row-major on rank 0.
pub fn run_matmul(cluster: &Cluster, job: &MatmulJob, print: bool) -> Result<Option<MatmulReport>> {
    let kernel = BlockedMultiply::new(job.threshold);
    let report = match cluster {
        Cluster::Threads(workers) => {
            let pools = (0..*workers)
                .map(|rank| build_pool(rank, job.threads))
                .collect::<Result<Vec<_>>>()?;
            let reports = World::new(*workers)?.run(|comm: ChannelComm| {
                matmul_rank(&comm, job, &kernel, pools[comm.rank()].as_ref(), print)
            })?;
            rank_zero(reports)?
        }
        #[cfg(feature = "distributed")]
        Cluster::Mpi(world) => {
            let pool = build_pool(world.comm().rank(), job.threads)?;
            world.run(|comm| matmul_rank(comm, job, &kernel, pool.as_ref(), print))
        }
    };
    if let Some(report) = &report {
        report_timing(report.workers, report.size, report.elapsed_secs);
    }
    Ok(report)
}

/// One rank's share of a Life run.
fn life_rank<C: Communicator>(
    comm: &C,
    job: &LifeJob,
    config: &LifeConfig,
    print: bool,
) -> Result<Option<LifeReport>, MatrixError> {
    let mut grid = load_framed::<_, u8>(comm, &job.file, job.border)?;
    if print {
        let mut out = BufWriter::new(io::stdout());
        let report = run_life(comm, &mut grid, config, &mut out)?;
        out.flush()?;
        Ok(report)
    } else {
        run_life(comm, &mut grid, config, &mut io::sink())
    }
}

/// Run Life on the grid in `job.file`, printing boards on rank 0.
pub fn run_life_job(cluster: &Cluster, job: &LifeJob, print: bool) -> Result<Option<LifeReport>> {
    let config = LifeConfig {
        generations: job.generations,
        print_every: job.print_every,
        border: job.border,
    };
    let report = match cluster {
        Cluster::Threads(workers) => {
            let reports =
                World::new(*workers)?.run(|comm: ChannelComm| life_rank(&comm, job, &config, print))?;
            rank_zero(reports)?
        }
        #[cfg(feature = "distributed")]
        Cluster::Mpi(world) => world.run(|comm| life_rank(comm, job, &config, print)),
    };
    if let Some(report) = &report {
        report_timing(cluster.workers(), report.rows, report.elapsed_secs);
    }
    Ok(report)
}

/// Write a paired square file: `<size>`, then per line a row of A and a row
/// of B, each element drawn uniformly from `[0, 1000)`.
pub fn gen_matrix<W: Write>(out: &mut W, size: usize, seed: u64) -> io::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    write_header(out, Header::Square(size))?;
    let mut line: Vec<i32> = Vec::with_capacity(2 * size);
    for _ in 0..size {
        line.clear();
        line.extend((0..2 * size).map(|_| rng.gen_range(0..1000)));
        write_rows(out, std::iter::once(line.as_slice()))?;
    }
    Ok(())
}

/// [`gen_matrix`] into a file.
pub fn gen_matrix_file(path: &Path, size: usize, seed: u64) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    gen_matrix(&mut out, size, seed)?;
    out.flush()?;
    log::info!("wrote {}x{} pair to {}", size, size, path.display());
    Ok(())
}

/// Write a report as pretty JSON.
pub fn write_json<S: Serialize>(value: &S, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    log::info!("wrote report to {}", path.display());
    Ok(())
}
