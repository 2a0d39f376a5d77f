//! `sieve <maxNum> <numThreads>`: count the primes in `[2, maxNum]`.
//!
//! Prints the count to stdout and `<numThreads>,<maxNum>,<seconds>` to
//! stderr. Exits with 1 on a wrong argument count and 2 on a non-positive
//! numeric argument, before any worker starts.
//!
//! Built with the `distributed` feature, `--mpi` runs this process as one
//! rank of an `mpirun` job instead of starting worker threads.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use rowstripe_core::sieve::{run_sieve_job, SieveConfig, SieveReport, SmallPrimeStrategy};

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Distributed Sieve of Eratosthenes")]
#[command(version)]
struct Args {
    /// Upper end of the range.
    #[arg(allow_hyphen_values = true)]
    max_num: String,
    /// Sieve threads per worker.
    #[arg(allow_hyphen_values = true)]
    num_threads: String,
    /// Number of cooperating workers.
    #[arg(short = 'p', long, default_value_t = 1)]
    workers: usize,
    /// Small-prime source: "recompute" or "broadcast".
    #[arg(long, default_value = "recompute")]
    strategy: SmallPrimeStrategy,
    /// Run as one rank of an `mpirun` job; `-p` is ignored.
    #[cfg(feature = "distributed")]
    #[arg(long)]
    mpi: bool,
}

/// Run the job and return rank 0's report, or `None` on other MPI ranks.
fn launch(args: &Args, config: &SieveConfig) -> Result<Option<SieveReport>, String> {
    #[cfg(feature = "distributed")]
    if args.mpi {
        let world = rowstripe_comm::MpiWorld::init().map_err(|e| e.to_string())?;
        return Ok(world.run(|comm| rowstripe_core::sieve::run_sieve(comm, config)));
    }
    run_sieve_job(config, args.workers)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn positive(arg: &str) -> Option<u64> {
    arg.trim().parse::<u64>().ok().filter(|&n| n > 0)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let Some(max_num) = positive(&args.max_num) else {
        eprintln!("Error: max number must be a positive integer");
        return ExitCode::from(2);
    };
    let Some(threads) = positive(&args.num_threads) else {
        eprintln!("Error: number of threads must be a positive integer");
        return ExitCode::from(2);
    };
    if args.workers == 0 {
        eprintln!("Error: number of workers must be a positive integer");
        return ExitCode::from(2);
    }

    let config = SieveConfig {
        max_num,
        threads: threads as usize,
        strategy: args.strategy,
    };
    match launch(&args, &config) {
        Ok(Some(report)) => {
            println!("Number of primes found: {}", report.total_primes);
            eprintln!("{},{},{:.15}", threads, max_num, report.elapsed_secs);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("sieve failed: {}", err);
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
