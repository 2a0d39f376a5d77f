//! TOML configuration deserialisation for jobs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use rowstripe_core::matrix::multiply::DEFAULT_THRESHOLD;
use rowstripe_core::matrix::PairLayout;
use rowstripe_core::sieve::{SieveConfig, SmallPrimeStrategy};
use serde::{Deserialize, Serialize};

/// Transport connecting the workers of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One thread per worker inside this process.
    #[default]
    Threads,
    /// One process per worker, launched by `mpirun`. Needs the
    /// `distributed` feature.
    Mpi,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threads" => Ok(Self::Threads),
            "mpi" => Ok(Self::Mpi),
            other => Err(format!(
                "unknown backend '{}' (expected 'threads' or 'mpi')",
                other
            )),
        }
    }
}

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    /// Number of cooperating workers. Under MPI the launcher decides.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// "threads" or "mpi". Default: "threads".
    #[serde(default)]
    pub backend: Backend,
    pub sieve: Option<SieveJob>,
    pub matmul: Option<MatmulJob>,
    pub life: Option<LifeJob>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[sieve]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SieveJob {
    pub max_num: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// "recompute" or "broadcast". Default: "recompute".
    #[serde(default)]
    pub strategy: SmallPrimeStrategy,
    /// Check the total against a sequential sieve.
    #[serde(default)]
    pub verify: bool,
}

impl SieveJob {
    pub fn config(&self) -> SieveConfig {
        SieveConfig {
            max_num: self.max_num,
            threads: self.threads,
            strategy: self.strategy,
        }
    }
}

/// `[matmul]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MatmulJob {
    /// Square pair file: `<size>` header then rows of A and B.
    pub file: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default)]
    pub layout: PairLayout,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

/// `[life]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LifeJob {
    /// Grid file: `<rows> <cols>` header then 0/1 cells.
    pub file: PathBuf,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default)]
    pub print_every: usize,
    #[serde(default)]
    pub border: u8,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Print results (prime count, product matrix, boards) to stdout. Default: true.
    #[serde(default = "default_true")]
    pub print_result: bool,
    /// Write the run reports to this JSON file.
    #[serde(default)]
    pub json: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            print_result: true,
            json: None,
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_threads() -> usize {
    1
}
fn default_threshold() -> usize {
    DEFAULT_THRESHOLD
}
fn default_generations() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Reject values no run could use.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be a positive integer");
        }
        if self.backend == Backend::Mpi && !cfg!(feature = "distributed") {
            bail!("backend \"mpi\" needs rowstripe built with the `distributed` feature");
        }
        if self.sieve.is_none() && self.matmul.is_none() && self.life.is_none() {
            bail!("job defines no [sieve], [matmul] or [life] section");
        }
        if let Some(sieve) = &self.sieve {
            if sieve.max_num == 0 {
                bail!("sieve.max_num must be a positive integer");
            }
            if sieve.threads == 0 {
                bail!("sieve.threads must be a positive integer");
            }
        }
        if let Some(matmul) = &self.matmul {
            if matmul.threads == 0 {
                bail!("matmul.threads must be a positive integer");
            }
        }
        Ok(())
    }
}

/// Parse a job from TOML text.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid job file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let job = parse_config("[sieve]\nmax_num = 1000\n").unwrap();
        assert_eq!(job.workers, 1);
        assert_eq!(job.backend, Backend::Threads);
        let sieve = job.sieve.unwrap();
        assert_eq!(sieve.threads, 1);
        assert_eq!(sieve.strategy, SmallPrimeStrategy::Recompute);
        assert!(!sieve.verify);
        assert!(job.output.print_result);
        assert!(job.output.json.is_none());
    }

    #[test]
    fn test_full_job() {
        let text = r#"
            workers = 4

            [sieve]
            max_num = 1000000
            threads = 2
            strategy = "broadcast"
            verify = true

            [matmul]
            file = "pair.txt"
            threshold = 64
            layout = "sequential"

            [life]
            file = "glider.txt"
            generations = 20
            print_every = 5
            border = 1

            [output]
            print_result = false
            json = "report.json"
        "#;
        let job = parse_config(text).unwrap();
        assert_eq!(job.workers, 4);
        assert_eq!(job.sieve.as_ref().unwrap().strategy, SmallPrimeStrategy::Broadcast);

        let matmul = job.matmul.unwrap();
        assert_eq!(matmul.threshold, 64);
        assert_eq!(matmul.layout, PairLayout::Sequential);
        assert_eq!(matmul.threads, 1);

        let life = job.life.unwrap();
        assert_eq!((life.generations, life.print_every, life.border), (20, 5, 1));
        assert_eq!(job.output.json, Some(PathBuf::from("report.json")));
    }

    #[test]
    fn test_matmul_threshold_default() {
        let job = parse_config("[matmul]\nfile = \"m.txt\"\n").unwrap();
        assert_eq!(job.matmul.unwrap().threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_rejects_bad_jobs() {
        assert!(parse_config("workers = 2\n").is_err());
        assert!(parse_config("workers = 0\n[sieve]\nmax_num = 10\n").is_err());
        assert!(parse_config("[sieve]\nmax_num = 0\n").is_err());
        assert!(parse_config("[sieve]\nmax_num = 10\nstrategy = \"guess\"\n").is_err());
        assert!(parse_config("backend = \"tcp\"\n[sieve]\nmax_num = 10\n").is_err());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("threads".parse(), Ok(Backend::Threads));
        assert_eq!("mpi".parse(), Ok(Backend::Mpi));
        assert!("tcp".parse::<Backend>().is_err());
    }

    #[cfg(not(feature = "distributed"))]
    #[test]
    fn test_mpi_backend_needs_feature() {
        let err = parse_config("backend = \"mpi\"\n[sieve]\nmax_num = 10\n").unwrap_err();
        assert!(err.to_string().contains("distributed"), "{}", err);
    }
}
