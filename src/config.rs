use clap::{Parser, ValueEnum};
use std::fmt;

use crate::error::{Error, Result};
use crate::pool::{DEFAULT_MAX_ARRAYS_PER_BUCKET, DEFAULT_MAX_ARRAY_LENGTH};

/// Workload executed by a run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One context renting and returning in a loop
    Serial,
    /// One context per core, all sharing the pool
    Parallel,
    /// Producer and consumer connected by a single-slot channel
    ProducerConsumer,
    /// Many contexts acquiring and releasing a spin lock
    LockContention,
}

impl Strategy {
    /// Whether the strategy rents buffers.
    pub fn uses_pool(&self) -> bool {
        !matches!(self, Strategy::LockContention)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Serial => "serial",
            Strategy::Parallel => "parallel",
            Strategy::ProducerConsumer => "producer-consumer",
            Strategy::LockContention => "lock-contention",
        };
        f.write_str(name)
    }
}

/// How execution contexts wait.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Contexts own a thread and park it while waiting
    Blocking,
    /// Contexts are tasks that yield to the scheduler while waiting
    Suspending,
}

/// Element type of the pooled buffers.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    U8,
    I32,
    U64,
    F64,
    /// Heap-backed elements (`String`)
    String,
}

/// rental-bench - buffer pool rent/return micro-benchmark
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Workload to run
    #[arg(short, long, value_enum, default_value = "serial")]
    pub strategy: Strategy,

    /// Element type of the pooled buffers
    #[arg(short, long, value_enum, default_value = "u8")]
    pub element: ElementKind,

    /// Minimum number of elements per rented buffer
    #[arg(short, long, default_value = "4096")]
    pub rental_size: usize,

    /// Loop iterations per execution context
    #[arg(short, long, default_value = "10000000")]
    pub iterations: u64,

    /// Reset each buffer to default values after renting it
    #[arg(long)]
    pub clear: bool,

    /// Read every element of each buffer before giving it away
    #[arg(long)]
    pub scan: bool,

    /// Waiting discipline of every context
    #[arg(short, long, value_enum, default_value = "blocking")]
    pub discipline: Discipline,

    /// Rent from the process-wide pool instead of a private one
    #[arg(long)]
    pub shared_pool: bool,

    /// Parallel strategy contexts (defaults to available parallelism)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Lock-contention strategy contexts
    #[arg(long, default_value = "48")]
    pub lock_contexts: usize,

    /// Largest pooled size class of a private pool, in elements (not
    /// accepted with --shared-pool)
    #[arg(long, default_value_t = DEFAULT_MAX_ARRAY_LENGTH)]
    pub max_array_length: usize,

    /// Idle buffers a private pool keeps per size class (not accepted with
    /// --shared-pool)
    #[arg(long, default_value_t = DEFAULT_MAX_ARRAYS_PER_BUCKET)]
    pub max_arrays_per_bucket: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Number of contexts the parallel strategy starts.
    pub fn parallelism(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reject settings no strategy can run with.
    pub fn validate(&self) -> Result<()> {
        if self.rental_size == 0 {
            return Err(Error::InvalidConfig("rental size must be positive".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(Error::InvalidConfig("workers must be positive".into()));
        }
        if self.lock_contexts == 0 {
            return Err(Error::InvalidConfig("lock contexts must be positive".into()));
        }
        if self.max_arrays_per_bucket == 0 {
            return Err(Error::InvalidConfig(
                "max arrays per bucket must be positive".into(),
            ));
        }
        // The shared pool is created once with the default limits.
        if self.shared_pool
            && (self.max_array_length != DEFAULT_MAX_ARRAY_LENGTH
                || self.max_arrays_per_bucket != DEFAULT_MAX_ARRAYS_PER_BUCKET)
        {
            return Err(Error::InvalidConfig(
                "pool limits only apply to a private pool, not with --shared-pool".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::Serial,
            element: ElementKind::U8,
            rental_size: 4096,
            iterations: 10_000_000,
            clear: false,
            scan: false,
            discipline: Discipline::Blocking,
            shared_pool: false,
            workers: None,
            lock_contexts: 48,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            max_arrays_per_bucket: DEFAULT_MAX_ARRAYS_PER_BUCKET,
            log_level: "info".to_string(),
        }
    }
}
