use std::fmt;
use std::time::Duration;

use crate::config::Strategy;
use crate::pool::PoolStats;

/// Outcome of one strategy run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub strategy: Strategy,
    /// Execution contexts started.
    pub contexts: usize,
    /// Loop iterations completed across all contexts.
    pub operations: u64,
    pub elapsed: Duration,
    /// Pool counters after the run; `None` for lock contention.
    pub pool: Option<PoolStats>,
}

impl RunReport {
    /// Completed iterations per second of wall time.
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.operations as f64 / secs
        }
    }

    /// Mean wall time per iteration, in nanoseconds.
    pub fn nanos_per_op(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.elapsed.as_nanos() as f64 / self.operations as f64
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ops on {} contexts in {:.3?} ({:.1} ns/op)",
            self.strategy,
            self.operations,
            self.contexts,
            self.elapsed,
            self.nanos_per_op()
        )?;
        if let Some(pool) = &self.pool {
            write!(
                f,
                ", pool hit rate {:.1}%, {} outstanding",
                pool.hit_rate() * 100.0,
                pool.outstanding
            )?;
        }
        Ok(())
    }
}
