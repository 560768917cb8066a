//! Instrumentation around SQL execution: latency, row counts, slow queries
//! and failures. The monitor observes and never alters query results.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// Queries slower than this are counted as slow.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// Bounded length of the execution history.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// One recorded SQL call.
#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub sql: String,
    pub params: Vec<String>,
    pub started_at: Instant,
    pub duration: Duration,
    pub row_count: Option<usize>,
    pub error: Option<String>,
    pub filepath: Option<PathBuf>,
}

/// Read-only snapshot of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorStats {
    pub total_queries: u64,
    pub total_duration: Duration,
    pub slow_queries: u64,
    pub errors: u64,
    pub average_duration: Duration,
    pub slow_query_rate: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub slow_query_threshold: Duration,
    pub max_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorInner {
    history: VecDeque<QueryExecution>,
    total_queries: u64,
    total_duration: Duration,
    slow_queries: u64,
    errors: u64,
}

/// Records every SQL call made through the pool.
#[derive(Debug)]
pub struct QueryMonitor {
    config: MonitorConfig,
    inner: Mutex<MonitorInner>,
}

static GLOBAL_MONITOR: Lazy<QueryMonitor> = Lazy::new(QueryMonitor::default);

impl Default for QueryMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl QueryMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(MonitorInner::default()),
        }
    }

    /// The process-wide monitor instance.
    pub fn global() -> &'static QueryMonitor {
        &GLOBAL_MONITOR
    }

    /// Time `f` and record the outcome. The result passes through untouched.
    pub fn observe<T, E: std::fmt::Display>(
        &self,
        sql: &str,
        params: Vec<String>,
        filepath: Option<&Path>,
        f: impl FnOnce() -> Result<(T, usize), E>,
    ) -> Result<T, E> {
        let started_at = Instant::now();
        let outcome = f();
        let duration = started_at.elapsed();

        let (row_count, error, result) = match outcome {
            Ok((value, rows)) => (Some(rows), None, Ok(value)),
            Err(err) => {
                let message = err.to_string();
                (None, Some(message), Err(err))
            }
        };

        self.record(QueryExecution {
            sql: sql.to_string(),
            params,
            started_at,
            duration,
            row_count,
            error,
            filepath: filepath.map(Path::to_path_buf),
        });

        result
    }

    /// Append one execution, trimming history from the head when full.
    pub fn record(&self, execution: QueryExecution) {
        let slow = execution.duration > self.config.slow_query_threshold;
        if slow {
            warn!(
                sql = %execution.sql,
                duration_ms = execution.duration.as_millis() as u64,
                "slow query"
            );
        } else {
            debug!(
                sql = %execution.sql,
                duration_ms = execution.duration.as_millis() as u64,
                rows = ?execution.row_count,
                "query executed"
            );
        }

        let mut inner = self.inner.lock().expect("monitor lock poisoned");
        inner.total_queries += 1;
        inner.total_duration += execution.duration;
        if slow {
            inner.slow_queries += 1;
        }
        if execution.error.is_some() {
            inner.errors += 1;
        }
        inner.history.push_back(execution);
        while inner.history.len() > self.config.max_history {
            inner.history.pop_front();
        }
    }

    pub fn stats(&self) -> MonitorStats {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        let total = inner.total_queries;
        let average_duration = if total > 0 {
            inner.total_duration / total as u32
        } else {
            Duration::ZERO
        };
        let rate = |count: u64| {
            if total > 0 {
                count as f64 / total as f64
            } else {
                0.0
            }
        };
        MonitorStats {
            total_queries: total,
            total_duration: inner.total_duration,
            slow_queries: inner.slow_queries,
            errors: inner.errors,
            average_duration,
            slow_query_rate: rate(inner.slow_queries),
            error_rate: rate(inner.errors),
        }
    }

    /// A copy of the bounded history, oldest first.
    pub fn history(&self) -> Vec<QueryExecution> {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        inner.history.iter().cloned().collect()
    }

    /// Drop history and counters. Intended for tests.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("monitor lock poisoned");
        *inner = MonitorInner::default();
    }
}
