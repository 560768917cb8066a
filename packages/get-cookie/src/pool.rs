//! A bounded pool of read-only SQLite handles, one per cookie database.
//!
//! Browsers keep their databases locked while running, so opening retries
//! with exponential backoff on lock errors and can optionally bypass the
//! lock entirely with an `immutable=1` URI (which can cause read errors if
//! the browser is mid-write).

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::monitor::QueryMonitor;

/// Bounded length of the observable event log.
const MAX_EVENTS: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub query_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub enable_monitoring: bool,
    /// Open with `file:…?immutable=1`, ignoring the browser's lock.
    pub bypass_lock: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            idle_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(3),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            enable_monitoring: true,
            bypass_lock: false,
        }
    }
}

/// Observable pool activity, also mirrored to tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    ConnectionCreated { filepath: PathBuf },
    ConnectionClosed { filepath: PathBuf },
    QueryExecuted { filepath: PathBuf, duration: Duration, rows: usize },
}

#[derive(Debug)]
struct ConnectionMetadata {
    /// The handle, present while the entry is idle and `None` while leased.
    conn: Option<Connection>,
    in_use: bool,
    last_accessed: Instant,
    created: Instant,
    query_count: u64,
    total_query_time: Duration,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: HashMap<PathBuf, ConnectionMetadata>,
    events: VecDeque<PoolEvent>,
    total_queries: u64,
    total_query_time: Duration,
    total_acquires: u64,
    reuse_count: u64,
}

/// Read-only statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_queries: u64,
    pub average_query_time: Duration,
    pub reuse_count: u64,
    pub hit_rate: f64,
}

enum Acquire {
    Reuse(Connection),
    Open,
    Wait,
}

#[derive(Debug)]
pub struct SqlitePool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

static GLOBAL_POOL: Lazy<std::sync::Arc<SqlitePool>> =
    Lazy::new(|| std::sync::Arc::new(SqlitePool::default()));

impl Default for SqlitePool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl SqlitePool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// The process-wide pool instance.
    pub fn global() -> std::sync::Arc<SqlitePool> {
        std::sync::Arc::clone(&GLOBAL_POOL)
    }

    /// Acquire a handle, run `f`, record latency and row count, and release
    /// the handle again on every exit path.
    pub fn execute_query<R>(
        &self,
        path: &Path,
        description: &str,
        params: Vec<String>,
        f: impl FnOnce(&Connection) -> rusqlite::Result<Vec<R>>,
    ) -> Result<Vec<R>> {
        let conn = self.acquire(path)?;
        let started = Instant::now();

        let result = if self.config.enable_monitoring {
            QueryMonitor::global().observe(description, params, Some(path), || {
                f(&conn).map(|rows| {
                    let count = rows.len();
                    (rows, count)
                })
            })
        } else {
            f(&conn)
        };

        let duration = started.elapsed();
        let rows = result.as_ref().map(Vec::len).unwrap_or(0);
        self.release(path, conn, duration, rows);

        result.map_err(Error::from)
    }

    fn acquire(&self, path: &Path) -> Result<Connection> {
        let mut waits = 0u32;
        loop {
            let action = {
                let mut inner = self.inner.lock().expect("pool lock poisoned");
                self.cleanup_idle(&mut inner);

                if let Some(meta) = inner.entries.get_mut(path) {
                    if meta.in_use {
                        Acquire::Wait
                    } else {
                        meta.in_use = true;
                        meta.last_accessed = Instant::now();
                        let conn = meta.conn.take().expect("idle entry holds a connection");
                        inner.reuse_count += 1;
                        inner.total_acquires += 1;
                        Acquire::Reuse(conn)
                    }
                } else if inner.entries.len() >= self.config.max_connections {
                    let lru_idle = inner
                        .entries
                        .iter()
                        .filter(|(_, meta)| !meta.in_use)
                        .min_by_key(|(_, meta)| meta.last_accessed)
                        .map(|(p, _)| p.clone());
                    match lru_idle {
                        Some(victim) => {
                            Self::close_entry(&mut inner, &victim);
                            Self::reserve(&mut inner, path);
                            Acquire::Open
                        }
                        None => Acquire::Wait,
                    }
                } else {
                    Self::reserve(&mut inner, path);
                    Acquire::Open
                }
            };

            match action {
                Acquire::Reuse(conn) => return Ok(conn),
                Acquire::Open => match self.open_connection(path) {
                    Ok(conn) => {
                        let mut inner = self.inner.lock().expect("pool lock poisoned");
                        inner.total_acquires += 1;
                        Self::push_event(
                            &mut inner,
                            PoolEvent::ConnectionCreated { filepath: path.to_path_buf() },
                        );
                        return Ok(conn);
                    }
                    Err(err) => {
                        let mut inner = self.inner.lock().expect("pool lock poisoned");
                        inner.entries.remove(path);
                        return Err(err);
                    }
                },
                Acquire::Wait => {
                    waits += 1;
                    if waits > self.config.retry_attempts {
                        return Err(Error::PoolSaturated { attempts: waits });
                    }
                    std::thread::sleep(self.config.retry_delay);
                }
            }
        }
    }

    fn release(&self, path: &Path, conn: Connection, duration: Duration, rows: usize) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        inner.total_queries += 1;
        inner.total_query_time += duration;
        Self::push_event(
            &mut inner,
            PoolEvent::QueryExecuted { filepath: path.to_path_buf(), duration, rows },
        );

        match inner.entries.get_mut(path) {
            Some(meta) => {
                meta.conn = Some(conn);
                meta.in_use = false;
                meta.last_accessed = Instant::now();
                meta.query_count += 1;
                meta.total_query_time += duration;
            }
            None => {
                // The entry was evicted or the pool was closed while leased.
                if let Err((_, err)) = conn.close() {
                    warn!(path = %path.display(), %err, "error closing connection");
                }
                Self::push_event(
                    &mut inner,
                    PoolEvent::ConnectionClosed { filepath: path.to_path_buf() },
                );
            }
        }
    }

    /// Reserve the slot so the pool bound holds while the open happens
    /// outside the lock.
    fn reserve(inner: &mut PoolInner, path: &Path) {
        let now = Instant::now();
        inner.entries.insert(
            path.to_path_buf(),
            ConnectionMetadata {
                conn: None,
                in_use: true,
                last_accessed: now,
                created: now,
                query_count: 0,
                total_query_time: Duration::ZERO,
            },
        );
    }

    fn open_connection(&self, path: &Path) -> Result<Connection> {
        let mut attempt = 0u32;
        loop {
            let opened = if self.config.bypass_lock {
                let mut uri = OsString::from("file:");
                uri.push(path.as_os_str());
                uri.push("?immutable=1");
                Connection::open_with_flags(
                    uri,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
                )
            } else {
                Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            };

            match opened {
                Ok(conn) => {
                    conn.busy_timeout(self.config.query_timeout)?;
                    debug!(path = %path.display(), "opened cookie database");
                    return Ok(conn);
                }
                Err(err) if is_locked_error(&err) => {
                    if attempt >= self.config.retry_attempts {
                        return Err(Error::DatabaseBusy {
                            path: path.to_path_buf(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.config.retry_delay * 2u32.pow(attempt);
                    debug!(
                        path = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database locked, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn cleanup_idle(&self, inner: &mut PoolInner) {
        let expired: Vec<PathBuf> = inner
            .entries
            .iter()
            .filter(|(_, meta)| !meta.in_use && meta.last_accessed.elapsed() > self.config.idle_timeout)
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            Self::close_entry(inner, &path);
        }
    }

    fn close_entry(inner: &mut PoolInner, path: &Path) {
        if let Some(meta) = inner.entries.remove(path) {
            if let Some(conn) = meta.conn {
                if let Err((_, err)) = conn.close() {
                    warn!(path = %path.display(), %err, "error closing connection");
                }
            }
            debug!(path = %path.display(), "closed cookie database");
            Self::push_event(inner, PoolEvent::ConnectionClosed { filepath: path.to_path_buf() });
        }
    }

    fn push_event(inner: &mut PoolInner, event: PoolEvent) {
        inner.events.push_back(event);
        while inner.events.len() > MAX_EVENTS {
            inner.events.pop_front();
        }
    }

    /// Close every idle handle. Leased handles are closed on release.
    /// Safe to call repeatedly; the CLI calls it at process exit.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let paths: Vec<PathBuf> = inner.entries.keys().cloned().collect();
        for path in paths {
            Self::close_entry(&mut inner, &path);
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("pool lock poisoned");
        let active = inner.entries.values().filter(|m| m.in_use).count();
        let average_query_time = if inner.total_queries > 0 {
            inner.total_query_time / inner.total_queries as u32
        } else {
            Duration::ZERO
        };
        let hit_rate = if inner.total_acquires > 0 {
            inner.reuse_count as f64 / inner.total_acquires as f64
        } else {
            0.0
        };
        PoolStats {
            total_connections: inner.entries.len(),
            active_connections: active,
            idle_connections: inner.entries.len() - active,
            total_queries: inner.total_queries,
            average_query_time,
            reuse_count: inner.reuse_count,
            hit_rate,
        }
    }

    /// A copy of the bounded event log, oldest first.
    pub fn events(&self) -> Vec<PoolEvent> {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.events.iter().cloned().collect()
    }

    /// Age of the oldest entry, used by tests.
    pub fn oldest_connection_age(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.entries.values().map(|m| m.created.elapsed()).max()
    }
}

impl Drop for SqlitePool {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn is_locked_error(err: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(code, message) = err {
        if matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return true;
        }
        if let Some(message) = message {
            let message = message.to_ascii_lowercase();
            return message.contains("database is locked")
                || message.contains("database locked")
                || message.contains("sqlite_busy");
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_db(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t (v) VALUES ('a'), ('b');",
        )
        .unwrap();
        path
    }

    fn select_all(conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT v FROM t ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    #[test]
    fn reuses_an_idle_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path(), "Cookies");
        let pool = SqlitePool::new(PoolConfig { enable_monitoring: false, ..Default::default() });

        for _ in 0..3 {
            let rows = pool.execute_query(&db, "select", vec![], select_all).unwrap();
            assert_eq!(rows, vec!["a", "b"]);
        }

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.reuse_count, 2);
        let created = pool
            .events()
            .iter()
            .filter(|e| matches!(e, PoolEvent::ConnectionCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn pool_bound_holds_and_lru_is_evicted_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixture_db(dir.path(), "A");
        let b = fixture_db(dir.path(), "B");
        let c = fixture_db(dir.path(), "C");
        let pool = SqlitePool::new(PoolConfig {
            max_connections: 2,
            enable_monitoring: false,
            ..Default::default()
        });

        pool.execute_query(&a, "select", vec![], select_all).unwrap();
        pool.execute_query(&b, "select", vec![], select_all).unwrap();
        pool.execute_query(&c, "select", vec![], select_all).unwrap();

        assert!(pool.stats().total_connections <= 2);

        // A, the least recently used entry, must close before C opens.
        let events = pool.events();
        let closed_a = events
            .iter()
            .position(|e| matches!(e, PoolEvent::ConnectionClosed { filepath } if filepath == &a));
        let created_c = events
            .iter()
            .position(|e| matches!(e, PoolEvent::ConnectionCreated { filepath } if filepath == &c));
        assert!(closed_a.unwrap() < created_c.unwrap());
    }

    #[test]
    fn idle_entries_are_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path(), "Cookies");
        let pool = SqlitePool::new(PoolConfig {
            idle_timeout: Duration::from_millis(10),
            enable_monitoring: false,
            ..Default::default()
        });

        pool.execute_query(&db, "select", vec![], select_all).unwrap();
        assert_eq!(pool.stats().total_connections, 1);

        std::thread::sleep(Duration::from_millis(30));
        // Cleanup runs at the start of the next acquire.
        let other = fixture_db(dir.path(), "Other");
        pool.execute_query(&other, "select", vec![], select_all).unwrap();

        let events = pool.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, PoolEvent::ConnectionClosed { filepath } if filepath == &db)));
    }

    #[test]
    fn open_errors_propagate() {
        let pool = SqlitePool::new(PoolConfig { enable_monitoring: false, ..Default::default() });
        let missing = Path::new("/nonexistent/dir/Cookies");
        let result = pool.execute_query(missing, "select", vec![], select_all);
        assert!(result.is_err());
        assert_eq!(pool.stats().total_connections, 0);
    }

    #[test]
    fn release_happens_on_query_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path(), "Cookies");
        let pool = SqlitePool::new(PoolConfig { enable_monitoring: false, ..Default::default() });

        let failed: Result<Vec<String>> = pool.execute_query(&db, "bad", vec![], |conn| {
            let mut stmt = conn.prepare("SELECT v FROM no_such_table")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        });
        assert!(failed.is_err());

        // The handle must be back in the pool and usable.
        let rows = pool.execute_query(&db, "select", vec![], select_all).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[test]
    fn close_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path(), "Cookies");
        let pool = SqlitePool::new(PoolConfig { enable_monitoring: false, ..Default::default() });
        pool.execute_query(&db, "select", vec![], select_all).unwrap();

        pool.close_all();
        pool.close_all();
        assert_eq!(pool.stats().total_connections, 0);
    }

    #[test]
    fn concurrent_queries_stay_within_the_bound() {
        let dir = tempfile::tempdir().unwrap();
        let dbs: Vec<PathBuf> = (0..6).map(|i| fixture_db(dir.path(), &format!("db{i}"))).collect();
        let pool = SqlitePool::new(PoolConfig {
            max_connections: 3,
            enable_monitoring: false,
            ..Default::default()
        });

        std::thread::scope(|scope| {
            for db in &dbs {
                scope.spawn(|| {
                    let rows = pool.execute_query(db, "select", vec![], select_all).unwrap();
                    assert_eq!(rows.len(), 2);
                });
            }
        });

        assert!(pool.stats().total_connections <= 3);
        assert_eq!(pool.stats().total_queries, 6);
    }
}
