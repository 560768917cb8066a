//! Firefox cookie database management.
//!
//! ### Scheme (Firefox 104+)
//!
//! ```sql
//! CREATE TABLE moz_cookies (
//!   id INTEGER PRIMARY KEY,
//!   originAttributes TEXT NOT NULL DEFAULT '',
//!   name TEXT,
//!   value TEXT,
//!   host TEXT,
//!   path TEXT,
//!   expiry INTEGER,
//!   lastAccessed INTEGER,
//!   creationTime INTEGER,
//!   isSecure INTEGER,
//!   isHttpOnly INTEGER,
//!   inBrowserElement INTEGER DEFAULT 0,
//!   sameSite INTEGER DEFAULT 0,
//!   CONSTRAINT moz_uniqueid UNIQUE (
//!     name, host, path, originAttributes
//!   )
//! );
//! ```
//!
//! Firefox stores values in the clear, so this strategy never decrypts.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::cookie::{domain_matches, name_matches, CookieMeta, CookieSpec, Expiry, ExportedCookie};
use crate::error::{Error, Result};
use crate::pool::SqlitePool;
use crate::sql::{self, QueryOptions, SqlDialect};

pub(crate) mod paths;

use self::paths::PathProvider;

struct FirefoxRow {
    name: String,
    host: String,
    value: String,
    expiry: i64,
    path: String,
    secure: bool,
    http_only: bool,
}

/// Extracts cookies from every Firefox profile on the machine.
pub struct FirefoxStrategy {
    pool: Arc<SqlitePool>,
    /// Explicit database list, used instead of discovery when set.
    databases: Option<Vec<PathBuf>>,
}

impl FirefoxStrategy {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool, databases: None }
    }

    /// Restrict discovery to the given database files.
    pub fn with_databases(pool: Arc<SqlitePool>, databases: Vec<PathBuf>) -> Self {
        Self {
            pool,
            databases: Some(databases),
        }
    }

    pub fn browser_name(&self) -> &'static str {
        "Firefox"
    }

    fn databases(&self) -> Vec<PathBuf> {
        if let Some(databases) = &self.databases {
            return databases.clone();
        }
        PathProvider::default_root()
            .map(|provider| provider.cookie_databases())
            .unwrap_or_default()
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        let spec = spec.normalized();
        let mut cookies = Vec::new();

        for db_path in self.databases() {
            let query = sql::build_select_query(SqlDialect::Firefox, &spec, options)?;
            let mut found = self.collect_cookies(&query, &db_path, |row| {
                name_matches(&spec.name, &row.name) && domain_matches(&spec.domain, &row.host)
            })?;
            cookies.append(&mut found);
        }

        Ok(cookies)
    }

    /// One compound query per database covering every spec at once.
    pub(crate) fn batch_query_cookies(
        &self,
        specs: &[(CookieSpec, QueryOptions)],
        include_expired: bool,
    ) -> Result<Vec<ExportedCookie>> {
        let mut cookies = Vec::new();
        for db_path in self.databases() {
            let query = sql::build_batch_select_query(SqlDialect::Firefox, specs, include_expired)?;
            let mut found = self.collect_cookies(&query, &db_path, |row| {
                specs.iter().any(|(spec, _)| {
                    name_matches(&spec.name, &row.name) && domain_matches(&spec.domain, &row.host)
                })
            })?;
            cookies.append(&mut found);
        }

        Ok(cookies)
    }

    fn collect_cookies(
        &self,
        query: &sql::SqlQuery,
        db_path: &std::path::Path,
        keep: impl Fn(&FirefoxRow) -> bool,
    ) -> Result<Vec<ExportedCookie>> {
        let rows = self.pool.execute_query(
            db_path,
            &query.sql,
            query.params_display(),
            |conn| {
                let probe = sql::table_exists_query(SqlDialect::Firefox.schema().table);
                let mut stmt = conn.prepare(&probe.sql)?;
                if !stmt.exists(rusqlite::params_from_iter(probe.params.iter()))? {
                    return Ok(Vec::new());
                }

                let mut stmt = conn.prepare(&query.sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(query.params.iter()),
                    |row| {
                        Ok(FirefoxRow {
                            name: row.get(0)?,
                            host: row.get(1)?,
                            value: row.get(2)?,
                            expiry: row.get(3)?,
                            path: row.get(4)?,
                            secure: row.get::<_, i64>(5)? != 0,
                            http_only: row.get::<_, i64>(6)? != 0,
                        })
                    },
                )?;
                rows.collect()
            },
        );

        let rows = match rows {
            Ok(rows) => rows,
            Err(err @ Error::DatabaseBusy { .. }) => return Err(err),
            Err(err) => {
                warn!(db = %db_path.display(), %err, "skipping unreadable cookie database");
                return Ok(Vec::new());
            }
        };

        Ok(rows
            .into_iter()
            .filter(keep)
            .filter(|row| !row.value.is_empty())
            .map(|row| ExportedCookie {
                name: row.name,
                domain: row.host,
                value: row.value,
                expiry: Expiry::from_unix_ms(row.expiry.saturating_mul(1_000)),
                meta: CookieMeta {
                    file: db_path.to_path_buf(),
                    browser: Some("Firefox".to_string()),
                    path: Some(row.path),
                    secure: Some(row.secure),
                    http_only: Some(row.http_only),
                    decrypted: None,
                },
            })
            .collect())
    }
}
