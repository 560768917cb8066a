//! Parameterised query construction for the SQLite-backed cookie stores.
//!
//! Two dialects are supported:
//!
//! ```sql
//! -- Chromium family ("cookies" table, 1601-epoch microseconds)
//! CREATE TABLE cookies
//!   (
//!      host_key        TEXT NOT NULL,
//!      name            TEXT NOT NULL,
//!      value           TEXT NOT NULL,
//!      encrypted_value BLOB NOT NULL,
//!      path            TEXT NOT NULL,
//!      expires_utc     INTEGER NOT NULL,
//!      is_secure       INTEGER NOT NULL,
//!      is_httponly     INTEGER NOT NULL
//!   );
//!
//! -- Firefox ("moz_cookies" table, Unix seconds)
//! CREATE TABLE moz_cookies (
//!   name TEXT, value TEXT, host TEXT, path TEXT,
//!   expiry INTEGER, isSecure INTEGER, isHttpOnly INTEGER
//! );
//! ```
//!
//! Every user-influenced value is a bound parameter; the keyword denylist in
//! [`validate_query_params`] is a defence-in-depth check on top of that.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;

use crate::cookie::{is_like_pattern, CookieSpec, WILDCARD};
use crate::error::{Error, Result};

/// Inclusive bounds accepted for a per-query row limit.
pub const LIMIT_RANGE: std::ops::RangeInclusive<u32> = 1..=10_000;

/// Which SQL dialect a cookie database speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Chromium,
    Firefox,
}

/// Static column mapping for one browser kind.
#[derive(Debug, Clone, Copy)]
pub struct BrowserSchema {
    pub table: &'static str,
    pub name_col: &'static str,
    pub value_col: &'static str,
    pub encrypted_value_col: Option<&'static str>,
    pub host_col: &'static str,
    pub expiry_col: &'static str,
    pub path_col: &'static str,
    pub secure_col: &'static str,
    pub http_only_col: &'static str,
}

pub const CHROMIUM_SCHEMA: BrowserSchema = BrowserSchema {
    table: "cookies",
    name_col: "name",
    value_col: "value",
    encrypted_value_col: Some("encrypted_value"),
    host_col: "host_key",
    expiry_col: "expires_utc",
    path_col: "path",
    secure_col: "is_secure",
    http_only_col: "is_httponly",
};

pub const FIREFOX_SCHEMA: BrowserSchema = BrowserSchema {
    table: "moz_cookies",
    name_col: "name",
    value_col: "value",
    encrypted_value_col: None,
    host_col: "host",
    expiry_col: "expiry",
    path_col: "path",
    secure_col: "isSecure",
    http_only_col: "isHttpOnly",
};

impl SqlDialect {
    pub fn schema(self) -> &'static BrowserSchema {
        match self {
            SqlDialect::Chromium => &CHROMIUM_SCHEMA,
            SqlDialect::Firefox => &FIREFOX_SCHEMA,
        }
    }
}

/// Knobs affecting predicate construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Match the host column literally instead of the subdomain rules.
    pub exact_domain: bool,
    /// Skip the expiry predicate.
    pub include_expired: bool,
    /// Optional row limit, validated against [`LIMIT_RANGE`].
    pub limit: Option<u32>,
}

/// A ready-to-execute statement with its bound parameters.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    /// Render the parameters for the query monitor.
    pub fn params_display(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|p| match p {
                Value::Null => "NULL".to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Real(r) => r.to_string(),
                Value::Text(t) => t.clone(),
                Value::Blob(b) => format!("<{} bytes>", b.len()),
            })
            .collect()
    }
}

static SQL_DENYLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER)\b|--|;")
        .expect("denylist regex is valid")
});

/// Reject specs that are empty or smuggle SQL fragments, and limits outside
/// the accepted window. Bound parameters are the primary guarantee; this is
/// the defence-in-depth check.
pub fn validate_query_params(spec: &CookieSpec, limit: Option<u32>) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(Error::InvalidQuery("cookie name must not be empty".into()));
    }
    if spec.domain.trim().is_empty() {
        return Err(Error::InvalidQuery("cookie domain must not be empty".into()));
    }
    for (field, value) in [("name", &spec.name), ("domain", &spec.domain)] {
        if SQL_DENYLIST.is_match(value) {
            return Err(Error::InvalidQuery(format!(
                "cookie {field} contains a forbidden SQL fragment: {value:?}"
            )));
        }
    }
    if let Some(limit) = limit {
        if !LIMIT_RANGE.contains(&limit) {
            return Err(Error::InvalidQuery(format!(
                "limit {limit} outside accepted range 1..=10000"
            )));
        }
    }
    Ok(())
}

fn name_predicate(schema: &BrowserSchema, name: &str, params: &mut Vec<Value>) -> Option<String> {
    if name == WILDCARD {
        return None;
    }
    if is_like_pattern(name) {
        params.push(Value::Text(name.to_string()));
        Some(format!("{} LIKE ?", schema.name_col))
    } else {
        params.push(Value::Text(name.to_string()));
        Some(format!("{} = ?", schema.name_col))
    }
}

fn domain_predicate(
    schema: &BrowserSchema,
    domain: &str,
    exact: bool,
    params: &mut Vec<Value>,
) -> Option<String> {
    let host = schema.host_col;
    if exact {
        params.push(Value::Text(domain.to_string()));
        return Some(format!("{host} = ?"));
    }
    if domain == WILDCARD {
        return None;
    }
    if is_like_pattern(domain) {
        params.push(Value::Text(domain.to_string()));
        return Some(format!("{host} LIKE ?"));
    }
    if domain.starts_with('.') {
        params.push(Value::Text(format!("%{domain}")));
        return Some(format!("{host} LIKE ?"));
    }

    params.push(Value::Text(domain.to_string()));
    params.push(Value::Text(format!(".{domain}")));
    params.push(Value::Text(format!("%.{domain}")));
    Some(format!("({host} = ? OR {host} = ? OR {host} LIKE ?)"))
}

fn expiry_predicate(dialect: SqlDialect, params: &mut Vec<Value>) -> String {
    let schema = dialect.schema();
    match dialect {
        // Finer filtering of the 1601-microsecond epoch is left to the
        // caller so the predicate stays bindable and index-friendly.
        SqlDialect::Chromium => format!("{} > 0", schema.expiry_col),
        SqlDialect::Firefox => {
            let now_seconds = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            params.push(Value::Integer(now_seconds));
            format!("{} > ?", schema.expiry_col)
        }
    }
}

fn spec_where_clause(
    dialect: SqlDialect,
    spec: &CookieSpec,
    options: &QueryOptions,
    params: &mut Vec<Value>,
) -> String {
    let schema = dialect.schema();
    let mut predicates = Vec::new();
    if let Some(p) = name_predicate(schema, &spec.name, params) {
        predicates.push(p);
    }
    if let Some(p) = domain_predicate(schema, &spec.domain, options.exact_domain, params) {
        predicates.push(p);
    }
    if !options.include_expired {
        predicates.push(expiry_predicate(dialect, params));
    }
    if predicates.is_empty() {
        "1 = 1".to_string()
    } else {
        predicates.join(" AND ")
    }
}

fn select_columns(schema: &BrowserSchema) -> String {
    let mut cols = vec![
        format!("{} AS name", schema.name_col),
        format!("{} AS domain", schema.host_col),
        format!("{} AS value", schema.value_col),
    ];
    if let Some(enc) = schema.encrypted_value_col {
        cols.push(format!("{enc} AS encrypted_value"));
    }
    cols.push(format!("{} AS expiry", schema.expiry_col));
    cols.push(format!("{} AS path", schema.path_col));
    cols.push(format!("{} AS is_secure", schema.secure_col));
    cols.push(format!("{} AS is_httponly", schema.http_only_col));
    cols.join(", ")
}

/// Build the SELECT for one spec.
pub fn build_select_query(
    dialect: SqlDialect,
    spec: &CookieSpec,
    options: &QueryOptions,
) -> Result<SqlQuery> {
    validate_query_params(spec, options.limit)?;
    let spec = spec.normalized();
    let schema = dialect.schema();

    let mut params = Vec::new();
    let where_clause = spec_where_clause(dialect, &spec, options, &mut params);

    let mut sql = format!(
        "SELECT {columns} FROM {table} WHERE {where_clause} ORDER BY {expiry} DESC",
        columns = select_columns(schema),
        table = schema.table,
        expiry = schema.expiry_col,
    );
    if let Some(limit) = options.limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::from(limit)));
    }

    Ok(SqlQuery { sql, params })
}

/// Build one compound SELECT covering every spec, OR-ing the per-spec
/// predicates. `LIMIT` becomes `min(per-spec limit) × N` when any spec
/// carries one.
pub fn build_batch_select_query(
    dialect: SqlDialect,
    specs: &[(CookieSpec, QueryOptions)],
    include_expired: bool,
) -> Result<SqlQuery> {
    if specs.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let schema = dialect.schema();
    let mut params = Vec::new();
    let mut clauses = Vec::with_capacity(specs.len());
    let mut min_limit: Option<u32> = None;

    for (spec, options) in specs {
        validate_query_params(spec, options.limit)?;
        let spec = spec.normalized();
        let options = QueryOptions {
            include_expired,
            ..*options
        };
        clauses.push(format!("({})", spec_where_clause(dialect, &spec, &options, &mut params)));
        if let Some(limit) = options.limit {
            min_limit = Some(min_limit.map_or(limit, |m| m.min(limit)));
        }
    }

    let mut sql = format!(
        "SELECT {columns} FROM {table} WHERE {clauses} ORDER BY {expiry} DESC",
        columns = select_columns(schema),
        table = schema.table,
        clauses = clauses.join(" OR "),
        expiry = schema.expiry_col,
    );
    if let Some(limit) = min_limit {
        let total = i64::from(limit) * specs.len() as i64;
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(total));
    }

    Ok(SqlQuery { sql, params })
}

/// Chromium stores its schema version in the `meta` table.
pub fn build_meta_query(key: &str) -> SqlQuery {
    SqlQuery {
        sql: "SELECT value FROM meta WHERE key = ?".to_string(),
        params: vec![Value::Text(key.to_string())],
    }
}

/// Probe for a table before querying it.
pub fn table_exists_query(table: &str) -> SqlQuery {
    SqlQuery {
        sql: "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?".to_string(),
        params: vec![Value::Text(table.to_string())],
    }
}
