//! Cookies management for Chrome and its derivatives.
//!
//! ### Scheme (v18)
//!
//! ```sql
//! CREATE TABLE cookies
//!   (
//!      creation_utc       INTEGER NOT NULL,
//!      host_key           TEXT NOT NULL,
//!      top_frame_site_key TEXT NOT NULL,
//!      name               TEXT NOT NULL,
//!      value              TEXT NOT NULL,
//!      encrypted_value    BLOB NOT NULL,
//!      path               TEXT NOT NULL,
//!      expires_utc        INTEGER NOT NULL,
//!      is_secure          INTEGER NOT NULL,
//!      is_httponly        INTEGER NOT NULL,
//!      last_access_utc    INTEGER NOT NULL,
//!      has_expires        INTEGER NOT NULL,
//!      is_persistent      INTEGER NOT NULL,
//!      priority           INTEGER NOT NULL,
//!      samesite           INTEGER NOT NULL,
//!      source_scheme      INTEGER NOT NULL,
//!      source_port        INTEGER NOT NULL,
//!      is_same_party      INTEGER NOT NULL,
//!      last_update_utc    INTEGER NOT NULL
//!   );
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cookie::{domain_matches, name_matches, CookieMeta, CookieSpec, Expiry, ExportedCookie};
use crate::error::{Error, Result};
use crate::pool::SqlitePool;
use crate::sql::{self, QueryOptions, SqlDialect};

use self::encrypted_value::{DecryptError, VERSION_PREFIX_LEN};
use self::paths::PathProvider;

#[cfg(target_os = "linux")]
use self::encrypted_value::linux;
#[cfg(target_os = "macos")]
use self::encrypted_value::mac;
#[cfg(all(unix, not(target_os = "macos")))]
use self::encrypted_value::posix;
#[cfg(target_os = "windows")]
use self::encrypted_value::windows;

pub(crate) mod encrypted_value;
pub(crate) mod paths;

/// Local state stored in the `Local State` file.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub(crate) struct LocalState {
    #[serde(flatten)]
    pub(crate) values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromeVariant {
    Chromium,
    Chrome,
    Edge,
}

impl ChromeVariant {
    pub fn all() -> [ChromeVariant; 3] {
        [ChromeVariant::Chrome, ChromeVariant::Chromium, ChromeVariant::Edge]
    }
}

impl std::fmt::Display for ChromeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChromeVariant::Chromium => write!(f, "Chromium"),
            ChromeVariant::Chrome => write!(f, "Chrome"),
            ChromeVariant::Edge => write!(f, "Edge"),
        }
    }
}

// Offset of UNIX epoch (1970-01-01 00:00:00 UTC) from Windows FILETIME epoch
// (1601-01-01 00:00:00 UTC), in microseconds. This value is derived from the
// following: ((1970-1601)*365+89)*24*60*60*1000*1000, where 89 is the number
// of leap year days between 1601 and 1970: (1970-1601)/4 excluding 1700,
// 1800, and 1900.
const WINDOWS_UNIX_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

// From Chromium source code:
// Time is stored internally as microseconds
// since the Windows epoch (1601-01-01 00:00:00 UTC).
/// Convert a Chrome timestamp (based on Windows epoch) in microseconds
/// to a UNIX timestamp in milliseconds.
pub fn chrome_timestamp_to_unix_ms(chrome_time: i64) -> i64 {
    chrome_time / 1_000 - WINDOWS_UNIX_EPOCH_OFFSET_MICROS / 1_000
}

/// Convert a UNIX timestamp in milliseconds to a Chrome timestamp in
/// microseconds since the Windows epoch.
pub fn unix_ms_to_chrome_timestamp(unix_ms: i64) -> i64 {
    unix_ms * 1_000 + WINDOWS_UNIX_EPOCH_OFFSET_MICROS
}

/// One row out of the `cookies` table, pre-decryption.
struct ChromeRow {
    name: String,
    value: String,
    encrypted_value: Vec<u8>,
    host: String,
    path: String,
    expires: i64,
    secure: bool,
    http_only: bool,
}

/// Decrypt a cookie value.
#[cfg(target_os = "macos")]
fn decrypt_cookie_value(encrypted_value: &[u8], variant: ChromeVariant) -> std::result::Result<String, DecryptError> {
    let key = match encrypted_value.get(..VERSION_PREFIX_LEN) {
        Some(b"v10") | Some(b"v11") => Some(mac::get_v10_key(variant)?),
        _ => None,
    };

    match key {
        Some(key) => {
            let encrypted_value = &encrypted_value[VERSION_PREFIX_LEN..];
            encrypted_value::decrypt_value(key, encrypted_value)
        }
        // We assume that it's not encrypted.
        None => Ok(String::from_utf8(encrypted_value.to_vec())?),
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn decrypt_cookie_value(encrypted_value: &[u8], variant: ChromeVariant) -> std::result::Result<String, DecryptError> {
    #[cfg(target_os = "linux")]
    let v11_key = match encrypted_value.get(..VERSION_PREFIX_LEN) {
        Some(b"v11") => Some(linux::get_v11_key(variant)?),
        _ => None,
    };
    #[cfg(not(target_os = "linux"))]
    let v11_key: Option<Vec<u8>> = {
        let _ = variant;
        None
    };

    let key = match encrypted_value.get(..VERSION_PREFIX_LEN) {
        Some(b"v11") => match v11_key {
            Some(ref key) => Some(key.as_slice()),
            None => return Err(DecryptError::KeyUnavailable("v11 key".into())),
        },
        Some(b"v10") => Some(posix::CHROME_V10_KEY.as_slice()),
        _ => None,
    };

    match key {
        Some(key) => {
            let encrypted_value = &encrypted_value[VERSION_PREFIX_LEN..];
            encrypted_value::decrypt_value(key, encrypted_value)
        }
        // We assume that it's not encrypted.
        None => Ok(String::from_utf8(encrypted_value.to_vec())?),
    }
}

#[cfg(target_os = "windows")]
fn decrypt_cookie_value_windows(
    encrypted_value: &[u8],
    local_state: &LocalState,
) -> std::result::Result<String, DecryptError> {
    let key = match encrypted_value.get(..VERSION_PREFIX_LEN) {
        Some(b"v10") => {
            let encrypted_key = windows::get_encrypted_key(local_state).ok_or_else(|| {
                DecryptError::KeyUnavailable("no encrypted key in the local state".into())
            })?;
            Some(windows::decrypt_dpapi_encrypted_key(encrypted_key)?)
        }
        _ => None,
    };

    match key {
        Some(key) => {
            encrypted_value::decrypt_value(key, &encrypted_value[VERSION_PREFIX_LEN..])
        }
        // Values are always encrypted on Windows, with DPAPI when not
        // with AES-256-GCM.
        None => {
            let mut buffer = encrypted_value.to_vec();
            Ok(String::from_utf8(windows::decrypt_dpapi(&mut buffer)?)?)
        }
    }
}

/// Extracts cookies from every Chrome-family install on the machine.
pub struct ChromeStrategy {
    pool: Arc<SqlitePool>,
    variants: Vec<ChromeVariant>,
    /// Explicit database list, used instead of discovery when set.
    databases: Option<Vec<PathBuf>>,
    /// Explicit AES-128 key, used instead of the platform key when set.
    key: Option<Vec<u8>>,
}

impl ChromeStrategy {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self {
            pool,
            variants: ChromeVariant::all().to_vec(),
            databases: None,
            key: None,
        }
    }

    /// Restrict discovery to the given database files. Used by tests and by
    /// callers pointing at a copied profile.
    pub fn with_databases(pool: Arc<SqlitePool>, databases: Vec<PathBuf>) -> Self {
        Self {
            pool,
            variants: vec![ChromeVariant::Chrome],
            databases: Some(databases),
            key: None,
        }
    }

    /// Use a fixed decryption key instead of the platform's safe storage.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn browser_name(&self) -> &'static str {
        "Chrome"
    }

    pub fn is_supported() -> bool {
        cfg!(any(target_os = "macos", target_os = "linux", windows))
    }

    /// The databases to query, grouped with the variant that owns them.
    fn databases(&self) -> Vec<(ChromeVariant, PathBuf)> {
        if let Some(databases) = &self.databases {
            return databases.iter().map(|p| (ChromeVariant::Chrome, p.clone())).collect();
        }

        let mut found = Vec::new();
        for &variant in &self.variants {
            if let Some(provider) = PathProvider::default_root(variant) {
                for db in provider.cookie_databases() {
                    found.push((variant, db));
                }
            }
        }
        found
    }

    fn decrypt_or_fallback(&self, raw: &[u8], variant: ChromeVariant) -> (String, Option<bool>) {
        let prefixed = matches!(raw.get(..VERSION_PREFIX_LEN), Some(b"v10") | Some(b"v11"));
        if !prefixed {
            return (String::from_utf8_lossy(raw).into_owned(), None);
        }

        let decrypted = match &self.key {
            Some(key) => encrypted_value::decrypt_value(key, &raw[VERSION_PREFIX_LEN..]),
            None => self.platform_decrypt(raw, variant),
        };

        match decrypted {
            Ok(value) => (value, Some(true)),
            Err(err) => {
                debug!(%err, "could not decrypt cookie value, keeping raw bytes");
                (String::from_utf8_lossy(raw).into_owned(), Some(false))
            }
        }
    }

    #[cfg(unix)]
    fn platform_decrypt(
        &self,
        raw: &[u8],
        variant: ChromeVariant,
    ) -> std::result::Result<String, DecryptError> {
        decrypt_cookie_value(raw, variant)
    }

    #[cfg(target_os = "windows")]
    fn platform_decrypt(
        &self,
        raw: &[u8],
        variant: ChromeVariant,
    ) -> std::result::Result<String, DecryptError> {
        let provider = PathProvider::default_root(variant)
            .ok_or_else(|| DecryptError::KeyUnavailable("no local state".into()))?;
        let local_state: LocalState = serde_json::from_reader(std::io::BufReader::new(
            std::fs::File::open(provider.local_state())
                .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?,
        ))
        .map_err(|e| DecryptError::KeyUnavailable(e.to_string()))?;
        decrypt_cookie_value_windows(raw, &local_state)
    }

    #[cfg(not(any(unix, target_os = "windows")))]
    fn platform_decrypt(
        &self,
        _raw: &[u8],
        _variant: ChromeVariant,
    ) -> std::result::Result<String, DecryptError> {
        Err(DecryptError::KeyUnavailable("unsupported platform".into()))
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        if !Self::is_supported() {
            return Err(Error::PlatformUnsupported { browser: "Chrome" });
        }

        let spec = spec.normalized();
        let mut cookies = Vec::new();

        for (variant, db_path) in self.databases() {
            let query = sql::build_select_query(SqlDialect::Chromium, &spec, options)?;
            let mut found = self.collect_cookies(&query, &db_path, variant, |row| {
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
        if !Self::is_supported() {
            return Err(Error::PlatformUnsupported { browser: "Chrome" });
        }

        let mut cookies = Vec::new();
        for (variant, db_path) in self.databases() {
            let query = sql::build_batch_select_query(SqlDialect::Chromium, specs, include_expired)?;
            let mut found = self.collect_cookies(&query, &db_path, variant, |row| {
                specs.iter().any(|(spec, _)| {
                    name_matches(&spec.name, &row.name) && domain_matches(&spec.domain, &row.host)
                })
            })?;
            cookies.append(&mut found);
        }

        Ok(cookies)
    }

    /// Run one query against one database, prune LIKE over-matches with
    /// `keep`, and decrypt the surviving rows in parallel.
    fn collect_cookies(
        &self,
        query: &sql::SqlQuery,
        db_path: &std::path::Path,
        variant: ChromeVariant,
        keep: impl Fn(&ChromeRow) -> bool,
    ) -> Result<Vec<ExportedCookie>> {
        let rows = self.pool.execute_query(
            db_path,
            &query.sql,
            query.params_display(),
            |conn| {
                let probe = sql::table_exists_query(SqlDialect::Chromium.schema().table);
                let mut stmt = conn.prepare(&probe.sql)?;
                if !stmt.exists(rusqlite::params_from_iter(probe.params.iter()))? {
                    return Ok(Vec::new());
                }

                // Older exports may lack the meta table, so tolerate failure.
                let meta = sql::build_meta_query("version");
                if let Ok(mut stmt) = conn.prepare(&meta.sql) {
                    if let Ok(version) = stmt.query_row(
                        rusqlite::params_from_iter(meta.params.iter()),
                        |row| row.get::<_, String>(0),
                    ) {
                        debug!(schema_version = %version, "chromium cookie database");
                    }
                }

                let mut stmt = conn.prepare(&query.sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(query.params.iter()),
                    |row| {
                        Ok(ChromeRow {
                            name: row.get(0)?,
                            host: row.get(1)?,
                            value: row.get(2)?,
                            encrypted_value: row.get(3)?,
                            expires: row.get(4)?,
                            path: row.get(5)?,
                            secure: row.get(6)?,
                            http_only: row.get(7)?,
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

        let rows: Vec<ChromeRow> = rows
            .into_iter()
            .filter(&keep)
            .filter(|row| !row.value.is_empty() || !row.encrypted_value.is_empty())
            .collect();

        Ok(rows
            .into_par_iter()
            .map(|row| {
                let (value, decrypted) = if row.encrypted_value.is_empty() {
                    (row.value, None)
                } else {
                    self.decrypt_or_fallback(&row.encrypted_value, variant)
                };

                ExportedCookie {
                    name: row.name,
                    domain: row.host,
                    value,
                    expiry: Expiry::from_unix_ms(chrome_timestamp_to_unix_ms(row.expires)),
                    meta: CookieMeta {
                        file: db_path.to_path_buf(),
                        browser: Some(variant.to_string()),
                        path: Some(row.path),
                        secure: Some(row.secure),
                        http_only: Some(row.http_only),
                        decrypted,
                    },
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use crate::pool::PoolConfig;
    use crate::sql::QueryOptions;

    #[test]
    fn chrome_epoch_roundtrips_at_millisecond_precision() {
        // 1970-01-01 .. 2100-01-01 in unix milliseconds.
        for unix_ms in [0i64, 1, 978_307_200_000, 1_700_000_000_123, 4_102_444_800_000] {
            let chrome = unix_ms_to_chrome_timestamp(unix_ms);
            assert_eq!(chrome_timestamp_to_unix_ms(chrome), unix_ms);
        }
    }

    #[test]
    fn chrome_epoch_known_value() {
        // 2001-01-01T00:00:00Z in microseconds since 1601.
        let chrome = 12_622_780_800_000_000i64;
        assert_eq!(chrome_timestamp_to_unix_ms(chrome), 978_307_200_000);
    }

    #[test]
    fn non_positive_expiry_becomes_infinity() {
        assert_eq!(Expiry::from_unix_ms(chrome_timestamp_to_unix_ms(0)), Expiry::Infinity);
    }

    /// One year from now, in Chrome microseconds.
    fn future_expiry() -> i64 {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        unix_ms_to_chrome_timestamp(now_ms + 365 * 24 * 3600 * 1_000)
    }

    fn fixture_db(dir: &Path, rows: &[(&str, &str, &str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join("Cookies");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (key LONGVARCHAR NOT NULL UNIQUE PRIMARY KEY, value LONGVARCHAR);
             INSERT INTO meta (key, value) VALUES ('version', '18');
             CREATE TABLE cookies
               (
                  creation_utc    INTEGER NOT NULL,
                  host_key        TEXT NOT NULL,
                  name            TEXT NOT NULL,
                  value           TEXT NOT NULL,
                  encrypted_value BLOB NOT NULL,
                  path            TEXT NOT NULL,
                  expires_utc     INTEGER NOT NULL,
                  is_secure       INTEGER NOT NULL,
                  is_httponly     INTEGER NOT NULL
               );",
        )
        .unwrap();

        let expires = future_expiry();
        for (host, name, value, encrypted) in rows {
            conn.execute(
                "INSERT INTO cookies
                   (creation_utc, host_key, name, value, encrypted_value,
                    path, expires_utc, is_secure, is_httponly)
                 VALUES (0, ?1, ?2, ?3, ?4, '/', ?5, 1, 0)",
                rusqlite::params![host, name, value, encrypted, expires],
            )
            .unwrap();
        }
        path
    }

    fn test_pool() -> Arc<SqlitePool> {
        Arc::new(SqlitePool::new(PoolConfig {
            enable_monitoring: false,
            ..Default::default()
        }))
    }

    fn opts() -> QueryOptions {
        QueryOptions::default()
    }

    #[test]
    fn wildcard_domain_matches_subdomains_but_not_strangers() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(
            dir.path(),
            &[
                ("api.github.com", "a", "1", b""),
                ("github.com", "b", "2", b""),
                (".github.com", "c", "3", b""),
                ("example.com", "d", "4", b""),
            ],
        );

        let strategy = ChromeStrategy::with_databases(test_pool(), vec![db]);
        let cookies = strategy
            .query_cookies(&CookieSpec::new("%", "github.com"), &opts())
            .unwrap();

        let mut domains: Vec<&str> = cookies.iter().map(|c| c.domain.as_str()).collect();
        domains.sort();
        assert_eq!(domains, vec![".github.com", "api.github.com", "github.com"]);
    }

    #[cfg(unix)]
    #[test]
    fn decrypts_a_v10_value_with_an_injected_key() {
        use super::encrypted_value::{derive_key_from_password, tests::encrypt_value};

        let key = derive_key_from_password("peanuts", 1003).unwrap();
        let mut encrypted = b"v10".to_vec();
        encrypted.extend(encrypt_value(&key, b"hello"));

        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path(), &[("example.com", "session", "", &encrypted)]);

        let strategy =
            ChromeStrategy::with_databases(test_pool(), vec![db]).with_key(key);
        let cookies = strategy
            .query_cookies(&CookieSpec::new("session", "example.com"), &opts())
            .unwrap();

        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "hello");
        assert_eq!(cookies[0].meta.decrypted, Some(true));
    }

    #[cfg(unix)]
    #[test]
    fn undecryptable_values_fall_back_to_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        // A v10 prefix over bytes that are not valid ciphertext.
        let garbage = b"v10hello".to_vec();
        let db = fixture_db(dir.path(), &[("example.com", "broken", "", &garbage)]);

        let strategy = ChromeStrategy::with_databases(test_pool(), vec![db])
            .with_key(vec![0u8; 16]);
        let cookies = strategy
            .query_cookies(&CookieSpec::new("broken", "example.com"), &opts())
            .unwrap();

        // The record survives with the raw rendering, never dropped.
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "v10hello");
        assert_eq!(cookies[0].meta.decrypted, Some(false));
    }

    #[test]
    fn rows_with_empty_values_are_filtered_out() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(
            dir.path(),
            &[("example.com", "empty", "", b""), ("example.com", "kept", "v", b"")],
        );

        let strategy = ChromeStrategy::with_databases(test_pool(), vec![db]);
        let cookies = strategy
            .query_cookies(&CookieSpec::new("%", "example.com"), &opts())
            .unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "kept");
    }

    #[test]
    fn missing_database_yields_empty_not_error() {
        let strategy = ChromeStrategy::with_databases(
            test_pool(),
            vec![std::path::PathBuf::from("/nonexistent/profile/Cookies")],
        );
        let cookies = strategy
            .query_cookies(&CookieSpec::new("%", "%"), &opts())
            .unwrap();
        assert!(cookies.is_empty());
    }
}
