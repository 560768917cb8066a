//! Fixture builders shared by the integration tests. Not every test binary
//! uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use get_cookie::{PoolConfig, SqlitePool};

/// `(host, name, value, expiry_unix_seconds)` rows for a fixture store.
pub type FixtureRow<'a> = (&'a str, &'a str, &'a str, i64);

pub fn unix_now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn quiet_pool() -> Arc<SqlitePool> {
    Arc::new(SqlitePool::new(PoolConfig {
        enable_monitoring: false,
        ..Default::default()
    }))
}

/// A Chromium `Cookies` database with plaintext values.
pub fn chromium_db(dir: &Path, name: &str, rows: &[FixtureRow]) -> PathBuf {
    const WINDOWS_UNIX_EPOCH_OFFSET_SECONDS: i64 = 11_644_473_600;

    let path = dir.join(name);
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

    for (host, cookie_name, value, expiry_seconds) in rows {
        let expires_utc = (expiry_seconds + WINDOWS_UNIX_EPOCH_OFFSET_SECONDS) * 1_000_000;
        conn.execute(
            "INSERT INTO cookies
               (creation_utc, host_key, name, value, encrypted_value,
                path, expires_utc, is_secure, is_httponly)
             VALUES (0, ?1, ?2, ?3, x'', '/', ?4, 0, 0)",
            rusqlite::params![host, cookie_name, value, expires_utc],
        )
        .unwrap();
    }
    path
}

/// A Firefox `cookies.sqlite` database.
pub fn firefox_db(dir: &Path, name: &str, rows: &[FixtureRow]) -> PathBuf {
    let path = dir.join(name);
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE moz_cookies (
           id INTEGER PRIMARY KEY,
           originAttributes TEXT NOT NULL DEFAULT '',
           name TEXT,
           value TEXT,
           host TEXT,
           path TEXT,
           expiry INTEGER,
           isSecure INTEGER,
           isHttpOnly INTEGER
         );",
    )
    .unwrap();

    for (host, cookie_name, value, expiry_seconds) in rows {
        conn.execute(
            "INSERT INTO moz_cookies (name, value, host, path, expiry, isSecure, isHttpOnly)
             VALUES (?1, ?2, ?3, '/', ?4, 0, 0)",
            rusqlite::params![cookie_name, value, host, expiry_seconds],
        )
        .unwrap();
    }
    path
}
