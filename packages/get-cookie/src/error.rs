//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::safari::binarycookies::BinaryCookiesError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{browser} is not supported on this platform")]
    PlatformUnsupported { browser: &'static str },

    #[error("Invalid cookie spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("No cookie matched the requested name and domain")]
    NotFound,

    #[error("Database is busy: {path} (gave up after {attempts} attempts)")]
    DatabaseBusy { path: PathBuf, attempts: u32 },

    #[error("Connection pool is saturated (gave up after {attempts} attempts)")]
    PoolSaturated { attempts: u32 },

    #[error("Malformed cookie file {path}: {source}")]
    MalformedCookieFile {
        path: PathBuf,
        #[source]
        source: BinaryCookiesError,
    },

    #[error("Empty batch: at least one cookie spec is required")]
    EmptyBatch,

    #[error("Batch query failed: {0}")]
    BatchFailed(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
