//! Library to read cookies from installed browsers.
//!
//! Given a `(name, domain)` spec — either field may be a wildcard — the
//! crate discovers every browser profile on the host, reads the on-disk
//! cookie stores (SQLite for the Chrome family and Firefox, the binary
//! `Cookies.binarycookies` format for Safari), decrypts encrypted Chromium
//! values, and returns one uniform, merged list of cookies.
//!
//! ```no_run
//! use get_cookie::{query_cookies, CookieQueryOptions, CookieSpec};
//!
//! let spec = CookieSpec::new("session", "example.com");
//! let cookies = query_cookies(&spec, &CookieQueryOptions::default())?;
//! for cookie in cookies {
//!     println!("{}={}", cookie.name, cookie.value);
//! }
//! # Ok::<(), get_cookie::Error>(())
//! ```

#![deny(unsafe_code)]

pub mod api;
pub mod batch;
pub mod cookie;
pub mod error;
pub mod fetch;
pub mod jar;
pub mod jwt;
pub mod memory;
pub mod monitor;
pub mod paths;
pub mod pool;
pub mod render;
pub mod sql;
pub mod strategy;

pub mod chrome;
pub mod firefox;
pub mod safari;

pub use api::{
    batch_get_cookies, batch_get_cookies_with_results, clear_caches, get_cookie, query_cookies,
    shutdown, CookieQueryOptions,
};
pub use batch::{BatchCookieService, BatchOptions, SpecResult};
pub use cookie::{CookieMeta, CookieSpec, Expiry, ExportedCookie};
pub use error::{Error, Result};
pub use fetch::{fetch_with_cookies, FetchOptions, FetchResult};
pub use jar::CookieJar;
pub use memory::{InMemoryStrategy, MockStrategy};
pub use monitor::QueryMonitor;
pub use pool::{PoolConfig, PoolEvent, SqlitePool};
pub use safari::binarycookies::BinaryCookiesError;
pub use strategy::{Browser, CompositeStrategy, Strategy};
