//! The per-browser strategies behind one common operation set, and the
//! composite that fans out across all of them.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::warn;

use crate::chrome::ChromeStrategy;
use crate::cookie::{dedupe_cookies, CookieSpec, ExportedCookie};
use crate::error::Result;
use crate::firefox::FirefoxStrategy;
use crate::memory::{InMemoryStrategy, MockStrategy};
use crate::pool::SqlitePool;
use crate::safari::SafariStrategy;
use crate::sql::QueryOptions;

/// How long a composite result stays fresh.
pub const COMPOSITE_CACHE_TTL: Duration = Duration::from_secs(10);

/// How many composite results are cached at once.
pub const COMPOSITE_CACHE_CAPACITY: usize = 10;

/// The browsers a caller can restrict a query to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Browser::Chrome => write!(f, "Chrome"),
            Browser::Firefox => write!(f, "Firefox"),
            Browser::Safari => write!(f, "Safari"),
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    /// Parse a browser from a string.
    ///
    /// Supported browsers are:
    /// - chrome (also: chromium, edge)
    /// - firefox
    /// - safari
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" | "chromium" | "edge" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "safari" => Ok(Browser::Safari),
            _ => Err(format!(
                "'{s}' is not one of the supported browsers (chrome, firefox, safari)"
            )),
        }
    }
}

/// A tagged union over every way this crate can produce cookies.
pub enum Strategy {
    Chrome(ChromeStrategy),
    Firefox(FirefoxStrategy),
    Safari(SafariStrategy),
    InMemory(InMemoryStrategy),
    Mock(MockStrategy),
}

impl Strategy {
    pub fn browser_name(&self) -> &'static str {
        match self {
            Strategy::Chrome(s) => s.browser_name(),
            Strategy::Firefox(s) => s.browser_name(),
            Strategy::Safari(s) => s.browser_name(),
            Strategy::InMemory(s) => s.browser_name(),
            Strategy::Mock(s) => s.browser_name(),
        }
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        match self {
            Strategy::Chrome(s) => s.query_cookies(spec, options),
            Strategy::Firefox(s) => s.query_cookies(spec, options),
            Strategy::Safari(s) => s.query_cookies(spec, options),
            Strategy::InMemory(s) => s.query_cookies(spec, options),
            Strategy::Mock(s) => s.query_cookies(spec, options),
        }
    }

    /// Batch entry point: one compound query per file for the SQL-backed
    /// strategies, a per-spec loop for the rest.
    pub(crate) fn batch_query_cookies(
        &self,
        specs: &[(CookieSpec, QueryOptions)],
        include_expired: bool,
    ) -> Result<Vec<ExportedCookie>> {
        match self {
            Strategy::Chrome(s) => s.batch_query_cookies(specs, include_expired),
            Strategy::Firefox(s) => s.batch_query_cookies(specs, include_expired),
            other => {
                let mut cookies = Vec::new();
                for (spec, options) in specs {
                    let options = QueryOptions {
                        include_expired,
                        ..*options
                    };
                    cookies.extend(other.query_cookies(spec, &options)?);
                }
                Ok(cookies)
            }
        }
    }
}

struct CacheSlot {
    cookies: Vec<ExportedCookie>,
    stored_at: Instant,
}

/// Fans a query out to every configured strategy in parallel, merges the
/// results in strategy order, and deduplicates by record fingerprint.
///
/// A strategy failure is logged and contributes an empty result; a
/// composite call never fails.
pub struct CompositeStrategy {
    strategies: Vec<Strategy>,
    cache: Mutex<HashMap<String, CacheSlot>>,
    cache_ttl: Duration,
}

impl CompositeStrategy {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: COMPOSITE_CACHE_TTL,
        }
    }

    /// Shorten the cache TTL. Used by tests.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Every browser installed on this host, in the canonical merge order:
    /// Chrome, Firefox, Safari.
    pub fn default_strategies() -> Vec<Strategy> {
        let pool = SqlitePool::global();
        let mut strategies = Vec::new();
        if ChromeStrategy::is_supported() {
            strategies.push(Strategy::Chrome(ChromeStrategy::new(pool.clone())));
        }
        strategies.push(Strategy::Firefox(FirefoxStrategy::new(pool)));
        if SafariStrategy::is_supported() {
            strategies.push(Strategy::Safari(SafariStrategy::new()));
        }
        strategies.push(Strategy::InMemory(crate::memory::global_store()));
        strategies
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Query every strategy. Always returns a (possibly empty) list.
    pub fn query_cookies(&self, spec: &CookieSpec, options: &QueryOptions) -> Vec<ExportedCookie> {
        let spec = spec.normalized();
        let key = spec.cache_key();

        if let Some(cookies) = self.cache_lookup(&key) {
            return cookies;
        }

        let per_strategy: Vec<Vec<ExportedCookie>> = self
            .strategies
            .par_iter()
            .map(|strategy| match strategy.query_cookies(&spec, options) {
                Ok(cookies) => cookies,
                Err(err) => {
                    warn!(strategy = strategy.browser_name(), %err, "strategy failed");
                    Vec::new()
                }
            })
            .collect();

        let mut merged = Vec::new();
        for (strategy, mut cookies) in self.strategies.iter().zip(per_strategy) {
            for cookie in &mut cookies {
                if cookie.meta.browser.is_none() {
                    cookie.meta.browser = Some(strategy.browser_name().to_string());
                }
            }
            merged.append(&mut cookies);
        }

        let merged = dedupe_cookies(merged);
        self.cache_store(key, merged.clone());
        merged
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<ExportedCookie>> {
        let cache = self.cache.lock().expect("composite cache lock poisoned");
        cache
            .get(key)
            .filter(|slot| slot.stored_at.elapsed() < self.cache_ttl)
            .map(|slot| slot.cookies.clone())
    }

    fn cache_store(&self, key: String, cookies: Vec<ExportedCookie>) {
        let mut cache = self.cache.lock().expect("composite cache lock poisoned");

        // Stale entries go first, then the oldest fresh one.
        while cache.len() >= COMPOSITE_CACHE_CAPACITY {
            let doomed = cache
                .iter()
                .min_by_key(|(_, slot)| slot.stored_at)
                .map(|(k, _)| k.clone());
            match doomed {
                Some(k) => cache.remove(&k),
                None => break,
            };
        }

        cache.insert(
            key,
            CacheSlot {
                cookies,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("composite cache lock poisoned").clear();
    }
}
