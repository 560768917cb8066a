//! Batch queries: one compound SQL statement per discovered file instead of
//! one statement per spec, with a short-TTL result cache and a per-spec
//! fallback path when the compound route fails.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cookie::{
    dedupe_cookies, dedupe_longest_value, domain_matches, name_matches, CookieSpec, ExportedCookie,
};
use crate::error::{Error, Result};
use crate::sql::{self, QueryOptions};
use crate::strategy::{CompositeStrategy, Strategy};

/// Default freshness window for batch results.
pub const BATCH_CACHE_TTL: Duration = Duration::from_secs(5);

/// Hard ceiling on the freshness window.
pub const BATCH_CACHE_MAX_TTL: Duration = Duration::from_secs(3600);

/// How often stale entries are swept out.
const EVICTION_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Collapse `(name, domain)` collisions, keeping the longest value.
    pub deduplicate: bool,
    /// Report per-spec errors instead of failing the whole batch.
    pub continue_on_error: bool,
    pub include_expired: bool,
    pub exact_domain: bool,
    pub limit: Option<u32>,
    pub cache_ttl: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            deduplicate: true,
            continue_on_error: true,
            include_expired: false,
            exact_domain: false,
            limit: None,
            cache_ttl: BATCH_CACHE_TTL,
        }
    }
}

impl BatchOptions {
    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            exact_domain: self.exact_domain,
            include_expired: self.include_expired,
            limit: self.limit,
        }
    }

    fn effective_ttl(&self) -> Duration {
        self.cache_ttl.min(BATCH_CACHE_MAX_TTL)
    }
}

/// The outcome for one spec of a batch call.
#[derive(Debug, Clone, Serialize)]
pub struct SpecResult {
    pub spec: CookieSpec,
    pub cookies: Vec<ExportedCookie>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct CacheEntry {
    data: Vec<ExportedCookie>,
    stored_at: Instant,
    ttl: Duration,
}

/// Executes batches of cookie specs against every configured strategy.
pub struct BatchCookieService {
    composite: CompositeStrategy,
    cache: Mutex<HashMap<String, CacheEntry>>,
    last_eviction: Mutex<Instant>,
}

static GLOBAL_SERVICE: Lazy<BatchCookieService> =
    Lazy::new(|| BatchCookieService::new(CompositeStrategy::default_strategies()));

impl BatchCookieService {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            composite: CompositeStrategy::new(strategies),
            cache: Mutex::new(HashMap::new()),
            last_eviction: Mutex::new(Instant::now()),
        }
    }

    /// The process-wide service used by the public API.
    pub fn global() -> &'static BatchCookieService {
        &GLOBAL_SERVICE
    }

    /// Flattened, deduplicated result set for an ordered list of specs.
    pub fn batch_get_cookies(
        &self,
        specs: &[CookieSpec],
        options: &BatchOptions,
    ) -> Result<Vec<ExportedCookie>> {
        let results = self.run(specs, options)?;

        let mut merged = Vec::new();
        for result in results {
            if let Some(error) = result.error {
                if !options.continue_on_error {
                    return Err(Error::BatchFailed(error));
                }
            }
            merged.extend(result.cookies);
        }

        Ok(self.finish(merged, options))
    }

    /// Per-spec results, each with the cookies that matched it and any error
    /// hit along the way.
    pub fn batch_get_cookies_with_results(
        &self,
        specs: &[CookieSpec],
        options: &BatchOptions,
    ) -> Result<Vec<SpecResult>> {
        self.run(specs, options)
    }

    fn run(&self, specs: &[CookieSpec], options: &BatchOptions) -> Result<Vec<SpecResult>> {
        if specs.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let specs: Vec<CookieSpec> = specs.iter().map(CookieSpec::normalized).collect();
        for spec in &specs {
            sql::validate_query_params(spec, options.limit)?;
        }

        self.maybe_evict();
        let key = Self::cache_key(&specs, options);
        if let Some(data) = self.cache_lookup(&key) {
            debug!(%key, "batch cache hit");
            return Ok(self.distribute(&specs, data, options));
        }

        let merged = match self.compound_path(&specs, options) {
            Ok(merged) => merged,
            Err(err) => {
                warn!(%err, "batch path failed, retrying each spec individually");
                return self.fallback_path(&specs, options);
            }
        };

        self.cache_store(key, merged.clone(), options.effective_ttl());
        Ok(self.distribute(&specs, merged, options))
    }

    /// One compound query per file, all browsers in parallel.
    fn compound_path(
        &self,
        specs: &[CookieSpec],
        options: &BatchOptions,
    ) -> Result<Vec<ExportedCookie>> {
        let spec_options: Vec<(CookieSpec, QueryOptions)> = specs
            .iter()
            .map(|spec| (spec.clone(), options.query_options()))
            .collect();

        let per_strategy: Vec<Result<Vec<ExportedCookie>>> = self
            .composite
            .strategies()
            .par_iter()
            .map(|strategy| strategy.batch_query_cookies(&spec_options, options.include_expired))
            .collect();

        let mut merged = Vec::new();
        for (strategy, outcome) in self.composite.strategies().iter().zip(per_strategy) {
            let mut cookies = outcome?;
            for cookie in &mut cookies {
                if cookie.meta.browser.is_none() {
                    cookie.meta.browser = Some(strategy.browser_name().to_string());
                }
            }
            merged.append(&mut cookies);
        }
        Ok(merged)
    }

    /// Per-spec, per-strategy retry. Errors are accumulated per spec.
    fn fallback_path(
        &self,
        specs: &[CookieSpec],
        options: &BatchOptions,
    ) -> Result<Vec<SpecResult>> {
        let query_options = options.query_options();
        let mut results = Vec::with_capacity(specs.len());

        for spec in specs {
            let mut cookies = Vec::new();
            let mut error = None;
            for strategy in self.composite.strategies() {
                match strategy.query_cookies(spec, &query_options) {
                    Ok(mut found) => cookies.append(&mut found),
                    Err(err) => {
                        if !options.continue_on_error {
                            return Err(Error::BatchFailed(err.to_string()));
                        }
                        error.get_or_insert_with(|| err.to_string());
                    }
                }
            }
            results.push(SpecResult {
                spec: spec.clone(),
                cookies: self.finish(cookies, options),
                error,
            });
        }

        Ok(results)
    }

    fn finish(&self, cookies: Vec<ExportedCookie>, options: &BatchOptions) -> Vec<ExportedCookie> {
        if options.deduplicate {
            dedupe_longest_value(cookies)
        } else {
            dedupe_cookies(cookies)
        }
    }

    /// Hand each spec the slice of the merged set that matches it.
    fn distribute(
        &self,
        specs: &[CookieSpec],
        merged: Vec<ExportedCookie>,
        options: &BatchOptions,
    ) -> Vec<SpecResult> {
        specs
            .iter()
            .map(|spec| {
                let matching = merged
                    .iter()
                    .filter(|c| name_matches(&spec.name, &c.name))
                    .filter(|c| domain_matches(&spec.domain, &c.domain))
                    .cloned()
                    .collect();
                SpecResult {
                    spec: spec.clone(),
                    cookies: self.finish(matching, options),
                    error: None,
                }
            })
            .collect()
    }

    fn cache_key(specs: &[CookieSpec], options: &BatchOptions) -> String {
        let parts: Vec<String> = specs
            .iter()
            .map(|spec| {
                format!(
                    "batch:{}:{}:{}:{}",
                    spec.name, spec.domain, options.exact_domain, options.include_expired
                )
            })
            .collect();
        parts.join("|")
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<ExportedCookie>> {
        let cache = self.cache.lock().expect("batch cache lock poisoned");
        cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < entry.ttl)
            .map(|entry| entry.data.clone())
    }

    fn cache_store(&self, key: String, data: Vec<ExportedCookie>, ttl: Duration) {
        let mut cache = self.cache.lock().expect("batch cache lock poisoned");
        cache.insert(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Sweep expired entries, at most once per eviction interval.
    fn maybe_evict(&self) {
        let mut last = self.last_eviction.lock().expect("eviction lock poisoned");
        if last.elapsed() < EVICTION_INTERVAL {
            return;
        }
        *last = Instant::now();

        let mut cache = self.cache.lock().expect("batch cache lock poisoned");
        cache.retain(|_, entry| entry.stored_at.elapsed() < entry.ttl);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().expect("batch cache lock poisoned").clear();
        self.composite.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::{CookieMeta, Expiry};
    use crate::memory::{InMemoryStrategy, MockStrategy};

    fn cookie(name: &str, domain: &str, value: &str) -> ExportedCookie {
        ExportedCookie {
            name: name.into(),
            domain: domain.into(),
            value: value.into(),
            expiry: Expiry::Session,
            meta: CookieMeta::default(),
        }
    }

    fn service_with(cookies: Vec<ExportedCookie>) -> BatchCookieService {
        BatchCookieService::new(vec![Strategy::Mock(MockStrategy::returning(cookies))])
    }

    #[test]
    fn empty_batch_is_rejected() {
        let service = service_with(vec![]);
        assert!(matches!(
            service.batch_get_cookies(&[], &BatchOptions::default()),
            Err(Error::EmptyBatch)
        ));
    }

    #[test]
    fn batch_merges_and_deduplicates_with_longest_value() {
        let service = BatchCookieService::new(vec![
            Strategy::Mock(MockStrategy::returning(vec![cookie("sid", "a.com", "short")])),
            Strategy::Mock(MockStrategy::returning(vec![
                cookie("sid", "a.com", "much-longer-value"),
                cookie("tok", "b.com", "t"),
            ])),
        ]);

        let specs = vec![CookieSpec::new("sid", "a.com"), CookieSpec::new("tok", "b.com")];
        let cookies = service.batch_get_cookies(&specs, &BatchOptions::default()).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].value, "much-longer-value");
    }

    #[test]
    fn with_results_assigns_cookies_to_their_spec() {
        let service = service_with(vec![cookie("sid", "a.com", "1"), cookie("tok", "b.com", "2")]);
        let specs = vec![CookieSpec::new("sid", "a.com"), CookieSpec::new("tok", "b.com")];

        let results = service
            .batch_get_cookies_with_results(&specs, &BatchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].cookies.len(), 1);
        assert_eq!(results[0].cookies[0].value, "1");
        assert_eq!(results[1].cookies[0].value, "2");
        assert!(results[0].error.is_none());
    }

    #[test]
    fn fallback_accumulates_errors_per_spec() {
        let service = BatchCookieService::new(vec![
            Strategy::Mock(MockStrategy::failing("store exploded")),
            Strategy::Mock(MockStrategy::returning(vec![cookie("sid", "a.com", "v")])),
        ]);
        let specs = vec![CookieSpec::new("sid", "a.com")];

        let results = service
            .batch_get_cookies_with_results(&specs, &BatchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        // The healthy strategy still contributes.
        assert_eq!(results[0].cookies.len(), 1);
        assert!(results[0].error.as_deref().unwrap().contains("store exploded"));
    }

    #[test]
    fn continue_on_error_false_raises_the_first_failure() {
        let service = BatchCookieService::new(vec![Strategy::Mock(MockStrategy::failing("boom"))]);
        let specs = vec![CookieSpec::new("sid", "a.com")];

        let result = service.batch_get_cookies(
            &specs,
            &BatchOptions {
                continue_on_error: false,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::BatchFailed(_))));
    }

    #[test]
    fn batch_results_are_cached_within_the_ttl() {
        let store = InMemoryStrategy::new();
        store.add_cookie(cookie("sid", "a.com", "v1"));
        let service = BatchCookieService::new(vec![Strategy::InMemory(store.clone())]);
        let specs = vec![CookieSpec::new("sid", "a.com")];

        let first = service.batch_get_cookies(&specs, &BatchOptions::default()).unwrap();
        assert_eq!(first.len(), 1);

        store.add_cookie(cookie("sid", "a.com", "v2-longer"));
        let second = service.batch_get_cookies(&specs, &BatchOptions::default()).unwrap();
        assert_eq!(first, second);

        service.clear_cache();
        let third = service.batch_get_cookies(&specs, &BatchOptions::default()).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].value, "v2-longer");
    }

    #[test]
    fn batch_equals_union_of_single_queries() {
        let fixtures = vec![
            cookie("sid", "a.com", "1"),
            cookie("sid", "a.com", "22"),
            cookie("tok", "b.com", "3"),
            cookie("other", "c.com", "4"),
        ];
        let service = service_with(fixtures.clone());
        let specs = vec![CookieSpec::new("sid", "a.com"), CookieSpec::new("tok", "b.com")];

        let batch = service.batch_get_cookies(&specs, &BatchOptions::default()).unwrap();

        // The per-spec union, deduplicated the same way.
        let single = MockStrategy::returning(fixtures);
        let mut union = Vec::new();
        for spec in &specs {
            union.extend(single.query_cookies(spec, &QueryOptions::default()).unwrap());
        }
        let union = dedupe_longest_value(union);

        let key = |c: &ExportedCookie| (c.name.clone(), c.domain.clone(), c.value.clone());
        let mut batch_keys: Vec<_> = batch.iter().map(key).collect();
        let mut union_keys: Vec<_> = union.iter().map(key).collect();
        batch_keys.sort();
        union_keys.sort();
        assert_eq!(batch_keys, union_keys);
    }
}
