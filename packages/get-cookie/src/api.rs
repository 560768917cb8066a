//! The public query surface: `query_cookies`, `get_cookie` and the batch
//! entry points, plus the post-filters applied on top of the composite.

use once_cell::sync::Lazy;

use crate::batch::{BatchCookieService, BatchOptions, SpecResult};
use crate::cookie::{CookieSpec, Expiry, ExportedCookie};
use crate::error::{Error, Result};
use crate::jwt;
use crate::pool::SqlitePool;
use crate::sql::{self, QueryOptions};
use crate::strategy::{Browser, CompositeStrategy, Strategy};
use crate::{chrome::ChromeStrategy, firefox::FirefoxStrategy, safari::SafariStrategy};

/// Options accepted by [`query_cookies`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieQueryOptions {
    /// Restrict the query to a single browser instead of the composite.
    /// Platform errors surface in that case rather than yielding empty.
    pub browser: Option<Browser>,
    pub exact_domain: bool,
    pub include_expired: bool,
    /// Drop records whose expiry is a concrete past date.
    pub remove_expired: bool,
    pub limit: Option<u32>,
    /// Keep only values that decode as an unexpired compact JWT.
    pub require_jwt: bool,
    /// Keep only the first result.
    pub single: bool,
}

impl CookieQueryOptions {
    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            exact_domain: self.exact_domain,
            include_expired: self.include_expired,
            limit: self.limit,
        }
    }
}

static DEFAULT_COMPOSITE: Lazy<CompositeStrategy> =
    Lazy::new(|| CompositeStrategy::new(CompositeStrategy::default_strategies()));

fn validate_spec(spec: &CookieSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(Error::InvalidSpec("cookie name must not be empty".into()));
    }
    if spec.domain.is_empty() {
        return Err(Error::InvalidSpec("cookie domain must not be empty".into()));
    }
    Ok(())
}

fn strategy_for(browser: Browser) -> Strategy {
    let pool = SqlitePool::global();
    match browser {
        Browser::Chrome => Strategy::Chrome(ChromeStrategy::new(pool)),
        Browser::Firefox => Strategy::Firefox(FirefoxStrategy::new(pool)),
        Browser::Safari => Strategy::Safari(SafariStrategy::new()),
    }
}

fn expiry_rank(expiry: &Expiry) -> i64 {
    match expiry {
        Expiry::Infinity => i64::MAX,
        Expiry::Date(ms) => *ms,
        Expiry::Session => i64::MIN,
    }
}

pub(crate) fn apply_post_filters(
    mut cookies: Vec<ExportedCookie>,
    options: &CookieQueryOptions,
) -> Vec<ExportedCookie> {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    if options.remove_expired {
        cookies.retain(|c| !c.expiry.is_expired_at(now_ms));
    }

    cookies.sort_by_key(|c| std::cmp::Reverse(expiry_rank(&c.expiry)));

    if let Some(limit) = options.limit {
        cookies.truncate(limit as usize);
    }

    if options.require_jwt {
        let now_seconds = now_ms / 1_000;
        cookies.retain(|c| jwt::is_unexpired_jwt(&c.value, now_seconds));
    }

    if options.single {
        cookies.truncate(1);
    }

    cookies
}

/// Query every installed browser (or one, when `options.browser` is set)
/// for cookies matching `spec`, then apply the post-filters.
pub fn query_cookies(spec: &CookieSpec, options: &CookieQueryOptions) -> Result<Vec<ExportedCookie>> {
    let spec = spec.normalized();
    validate_spec(&spec)?;
    sql::validate_query_params(&spec, options.limit)?;

    let query_options = options.query_options();
    let cookies = match options.browser {
        Some(browser) => strategy_for(browser).query_cookies(&spec, &query_options)?,
        None => DEFAULT_COMPOSITE.query_cookies(&spec, &query_options),
    };

    Ok(apply_post_filters(cookies, options))
}

/// The first cookie matching `spec`, or [`Error::NotFound`].
pub fn get_cookie(spec: &CookieSpec) -> Result<ExportedCookie> {
    query_cookies(spec, &CookieQueryOptions::default())?
        .into_iter()
        .next()
        .ok_or(Error::NotFound)
}

/// Flattened, deduplicated results for an ordered list of specs.
pub fn batch_get_cookies(specs: &[CookieSpec], options: &BatchOptions) -> Result<Vec<ExportedCookie>> {
    BatchCookieService::global().batch_get_cookies(specs, options)
}

/// Per-spec results, each carrying its own cookies and error.
pub fn batch_get_cookies_with_results(
    specs: &[CookieSpec],
    options: &BatchOptions,
) -> Result<Vec<SpecResult>> {
    BatchCookieService::global().batch_get_cookies_with_results(specs, options)
}

/// Drop every process-wide cache. Intended for tests.
pub fn clear_caches() {
    DEFAULT_COMPOSITE.clear_cache();
    BatchCookieService::global().clear_cache();
}

/// Release every pooled handle. The CLI calls this at process exit.
pub fn shutdown() {
    SqlitePool::global().close_all();
}
