//! Process-local cookie stores: the in-memory strategy that backs
//! programmatically set cookies (including `Set-Cookie` headers captured by
//! the fetch client), and a mock strategy for tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cookie::{Cookie, Expiration};
use tracing::debug;

use crate::cookie::{domain_matches, name_matches, CookieMeta, CookieSpec, Expiry, ExportedCookie};
use crate::error::{Error, Result};
use crate::sql::QueryOptions;

/// A shared in-process cookie store. Cloning yields a handle onto the same
/// store, so the fetch client and the composite can see the same cookies.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStrategy {
    store: Arc<Mutex<Vec<ExportedCookie>>>,
}

static GLOBAL_STORE: once_cell::sync::Lazy<InMemoryStrategy> =
    once_cell::sync::Lazy::new(InMemoryStrategy::new);

/// The process-wide in-memory store, shared between the fetch client and
/// the default composite.
pub fn global_store() -> InMemoryStrategy {
    GLOBAL_STORE.clone()
}

impl InMemoryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn browser_name(&self) -> &'static str {
        "InMemory"
    }

    pub fn add_cookie(&self, cookie: ExportedCookie) {
        self.store.lock().expect("store lock poisoned").push(cookie);
    }

    /// Parse a `Set-Cookie` header and store the result. Cookies without an
    /// explicit `Domain` attribute fall back to `default_domain`. Returns
    /// false when the header does not parse.
    pub fn store_set_cookie(&self, header: &str, default_domain: &str) -> bool {
        let parsed = match Cookie::parse(header.to_string()) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(%err, "ignoring unparsable Set-Cookie header");
                return false;
            }
        };

        let expiry = match parsed.expires() {
            Some(Expiration::DateTime(datetime)) => {
                Expiry::from_unix_ms((datetime.unix_timestamp_nanos() / 1_000_000) as i64)
            }
            Some(Expiration::Session) | None => Expiry::Session,
        };

        self.add_cookie(ExportedCookie {
            name: parsed.name().to_string(),
            domain: parsed
                .domain()
                .map(str::to_string)
                .unwrap_or_else(|| default_domain.to_string()),
            value: parsed.value().to_string(),
            expiry,
            meta: CookieMeta {
                file: PathBuf::from("<memory>"),
                browser: Some("InMemory".to_string()),
                path: parsed.path().map(str::to_string),
                secure: parsed.secure(),
                http_only: parsed.http_only(),
                decrypted: None,
            },
        });
        true
    }

    pub fn clear(&self) {
        self.store.lock().expect("store lock poisoned").clear();
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        let spec = spec.normalized();
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let store = self.store.lock().expect("store lock poisoned");
        Ok(store
            .iter()
            .filter(|c| name_matches(&spec.name, &c.name))
            .filter(|c| domain_matches(&spec.domain, &c.domain))
            .filter(|c| options.include_expired || !c.expiry.is_expired_at(now_ms))
            .cloned()
            .collect())
    }
}

/// A fixed list of cookies, with optional error injection. Test-only in
/// spirit, but kept in the library so integration tests and downstream
/// callers can exercise the composite without touching the disk.
#[derive(Debug, Clone, Default)]
pub struct MockStrategy {
    cookies: Vec<ExportedCookie>,
    failure: Option<String>,
}

impl MockStrategy {
    pub fn returning(cookies: Vec<ExportedCookie>) -> Self {
        Self {
            cookies,
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            cookies: Vec::new(),
            failure: Some(message.to_string()),
        }
    }

    pub fn browser_name(&self) -> &'static str {
        "Mock"
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        _options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        if let Some(message) = &self.failure {
            return Err(Error::BatchFailed(message.clone()));
        }
        let spec = spec.normalized();
        Ok(self
            .cookies
            .iter()
            .filter(|c| name_matches(&spec.name, &c.name))
            .filter(|c| domain_matches(&spec.domain, &c.domain))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_queries_cookies() {
        let strategy = InMemoryStrategy::new();
        assert!(strategy.store_set_cookie("sid=abc; Domain=.example.com; Path=/; Secure", "fallback.com"));
        assert!(strategy.store_set_cookie("other=zzz", "fallback.com"));

        let found = strategy
            .query_cookies(&CookieSpec::new("sid", "example.com"), &QueryOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "abc");
        assert_eq!(found[0].meta.secure, Some(true));

        let fallback = strategy
            .query_cookies(&CookieSpec::new("other", "fallback.com"), &QueryOptions::default())
            .unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].domain, "fallback.com");
    }

    #[test]
    fn clones_share_the_store() {
        let strategy = InMemoryStrategy::new();
        let handle = strategy.clone();
        assert!(handle.store_set_cookie("a=1; Domain=x.com", "x.com"));

        let found = strategy
            .query_cookies(&CookieSpec::new("a", "x.com"), &QueryOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn bad_headers_are_ignored() {
        let strategy = InMemoryStrategy::new();
        assert!(!strategy.store_set_cookie("definitely not a cookie", "x.com"));
    }

    #[test]
    fn mock_filters_and_fails_on_demand() {
        let cookie = ExportedCookie {
            name: "sid".into(),
            domain: "example.com".into(),
            value: "v".into(),
            expiry: Expiry::Session,
            meta: CookieMeta::default(),
        };
        let mock = MockStrategy::returning(vec![cookie]);
        let found = mock
            .query_cookies(&CookieSpec::new("%", "example.com"), &QueryOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);

        let failing = MockStrategy::failing("boom");
        assert!(failing
            .query_cookies(&CookieSpec::new("%", "%"), &QueryOptions::default())
            .is_err());
    }
}
