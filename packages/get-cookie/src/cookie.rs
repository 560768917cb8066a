//! The uniform cookie records produced by every browser strategy.

use std::collections::HashMap;
use std::path::PathBuf;

use cookie::time::{format_description::well_known::Rfc3339, OffsetDateTime};
use regex::RegexBuilder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The single-character wildcard accepted for either spec field.
pub const WILDCARD: &str = "%";

/// Largest expiry rendered as a concrete date (9999-12-31T23:59:59.999Z).
/// Anything later is reported as [`Expiry::Infinity`].
pub const MAX_COOKIE_DATE_MS: i64 = 253_402_300_799_999;

/// A `(name, domain)` pair identifying one or more cookies.
///
/// Either field may be the wildcard `%` (or `*`, normalised to `%`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub domain: String,
}

impl CookieSpec {
    pub fn new<N: Into<String>, D: Into<String>>(name: N, domain: D) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
        .normalized()
    }

    /// Trim whitespace and fold the `*` wildcard spelling into `%`.
    pub fn normalized(&self) -> Self {
        let fold = |s: &str| {
            let s = s.trim();
            if s == "*" {
                WILDCARD.to_string()
            } else {
                s.replace('*', "%")
            }
        };

        Self {
            name: fold(&self.name),
            domain: fold(&self.domain),
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.name, self.domain)
    }
}

impl std::fmt::Display for CookieSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

/// When a cookie stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Expiry {
    /// Session cookie, no persisted expiry.
    #[default]
    Session,
    /// Expiry is absent, non-positive or absurdly far in the future.
    Infinity,
    /// Concrete expiry as Unix milliseconds.
    Date(i64),
}

impl Expiry {
    /// Classify a Unix-millisecond timestamp.
    pub fn from_unix_ms(ms: i64) -> Self {
        if ms <= 0 || ms > MAX_COOKIE_DATE_MS {
            Expiry::Infinity
        } else {
            Expiry::Date(ms)
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Expiry::Session)
    }

    /// True only for a concrete date in the past.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self, Expiry::Date(ms) if *ms < now_ms)
    }

    pub fn unix_ms(&self) -> Option<i64> {
        match self {
            Expiry::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    fn to_datetime(self) -> Option<OffsetDateTime> {
        match self {
            Expiry::Date(ms) => OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok(),
            _ => None,
        }
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expiry::Session => serializer.serialize_none(),
            Expiry::Infinity => serializer.serialize_str("Infinity"),
            Expiry::Date(_) => {
                let formatted = self
                    .to_datetime()
                    .and_then(|dt| dt.format(&Rfc3339).ok())
                    .ok_or_else(|| serde::ser::Error::custom("expiry out of range"))?;
                serializer.serialize_str(&formatted)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None => Ok(Expiry::Session),
            Some("Infinity") => Ok(Expiry::Infinity),
            Some(s) => {
                let dt = OffsetDateTime::parse(s, &Rfc3339)
                    .map_err(|e| serde::de::Error::custom(format!("bad expiry '{s}': {e}")))?;
                Ok(Expiry::Date((dt.unix_timestamp_nanos() / 1_000_000) as i64))
            }
        }
    }
}

/// Provenance and attribute flags carried along with every cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieMeta {
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrypted: Option<bool>,
}

/// A fully decoded cookie, uniform across browsers. Immutable after production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedCookie {
    pub name: String,
    pub domain: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Expiry::is_session")]
    pub expiry: Expiry,
    pub meta: CookieMeta,
}

impl ExportedCookie {
    /// Stable serialisation of the full record, used for deduplication.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{}:{}:{}:{:?}", self.name, self.domain, self.value, self.expiry)
        })
    }
}

/// A raw row out of a cookie store. The value may still be ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CookieRow {
    pub name: String,
    pub domain: String,
    pub value: Vec<u8>,
    pub expiry_ms: Option<i64>,
    pub meta: CookieMeta,
}

/// Whether a pattern carries SQL-LIKE wildcards (`%` / `_`).
pub fn is_like_pattern(pattern: &str) -> bool {
    pattern.contains('%') || pattern.contains('_')
}

fn like_to_regex(pattern: &str, case_insensitive: bool) -> Option<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(case_insensitive)
        .build()
        .ok()
}

/// Match a cookie name against a spec pattern.
///
/// `%` alone matches everything; a pattern containing `%`/`_` behaves like
/// SQL LIKE (case-insensitive, as SQLite's LIKE is); anything else is an
/// exact comparison.
pub fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    if is_like_pattern(pattern) {
        return like_to_regex(pattern, true).is_some_and(|re| re.is_match(name));
    }
    pattern == name
}

/// Match a cookie host against a spec domain, mirroring the SQL predicates:
/// a leading dot means suffix match, a bare domain also matches its
/// dot-prefixed form and any subdomain.
pub fn domain_matches(pattern: &str, host: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    if is_like_pattern(pattern) {
        return like_to_regex(pattern, true).is_some_and(|re| re.is_match(host));
    }

    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    if pattern.starts_with('.') {
        return host.ends_with(&pattern);
    }
    host == pattern || host == format!(".{pattern}") || host.ends_with(&format!(".{pattern}"))
}

/// Drop records that serialise identically, keeping first occurrences.
pub fn dedupe_cookies(cookies: Vec<ExportedCookie>) -> Vec<ExportedCookie> {
    let mut seen = std::collections::HashSet::new();
    cookies
        .into_iter()
        .filter(|c| seen.insert(c.fingerprint()))
        .collect()
}

/// Collapse records sharing `(name, domain)`, keeping the longest value.
/// Ties keep the record seen first, so the result is deterministic.
pub fn dedupe_longest_value(cookies: Vec<ExportedCookie>) -> Vec<ExportedCookie> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut best: HashMap<(String, String), ExportedCookie> = HashMap::new();

    for cookie in cookies {
        let key = (cookie.name.clone(), cookie.domain.clone());
        match best.get(&key) {
            None => {
                order.push(key.clone());
                best.insert(key, cookie);
            }
            Some(current) if cookie.value.len() > current.value.len() => {
                best.insert(key, cookie);
            }
            Some(_) => {}
        }
    }

    order.into_iter().filter_map(|key| best.remove(&key)).collect()
}
