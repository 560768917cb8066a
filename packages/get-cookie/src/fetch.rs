//! A small blocking HTTP client that injects extracted cookies into a GET
//! request, follows redirects, and feeds `Set-Cookie` response headers back
//! into the in-memory store.

use std::str::FromStr;

use http::Uri;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::cookie::ExportedCookie;
use crate::error::{Error, Result};
use crate::memory::InMemoryStrategy;
use crate::render::render_merged;

const DEFAULT_MAX_REDIRECTS: usize = 10;
const DEFAULT_USER_AGENT: &str = concat!("get-cookie/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra request headers as `(name, value)` pairs.
    pub headers: Vec<(String, String)>,
    pub max_redirects: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// How many `Set-Cookie` headers were stored.
    pub stored_cookies: usize,
}

/// Parse and sanity-check a URL for fetching or spec derivation.
pub fn parse_url(url: &str) -> Result<Uri> {
    let uri = Uri::from_str(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(Error::InvalidUrl(format!("{url}: expected http or https"))),
    }
    if uri.host().is_none() {
        return Err(Error::InvalidUrl(format!("{url}: missing host")));
    }
    Ok(uri)
}

/// GET `url` with a merged `Cookie` header built from `cookies`.
/// `Set-Cookie` headers on the final response land in `store` when given.
pub fn fetch_with_cookies(
    url: &str,
    cookies: &[ExportedCookie],
    options: &FetchOptions,
    store: Option<&InMemoryStrategy>,
) -> Result<FetchResult> {
    let uri = parse_url(url)?;
    let host = uri.host().unwrap_or_default().to_string();

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    for (name, value) in &options.headers {
        let name = HeaderName::from_str(name.trim())
            .map_err(|_| Error::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| Error::InvalidHeader(value.clone()))?;
        headers.insert(name, value);
    }
    if !cookies.is_empty() {
        let merged = render_merged(cookies);
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&merged).map_err(|_| Error::InvalidHeader(merged.clone()))?,
        );
    }

    let client = Client::builder()
        .redirect(Policy::limited(options.max_redirects))
        .default_headers(headers)
        .build()?;

    debug!(%url, cookie_count = cookies.len(), "fetching");
    let response = client.get(url).send()?;

    let status = response.status().as_u16();
    let mut stored_cookies = 0;
    let mut response_headers = Vec::new();
    for (name, value) in response.headers() {
        let value_str = value.to_str().unwrap_or("<binary>").to_string();
        if name == SET_COOKIE {
            if let Some(store) = store {
                if store.store_set_cookie(&value_str, &host) {
                    stored_cookies += 1;
                }
            }
        }
        response_headers.push((name.as_str().to_string(), value_str));
    }

    let body = response.text()?;

    Ok(FetchResult {
        status,
        headers: response_headers,
        body,
        stored_cookies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation() {
        assert!(parse_url("https://example.com/path").is_ok());
        assert!(parse_url("http://example.com").is_ok());
        assert!(matches!(parse_url("ftp://example.com"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url("not a url"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url("/relative/only"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn bad_headers_are_rejected_before_any_io() {
        let options = FetchOptions {
            headers: vec![("Bad Header Name".into(), "v".into())],
            ..Default::default()
        };
        let result = fetch_with_cookies("https://example.com", &[], &options, None);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }
}
