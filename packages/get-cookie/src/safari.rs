//! Safari cookie extraction. Safari keeps its store in a proprietary binary
//! file rather than SQLite, so this strategy only uses the decoder and never
//! touches the connection pool.

use std::path::PathBuf;

use tracing::warn;

use crate::cookie::{domain_matches, name_matches, CookieSpec, Expiry, ExportedCookie};
use crate::error::Result;
use crate::paths::home_dir;
use crate::sql::QueryOptions;

pub mod binarycookies;

use self::binarycookies::decode_binary_cookies;

/// Extracts cookies from Safari's `Cookies.binarycookies`.
pub struct SafariStrategy {
    /// Explicit file list, used instead of discovery when set.
    files: Option<Vec<PathBuf>>,
}

impl Default for SafariStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SafariStrategy {
    pub fn new() -> Self {
        Self { files: None }
    }

    /// Read the given cookie files instead of the default locations.
    pub fn with_files(files: Vec<PathBuf>) -> Self {
        Self { files: Some(files) }
    }

    pub fn browser_name(&self) -> &'static str {
        "Safari"
    }

    pub fn is_supported() -> bool {
        cfg!(target_os = "macos")
    }

    fn cookie_files(&self) -> Vec<PathBuf> {
        if let Some(files) = &self.files {
            return files.clone();
        }
        let Some(home) = home_dir() else {
            return Vec::new();
        };
        vec![
            home.join("Library/Cookies/Cookies.binarycookies"),
            home.join("Library/Containers/com.apple.Safari/Data/Library/Cookies/Cookies.binarycookies"),
        ]
    }

    pub fn query_cookies(
        &self,
        spec: &CookieSpec,
        options: &QueryOptions,
    ) -> Result<Vec<ExportedCookie>> {
        if self.files.is_none() && !Self::is_supported() {
            // Without an explicit file there is nothing to read off-macOS.
            return Ok(Vec::new());
        }

        let spec = spec.normalized();
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut cookies = Vec::new();
        for file in self.cookie_files() {
            let rows = match decode_binary_cookies(&file) {
                Ok(rows) => rows,
                Err(source) => {
                    let err = crate::error::Error::MalformedCookieFile { path: file.clone(), source };
                    warn!(%err, "skipping malformed cookie file");
                    continue;
                }
            };

            cookies.extend(
                rows.into_iter()
                    .filter(|row| name_matches(&spec.name, &row.name))
                    .filter(|row| domain_matches(&spec.domain, &row.domain))
                    .filter(|row| !row.value.is_empty())
                    .map(|row| {
                        let expiry = row
                            .expiry_ms
                            .map(Expiry::from_unix_ms)
                            .unwrap_or(Expiry::Session);
                        ExportedCookie {
                            name: row.name,
                            domain: row.domain,
                            value: String::from_utf8_lossy(&row.value).into_owned(),
                            expiry,
                            meta: row.meta,
                        }
                    })
                    .filter(|cookie| options.include_expired || !cookie.expiry.is_expired_at(now_ms)),
            );
        }

        Ok(cookies)
    }
}
