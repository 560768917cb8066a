//! An optional file-backed cookie jar: a JSON index of cookie records
//! grouped by domain, keyed by path and name within each domain. Nothing is
//! written unless the caller explicitly saves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cookie::ExportedCookie;
use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JarIndex {
    /// domain -> "path:name" -> record
    domains: BTreeMap<String, BTreeMap<String, ExportedCookie>>,
}

/// A cookie jar persisted as a single JSON file.
#[derive(Debug)]
pub struct CookieJar {
    path: PathBuf,
    index: JarIndex,
}

impl CookieJar {
    /// Load the jar at `path`, or start empty when the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => JarIndex::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, index })
    }

    fn key(cookie: &ExportedCookie) -> String {
        format!(
            "{}:{}",
            cookie.meta.path.as_deref().unwrap_or("/"),
            cookie.name
        )
    }

    /// Insert or replace one record.
    pub fn add(&mut self, cookie: ExportedCookie) {
        self.index
            .domains
            .entry(cookie.domain.clone())
            .or_default()
            .insert(Self::key(&cookie), cookie);
    }

    /// Every stored record, grouped by domain and deterministically ordered.
    pub fn cookies(&self) -> Vec<ExportedCookie> {
        self.index
            .domains
            .values()
            .flat_map(|group| group.values().cloned())
            .collect()
    }

    pub fn cookies_for_domain(&self, domain: &str) -> Vec<ExportedCookie> {
        self.index
            .domains
            .get(domain)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.index.domains.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.index.domains.is_empty()
    }

    /// Write the jar back to its file.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&self.index)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}
