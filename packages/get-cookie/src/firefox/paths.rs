use std::path::{Path, PathBuf};

use crate::paths::{find_cookie_files, MAX_SEARCH_DEPTH};

/// Resolves the on-disk layout of a Firefox installation.
pub(crate) struct PathProvider {
    root_dir: PathBuf,
}

impl PathProvider {
    pub(crate) fn new<R: AsRef<Path>>(root_dir: R) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_owned(),
        }
    }

    /// Returns a path provider for the default install location, if the
    /// platform has one.
    pub(crate) fn default_root() -> Option<Self> {
        let root_dir = if cfg!(any(windows, target_os = "macos")) {
            dirs_next::config_dir()?.join("Mozilla/Firefox")
        } else {
            dirs_next::home_dir()?.join(".mozilla/firefox")
        };

        Some(Self::new(root_dir))
    }

    /// Get the default profile's name from the profiles.ini file.
    /// It selects the profile of the first `Install…` section found, or the
    /// first `Profile` section with `Default=1` when there is none.
    pub(crate) fn default_profile(&self) -> Option<String> {
        let profiles = tini::Ini::from_file(&self.root_dir.join("profiles.ini")).ok()?;

        if let Some(section) = profiles
            .iter()
            .filter(|(name, _)| name.starts_with("Install"))
            .map(|(_, section)| section)
            .next()
        {
            section.get("Default")
        } else {
            profiles
                .iter()
                .filter(|(name, _)| name.starts_with("Profile"))
                .filter(|(_, section)| section.get::<String>("Default").as_deref() == Some("1"))
                .map(|(_, section)| section)
                .next()
                .and_then(|section| section.get("Path"))
        }
    }

    /// Every cookies database below the root, with the default profile's
    /// database first when profiles.ini names one.
    pub(crate) fn cookie_databases(&self) -> Vec<PathBuf> {
        let mut found = find_cookie_files(&self.root_dir, "cookies.sqlite", MAX_SEARCH_DEPTH);

        if let Some(default) = self.default_profile() {
            if let Some(pos) = found
                .iter()
                .position(|p| p.parent().is_some_and(|dir| dir.ends_with(&default)))
            {
                let preferred = found.remove(pos);
                found.insert(0, preferred);
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_profiles_ini(root: &Path, body: &str) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("profiles.ini"), body).unwrap();
    }

    #[test]
    fn install_section_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_profiles_ini(
            dir.path(),
            "[Install4F96D1932A9F858E]\nDefault=Profiles/abc.default-release\n\n\
             [Profile0]\nName=default\nPath=Profiles/xyz.default\nDefault=1\n",
        );
        let provider = PathProvider::new(dir.path());
        assert_eq!(
            provider.default_profile().as_deref(),
            Some("Profiles/abc.default-release")
        );
    }

    #[test]
    fn falls_back_to_default_marked_profile() {
        let dir = tempfile::tempdir().unwrap();
        write_profiles_ini(
            dir.path(),
            "[Profile1]\nName=other\nPath=Profiles/other\n\n\
             [Profile0]\nName=default\nPath=Profiles/xyz.default\nDefault=1\n",
        );
        let provider = PathProvider::new(dir.path());
        assert_eq!(provider.default_profile().as_deref(), Some("Profiles/xyz.default"));
    }

    #[test]
    fn default_profile_database_is_listed_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_profiles_ini(root, "[Install0]\nDefault=Profiles/zz.default\n");
        for profile in ["aa.extra", "zz.default"] {
            let profile_dir = root.join("Profiles").join(profile);
            std::fs::create_dir_all(&profile_dir).unwrap();
            std::fs::write(profile_dir.join("cookies.sqlite"), b"").unwrap();
        }

        let provider = PathProvider::new(root);
        let dbs = provider.cookie_databases();
        assert_eq!(dbs.len(), 2);
        assert!(dbs[0].ends_with("zz.default/cookies.sqlite"));
    }

    #[test]
    fn missing_root_yields_nothing() {
        let provider = PathProvider::new("/nonexistent/firefox");
        assert!(provider.cookie_databases().is_empty());
        assert!(provider.default_profile().is_none());
    }
}
