use std::path::PathBuf;

use super::ChromeVariant;
use crate::paths::{find_cookie_files, MAX_SEARCH_DEPTH};

/// Resolves the on-disk layout of one Chrome-family installation.
pub(crate) struct PathProvider {
    base_dir: PathBuf,
}

impl PathProvider {
    /// Create a path provider rooted at an explicit configuration directory.
    pub(crate) fn new(root_dir: PathBuf, variant: ChromeVariant) -> Self {
        Self {
            base_dir: root_dir.join(PathProvider::variant_base_folder(variant)),
        }
    }

    /// Returns a path provider for the default install location of the given
    /// browser variant, if the platform has one.
    pub(crate) fn default_root(variant: ChromeVariant) -> Option<Self> {
        let root_dir = if cfg!(windows) {
            dirs_next::data_local_dir()
        } else {
            dirs_next::config_dir()
        }?;

        Some(Self::new(root_dir, variant))
    }

    /// Returns the subpath of the base directory which changes depending on
    /// the variant.
    fn variant_base_folder(variant: ChromeVariant) -> &'static str {
        if cfg!(any(windows, target_os = "macos")) {
            match variant {
                ChromeVariant::Chromium => "Chromium",
                ChromeVariant::Chrome => "Google/Chrome",
                ChromeVariant::Edge => "Microsoft Edge",
            }
        } else {
            match variant {
                ChromeVariant::Chromium => "chromium",
                ChromeVariant::Chrome => "google-chrome",
                ChromeVariant::Edge => "microsoft-edge",
            }
        }
    }

    /// The directory holding the profile directories.
    pub(crate) fn profiles_root(&self) -> PathBuf {
        if cfg!(windows) {
            self.base_dir.join("User Data")
        } else {
            self.base_dir.clone()
        }
    }

    /// Returns the path to the local state file.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn local_state(&self) -> PathBuf {
        self.profiles_root().join("Local State")
    }

    /// Every cookies database below the profiles root: the default profile,
    /// numbered profiles, and the newer `Network` subdirectory layout.
    pub(crate) fn cookie_databases(&self) -> Vec<PathBuf> {
        find_cookie_files(&self.profiles_root(), "Cookies", MAX_SEARCH_DEPTH)
    }
}
