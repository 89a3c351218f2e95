use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::file::ConfigError;

pub const PROFILE_FILE_NAME: &str = "host_profile.toml";

/// Names and shapes that belong to the host rather than to this crate.
#[derive(Debug, Clone, Deserialize)]
pub struct HostProfile {
    pub passthrough: PassthroughProfile,
    pub localization: LocalizationProfile,
    pub flush: FlushProfile,
    pub bootstrap: BootstrapProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassthroughProfile {
    /// Types whose patches must always apply immediately.
    pub builtin: Vec<String>,
    /// Exempted as well while localization merging is on.
    pub localization_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizationProfile {
    pub default_language: String,
    pub preference_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlushProfile {
    pub plugins_loaded_label: String,
    pub main_initialized_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapProfile {
    pub marker_local: u16,
    pub helper_type: String,
    pub helper_name: String,
    pub processor_local: u16,
    pub target_local: u16,
    pub module_arg: u16,
    pub entry_type: String,
    pub entry_name: String,
}

impl HostProfile {
    pub fn embedded() -> Result<Self, ConfigError> {
        let defaults = include_str!("../../config/host_profile.toml");
        toml::from_str(defaults).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<embedded host_profile.toml>"),
            source,
        })
    }

    /// Load with layering: embedded defaults → `host_profile.toml` in `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let mut profile = Self::embedded()?;

        let path = config_dir.join(PROFILE_FILE_NAME);
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            profile = toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_profile_parses() {
        let profile = HostProfile::embedded().unwrap();

        assert_eq!(profile.passthrough.builtin.len(), 3);
        assert_eq!(profile.passthrough.localization_type, "Localization");
        assert_eq!(profile.localization.default_language, "English");
        assert_eq!(profile.flush.plugins_loaded_label, "after Chainloader end");
        assert_eq!(profile.flush.main_initialized_label, "after FejdStartup.Awake");
        assert_eq!(profile.bootstrap.marker_local, 6);
    }

    #[test]
    fn test_user_profile_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = include_str!("../../config/host_profile.toml").to_string();
        raw = raw.replace("default_language = \"English\"", "default_language = \"Deutsch\"");
        fs::write(dir.path().join(PROFILE_FILE_NAME), raw).unwrap();

        let profile = HostProfile::load(dir.path()).unwrap();
        assert_eq!(profile.localization.default_language, "Deutsch");
    }

    #[test]
    fn test_missing_user_profile_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let profile = HostProfile::load(dir.path()).unwrap();
        assert_eq!(profile.localization.preference_key, "language");
    }
}
