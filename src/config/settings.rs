use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::file::{ConfigEntry, ConfigError, ConfigFile};

pub const CONFIG_FILE_NAME: &str = "StartupAccelerator.cfg";

const SECTION: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Toggle {
    #[default]
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }
}

/// The user-facing switches, bound in `StartupAccelerator.cfg`.
#[derive(Debug)]
pub struct Settings {
    file: Arc<ConfigFile>,
    pub delay_patching: ConfigEntry<Toggle>,
    pub merge_localization: ConfigEntry<Toggle>,
    pub delay_config_save: ConfigEntry<Toggle>,
    pub passthrough: ConfigEntry<String>,
}

impl Settings {
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let file = ConfigFile::open(config_dir.join(CONFIG_FILE_NAME), true)?;
        Self::bind(file)
    }

    pub fn bind(file: Arc<ConfigFile>) -> Result<Self, ConfigError> {
        let delay_patching = file.bind(
            SECTION,
            "Delay Patching",
            Toggle::On,
            "Delay Harmony patching until after Chainloader and after FejdStartup.Awake respectively.",
        )?;
        let merge_localization = file.bind(
            SECTION,
            "Merge Localization Data",
            Toggle::On,
            "Merge localization data to avoid re-reading it over and over.",
        )?;
        let delay_config_save = file.bind(
            SECTION,
            "Delay Config Save",
            Toggle::On,
            "Delay config save so that it saves the config once after start up and not over and over again.",
        )?;
        let passthrough = file.bind(
            SECTION,
            "Passthrough Patched Classes",
            String::new(),
            "Comma-separated list of classes to unconditionally patch immediately.",
        )?;

        Ok(Self {
            file,
            delay_patching,
            merge_localization,
            delay_config_save,
            passthrough,
        })
    }

    pub fn file(&self) -> &Arc<ConfigFile> {
        &self.file
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Some(project_dirs) = directories::ProjectDirs::from("", "", "startup-accelerator") {
        return project_dirs.config_dir().to_path_buf();
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".config/startup-accelerator");
    }

    PathBuf::from(".startup-accelerator")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_on() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();

        assert!(settings.delay_patching.value().is_on());
        assert!(settings.merge_localization.value().is_on());
        assert!(settings.delay_config_save.value().is_on());
        assert_eq!(settings.passthrough.value(), "");
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_existing_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[General]\n\"Delay Patching\" = \"Off\"\n\"Passthrough Patched Classes\" = \"Foo,Bar\"\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.delay_patching.value(), Toggle::Off);
        assert!(settings.merge_localization.value().is_on());
        assert_eq!(settings.passthrough.value(), "Foo,Bar");
    }
}
