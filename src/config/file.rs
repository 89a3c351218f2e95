use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::debounce::PersistentStore;

type Sections = BTreeMap<String, BTreeMap<String, toml::Value>>;

pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot serialize config value: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("cannot watch config file: {0}")]
    Watch(#[from] notify::Error),
}

struct Listener {
    section: String,
    key: String,
    callback: ChangeListener,
}

/// A persisted key-value store split into `[section]` tables.
///
/// Every changed value is written back to disk immediately while
/// `save_on_set` is on, which is the behaviour the startup debouncer turns off.
pub struct ConfigFile {
    path: PathBuf,
    sections: Mutex<Sections>,
    descriptions: Mutex<BTreeMap<(String, String), String>>,
    save_on_set: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

impl fmt::Debug for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFile")
            .field("path", &self.path)
            .field("save_on_set", &self.save_on_set())
            .finish_non_exhaustive()
    }
}

impl ConfigFile {
    pub fn open(path: impl Into<PathBuf>, save_on_init: bool) -> Result<Arc<Self>, ConfigError> {
        let path = path.into();
        let sections = if path.exists() {
            read_sections(&path)?
        } else {
            Sections::new()
        };

        let file = Arc::new(Self {
            path,
            sections: Mutex::new(sections),
            descriptions: Mutex::new(BTreeMap::new()),
            save_on_set: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
        });

        if save_on_init {
            file.save()?;
        }

        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_on_set(&self) -> bool {
        self.save_on_set.load(Ordering::Acquire)
    }

    pub fn set_save_on_set(&self, enabled: bool) {
        self.save_on_set.store(enabled, Ordering::Release);
    }

    /// Bind a typed entry, writing `default` when the key is missing or holds
    /// a value of the wrong type.
    pub fn bind<T>(
        self: &Arc<Self>,
        section: &str,
        key: &str,
        default: T,
        description: &str,
    ) -> Result<ConfigEntry<T>, ConfigError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let inserted = {
            let mut sections = self.sections.lock();
            let values = sections.entry(section.to_string()).or_default();
            let valid = values
                .get(key)
                .is_some_and(|value| value.clone().try_into::<T>().is_ok());
            if !valid {
                values.insert(key.to_string(), toml::Value::try_from(default.clone())?);
            }
            !valid
        };

        self.descriptions.lock().insert(
            (section.to_string(), key.to_string()),
            description.to_string(),
        );

        if inserted && self.save_on_set() {
            self.save()?;
        }

        Ok(ConfigEntry {
            file: Arc::clone(self),
            section: section.to_string(),
            key: key.to_string(),
            default,
        })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<toml::Value> {
        self.sections
            .lock()
            .get(section)
            .and_then(|values| values.get(key))
            .cloned()
    }

    pub fn description(&self, section: &str, key: &str) -> Option<String> {
        self.descriptions
            .lock()
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    pub fn set(&self, section: &str, key: &str, value: toml::Value) -> Result<(), ConfigError> {
        let changed = {
            let mut sections = self.sections.lock();
            let values = sections.entry(section.to_string()).or_default();
            let changed = values.get(key) != Some(&value);
            values.insert(key.to_string(), value);
            changed
        };

        if !changed {
            return Ok(());
        }

        self.notify(section, key);

        if self.save_on_set() {
            self.save()?;
        }

        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let text = toml::to_string(&*self.sections.lock())?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&self.path, text).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::trace!(path = %self.path.display(), "config saved");
        Ok(())
    }

    /// Re-read the file and fire listeners for every value that changed on disk.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let fresh = read_sections(&self.path)?;

        let changed: Vec<(String, String)> = {
            let mut sections = self.sections.lock();
            let mut changed = Vec::new();
            for (section, values) in fresh {
                let current = sections.entry(section.clone()).or_default();
                for (key, value) in values {
                    if current.get(&key) != Some(&value) {
                        current.insert(key.clone(), value);
                        changed.push((section.clone(), key));
                    }
                }
            }
            changed
        };

        for (section, key) in &changed {
            tracing::debug!(section, key, "config value reloaded");
            self.notify(section, key);
        }

        Ok(())
    }

    pub fn on_changed(&self, section: &str, key: &str, callback: ChangeListener) {
        self.listeners.lock().push(Listener {
            section: section.to_string(),
            key: key.to_string(),
            callback,
        });
    }

    fn notify(&self, section: &str, key: &str) {
        let callbacks: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|listener| listener.section == section && listener.key == key)
            .map(|listener| Arc::clone(&listener.callback))
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

impl PersistentStore for ConfigFile {
    fn save(&self) -> Result<(), ConfigError> {
        ConfigFile::save(self)
    }

    fn set_save_on_set(&self, enabled: bool) {
        ConfigFile::set_save_on_set(self, enabled);
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

fn read_sections(path: &Path) -> Result<Sections, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Typed handle onto one key of a [`ConfigFile`].
#[derive(Debug, Clone)]
pub struct ConfigEntry<T> {
    file: Arc<ConfigFile>,
    section: String,
    key: String,
    default: T,
}

impl<T> ConfigEntry<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn value(&self) -> T {
        self.file
            .get(&self.section, &self.key)
            .and_then(|value| value.try_into().ok())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn set(&self, value: T) -> Result<(), ConfigError> {
        self.file
            .set(&self.section, &self.key, toml::Value::try_from(value)?)
    }

    pub fn on_changed(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.file
            .on_changed(&self.section, &self.key, Arc::new(callback));
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> String {
        self.file
            .description(&self.section, &self.key)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_bind_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cfg");
        let file = ConfigFile::open(&path, false).unwrap();

        let entry = file.bind("General", "Answer", 42_i64, "the answer").unwrap();

        assert_eq!(entry.value(), 42);
        assert_eq!(entry.key(), "Answer");
        assert_eq!(entry.description(), "the answer");
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[General]"));
        assert!(written.contains("Answer = 42"));
    }

    #[test]
    fn test_bind_keeps_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cfg");
        fs::write(&path, "[General]\n\"Some Key\" = \"kept\"\n").unwrap();

        let file = ConfigFile::open(&path, false).unwrap();
        let entry = file
            .bind("General", "Some Key", String::from("fallback"), "")
            .unwrap();

        assert_eq!(entry.value(), "kept");
    }

    #[test]
    fn test_bind_replaces_value_of_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cfg");
        fs::write(&path, "[General]\nCount = \"many\"\n").unwrap();

        let file = ConfigFile::open(&path, false).unwrap();
        let entry = file.bind("General", "Count", 3_i64, "").unwrap();

        assert_eq!(entry.value(), 3);
    }

    #[test]
    fn test_set_skips_save_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cfg");
        let file = ConfigFile::open(&path, false).unwrap();
        file.set_save_on_set(false);

        let entry = file.bind("General", "Name", String::from("a"), "").unwrap();
        entry.set(String::from("b")).unwrap();

        assert_eq!(entry.value(), "b");
        assert!(!path.exists());

        file.save().unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("Name = \"b\""));
    }

    #[test]
    fn test_listeners_fire_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::open(dir.path().join("test.cfg"), false).unwrap();
        let entry = file.bind("General", "Flag", false, "").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        entry.on_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        entry.set(true).unwrap();
        entry.set(true).unwrap();
        entry.set(false).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reload_notifies_changed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cfg");
        let file = ConfigFile::open(&path, false).unwrap();
        let list = file.bind("General", "List", String::new(), "").unwrap();
        let other = file.bind("General", "Other", 1_i64, "").unwrap();

        let list_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&list_calls);
        list.on_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let other_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&other_calls);
        other.on_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fs::write(&path, "[General]\nList = \"A,B\"\nOther = 1\n").unwrap();
        file.reload().unwrap();

        assert_eq!(list.value(), "A,B");
        assert_eq!(list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cfg");
        fs::write(&path, "[General\n").unwrap();

        let err = ConfigFile::open(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
