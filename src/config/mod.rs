pub mod debounce;
pub mod file;
pub mod profile;
pub mod settings;
pub mod watcher;

pub use debounce::{ConfigSaveDebouncer, PersistentStore};
pub use file::{ConfigEntry, ConfigError, ConfigFile};
pub use profile::HostProfile;
pub use settings::{Settings, Toggle};
pub use watcher::ConfigWatcher;
