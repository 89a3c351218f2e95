pub mod cache;
pub mod hooks;

use std::collections::HashMap;
use std::sync::Arc;

pub use cache::LocalizationCache;
pub use hooks::{FieldValue, HookArg, HookId, LoadHook, LoadHooks, LocalizationError, ParamRole};

/// Translation key → localized text.
pub type TranslationTable = HashMap<String, String>;

/// The host object that owns the active translation table and knows how to
/// load a language the slow way.
pub trait LocalizationInstance {
    fn translations(&self) -> Arc<TranslationTable>;

    fn set_translations(&mut self, table: Arc<TranslationTable>);

    /// Instance-scoped state a load hook may ask for by name.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// The host's own, uncached language load. Runs the registered load hooks.
    fn setup_language(&mut self, language: &str) -> bool;
}

/// Persisted user preferences (the player's chosen locale lives here).
pub trait LocalePreferences {
    fn get_string(&self, key: &str, default: &str) -> String;
}

/// The host's language catalog, if it has been created yet.
pub trait LanguageCatalog {
    /// `None` until the catalog instance exists.
    fn languages(&self) -> Option<Vec<String>>;
}
