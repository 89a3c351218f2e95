use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::profile::LocalizationProfile;
use crate::localization::hooks::{HookId, LoadHooks};
use crate::localization::{
    LanguageCatalog, LocalePreferences, LocalizationInstance, TranslationTable,
};

/// Remembers every loaded language so switching back to it skips the
/// expensive re-read and merge.
#[derive(Debug)]
pub struct LocalizationCache {
    default_language: String,
    preference_key: String,
    tables: Mutex<HashMap<String, Arc<TranslationTable>>>,
    hooks: Arc<LoadHooks>,
    replayed: Mutex<HashSet<HookId>>,
}

impl LocalizationCache {
    pub fn new(profile: &LocalizationProfile, hooks: Arc<LoadHooks>) -> Self {
        Self {
            default_language: profile.default_language.clone(),
            preference_key: profile.preference_key.clone(),
            tables: Mutex::new(HashMap::new()),
            hooks,
            replayed: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_cached(&self, language: &str) -> bool {
        self.tables.lock().contains_key(language)
    }

    pub fn load_language(
        &self,
        instance: &mut dyn LocalizationInstance,
        language: &str,
        preferences: &dyn LocalePreferences,
    ) -> bool {
        let cached = self.tables.lock().get(language).cloned();
        if let Some(table) = cached {
            instance.set_translations(table);

            let preferred =
                preferences.get_string(&self.preference_key, &self.default_language);
            if language == self.default_language && preferred != self.default_language {
                self.replay_hooks(&*instance, language);
            }

            tracing::debug!(language, "translations served from cache");
            return true;
        }

        if language != self.default_language {
            // The loader merges into the active table; give it its own copy so
            // the cached default table stays intact.
            let copy = TranslationTable::clone(&instance.translations());
            instance.set_translations(Arc::new(copy));
        }

        let loaded = instance.setup_language(language);
        if loaded {
            self.tables
                .lock()
                .insert(language.to_string(), instance.translations());
        }
        loaded
    }

    /// The default language's table is only ever loaded first, before the
    /// preferred one; hooks that ran during that load expect to see it again
    /// once the preferred language diverges. Each hook runs at most once.
    fn replay_hooks(&self, instance: &dyn LocalizationInstance, language: &str) {
        for hook in self.hooks.hooks() {
            let first = self.replayed.lock().insert(hook.id());
            if !first {
                continue;
            }

            tracing::debug!(hook = hook.name(), language, "replaying load hook");
            hook.invoke(instance, language, true);
        }
    }

    /// Reuse the catalog's list when it already exists instead of scanning again.
    pub fn load_languages(
        &self,
        catalog: &dyn LanguageCatalog,
        compute: impl FnOnce() -> Vec<String>,
    ) -> Vec<String> {
        catalog.languages().unwrap_or_else(compute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::hooks::{FieldValue, HookArg, ParamRole};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Host {
        table: Arc<TranslationTable>,
        loads: usize,
        hooks: Arc<LoadHooks>,
    }

    impl Host {
        fn new(hooks: Arc<LoadHooks>) -> Self {
            Self {
                table: Arc::default(),
                loads: 0,
                hooks,
            }
        }
    }

    impl LocalizationInstance for Host {
        fn translations(&self) -> Arc<TranslationTable> {
            Arc::clone(&self.table)
        }

        fn set_translations(&mut self, table: Arc<TranslationTable>) {
            self.table = table;
        }

        fn field(&self, name: &str) -> Option<FieldValue> {
            (name == "m_loads").then(|| FieldValue::Int(self.loads as i64))
        }

        fn setup_language(&mut self, language: &str) -> bool {
            if language == "Klingon" {
                return false;
            }
            self.loads += 1;
            let table = Arc::make_mut(&mut self.table);
            table.insert("menu_start".to_string(), format!("Start ({language})"));
            table.insert(format!("only_{language}"), language.to_string());
            let hooks = Arc::clone(&self.hooks);
            hooks.run_all(self, language, true);
            true
        }
    }

    struct Prefs(&'static str);

    impl LocalePreferences for Prefs {
        fn get_string(&self, _key: &str, _default: &str) -> String {
            self.0.to_string()
        }
    }

    struct Catalog(Option<Vec<String>>);

    impl LanguageCatalog for Catalog {
        fn languages(&self) -> Option<Vec<String>> {
            self.0.clone()
        }
    }

    fn profile() -> LocalizationProfile {
        LocalizationProfile {
            default_language: "English".to_string(),
            preference_key: "language".to_string(),
        }
    }

    #[test]
    fn test_second_load_skips_loader() {
        let hooks = Arc::new(LoadHooks::new());
        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);

        assert!(cache.load_language(&mut host, "French", &Prefs("French")));
        let first = host.translations();
        host.set_translations(Arc::default());

        assert!(cache.load_language(&mut host, "French", &Prefs("French")));

        assert_eq!(host.loads, 1);
        assert_eq!(*host.translations(), *first);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let hooks = Arc::new(LoadHooks::new());
        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);

        assert!(!cache.load_language(&mut host, "Klingon", &Prefs("English")));
        assert!(!cache.is_cached("Klingon"));
    }

    #[test]
    fn test_non_default_load_does_not_touch_cached_default() {
        let hooks = Arc::new(LoadHooks::new());
        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);

        cache.load_language(&mut host, "English", &Prefs("German"));
        cache.load_language(&mut host, "German", &Prefs("German"));
        assert!(host.translations().contains_key("only_English"));
        assert!(host.translations().contains_key("only_German"));

        cache.load_language(&mut host, "English", &Prefs("German"));
        let english = host.translations();
        assert_eq!(english.get("menu_start").unwrap(), "Start (English)");
        assert!(!english.contains_key("only_German"));
    }

    #[test]
    fn test_caller_mutation_does_not_leak_into_cache() {
        let hooks = Arc::new(LoadHooks::new());
        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);

        cache.load_language(&mut host, "French", &Prefs("French"));
        let mut mine = host.translations();
        Arc::make_mut(&mut mine).insert("menu_start".to_string(), "edited".to_string());

        cache.load_language(&mut host, "French", &Prefs("French"));
        assert_eq!(host.translations().get("menu_start").unwrap(), "Start (French)");
    }

    #[test]
    fn test_default_language_replays_each_hook_once() {
        let hooks = Arc::new(LoadHooks::new());
        let calls = Arc::new(AtomicUsize::new(0));
        for name in ["Words", "MoreWords"] {
            let counter = Arc::clone(&calls);
            hooks
                .register(name, vec![ParamRole::Instance, ParamRole::Language], move |args| {
                    assert!(matches!(args[1], HookArg::Language("English")));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);
        cache.load_language(&mut host, "English", &Prefs("Swedish"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..3 {
            cache.load_language(&mut host, "English", &Prefs("Swedish"));
        }

        assert_eq!(host.loads, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_default_language_preferred_skips_replay() {
        let hooks = Arc::new(LoadHooks::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        hooks
            .register("Words", vec![], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let cache = LocalizationCache::new(&profile(), hooks.clone());
        let mut host = Host::new(hooks);
        cache.load_language(&mut host, "English", &Prefs("English"));
        cache.load_language(&mut host, "English", &Prefs("English"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_language_list_prefers_catalog() {
        let cache = LocalizationCache::new(&profile(), Arc::new(LoadHooks::new()));
        let catalog = Catalog(Some(vec!["English".to_string(), "Swedish".to_string()]));

        let languages = cache.load_languages(&catalog, || panic!("catalog exists"));
        assert_eq!(languages, vec!["English", "Swedish"]);

        let mut computed = 0;
        let languages = cache.load_languages(&Catalog(None), || {
            computed += 1;
            vec!["English".to_string()]
        });
        assert_eq!(languages, vec!["English"]);
        assert_eq!(computed, 1);
    }
}
