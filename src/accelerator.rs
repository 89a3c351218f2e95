use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::bytecode::{
    ArgSource, InjectError, InjectedCall, InjectionPlan, Instruction, MarkerPattern, MethodRef,
    inject_after_marker,
};
use crate::config::profile::BootstrapProfile;
use crate::config::{
    ConfigError, ConfigSaveDebouncer, ConfigWatcher, HostProfile, PersistentStore, Settings,
};
use crate::localization::{
    LanguageCatalog, LoadHooks, LocalePreferences, LocalizationCache, LocalizationInstance,
};
use crate::patching::{
    Boundary, FlushLabels, FlushReport, PassthroughAllowList, PassthroughSet, PatchPipeline,
    PatchScheduler,
};

#[derive(Debug, Error)]
pub enum AcceleratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bootstrap method shape changed, startup acceleration disabled: {0}")]
    StructuralMismatch(#[from] InjectError),
}

/// The three values resident at the injected call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSite {
    pub processor: String,
    pub target: String,
    pub module: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFeatures {
    pub delay_patching: bool,
    pub merge_localization: bool,
    pub delay_config_save: bool,
}

#[derive(Debug, Default)]
struct Activation {
    site: Option<BootstrapSite>,
    features: ActiveFeatures,
    disabled: bool,
}

/// Wires the scheduler, localization cache and config debouncer to the host's
/// bootstrap call and its two lifecycle signals.
#[derive(Debug)]
pub struct StartupAccelerator {
    profile: HostProfile,
    settings: Settings,
    passthrough: Arc<PassthroughAllowList>,
    scheduler: Arc<PatchScheduler>,
    localization: LocalizationCache,
    config_saves: ConfigSaveDebouncer,
    activation: Mutex<Activation>,
    _watcher: Option<ConfigWatcher>,
}

impl StartupAccelerator {
    /// Load profile and settings from `config_dir` and start watching the
    /// settings file for live edits.
    pub fn initialize(
        config_dir: &Path,
        pipeline: Arc<PatchPipeline>,
        hooks: Arc<LoadHooks>,
    ) -> Result<Self, AcceleratorError> {
        let profile = HostProfile::load(config_dir)?;
        let settings = Settings::load(config_dir)?;

        let watcher = match ConfigWatcher::spawn(Arc::clone(settings.file())) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!("live config reload unavailable: {err}");
                None
            }
        };

        let mut accelerator = Self::new(profile, settings, pipeline, hooks);
        accelerator._watcher = watcher;
        Ok(accelerator)
    }

    pub fn new(
        profile: HostProfile,
        settings: Settings,
        pipeline: Arc<PatchPipeline>,
        hooks: Arc<LoadHooks>,
    ) -> Self {
        let passthrough = Arc::new(PassthroughAllowList::new(PassthroughSet::resolve(
            &profile.passthrough,
            settings.merge_localization.value().is_on(),
            &settings.passthrough.value(),
        )));

        {
            let allow_list = Arc::clone(&passthrough);
            let passthrough_profile = profile.passthrough.clone();
            let merge_localization = settings.merge_localization.clone();
            let configured = settings.passthrough.clone();
            settings.passthrough.on_changed(move || {
                allow_list.replace(PassthroughSet::resolve(
                    &passthrough_profile,
                    merge_localization.value().is_on(),
                    &configured.value(),
                ));
            });
        }

        let scheduler = PatchScheduler::new(
            pipeline,
            Arc::clone(&passthrough),
            FlushLabels::from_profile(&profile.flush),
        );
        let localization = LocalizationCache::new(&profile.localization, hooks);

        Self {
            profile,
            settings,
            passthrough,
            scheduler,
            localization,
            config_saves: ConfigSaveDebouncer::new(),
            activation: Mutex::new(Activation::default()),
            _watcher: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Arc<PatchScheduler> {
        &self.scheduler
    }

    pub fn passthrough(&self) -> &Arc<PassthroughAllowList> {
        &self.passthrough
    }

    pub fn active_features(&self) -> ActiveFeatures {
        self.activation.lock().features
    }

    pub fn activation_site(&self) -> Option<BootstrapSite> {
        self.activation.lock().site.clone()
    }

    pub fn is_disabled(&self) -> bool {
        self.activation.lock().disabled
    }

    pub fn injection_plan(&self) -> InjectionPlan {
        injection_plan(&self.profile.bootstrap)
    }

    /// Rewrite the host bootstrap method so it calls back into
    /// [`StartupAccelerator::on_bootstrap`]. On a shape mismatch the whole
    /// feature is switched off and the host must keep its original method.
    pub fn prepare_bootstrap(
        &self,
        method: &[Instruction],
    ) -> Result<Vec<Instruction>, AcceleratorError> {
        match inject_after_marker(method, &self.injection_plan()) {
            Ok(injection) => {
                tracing::debug!(sites = injection.sites.len(), "bootstrap call injected");
                Ok(injection.instructions)
            }
            Err(err) => {
                tracing::error!(
                    "cannot inject bootstrap call, startup acceleration disabled: {err}"
                );
                self.activation.lock().disabled = true;
                Err(err.into())
            }
        }
    }

    /// Target of the injected call. Only the first firing does anything.
    pub fn on_bootstrap(&self, site: BootstrapSite) -> bool {
        let mut activation = self.activation.lock();
        if activation.disabled || activation.site.is_some() {
            return false;
        }

        let features = ActiveFeatures {
            delay_patching: self.settings.delay_patching.value().is_on(),
            merge_localization: self.settings.merge_localization.value().is_on(),
            delay_config_save: self.settings.delay_config_save.value().is_on(),
        };
        tracing::info!(
            processor = %site.processor,
            target = %site.target,
            module = %site.module,
            ?features,
            "startup acceleration activated"
        );
        activation.site = Some(site);
        activation.features = features;
        drop(activation);

        if features.delay_patching {
            self.scheduler.open();
        }
        if features.delay_config_save {
            self.config_saves.open_window();
        }

        true
    }

    pub fn on_plugins_loaded(&self) -> Vec<FlushReport> {
        self.signal_scheduler(Boundary::PluginsLoaded)
    }

    pub fn on_main_initialized(&self) -> Vec<FlushReport> {
        let reports = self.signal_scheduler(Boundary::MainInitialized);
        self.config_saves.flush();
        reports
    }

    fn signal_scheduler(&self, boundary: Boundary) -> Vec<FlushReport> {
        if !self.active_features().delay_patching {
            return Vec::new();
        }
        self.scheduler.signal(boundary)
    }

    /// Host hook for every newly created config store.
    pub fn track_config_store(&self, store: Arc<dyn PersistentStore>) -> bool {
        self.config_saves.track(store)
    }

    pub fn load_language(
        &self,
        instance: &mut dyn LocalizationInstance,
        language: &str,
        preferences: &dyn LocalePreferences,
    ) -> bool {
        if self.active_features().merge_localization {
            self.localization.load_language(instance, language, preferences)
        } else {
            instance.setup_language(language)
        }
    }

    pub fn load_languages(
        &self,
        catalog: &dyn LanguageCatalog,
        compute: impl FnOnce() -> Vec<String>,
    ) -> Vec<String> {
        if self.active_features().merge_localization {
            self.localization.load_languages(catalog, compute)
        } else {
            compute()
        }
    }
}

pub fn injection_plan(profile: &BootstrapProfile) -> InjectionPlan {
    InjectionPlan {
        marker: MarkerPattern {
            local_slot: profile.marker_local,
            helper: MethodRef::new(&profile.helper_type, &profile.helper_name)
                .with_params(2)
                .instance(),
        },
        call: InjectedCall {
            args: vec![
                ArgSource::Local(profile.processor_local),
                ArgSource::Local(profile.target_local),
                ArgSource::ArgDeref(profile.module_arg),
            ],
            entry: MethodRef::new(&profile.entry_type, &profile.entry_name).with_params(3),
        },
    }
}
