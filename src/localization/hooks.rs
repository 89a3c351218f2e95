use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::localization::LocalizationInstance;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalizationError {
    #[error("load hook `{hook}` declares parameter `{parameter}` more than once or under a reserved name")]
    AmbiguousParameter { hook: String, parameter: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

/// What a hook expects in one argument position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamRole {
    Instance,
    Language,
    Result,
    /// A named field of the localization instance.
    Field(String),
}

impl ParamRole {
    fn binding_name(&self) -> &str {
        match self {
            ParamRole::Instance => "instance",
            ParamRole::Language => "language",
            ParamRole::Result => "result",
            ParamRole::Field(name) => name,
        }
    }
}

const RESERVED: [&str; 3] = ["instance", "language", "result"];

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

pub enum HookArg<'a> {
    Instance(&'a dyn LocalizationInstance),
    Language(&'a str),
    Result(bool),
    Field(FieldValue),
}

impl fmt::Debug for HookArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookArg::Instance(_) => f.write_str("Instance(..)"),
            HookArg::Language(language) => f.debug_tuple("Language").field(language).finish(),
            HookArg::Result(result) => f.debug_tuple("Result").field(result).finish(),
            HookArg::Field(value) => f.debug_tuple("Field").field(value).finish(),
        }
    }
}

type HookFn = dyn Fn(&[HookArg<'_>]) + Send + Sync;

/// An extension callback that runs after the host loads one language file.
pub struct LoadHook {
    id: HookId,
    name: String,
    roles: Vec<ParamRole>,
    callback: Box<HookFn>,
}

impl fmt::Debug for LoadHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHook")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl LoadHook {
    pub fn id(&self) -> HookId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the declared arguments from `instance` and call the hook.
    pub fn invoke(&self, instance: &dyn LocalizationInstance, language: &str, result: bool) {
        let args: Vec<HookArg<'_>> = self
            .roles
            .iter()
            .map(|role| match role {
                ParamRole::Instance => HookArg::Instance(instance),
                ParamRole::Language => HookArg::Language(language),
                ParamRole::Result => HookArg::Result(result),
                ParamRole::Field(name) => {
                    HookArg::Field(instance.field(name).unwrap_or_else(|| {
                        tracing::debug!(
                            hook = %self.name,
                            field = %name,
                            "field not found, passing null"
                        );
                        FieldValue::default()
                    }))
                }
            })
            .collect();

        (self.callback)(&args);
    }
}

/// Callbacks registered against the host's per-file language load.
#[derive(Debug, Default)]
pub struct LoadHooks {
    hooks: RwLock<Vec<Arc<LoadHook>>>,
    next_id: AtomicU64,
}

impl LoadHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        roles: Vec<ParamRole>,
        callback: impl Fn(&[HookArg<'_>]) + Send + Sync + 'static,
    ) -> Result<HookId, LocalizationError> {
        let name = name.into();

        let mut seen = HashSet::new();
        for role in &roles {
            let binding = role.binding_name();
            let reserved_field =
                matches!(role, ParamRole::Field(_)) && RESERVED.contains(&binding);
            if reserved_field || !seen.insert(binding.to_string()) {
                return Err(LocalizationError::AmbiguousParameter {
                    hook: name,
                    parameter: binding.to_string(),
                });
            }
        }

        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push(Arc::new(LoadHook {
            id,
            name,
            roles,
            callback: Box::new(callback),
        }));
        Ok(id)
    }

    pub fn hooks(&self) -> Vec<Arc<LoadHook>> {
        self.hooks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// What the host's own loader does after reading a language file.
    pub fn run_all(&self, instance: &dyn LocalizationInstance, language: &str, result: bool) {
        for hook in self.hooks() {
            hook.invoke(instance, language, result);
        }
    }
}
