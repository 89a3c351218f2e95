use std::fmt;

/// Identity of an intercepted method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    pub declaring_type: String,
    pub signature: String,
}

impl MethodId {
    pub fn new(declaring_type: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.signature)
    }
}

/// Every patch currently attached to one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    pub prefixes: Vec<String>,
    pub postfixes: Vec<String>,
    pub transpilers: Vec<String>,
    pub finalizers: Vec<String>,
}

impl PatchSet {
    pub fn len(&self) -> usize {
        self.prefixes.len() + self.postfixes.len() + self.transpilers.len() + self.finalizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A request to (re)build the redirecting wrapper of `method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptionRegistration {
    pub method: MethodId,
    pub patches: PatchSet,
}

impl InterceptionRegistration {
    pub fn new(method: MethodId, patches: PatchSet) -> Self {
        Self { method, patches }
    }

    pub fn declaring_type(&self) -> &str {
        &self.method.declaring_type
    }
}

/// Opaque handle to a compiled wrapper, issued by the interception framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperHandle(pub u64);
