use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;

use crate::patching::registration::{InterceptionRegistration, MethodId, WrapperHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to compile wrapper for {method}: {message}")]
pub struct CompileError {
    pub method: MethodId,
    pub message: String,
}

impl CompileError {
    pub fn new(method: MethodId, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
        }
    }
}

/// The interception framework's expensive per-method wrapper builder.
pub trait WrapperCompiler: Send + Sync {
    fn compile(
        &self,
        registration: &InterceptionRegistration,
    ) -> Result<WrapperHandle, CompileError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    Proceed,
    Deferred,
}

/// Sits in front of wrapper compilation and may take a request over.
pub trait UpdateInterceptor: Send + Sync {
    fn intercept(&self, registration: &InterceptionRegistration) -> Interception;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Compiled,
    Deferred,
}

/// The framework's patch-application path: every new patch ends in
/// [`PatchPipeline::update_wrapper`], which compiles under one process-wide,
/// reentrant critical section unless an installed interceptor claims it.
pub struct PatchPipeline {
    compiler: Arc<dyn WrapperCompiler>,
    critical: ReentrantMutex<()>,
    interceptors: Mutex<Vec<(u64, Arc<dyn UpdateInterceptor>)>>,
    next_override: AtomicU64,
    replacements: Mutex<HashMap<MethodId, WrapperHandle>>,
}

impl fmt::Debug for PatchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchPipeline")
            .field("interceptors", &self.interceptors.lock().len())
            .field("replacements", &self.replacements.lock().len())
            .finish_non_exhaustive()
    }
}

impl PatchPipeline {
    pub fn new(compiler: Arc<dyn WrapperCompiler>) -> Arc<Self> {
        Arc::new(Self {
            compiler,
            critical: ReentrantMutex::new(()),
            interceptors: Mutex::new(Vec::new()),
            next_override: AtomicU64::new(0),
            replacements: Mutex::new(HashMap::new()),
        })
    }

    /// The lock guarding all compilation state. Reentrant so nested
    /// compilation on the same thread does not deadlock.
    pub fn critical_section(&self) -> ReentrantMutexGuard<'_, ()> {
        self.critical.lock()
    }

    pub fn update_wrapper(
        &self,
        registration: InterceptionRegistration,
    ) -> Result<UpdateOutcome, CompileError> {
        let _critical = self.critical.lock();

        let interceptor = self
            .interceptors
            .lock()
            .last()
            .map(|(_, interceptor)| Arc::clone(interceptor));

        if let Some(interceptor) = interceptor
            && interceptor.intercept(&registration) == Interception::Deferred
        {
            return Ok(UpdateOutcome::Deferred);
        }

        self.compile_now(&registration)?;
        Ok(UpdateOutcome::Compiled)
    }

    /// Compile bypassing every interceptor and record the result as the
    /// method's replacement.
    pub fn compile_now(
        &self,
        registration: &InterceptionRegistration,
    ) -> Result<WrapperHandle, CompileError> {
        let _critical = self.critical.lock();

        let handle = self.compiler.compile(registration)?;
        self.replacements
            .lock()
            .insert(registration.method.clone(), handle);
        Ok(handle)
    }

    pub fn replacement_for(&self, method: &MethodId) -> Option<WrapperHandle> {
        self.replacements.lock().get(method).copied()
    }

    pub fn has_interceptor(&self) -> bool {
        !self.interceptors.lock().is_empty()
    }

    /// Put `interceptor` in front of compilation until the returned guard drops.
    pub fn override_interceptor(
        self: &Arc<Self>,
        interceptor: Arc<dyn UpdateInterceptor>,
    ) -> InterceptorOverride {
        let id = self.next_override.fetch_add(1, Ordering::Relaxed);
        self.interceptors.lock().push((id, interceptor));
        InterceptorOverride {
            pipeline: Arc::clone(self),
            id,
        }
    }
}

/// Removes its interceptor on drop, whatever order overrides are released in.
#[must_use = "the interceptor is removed as soon as the override is dropped"]
pub struct InterceptorOverride {
    pipeline: Arc<PatchPipeline>,
    id: u64,
}

impl fmt::Debug for InterceptorOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorOverride")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for InterceptorOverride {
    fn drop(&mut self) {
        self.pipeline
            .interceptors
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}
