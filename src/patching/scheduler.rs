use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::profile::FlushProfile;
use crate::patching::passthrough::PassthroughAllowList;
use crate::patching::pipeline::{
    CompileError, Interception, InterceptorOverride, PatchPipeline, UpdateInterceptor,
    UpdateOutcome,
};
use crate::patching::registration::{InterceptionRegistration, MethodId};
use crate::patching::registry::PhaseRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Phase1Open,
    Phase1Flushing,
    Phase2Open,
    Phase2Flushing,
    Detached,
}

impl Phase {
    /// Open phases queue requests; flushing phases catch the nested requests
    /// a batch compile triggers.
    pub fn accepts_registrations(self) -> bool {
        matches!(
            self,
            Phase::Phase1Open | Phase::Phase1Flushing | Phase::Phase2Open | Phase::Phase2Flushing
        )
    }

    /// The phase a flush running in `self` ends in.
    fn after_flush(self) -> Option<Phase> {
        match self {
            Phase::Phase1Flushing => Some(Phase::Phase2Open),
            Phase::Phase2Flushing => Some(Phase::Detached),
            _ => None,
        }
    }
}

/// Host lifecycle signal that closes a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    PluginsLoaded,
    MainInitialized,
}

impl Boundary {
    /// (phase it closes, phase while flushing, phase afterwards)
    fn transition(self) -> (Phase, Phase, Phase) {
        match self {
            Boundary::PluginsLoaded => {
                (Phase::Phase1Open, Phase::Phase1Flushing, Phase::Phase2Open)
            }
            Boundary::MainInitialized => {
                (Phase::Phase2Open, Phase::Phase2Flushing, Phase::Detached)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushLabels {
    pub plugins_loaded: String,
    pub main_initialized: String,
}

impl FlushLabels {
    pub fn from_profile(profile: &FlushProfile) -> Self {
        Self {
            plugins_loaded: profile.plugins_loaded_label.clone(),
            main_initialized: profile.main_initialized_label.clone(),
        }
    }

    pub fn label(&self, boundary: Boundary) -> &str {
        match boundary {
            Boundary::PluginsLoaded => &self.plugins_loaded,
            Boundary::MainInitialized => &self.main_initialized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub boundary: Boundary,
    pub compiled: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

struct SchedulerState {
    phase: Phase,
    registry: PhaseRegistry,
    flushing: bool,
    queued: VecDeque<Boundary>,
    phase_override: Option<InterceptorOverride>,
}

/// Defers wrapper compilation through the two startup phases and compiles
/// each phase's registrations in one batch when the host closes it.
///
/// Every phase transition, registration and snapshot happens while holding
/// the pipeline's critical section; the state mutex is only ever held for
/// short, non-reentrant updates and never across a compile.
pub struct PatchScheduler {
    pipeline: Arc<PatchPipeline>,
    passthrough: Arc<PassthroughAllowList>,
    labels: FlushLabels,
    state: Mutex<SchedulerState>,
    this: Weak<PatchScheduler>,
}

impl fmt::Debug for PatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PatchScheduler")
            .field("phase", &state.phase)
            .field("pending", &state.registry.len())
            .finish_non_exhaustive()
    }
}

struct DeferToRegistry {
    scheduler: Weak<PatchScheduler>,
}

impl UpdateInterceptor for DeferToRegistry {
    fn intercept(&self, registration: &InterceptionRegistration) -> Interception {
        match self.scheduler.upgrade() {
            Some(scheduler) if scheduler.try_defer(registration) => Interception::Deferred,
            _ => Interception::Proceed,
        }
    }
}

impl PatchScheduler {
    pub fn new(
        pipeline: Arc<PatchPipeline>,
        passthrough: Arc<PassthroughAllowList>,
        labels: FlushLabels,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            pipeline,
            passthrough,
            labels,
            state: Mutex::new(SchedulerState {
                phase: Phase::Idle,
                registry: PhaseRegistry::new(),
                flushing: false,
                queued: VecDeque::new(),
                phase_override: None,
            }),
            this: this.clone(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn pending(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn is_pending(&self, method: &MethodId) -> bool {
        self.state.lock().registry.contains(method)
    }

    /// Idle → Phase1Open. Any later call is a no-op returning `false`.
    pub fn open(&self) -> bool {
        let _critical = self.pipeline.critical_section();
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            tracing::trace!(phase = ?state.phase, "patch scheduler already activated");
            return false;
        }

        state.phase = Phase::Phase1Open;
        state.phase_override = Some(self.pipeline.override_interceptor(self.redirect()));
        tracing::debug!("deferring wrapper compilation until plugin loading finishes");
        true
    }

    /// Queue `registration` while a phase is open, otherwise compile it now.
    /// Passthrough types always compile now.
    pub fn register(
        &self,
        registration: InterceptionRegistration,
    ) -> Result<UpdateOutcome, CompileError> {
        let _critical = self.pipeline.critical_section();
        if self.try_defer(&registration) {
            return Ok(UpdateOutcome::Deferred);
        }

        self.pipeline.compile_now(&registration)?;
        Ok(UpdateOutcome::Compiled)
    }

    /// Host signal closing the phase `boundary` belongs to. A signal raised
    /// while a flush is running (from inside a compile) runs after it.
    pub fn signal(&self, boundary: Boundary) -> Vec<FlushReport> {
        let _critical = self.pipeline.critical_section();
        {
            let mut state = self.state.lock();
            if state.flushing {
                tracing::warn!(
                    ?boundary,
                    "phase boundary reached during a flush, queued behind it"
                );
                state.queued.push_back(boundary);
                return Vec::new();
            }
            state.flushing = true;
        }
        let _flushing = FlushingGuard { scheduler: self };

        let mut reports = Vec::new();
        let mut next = Some(boundary);
        while let Some(boundary) = next {
            reports.extend(self.flush(boundary));
            next = self.state.lock().queued.pop_front();
        }

        reports
    }

    fn flush(&self, boundary: Boundary) -> Option<FlushReport> {
        let (open, flushing, after) = boundary.transition();
        {
            let mut state = self.state.lock();
            if state.phase != open {
                tracing::warn!(
                    phase = ?state.phase,
                    ?boundary,
                    "ignoring phase boundary outside its phase"
                );
                return None;
            }
            state.phase = flushing;
        }

        let started = Instant::now();

        // Nested update requests raised by the batch land in the registry
        // instead of compiling individually.
        let redirect = self.pipeline.override_interceptor(self.redirect());
        let batch = self.state.lock().registry.snapshot_and_clear();
        let (mut compiled, mut failed) = self.compile_batch(&batch);
        drop(redirect);

        let released = {
            let mut state = self.state.lock();
            state.phase = after;
            if after == Phase::Detached {
                state.phase_override.take()
            } else {
                None
            }
        };
        drop(released);

        if after == Phase::Detached {
            let leftovers = self.state.lock().registry.snapshot_and_clear();
            let (more_compiled, more_failed) = self.compile_batch(&leftovers);
            compiled += more_compiled;
            failed += more_failed;
        }

        let elapsed = started.elapsed();
        tracing::info!(
            "Batch-patched {} methods {} in {} ms",
            compiled + failed,
            self.labels.label(boundary),
            elapsed.as_millis()
        );
        if failed > 0 {
            tracing::warn!("{failed} methods failed to patch {}", self.labels.label(boundary));
        }
        if after == Phase::Detached {
            tracing::debug!("patch scheduler detached");
        }

        Some(FlushReport {
            boundary,
            compiled,
            failed,
            elapsed,
        })
    }

    fn compile_batch(&self, batch: &[InterceptionRegistration]) -> (usize, usize) {
        let mut compiled = 0;
        let mut failed = 0;
        for registration in batch {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.compile_now(registration)));
            match outcome {
                Ok(Ok(_)) => compiled += 1,
                Ok(Err(err)) => {
                    tracing::warn!("{err}");
                    failed += 1;
                }
                Err(_) => {
                    tracing::error!(method = %registration.method, "wrapper compiler panicked");
                    failed += 1;
                }
            }
        }
        (compiled, failed)
    }

    fn try_defer(&self, registration: &InterceptionRegistration) -> bool {
        if self.passthrough.contains(registration.declaring_type()) {
            tracing::trace!(method = %registration.method, "passthrough, compiling immediately");
            return false;
        }

        let mut state = self.state.lock();
        if !state.phase.accepts_registrations() {
            return false;
        }

        state.registry.insert(registration.clone());
        true
    }

    fn redirect(&self) -> Arc<dyn UpdateInterceptor> {
        Arc::new(DeferToRegistry {
            scheduler: self.this.clone(),
        })
    }
}

/// Clears the flushing flag when `signal` returns or unwinds, and moves a
/// flush cut short on to the phase it would have ended in.
struct FlushingGuard<'a> {
    scheduler: &'a PatchScheduler,
}

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        let released = {
            let mut state = self.scheduler.state.lock();
            state.flushing = false;
            state.queued.clear();
            match state.phase.after_flush() {
                Some(after) => {
                    tracing::error!(
                        phase = ?state.phase,
                        "flush interrupted, moving on to {after:?}"
                    );
                    state.phase = after;
                    if after == Phase::Detached {
                        state.phase_override.take()
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        drop(released);
    }
}
