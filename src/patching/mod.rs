pub mod passthrough;
pub mod pipeline;
pub mod registration;
pub mod registry;
pub mod scheduler;

pub use passthrough::{PassthroughAllowList, PassthroughSet};
pub use pipeline::{
    CompileError, Interception, InterceptorOverride, PatchPipeline, UpdateInterceptor,
    UpdateOutcome, WrapperCompiler,
};
pub use registration::{InterceptionRegistration, MethodId, PatchSet, WrapperHandle};
pub use registry::PhaseRegistry;
pub use scheduler::{Boundary, FlushLabels, FlushReport, PatchScheduler, Phase};
