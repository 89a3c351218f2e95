//! Encoding-independent instruction model and the bootstrap call injector.
//!
//! - [`Instruction`] - one operation with an optional label and operand
//! - [`inject_after_marker`] - pure rewrite that appends a call after a marker

mod inject;
mod instruction;

pub use inject::{
    ArgSource, InjectError, InjectedCall, Injection, InjectionPlan, MarkerPattern,
    inject_after_marker,
};
pub use instruction::{Instruction, Label, MethodRef, OpCode, Operand, StackEffect};
