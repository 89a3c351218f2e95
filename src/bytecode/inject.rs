use thiserror::Error;

use super::instruction::{Instruction, MethodRef, OpCode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    #[error("no load of local {slot} found in bootstrap method")]
    MarkerNotFound { slot: u16 },
    #[error("no call to {helper} follows the load of local {slot}")]
    HelperCallNotFound { slot: u16, helper: String },
    #[error("injected call to {entry} is not stack-neutral: {reason}")]
    UnbalancedCall { entry: String, reason: String },
}

/// A load of `local_slot`, followed later by a call to `helper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPattern {
    pub local_slot: u16,
    pub helper: MethodRef,
}

/// Where an argument of the injected call comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    Local(u16),
    Arg(u16),
    /// A by-reference argument, loaded and then dereferenced.
    ArgDeref(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedCall {
    pub args: Vec<ArgSource>,
    pub entry: MethodRef,
}

impl InjectedCall {
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(self.args.len() * 2 + 1);
        for arg in &self.args {
            match *arg {
                ArgSource::Local(slot) => out.push(Instruction::load_local(slot)),
                ArgSource::Arg(index) => out.push(Instruction::load_arg(index)),
                ArgSource::ArgDeref(index) => {
                    out.push(Instruction::load_arg(index));
                    out.push(Instruction::simple(OpCode::LoadIndirectRef));
                }
            }
        }
        out.push(Instruction::call(self.entry.clone()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPlan {
    pub marker: MarkerPattern,
    pub call: InjectedCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub instructions: Vec<Instruction>,
    /// Index in `instructions` where each inserted sequence starts.
    pub sites: Vec<usize>,
}

/// Append the planned call after every helper call that follows the marker load.
///
/// The input is never modified. On any mismatch nothing is returned but the
/// error, so a caller can keep running the original method untouched.
pub fn inject_after_marker(
    instructions: &[Instruction],
    plan: &InjectionPlan,
) -> Result<Injection, InjectError> {
    let call = plan.call.instructions();
    check_stack_neutral(&call, &plan.call.entry)?;

    let mut out = Vec::with_capacity(instructions.len() + call.len());
    let mut sites = Vec::new();
    let mut marker_seen = false;

    for instruction in instructions {
        out.push(instruction.clone());

        if instruction.loads_local(plan.marker.local_slot) {
            marker_seen = true;
        } else if marker_seen && instruction.calls(&plan.marker.helper) {
            sites.push(out.len());
            out.extend(call.iter().cloned());
        }
    }

    if !marker_seen {
        return Err(InjectError::MarkerNotFound {
            slot: plan.marker.local_slot,
        });
    }

    if sites.is_empty() {
        return Err(InjectError::HelperCallNotFound {
            slot: plan.marker.local_slot,
            helper: plan.marker.helper.to_string(),
        });
    }

    Ok(Injection {
        instructions: out,
        sites,
    })
}

fn check_stack_neutral(call: &[Instruction], entry: &MethodRef) -> Result<(), InjectError> {
    let unbalanced = |reason: String| InjectError::UnbalancedCall {
        entry: entry.to_string(),
        reason,
    };

    let mut depth: i32 = 0;
    for instruction in call {
        let effect = instruction
            .stack_effect()
            .ok_or_else(|| unbalanced(format!("unknown stack effect of `{instruction}`")))?;
        depth -= i32::from(effect.pops);
        if depth < 0 {
            return Err(unbalanced(format!("`{instruction}` underflows the stack")));
        }
        depth += i32::from(effect.pushes);
    }

    if depth != 0 {
        return Err(unbalanced(format!("leaves {depth} values on the stack")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::{Label, Operand};

    fn helper() -> MethodRef {
        MethodRef::new("Mono.Cecil.Cil.ILProcessor", "InsertBefore")
            .with_params(2)
            .instance()
    }

    fn entry() -> MethodRef {
        MethodRef::new("Accelerator.Bootstrap", "AddPluginsLoadedCall").with_params(3)
    }

    fn plan() -> InjectionPlan {
        InjectionPlan {
            marker: MarkerPattern {
                local_slot: 6,
                helper: helper(),
            },
            call: InjectedCall {
                args: vec![ArgSource::Local(11), ArgSource::Local(12), ArgSource::ArgDeref(0)],
                entry: entry(),
            },
        }
    }

    fn bootstrap_method() -> Vec<Instruction> {
        vec![
            Instruction::load_arg(0),
            Instruction::branch(OpCode::BranchFalse, Label(1)),
            Instruction::load_local(6),
            Instruction::load_local(11),
            Instruction::load_local(12),
            Instruction::load_local(13),
            Instruction::call_virtual(helper()),
            Instruction::simple(OpCode::Nop).labeled(Label(1)),
            Instruction::simple(OpCode::Return),
        ]
    }

    #[test]
    fn test_inserts_call_after_helper() {
        let original = bootstrap_method();
        let injection = inject_after_marker(&original, &plan()).unwrap();

        assert_eq!(injection.sites, vec![7]);
        assert_eq!(&injection.instructions[..7], &original[..7]);
        assert_eq!(
            &injection.instructions[7..12],
            &[
                Instruction::load_local(11),
                Instruction::load_local(12),
                Instruction::load_arg(0),
                Instruction::simple(OpCode::LoadIndirectRef),
                Instruction::call(entry()),
            ]
        );
        assert_eq!(&injection.instructions[12..], &original[7..]);
    }

    #[test]
    fn test_branch_targets_survive_insertion() {
        let injection = inject_after_marker(&bootstrap_method(), &plan()).unwrap();

        let target = injection
            .instructions
            .iter()
            .position(|instruction| instruction.label == Some(Label(1)))
            .unwrap();
        assert_eq!(injection.instructions[target].opcode, OpCode::Nop);
        assert_eq!(
            injection.instructions[1].operand,
            Operand::Target(Label(1))
        );
    }

    #[test]
    fn test_helper_before_marker_is_ignored() {
        let mut method = vec![Instruction::call_virtual(helper())];
        method.extend(bootstrap_method());

        let injection = inject_after_marker(&method, &plan()).unwrap();
        assert_eq!(injection.sites, vec![8]);
    }

    #[test]
    fn test_every_helper_call_after_marker_gets_a_site() {
        let mut method = bootstrap_method();
        method.insert(7, Instruction::call_virtual(helper()));

        let injection = inject_after_marker(&method, &plan()).unwrap();
        assert_eq!(injection.sites.len(), 2);
        assert_eq!(injection.instructions.len(), method.len() + 10);
    }

    #[test]
    fn test_missing_marker_is_structural_mismatch() {
        let method: Vec<Instruction> = bootstrap_method()
            .into_iter()
            .filter(|instruction| !instruction.loads_local(6))
            .collect();

        let err = inject_after_marker(&method, &plan()).unwrap_err();
        assert_eq!(err, InjectError::MarkerNotFound { slot: 6 });
    }

    #[test]
    fn test_missing_helper_is_structural_mismatch() {
        let method = vec![Instruction::load_local(6), Instruction::simple(OpCode::Return)];

        let err = inject_after_marker(&method, &plan()).unwrap_err();
        assert!(matches!(err, InjectError::HelperCallNotFound { slot: 6, .. }));
    }

    #[test]
    fn test_entry_returning_value_is_rejected() {
        let mut plan = plan();
        plan.call.entry = entry().returning();

        let err = inject_after_marker(&bootstrap_method(), &plan).unwrap_err();
        assert!(matches!(err, InjectError::UnbalancedCall { .. }));
    }

    #[test]
    fn test_entry_arity_mismatch_is_rejected() {
        let mut plan = plan();
        plan.call.entry = entry().with_params(4);

        let err = inject_after_marker(&bootstrap_method(), &plan).unwrap_err();
        assert!(err.to_string().contains("underflows"));
    }
}
