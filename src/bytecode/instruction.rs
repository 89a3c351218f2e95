use serde::{Deserialize, Serialize};
use std::fmt;

/// Branch target. Branches name labels rather than indices, so inserting
/// instructions never retargets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

/// Reference to a callable method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_type: String,
    pub name: String,
    #[serde(default)]
    pub params: u16,
    #[serde(default)]
    pub has_this: bool,
    #[serde(default)]
    pub returns_value: bool,
}

impl MethodRef {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            params: 0,
            has_this: false,
            returns_value: false,
        }
    }

    pub fn with_params(mut self, params: u16) -> Self {
        self.params = params;
        self
    }

    pub fn instance(mut self) -> Self {
        self.has_this = true;
        self
    }

    pub fn returning(mut self) -> Self {
        self.returns_value = true;
        self
    }

    /// Same declaring type and name; arity is not part of the identity.
    pub fn same_method(&self, other: &MethodRef) -> bool {
        self.declaring_type == other.declaring_type && self.name == other.name
    }

    fn stack_inputs(&self) -> u16 {
        self.params + u16::from(self.has_this)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCode {
    Nop,
    LoadLocal,
    StoreLocal,
    LoadArg,
    LoadInt,
    LoadString,
    LoadIndirectRef,
    Dup,
    Pop,
    Call,
    CallVirtual,
    NewObject,
    Branch,
    BranchTrue,
    BranchFalse,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Local(u16),
    Arg(u16),
    Int(i64),
    Str(String),
    Method(MethodRef),
    Target(Label),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u16,
    pub pushes: u16,
}

impl StackEffect {
    const fn new(pops: u16, pushes: u16) -> Self {
        Self { pops, pushes }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    pub opcode: OpCode,
    #[serde(default)]
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self {
            label: None,
            opcode,
            operand,
        }
    }

    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    pub fn load_local(slot: u16) -> Self {
        Self::new(OpCode::LoadLocal, Operand::Local(slot))
    }

    pub fn load_arg(index: u16) -> Self {
        Self::new(OpCode::LoadArg, Operand::Arg(index))
    }

    pub fn call(method: MethodRef) -> Self {
        Self::new(OpCode::Call, Operand::Method(method))
    }

    pub fn call_virtual(method: MethodRef) -> Self {
        Self::new(OpCode::CallVirtual, Operand::Method(method))
    }

    pub fn branch(opcode: OpCode, target: Label) -> Self {
        Self::new(opcode, Operand::Target(target))
    }

    pub fn labeled(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn loads_local(&self, slot: u16) -> bool {
        self.opcode == OpCode::LoadLocal && self.operand == Operand::Local(slot)
    }

    pub fn calls(&self, method: &MethodRef) -> bool {
        matches!(self.opcode, OpCode::Call | OpCode::CallVirtual)
            && matches!(&self.operand, Operand::Method(called) if called.same_method(method))
    }

    /// `None` when the effect depends on context this model does not carry
    /// (`Return`) or the operand does not fit the opcode.
    pub fn stack_effect(&self) -> Option<StackEffect> {
        let effect = match (self.opcode, &self.operand) {
            (OpCode::Nop, _) | (OpCode::Branch, Operand::Target(_)) => StackEffect::new(0, 0),
            (OpCode::LoadLocal, Operand::Local(_))
            | (OpCode::LoadArg, Operand::Arg(_))
            | (OpCode::LoadInt, Operand::Int(_))
            | (OpCode::LoadString, Operand::Str(_)) => StackEffect::new(0, 1),
            (OpCode::StoreLocal, Operand::Local(_)) | (OpCode::Pop, _) => StackEffect::new(1, 0),
            (OpCode::BranchTrue | OpCode::BranchFalse, Operand::Target(_)) => {
                StackEffect::new(1, 0)
            }
            (OpCode::LoadIndirectRef, _) => StackEffect::new(1, 1),
            (OpCode::Dup, _) => StackEffect::new(1, 2),
            (OpCode::Call | OpCode::CallVirtual, Operand::Method(method)) => {
                StackEffect::new(method.stack_inputs(), u16::from(method.returns_value))
            }
            (OpCode::NewObject, Operand::Method(ctor)) => StackEffect::new(ctor.params, 1),
            _ => return None,
        };
        Some(effect)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(Label(label)) = self.label {
            write!(f, "L{label}: ")?;
        }
        write!(f, "{:?}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Local(slot) => write!(f, " loc.{slot}"),
            Operand::Arg(index) => write!(f, " arg.{index}"),
            Operand::Int(value) => write!(f, " {value}"),
            Operand::Str(value) => write!(f, " {value:?}"),
            Operand::Method(method) => write!(f, " {method}"),
            Operand::Target(Label(target)) => write!(f, " L{target}"),
        }
    }
}
