//! Method bodies: instruction sequences, locals and exception handlers.
//!
//! Branch targets and exception handler boundaries are stored as instruction indices rather
//! than byte offsets. [`MethodBody::insert`] keeps them pointing at the same instructions
//! when code is injected, which is what the pipeline relies on when it appends a call in
//! front of the final `ret` of a static constructor.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::body::{Instruction, MethodBody, OpCode, Operand};
//!
//! let mut body = MethodBody::new();
//! body.push(Instruction::new(OpCode::LdcI4, Operand::Int32(1)));
//! body.push(Instruction::simple(OpCode::Ret));
//! body.insert(1, Instruction::simple(OpCode::Nop));
//! assert_eq!(body.instructions[2].opcode, OpCode::Ret);
//! ```

use bitflags::bitflags;
use strum::{Display, EnumString};

use crate::{
    metadata::{members::MemberReference, typesig::TypeSig},
    Result,
};

/// The CIL opcodes the image model represents.
///
/// Short and long branch forms are not distinguished; encoding picks the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum OpCode {
    /// No operation
    #[strum(serialize = "nop")]
    Nop,
    /// Return from method
    #[strum(serialize = "ret")]
    Ret,
    /// Pop the top of the stack
    #[strum(serialize = "pop")]
    Pop,
    /// Duplicate the top of the stack
    #[strum(serialize = "dup")]
    Dup,
    /// Load argument
    #[strum(serialize = "ldarg")]
    Ldarg,
    /// Load argument address
    #[strum(serialize = "ldarga")]
    Ldarga,
    /// Store argument
    #[strum(serialize = "starg")]
    Starg,
    /// Load local
    #[strum(serialize = "ldloc")]
    Ldloc,
    /// Load local address
    #[strum(serialize = "ldloca")]
    Ldloca,
    /// Store local
    #[strum(serialize = "stloc")]
    Stloc,
    /// Load null
    #[strum(serialize = "ldnull")]
    Ldnull,
    /// Load 32 bit constant
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Load 64 bit constant
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    /// Load 64 bit float constant
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    /// Load string literal
    #[strum(serialize = "ldstr")]
    Ldstr,
    /// Call method
    #[strum(serialize = "call")]
    Call,
    /// Call method with virtual dispatch
    #[strum(serialize = "callvirt")]
    Callvirt,
    /// Allocate object and call constructor
    #[strum(serialize = "newobj")]
    Newobj,
    /// Load instance field
    #[strum(serialize = "ldfld")]
    Ldfld,
    /// Load instance field address
    #[strum(serialize = "ldflda")]
    Ldflda,
    /// Store instance field
    #[strum(serialize = "stfld")]
    Stfld,
    /// Load static field
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    /// Load static field address
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    /// Store static field
    #[strum(serialize = "stsfld")]
    Stsfld,
    /// Load method pointer
    #[strum(serialize = "ldftn")]
    Ldftn,
    /// Load virtual method pointer
    #[strum(serialize = "ldvirtftn")]
    Ldvirtftn,
    /// Load metadata token
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    /// Box a value type
    #[strum(serialize = "box")]
    Box,
    /// Unbox to a value
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    /// Cast with check
    #[strum(serialize = "castclass")]
    Castclass,
    /// Type test
    #[strum(serialize = "isinst")]
    Isinst,
    /// Initialize value type
    #[strum(serialize = "initobj")]
    Initobj,
    /// Create array
    #[strum(serialize = "newarr")]
    Newarr,
    /// Load object through address
    #[strum(serialize = "ldobj")]
    Ldobj,
    /// Store object through address
    #[strum(serialize = "stobj")]
    Stobj,
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br,
    /// Branch if true
    #[strum(serialize = "brtrue")]
    Brtrue,
    /// Branch if false
    #[strum(serialize = "brfalse")]
    Brfalse,
    /// Branch if equal
    #[strum(serialize = "beq")]
    Beq,
    /// Branch if not equal
    #[strum(serialize = "bne.un")]
    BneUn,
    /// Branch if less than
    #[strum(serialize = "blt")]
    Blt,
    /// Branch if greater than
    #[strum(serialize = "bgt")]
    Bgt,
    /// Multi-way branch
    #[strum(serialize = "switch")]
    Switch,
    /// Leave a protected region
    #[strum(serialize = "leave")]
    Leave,
    /// End of a finally or fault handler
    #[strum(serialize = "endfinally")]
    Endfinally,
    /// Throw exception
    #[strum(serialize = "throw")]
    Throw,
    /// Rethrow current exception
    #[strum(serialize = "rethrow")]
    Rethrow,
    /// Add
    #[strum(serialize = "add")]
    Add,
    /// Subtract
    #[strum(serialize = "sub")]
    Sub,
    /// Multiply
    #[strum(serialize = "mul")]
    Mul,
    /// Compare equal
    #[strum(serialize = "ceq")]
    Ceq,
}

impl OpCode {
    /// Returns true for `call` and `callvirt`
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, OpCode::Call | OpCode::Callvirt)
    }

    /// Returns true for the six field access opcodes
    #[must_use]
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            OpCode::Ldfld
                | OpCode::Ldflda
                | OpCode::Stfld
                | OpCode::Ldsfld
                | OpCode::Ldsflda
                | OpCode::Stsfld
        )
    }

    /// Returns true for the address-taking field loads
    #[must_use]
    pub fn is_field_address(self) -> bool {
        matches!(self, OpCode::Ldflda | OpCode::Ldsflda)
    }

    /// Returns true for the field stores
    #[must_use]
    pub fn is_field_store(self) -> bool {
        matches!(self, OpCode::Stfld | OpCode::Stsfld)
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// 32 bit immediate
    Int32(i32),
    /// 64 bit immediate
    Int64(i64),
    /// 64 bit floating point immediate
    Float64(f64),
    /// String literal
    String(String),
    /// Method argument index
    Argument(u16),
    /// Local variable index
    Local(u16),
    /// Branch target as an instruction index
    Target(usize),
    /// Switch targets as instruction indices
    Switch(Vec<usize>),
    /// A type or member reference
    Reference(MemberReference),
}

impl Operand {
    /// The type or member reference held by this operand
    #[must_use]
    pub fn reference(&self) -> Option<&MemberReference> {
        match self {
            Operand::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Returns a formatted string representation of the operand.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Int32(value) => Some(value.to_string()),
            Operand::Int64(value) => Some(value.to_string()),
            Operand::Float64(value) => Some(format!("{value:?}")),
            Operand::String(value) => Some(format!("{value:?}")),
            Operand::Argument(index) => Some(format!("A_{index}")),
            Operand::Local(index) => Some(format!("V_{index}")),
            Operand::Target(index) => Some(format!("IL_{index:04}")),
            Operand::Switch(targets) => {
                let targets: Vec<String> = targets.iter().map(|t| format!("IL_{t:04}")).collect();
                Some(format!("({})", targets.join(",")))
            }
            Operand::Reference(reference) => Some(reference.to_string()),
        }
    }
}

/// A single instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Opcode
    pub opcode: OpCode,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction with an operand
    #[must_use]
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    /// Creates an instruction without an operand
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// Creates an instruction referencing a type or member
    #[must_use]
    pub fn reference(opcode: OpCode, reference: MemberReference) -> Self {
        Self::new(opcode, Operand::Reference(reference))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Exception handler kinds
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

/// Exception handler with instruction-index boundaries; ends are exclusive
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: usize,
    /// One past the last protected instruction
    pub try_end: usize,
    /// First handler instruction
    pub handler_start: usize,
    /// One past the last handler instruction
    pub handler_end: usize,
    /// First filter instruction for filter clauses
    pub filter_start: Option<usize>,
    /// Caught type for typed clauses
    pub catch_type: Option<TypeSig>,
}

/// A method body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Instructions in order
    pub instructions: Vec<Instruction>,
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Exception handlers
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
}

impl MethodBody {
    /// Creates an empty body with `init_locals` set
    #[must_use]
    pub fn new() -> Self {
        Self {
            init_locals: true,
            max_stack: 8,
            ..Self::default()
        }
    }

    /// Appends an instruction
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Inserts an instruction at `index`, shifting every branch target and handler
    /// boundary that pointed at or after `index`.
    pub fn insert(&mut self, index: usize, instruction: Instruction) {
        let index = index.min(self.instructions.len());
        let shift = |target: &mut usize| {
            if *target >= index {
                *target += 1;
            }
        };

        for existing in &mut self.instructions {
            match &mut existing.operand {
                Operand::Target(target) => shift(target),
                Operand::Switch(targets) => targets.iter_mut().for_each(shift),
                _ => {}
            }
        }

        for handler in &mut self.exception_handlers {
            shift(&mut handler.try_start);
            shift(&mut handler.try_end);
            shift(&mut handler.handler_start);
            shift(&mut handler.handler_end);
            if let Some(filter) = handler.filter_start.as_mut() {
                shift(filter);
            }
        }

        self.instructions.insert(index, instruction);
    }

    /// Adds a local of type `ty` and returns its index
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralConflict`] when the body already holds the maximum
    /// number of locals.
    pub fn add_local(&mut self, ty: TypeSig) -> Result<u16> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| structural_error!("Method body exceeds {} locals", u16::MAX))?;
        self.locals.push(ty);
        Ok(index)
    }

    /// Every type mentioned by locals and handlers
    pub fn type_sigs(&self) -> impl Iterator<Item = &TypeSig> {
        self.locals.iter().chain(
            self.exception_handlers
                .iter()
                .filter_map(|handler| handler.catch_type.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn branching_body() -> MethodBody {
        let mut body = MethodBody::new();
        body.push(Instruction::new(OpCode::Ldarg, Operand::Argument(0)));
        body.push(Instruction::new(OpCode::Brtrue, Operand::Target(3)));
        body.push(Instruction::simple(OpCode::Nop));
        body.push(Instruction::simple(OpCode::Ret));
        body.exception_handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 3,
            filter_start: None,
            catch_type: None,
        });
        body
    }

    #[test]
    fn test_insert_shifts_targets() {
        let mut body = branching_body();
        body.insert(3, Instruction::simple(OpCode::Nop));

        assert_eq!(body.instructions.len(), 5);
        assert_eq!(body.instructions[1].operand, Operand::Target(4));
        assert_eq!(body.instructions[4].opcode, OpCode::Ret);
        let handler = &body.exception_handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (0, 2));
        assert_eq!((handler.handler_start, handler.handler_end), (2, 4));
    }

    #[test]
    fn test_insert_at_start_shifts_everything() {
        let mut body = branching_body();
        body.insert(0, Instruction::simple(OpCode::Nop));
        assert_eq!(body.instructions[2].operand, Operand::Target(4));
        assert_eq!(body.exception_handlers[0].try_start, 1);
    }

    #[test]
    fn test_insert_past_end_appends() {
        let mut body = branching_body();
        body.insert(99, Instruction::simple(OpCode::Nop));
        assert_eq!(body.instructions.len(), 5);
        assert_eq!(body.instructions[1].operand, Operand::Target(3));
    }

    #[test]
    fn test_add_local() {
        let mut body = MethodBody::new();
        assert_eq!(body.add_local(TypeSig::int32()).unwrap(), 0);
        assert_eq!(body.add_local(TypeSig::string()).unwrap(), 1);
        assert_eq!(body.type_sigs().count(), 2);
    }

    #[test]
    fn test_add_local_rejects_overflow() {
        let mut body = MethodBody::new();
        body.locals = vec![TypeSig::int32(); usize::from(u16::MAX)];
        assert_eq!(body.add_local(TypeSig::int32()).unwrap(), u16::MAX);
        assert!(matches!(
            body.add_local(TypeSig::int32()),
            Err(crate::Error::StructuralConflict { .. })
        ));
        assert_eq!(body.locals.len(), usize::from(u16::MAX) + 1);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(OpCode::LdcI4.to_string(), "ldc.i4");
        assert_eq!(OpCode::from_str("callvirt").unwrap(), OpCode::Callvirt);
        assert!(OpCode::Ldsflda.is_field_address());
        assert!(OpCode::Stsfld.is_field_store());
        assert!(!OpCode::Newobj.is_call());
    }

    #[test]
    fn test_operand_strings() {
        assert_eq!(Operand::None.as_string(), None);
        assert_eq!(Operand::Target(7).as_string().unwrap(), "IL_0007");
        assert_eq!(Operand::Local(2).as_string().unwrap(), "V_2");
        assert_eq!(Operand::String("hi".into()).as_string().unwrap(), "\"hi\"");
    }
}
