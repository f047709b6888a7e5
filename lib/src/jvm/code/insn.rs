use crate::jvm::code::opcode::*;
use crate::jvm::code::SynLabel;
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName};

/// Loadable constant (operand of `ldc` and of bootstrap method arguments)
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle(Handle),
}

impl Constant {
    /// Does the constant occupy two stack slots?
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Kind of a method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl HandleKind {
    pub fn from_u8(kind: u8) -> Option<HandleKind> {
        Some(match kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Does the handle refer to a field (as opposed to a method)?
    pub fn is_field(&self) -> bool {
        (*self as u8) <= 4
    }
}

/// Descriptor of whatever member a handle points at
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberDescriptor {
    Field(FieldType<BinaryName>),
    Method(MethodDescriptor<BinaryName>),
}

impl RenderDescriptor for MemberDescriptor {
    fn render_to(&self, write_to: &mut String) {
        match self {
            MemberDescriptor::Field(field) => field.render_to(write_to),
            MemberDescriptor::Method(method) => method.render_to(write_to),
        }
    }
}

/// Method handle constant
#[derive(Clone, Debug, PartialEq)]
pub struct Handle {
    pub kind: HandleKind,
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MemberDescriptor,
    pub is_interface: bool,
}

/// Bootstrap method of an `invokedynamic` call site
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapMethod {
    pub handle: Handle,
    pub arguments: Vec<Constant>,
}

/// One entry of a method's instruction stream
///
/// Instructions are grouped by operand shape rather than by opcode, so one variant covers many
/// opcodes. The pseudo-instructions [`Insn::Label`] and [`Insn::LineNumber`] occupy no bytes in
/// the encoded method; they mark positions that other instructions, exception ranges, and debug
/// tables refer to.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    /// Instruction without operands (arithmetic, array access, returns, `athrow`, ...)
    Simple(u8),

    /// `bipush`, `sipush`, and `newarray` (whose operand is the array type code)
    Int { opcode: u8, operand: i32 },

    /// Local variable loads and stores, and `ret`
    Var { opcode: u8, index: u16 },

    /// `new`, `anewarray`, `checkcast`, and `instanceof`
    Type { opcode: u8, class: RefType<BinaryName> },

    /// Field access
    Field {
        opcode: u8,
        owner: BinaryName,
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    },

    /// Method invocation other than `invokedynamic`
    ///
    /// The owner can be an array type (eg. calling `clone` on `int[]`).
    Method {
        opcode: u8,
        owner: RefType<BinaryName>,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        is_interface: bool,
    },

    InvokeDynamic {
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        bootstrap: BootstrapMethod,
    },

    /// Conditional and unconditional jumps, and `jsr`
    Jump { opcode: u8, target: SynLabel },

    Ldc(Constant),

    Iinc { index: u16, increment: i16 },

    TableSwitch {
        low: i32,
        high: i32,
        default: SynLabel,
        targets: Vec<SynLabel>,
    },

    LookupSwitch {
        default: SynLabel,
        pairs: Vec<(i32, SynLabel)>,
    },

    MultiANewArray {
        class: RefType<BinaryName>,
        dimensions: u8,
    },

    /// Position marker
    Label(SynLabel),

    /// Source line that starts at the given label
    LineNumber { line: u16, start: SynLabel },
}

impl Insn {
    /// Opcode of the instruction, or `None` for pseudo-instructions
    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Insn::Simple(opcode)
            | Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Jump { opcode, .. } => *opcode,
            Insn::InvokeDynamic { .. } => INVOKEDYNAMIC,
            Insn::Ldc(_) => LDC,
            Insn::Iinc { .. } => IINC,
            Insn::TableSwitch { .. } => TABLESWITCH,
            Insn::LookupSwitch { .. } => LOOKUPSWITCH,
            Insn::MultiANewArray { .. } => MULTIANEWARRAY,
            Insn::Label(_) | Insn::LineNumber { .. } => return None,
        })
    }

    /// Is this a label or line number marker?
    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    /// Labels this instruction may transfer control to
    pub fn jump_targets(&self) -> Vec<SynLabel> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            Insn::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, label)| *label));
                all
            }
            _ => vec![],
        }
    }

    /// Is this a `tableswitch` whose targets do not match its `low..=high` range?
    pub fn is_malformed_switch(&self) -> bool {
        match self {
            Insn::TableSwitch {
                low, high, targets, ..
            } => high < low || targets.len() as i64 != *high as i64 - *low as i64 + 1,
            _ => false,
        }
    }

    /// Does control never fall through to the next instruction?
    pub fn ends_block(&self) -> bool {
        match self {
            Insn::Simple(opcode) => matches!(
                *opcode,
                IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | RETURN | ATHROW
            ),
            Insn::Jump { opcode, .. } => *opcode == GOTO,
            Insn::Var { opcode, .. } => *opcode == RET,
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => true,
            _ => false,
        }
    }
}

/// Exception handler covering `[start, end)`
#[derive(Clone, Debug, PartialEq)]
pub struct TryCatchBlock {
    pub start: SynLabel,
    pub end: SynLabel,
    pub handler: SynLabel,

    /// `None` catches everything (used for `finally`)
    pub catch_type: Option<BinaryName>,
}

/// Entry of the `LocalVariableTable`
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: FieldType<BinaryName>,
    pub start: SynLabel,
    pub end: SynLabel,
    pub index: u16,
}
