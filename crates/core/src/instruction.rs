//! Symbolic instructions.
//!
//! Operands carry names and descriptors instead of pool indices and branch
//! targets are [`Label`]s, so bodies can be edited and moved between classes
//! without offset fix-ups. Short encodings (`iload_0`, `ldc_w`, `goto_w`, ...)
//! are normalized away on decode and chosen again on encode.

use crate::opcode::{self, *};
use std::fmt;

/// A position marker inside a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A `CONSTANT_MethodHandle`: reference kind plus the member it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub desc: String,
    pub interface: bool,
}

impl Handle {
    pub fn new(kind: u8, owner: &str, name: &str, desc: &str, interface: bool) -> Self {
        Self {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            interface,
        }
    }

    /// True for the kinds that reference a field rather than a method.
    pub const fn is_field(&self) -> bool {
        self.kind <= 4
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{} (kind {})", self.owner, self.name, self.desc, self.kind)
    }
}

/// A bootstrap method with its static arguments. Entries of the
/// `BootstrapMethods` attribute are carried inline so a body can move to a
/// class with a different table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bootstrap {
    pub handle: Handle,
    pub args: Vec<LdcValue>,
}

impl Bootstrap {
    pub const fn new(handle: Handle, args: Vec<LdcValue>) -> Self {
        Self { handle, args }
    }

    fn collect_handles<'a>(&'a self, out: &mut Vec<&'a Handle>) {
        out.push(&self.handle);
        for arg in &self.args {
            arg.collect_handles(out);
        }
    }
}

/// Operand of `ldc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LdcValue {
    Int(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String(String),
    /// Internal name or array descriptor.
    Class(String),
    /// Method descriptor.
    MethodType(String),
    Handle(Handle),
    Dynamic {
        name: String,
        desc: String,
        bootstrap: Box<Bootstrap>,
    },
}

impl LdcValue {
    fn collect_handles<'a>(&'a self, out: &mut Vec<&'a Handle>) {
        match self {
            Self::Handle(handle) => out.push(handle),
            Self::Dynamic { bootstrap, .. } => bootstrap.collect_handles(out),
            _ => {}
        }
    }

    /// True for the two-slot constants loaded with `ldc2_w`.
    pub fn is_wide(&self) -> bool {
        match self {
            Self::Long(_) | Self::Double(_) => true,
            Self::Dynamic { desc, .. } => desc == "J" || desc == "D",
            _ => false,
        }
    }
}

impl fmt::Display for LdcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Class(c) => write!(f, "{c}.class"),
            Self::MethodType(desc) => write!(f, "type {desc}"),
            Self::Handle(handle) => write!(f, "handle {handle}"),
            Self::Dynamic {
                name,
                desc,
                bootstrap,
            } => write!(f, "dynamic {name} {desc} via {}", bootstrap.handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Binds a label to the position of the next real instruction.
    Label(Label),
    /// Source line of the following instructions.
    Line(u16),
    /// Any instruction without operands.
    Simple(u8),
    /// `bipush`, `sipush` or `newarray`.
    IntOp { opcode: u8, operand: i32 },
    /// Loads, stores and `ret`, always in their indexed form.
    Var { opcode: u8, index: u16 },
    Iinc { index: u16, delta: i16 },
    /// `new`, `anewarray`, `checkcast` and `instanceof`.
    Type { opcode: u8, class: String },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
        interface: bool,
    },
    InvokeDynamic {
        name: String,
        desc: String,
        bootstrap: Box<Bootstrap>,
    },
    Ldc(LdcValue),
    Jump { opcode: u8, target: Label },
    TableSwitch {
        default: Label,
        low: i32,
        high: i32,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    MultiANewArray { class: String, dims: u8 },
}

impl Insn {
    pub const fn simple(opcode: u8) -> Self {
        Self::Simple(opcode)
    }

    pub const fn var(opcode: u8, index: u16) -> Self {
        Self::Var { opcode, index }
    }

    pub fn type_insn(opcode: u8, class: impl Into<String>) -> Self {
        Self::Type {
            opcode,
            class: class.into(),
        }
    }

    pub fn field(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Self::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }

    pub fn method(opcode: u8, owner: &str, name: &str, desc: &str, interface: bool) -> Self {
        Self::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            interface,
        }
    }

    pub const fn jump(opcode: u8, target: Label) -> Self {
        Self::Jump { opcode, target }
    }

    /// Shortest instruction pushing an `int` constant.
    pub const fn push_int(value: i32) -> Self {
        match value {
            -1..=5 => Self::Simple((ICONST_0 as i32 + value) as u8),
            -128..=127 => Self::IntOp {
                opcode: BIPUSH,
                operand: value,
            },
            -32768..=32767 => Self::IntOp {
                opcode: SIPUSH,
                operand: value,
            },
            _ => Self::Ldc(LdcValue::Int(value)),
        }
    }

    /// Shortest instruction pushing a `long` constant.
    pub const fn push_long(value: i64) -> Self {
        match value {
            0 => Self::Simple(LCONST_0),
            1 => Self::Simple(LCONST_1),
            _ => Self::Ldc(LdcValue::Long(value)),
        }
    }

    /// False for the `Label` and `Line` pseudo-instructions.
    pub const fn is_real(&self) -> bool {
        !matches!(self, Self::Label(_) | Self::Line(_))
    }

    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Self::Label(_) | Self::Line(_) => return None,
            Self::Simple(op) => *op,
            Self::IntOp { opcode, .. }
            | Self::Var { opcode, .. }
            | Self::Type { opcode, .. }
            | Self::Field { opcode, .. }
            | Self::Method { opcode, .. }
            | Self::Jump { opcode, .. } => *opcode,
            Self::Iinc { .. } => IINC,
            Self::InvokeDynamic { .. } => INVOKEDYNAMIC,
            Self::Ldc(value) if value.is_wide() => LDC2_W,
            Self::Ldc(_) => LDC,
            Self::TableSwitch { .. } => TABLESWITCH,
            Self::LookupSwitch { .. } => LOOKUPSWITCH,
            Self::MultiANewArray { .. } => MULTIANEWARRAY,
        })
    }

    /// Every method handle the instruction refers to, bootstrap methods and
    /// their arguments included.
    pub fn handles(&self) -> Vec<&Handle> {
        let mut out = Vec::new();
        match self {
            Self::InvokeDynamic { bootstrap, .. } => bootstrap.collect_handles(&mut out),
            Self::Ldc(value) => value.collect_handles(&mut out),
            _ => {}
        }
        out
    }

    /// True for a call to exactly `owner.name desc`.
    pub fn calls(&self, owner: &str, name: &str, desc: &str) -> bool {
        matches!(self, Self::Method { owner: o, name: n, desc: d, .. } if o == owner && n == name && d == desc)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |op: u8| opcode::mnemonic(op);
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::Line(line) => write!(f, "// line {line}"),
            Self::Simple(op) => f.write_str(name(*op)),
            Self::IntOp { opcode, operand } => write!(f, "{} {operand}", name(*opcode)),
            Self::Var { opcode, index } => write!(f, "{} {index}", name(*opcode)),
            Self::Iinc { index, delta } => write!(f, "iinc {index} {delta}"),
            Self::Type { opcode, class } => write!(f, "{} {class}", name(*opcode)),
            Self::Field {
                opcode,
                owner,
                name: field,
                desc,
            } => write!(f, "{} {owner}.{field} {desc}", name(*opcode)),
            Self::Method {
                opcode,
                owner,
                name: method,
                desc,
                ..
            } => write!(f, "{} {owner}.{method}{desc}", name(*opcode)),
            Self::InvokeDynamic {
                name: method,
                desc,
                bootstrap,
            } => write!(f, "invokedynamic {method}{desc} via {}", bootstrap.handle),
            Self::Ldc(value) if value.is_wide() => write!(f, "ldc2_w {value}"),
            Self::Ldc(value) => write!(f, "ldc {value}"),
            Self::Jump { opcode, target } => write!(f, "{} {target}", name(*opcode)),
            Self::TableSwitch {
                default,
                low,
                high,
                targets,
            } => {
                write!(f, "tableswitch {low}..{high} [")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "] default {default}")
            }
            Self::LookupSwitch { default, pairs } => {
                f.write_str("lookupswitch [")?;
                for (i, (key, t)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {t}")?;
                }
                write!(f, "] default {default}")
            }
            Self::MultiANewArray { class, dims } => write!(f, "multianewarray {class} {dims}"),
        }
    }
}
