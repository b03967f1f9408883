//! Field and method descriptors.

use crate::opcode::*;
use grafter_utils::errors::ClassFormatError;
use std::fmt;
use std::str::FromStr;

/// A parsed field descriptor such as `I`, `[J` or `Ljava/lang/String;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn parse(desc: &str) -> Result<Self, ClassFormatError> {
        let mut pos = 0;
        let ty = Self::parse_at(desc, &mut pos)?;
        if pos != desc.len() {
            return Err(ClassFormatError::BadDescriptor(desc.to_string()));
        }
        Ok(ty)
    }

    fn parse_at(desc: &str, pos: &mut usize) -> Result<Self, ClassFormatError> {
        let bad = || ClassFormatError::BadDescriptor(desc.to_string());
        let c = *desc.as_bytes().get(*pos).ok_or_else(bad)?;
        *pos += 1;
        Ok(match c {
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'D' => Self::Double,
            b'F' => Self::Float,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'S' => Self::Short,
            b'Z' => Self::Boolean,
            b'L' => {
                let rest = &desc[*pos..];
                let end = rest.find(';').ok_or_else(bad)?;
                if end == 0 {
                    return Err(bad());
                }
                *pos += end + 1;
                Self::Object(rest[..end].to_string())
            }
            b'[' => Self::Array(Box::new(Self::parse_at(desc, pos)?)),
            _ => return Err(bad()),
        })
    }

    /// Number of local variable / operand stack slots.
    pub const fn size(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Types that live on the operand stack as `int`.
    pub const fn is_int_like(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Char | Self::Int | Self::Short | Self::Boolean
        )
    }

    /// Operand of `checkcast`/`anewarray`: the internal name for classes,
    /// the descriptor for arrays.
    pub fn internal_name(&self) -> String {
        match self {
            Self::Object(name) => name.clone(),
            other => other.to_string(),
        }
    }

    pub const fn load_opcode(&self) -> u8 {
        match self {
            Self::Long => LLOAD,
            Self::Float => FLOAD,
            Self::Double => DLOAD,
            Self::Object(_) | Self::Array(_) => ALOAD,
            _ => ILOAD,
        }
    }

    pub const fn store_opcode(&self) -> u8 {
        match self {
            Self::Long => LSTORE,
            Self::Float => FSTORE,
            Self::Double => DSTORE,
            Self::Object(_) | Self::Array(_) => ASTORE,
            _ => ISTORE,
        }
    }

    pub const fn return_opcode(&self) -> u8 {
        match self {
            Self::Long => LRETURN,
            Self::Float => FRETURN,
            Self::Double => DRETURN,
            Self::Object(_) | Self::Array(_) => ARETURN,
            _ => IRETURN,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => f.write_str("B"),
            Self::Char => f.write_str("C"),
            Self::Double => f.write_str("D"),
            Self::Float => f.write_str("F"),
            Self::Int => f.write_str("I"),
            Self::Long => f.write_str("J"),
            Self::Short => f.write_str("S"),
            Self::Boolean => f.write_str("Z"),
            Self::Object(name) => write!(f, "L{name};"),
            Self::Array(elem) => write!(f, "[{elem}"),
        }
    }
}

impl FromStr for FieldType {
    type Err = ClassFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A parsed method descriptor such as `(IJ)Ljava/lang/String;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(desc: &str) -> Result<Self, ClassFormatError> {
        let bad = || ClassFormatError::BadDescriptor(desc.to_string());
        if !desc.starts_with('(') {
            return Err(bad());
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match desc.as_bytes().get(pos) {
                Some(b')') => break,
                Some(_) => params.push(FieldType::parse_at(desc, &mut pos)?),
                None => return Err(bad()),
            }
        }
        pos += 1;
        let ret = if &desc[pos..] == "V" {
            None
        } else {
            Some(FieldType::parse_at(desc, &mut pos)?)
        };
        if ret.is_some() && pos != desc.len() {
            return Err(bad());
        }
        Ok(Self { params, ret })
    }

    /// Slots taken by the parameters, excluding the receiver.
    pub fn params_size(&self) -> u16 {
        self.params.iter().map(FieldType::size).sum()
    }

    pub fn return_opcode(&self) -> u8 {
        self.ret.as_ref().map_or(RETURN, FieldType::return_opcode)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{ret}"),
            None => f.write_str("V"),
        }
    }
}

impl FromStr for MethodDescriptor {
    type Err = ClassFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
