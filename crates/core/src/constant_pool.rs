//! Constant pool storage with interning.
//!
//! A parsed pool is kept entry for entry and only ever grows: raw attributes
//! that the model does not decode keep pointing at valid indices after edits.

use crate::io::{ByteReader, ByteSink};
use crate::mutf8;
use grafter_utils::errors::{ClassFormatError, WriteError};
use std::collections::HashMap;

/// One constant pool entry. Indices refer to other entries of the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Slot 0 and the second slot of a long or double.
    Unusable,
    Utf8(String),
    Integer(i32),
    /// IEEE 754 bits, kept raw so NaN payloads survive.
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, desc: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    const fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    /// Short human-readable kind, used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unusable => "unusable",
            Self::Utf8(_) => "Utf8",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Class(_) => "Class",
            Self::String(_) => "String",
            Self::FieldRef { .. } => "Fieldref",
            Self::MethodRef { .. } => "Methodref",
            Self::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Self::NameAndType { .. } => "NameAndType",
            Self::MethodHandle { .. } => "MethodHandle",
            Self::MethodType(_) => "MethodType",
            Self::Dynamic { .. } => "Dynamic",
            Self::InvokeDynamic { .. } => "InvokeDynamic",
            Self::Module(_) => "Module",
            Self::Package(_) => "Package",
        }
    }
}

/// Kind of a resolved member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A field or method reference with every index resolved to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: RefKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub desc: &'a str,
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ConstantPool {}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }

    /// The `constant_pool_count` value: one more than the highest index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Iterates usable entries with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassFormatError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(ClassFormatError::InvalidIndex(index)),
            Some(constant) => Ok(constant),
        }
    }

    fn wrong(index: u16, expected: &'static str) -> ClassFormatError {
        ClassFormatError::WrongConstant { index, expected }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(Self::wrong(index, "Utf8")),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Self::wrong(index, "Class")),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index)? {
            Constant::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            _ => Err(Self::wrong(index, "NameAndType")),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFormatError> {
        let (kind, class, nat) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (RefKind::Field, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
            } => (RefKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (RefKind::InterfaceMethod, *class, *name_and_type),
            _ => return Err(Self::wrong(index, "member reference")),
        };
        let (name, desc) = self.name_and_type(nat)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            desc,
        })
    }

    /// Appends an entry as read from a class file, without deduplication.
    fn push_raw(&mut self, constant: Constant) -> u16 {
        let index = self.entries.len() as u16;
        let wide = constant.is_wide();
        self.lookup.entry(constant.clone()).or_insert(index);
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    /// Returns the index of `constant`, appending it if absent.
    pub fn intern(&mut self, constant: Constant) -> Result<u16, WriteError> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > usize::from(u16::MAX) {
            return Err(WriteError::PoolOverflow);
        }
        Ok(self.push_raw(constant))
    }

    pub fn utf8_index(&mut self, s: &str) -> Result<u16, WriteError> {
        self.intern(Constant::Utf8(s.to_string()))
    }

    pub fn class_index(&mut self, name: &str) -> Result<u16, WriteError> {
        let name = self.utf8_index(name)?;
        self.intern(Constant::Class(name))
    }

    pub fn string_index(&mut self, s: &str) -> Result<u16, WriteError> {
        let utf8 = self.utf8_index(s)?;
        self.intern(Constant::String(utf8))
    }

    pub fn name_and_type_index(&mut self, name: &str, desc: &str) -> Result<u16, WriteError> {
        let name = self.utf8_index(name)?;
        let desc = self.utf8_index(desc)?;
        self.intern(Constant::NameAndType { name, desc })
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16, WriteError> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, desc)?;
        self.intern(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<u16, WriteError> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, desc)?;
        self.intern(if interface {
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            }
        } else {
            Constant::MethodRef {
                class,
                name_and_type,
            }
        })
    }

    /// True when any Utf8 entry contains `needle`. Cheap pre-check for
    /// whole-class reference rewrites.
    pub fn mentions(&self, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|c| matches!(c, Constant::Utf8(s) if s.contains(needle)))
    }

    pub(crate) fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut pool = Self::new();
        while pool.entries.len() < usize::from(count) {
            let index = pool.entries.len() as u16;
            let tag = reader.u8()?;
            let constant = match tag {
                1 => {
                    let len = reader.u16()?;
                    let bytes = reader.bytes(usize::from(len))?;
                    Constant::Utf8(
                        mutf8::decode(bytes).ok_or(ClassFormatError::InvalidUtf8(index))?,
                    )
                }
                3 => Constant::Integer(reader.i32()?),
                4 => Constant::Float(reader.u32()?),
                5 => Constant::Long(reader.u64()? as i64),
                6 => Constant::Double(reader.u64()?),
                7 => Constant::Class(reader.u16()?),
                8 => Constant::String(reader.u16()?),
                9 => Constant::FieldRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                10 => Constant::MethodRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                12 => Constant::NameAndType {
                    name: reader.u16()?,
                    desc: reader.u16()?,
                },
                15 => Constant::MethodHandle {
                    kind: reader.u8()?,
                    reference: reader.u16()?,
                },
                16 => Constant::MethodType(reader.u16()?),
                17 => Constant::Dynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap: reader.u16()?,
                    name_and_type: reader.u16()?,
                },
                19 => Constant::Module(reader.u16()?),
                20 => Constant::Package(reader.u16()?),
                tag => return Err(ClassFormatError::UnknownTag { index, tag }),
            };
            pool.push_raw(constant);
        }
        if pool.entries.len() != usize::from(count) {
            return Err(ClassFormatError::InvalidIndex(count));
        }
        Ok(pool)
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.entries.len() as u16);
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(s) => {
                    let bytes = mutf8::encode(s);
                    out.put_u8(1);
                    out.put_u16(bytes.len() as u16);
                    out.put_bytes(&bytes);
                }
                Constant::Integer(v) => {
                    out.put_u8(3);
                    out.put_u32(*v as u32);
                }
                Constant::Float(bits) => {
                    out.put_u8(4);
                    out.put_u32(*bits);
                }
                Constant::Long(v) => {
                    out.put_u8(5);
                    out.put_bytes(&v.to_be_bytes());
                }
                Constant::Double(bits) => {
                    out.put_u8(6);
                    out.put_bytes(&bits.to_be_bytes());
                }
                Constant::Class(i) => {
                    out.put_u8(7);
                    out.put_u16(*i);
                }
                Constant::String(i) => {
                    out.put_u8(8);
                    out.put_u16(*i);
                }
                Constant::FieldRef {
                    class,
                    name_and_type,
                } => {
                    out.put_u8(9);
                    out.put_u16(*class);
                    out.put_u16(*name_and_type);
                }
                Constant::MethodRef {
                    class,
                    name_and_type,
                } => {
                    out.put_u8(10);
                    out.put_u16(*class);
                    out.put_u16(*name_and_type);
                }
                Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    out.put_u8(11);
                    out.put_u16(*class);
                    out.put_u16(*name_and_type);
                }
                Constant::NameAndType { name, desc } => {
                    out.put_u8(12);
                    out.put_u16(*name);
                    out.put_u16(*desc);
                }
                Constant::MethodHandle { kind, reference } => {
                    out.put_u8(15);
                    out.put_u8(*kind);
                    out.put_u16(*reference);
                }
                Constant::MethodType(i) => {
                    out.put_u8(16);
                    out.put_u16(*i);
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.put_u8(17);
                    out.put_u16(*bootstrap);
                    out.put_u16(*name_and_type);
                }
                Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.put_u8(18);
                    out.put_u16(*bootstrap);
                    out.put_u16(*name_and_type);
                }
                Constant::Module(i) => {
                    out.put_u8(19);
                    out.put_u16(*i);
                }
                Constant::Package(i) => {
                    out.put_u8(20);
                    out.put_u16(*i);
                }
            }
        }
    }
}
