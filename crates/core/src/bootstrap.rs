//! The `BootstrapMethods` attribute.
//!
//! `invokedynamic` and dynamic constants name their bootstrap method by index
//! into a per-class table. The decoder resolves those indices into
//! [`Bootstrap`] values carried by the instruction itself; the encoder interns
//! them back. Entries a class already had keep their positions, so pool
//! entries that are never decoded stay valid.

use crate::class_file::Attribute;
use crate::constant_pool::{Constant, ConstantPool, RefKind};
use crate::instruction::{Bootstrap, Handle, Insn, LdcValue};
use crate::io::{ByteReader, ByteSink};
use grafter_utils::errors::{ClassFormatError, WriteError};
use std::collections::HashMap;

pub const ATTRIBUTE: &str = "BootstrapMethods";

/// Dynamic constants may use other dynamic constants as static arguments.
const MAX_NESTING: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Entry {
    handle: u16,
    args: Vec<u16>,
}

/// A class's bootstrap method table in pool-index form.
#[derive(Debug, Clone, Default)]
pub struct BootstrapTable {
    entries: Vec<Entry>,
    lookup: HashMap<Entry, u16>,
}

fn bad(msg: String) -> ClassFormatError {
    ClassFormatError::BadAttribute {
        attribute: ATTRIBUTE,
        msg,
    }
}

fn handle(pool: &ConstantPool, index: u16) -> Result<Handle, ClassFormatError> {
    let Constant::MethodHandle { kind, reference } = pool.get(index)? else {
        return Err(ClassFormatError::WrongConstant {
            index,
            expected: "MethodHandle",
        });
    };
    let member = pool.member_ref(*reference)?;
    Ok(Handle::new(
        *kind,
        member.owner,
        member.name,
        member.desc,
        member.kind == RefKind::InterfaceMethod,
    ))
}

fn intern_handle(pool: &mut ConstantPool, handle: &Handle) -> Result<u16, WriteError> {
    let reference = if handle.is_field() {
        pool.field_ref(&handle.owner, &handle.name, &handle.desc)?
    } else {
        pool.method_ref(&handle.owner, &handle.name, &handle.desc, handle.interface)?
    };
    pool.intern(Constant::MethodHandle {
        kind: handle.kind,
        reference,
    })
}

impl BootstrapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the body of a `BootstrapMethods` attribute.
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(data);
        let mut table = Self::new();
        for _ in 0..reader.u16()? {
            let handle = reader.u16()?;
            let count = reader.u16()?;
            let args = (0..count)
                .map(|_| reader.u16())
                .collect::<Result<_, _>>()?;
            table.push(Entry { handle, args });
        }
        if reader.remaining() != 0 {
            return Err(bad(format!("{} trailing bytes", reader.remaining())));
        }
        Ok(table)
    }

    /// The table stored among `attributes`, or an empty one.
    pub fn from_attributes(attributes: &[Attribute]) -> Result<Self, ClassFormatError> {
        attributes
            .iter()
            .find(|a| a.name == ATTRIBUTE)
            .map_or_else(|| Ok(Self::new()), |a| Self::parse(&a.data))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: Entry) -> u16 {
        let index = self.entries.len() as u16;
        self.lookup.entry(entry.clone()).or_insert(index);
        self.entries.push(entry);
        index
    }

    /// Serializes the attribute body.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            out.put_u16(entry.handle);
            out.put_u16(entry.args.len() as u16);
            for arg in &entry.args {
                out.put_u16(*arg);
            }
        }
        out
    }

    fn bootstrap(
        &self,
        pool: &ConstantPool,
        index: u16,
        depth: usize,
    ) -> Result<Bootstrap, ClassFormatError> {
        if depth > MAX_NESTING {
            return Err(bad(format!("dynamic constants nest deeper than {MAX_NESTING}")));
        }
        let entry = self
            .entries
            .get(usize::from(index))
            .ok_or_else(|| bad(format!("no bootstrap method {index}")))?;
        let args = entry
            .args
            .iter()
            .map(|arg| self.constant(pool, *arg, depth + 1))
            .collect::<Result<_, _>>()?;
        Ok(Bootstrap::new(handle(pool, entry.handle)?, args))
    }

    fn constant(
        &self,
        pool: &ConstantPool,
        index: u16,
        depth: usize,
    ) -> Result<LdcValue, ClassFormatError> {
        Ok(match pool.get(index)? {
            Constant::Integer(v) => LdcValue::Int(*v),
            Constant::Float(bits) => LdcValue::Float(*bits),
            Constant::Long(v) => LdcValue::Long(*v),
            Constant::Double(bits) => LdcValue::Double(*bits),
            Constant::String(s) => LdcValue::String(pool.utf8(*s)?.to_string()),
            Constant::Class(name) => LdcValue::Class(pool.utf8(*name)?.to_string()),
            Constant::MethodType(desc) => LdcValue::MethodType(pool.utf8(*desc)?.to_string()),
            Constant::MethodHandle { .. } => LdcValue::Handle(handle(pool, index)?),
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, desc) = pool.name_and_type(*name_and_type)?;
                LdcValue::Dynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bootstrap: Box::new(self.bootstrap(pool, *bootstrap, depth)?),
                }
            }
            _ => {
                return Err(ClassFormatError::WrongConstant {
                    index,
                    expected: "loadable constant",
                })
            }
        })
    }

    /// Resolves an `ldc` operand or a bootstrap argument.
    pub fn loadable(&self, pool: &ConstantPool, index: u16) -> Result<LdcValue, ClassFormatError> {
        self.constant(pool, index, 0)
    }

    /// Resolves the operand of an `invokedynamic`.
    pub fn invoke_dynamic(&self, pool: &ConstantPool, index: u16) -> Result<Insn, ClassFormatError> {
        let Constant::InvokeDynamic {
            bootstrap,
            name_and_type,
        } = pool.get(index)?
        else {
            return Err(ClassFormatError::WrongConstant {
                index,
                expected: "InvokeDynamic",
            });
        };
        let (name, desc) = pool.name_and_type(*name_and_type)?;
        Ok(Insn::InvokeDynamic {
            name: name.to_string(),
            desc: desc.to_string(),
            bootstrap: Box::new(self.bootstrap(pool, *bootstrap, 0)?),
        })
    }

    /// Returns the table index of `bootstrap`, appending it if absent.
    pub fn intern(
        &mut self,
        pool: &mut ConstantPool,
        bootstrap: &Bootstrap,
    ) -> Result<u16, WriteError> {
        let handle = intern_handle(pool, &bootstrap.handle)?;
        let args = bootstrap
            .args
            .iter()
            .map(|arg| self.intern_loadable(pool, arg))
            .collect::<Result<_, _>>()?;
        let entry = Entry { handle, args };
        if let Some(index) = self.lookup.get(&entry) {
            return Ok(*index);
        }
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(WriteError::PoolOverflow);
        }
        Ok(self.push(entry))
    }

    /// Pool index of a loadable constant, interning every part of it.
    pub fn intern_loadable(
        &mut self,
        pool: &mut ConstantPool,
        value: &LdcValue,
    ) -> Result<u16, WriteError> {
        match value {
            LdcValue::Int(v) => pool.intern(Constant::Integer(*v)),
            LdcValue::Float(bits) => pool.intern(Constant::Float(*bits)),
            LdcValue::Long(v) => pool.intern(Constant::Long(*v)),
            LdcValue::Double(bits) => pool.intern(Constant::Double(*bits)),
            LdcValue::String(s) => pool.string_index(s),
            LdcValue::Class(name) => pool.class_index(name),
            LdcValue::MethodType(desc) => {
                let desc = pool.utf8_index(desc)?;
                pool.intern(Constant::MethodType(desc))
            }
            LdcValue::Handle(handle) => intern_handle(pool, handle),
            LdcValue::Dynamic {
                name,
                desc,
                bootstrap,
            } => {
                let bootstrap = self.intern(pool, bootstrap)?;
                let name_and_type = pool.name_and_type_index(name, desc)?;
                pool.intern(Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                })
            }
        }
    }

    /// Pool index of the `InvokeDynamic` constant for a call site.
    pub fn intern_invoke_dynamic(
        &mut self,
        pool: &mut ConstantPool,
        name: &str,
        desc: &str,
        bootstrap: &Bootstrap,
    ) -> Result<u16, WriteError> {
        let bootstrap = self.intern(pool, bootstrap)?;
        let name_and_type = pool.name_and_type_index(name, desc)?;
        pool.intern(Constant::InvokeDynamic {
            bootstrap,
            name_and_type,
        })
    }
}
