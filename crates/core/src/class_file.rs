//! The mutable class model.

use crate::access::AccessFlags;
use crate::constant_pool::ConstantPool;
use crate::descriptor::MethodDescriptor;
use crate::frames::Frame;
use crate::hierarchy::TypeHierarchy;
use crate::instruction::{Insn, Label};
use crate::opcode;
use crate::{decoder, encoder};
use grafter_utils::errors::{AdapterError, ClassFormatError, WriteError};

/// An attribute the model keeps as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub data: Vec<u8>,
}

/// One exception table entry. `catch_type == None` catches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: Option<String>,
}

/// A LocalVariableTable entry, or a LocalVariableTypeTable entry when
/// `generic` is set (then `desc` holds the signature).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name: String,
    pub desc: String,
    pub index: u16,
    pub generic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: Vec<Insn>,
    pub handlers: Vec<Handler>,
    pub locals: Vec<LocalVariable>,
    /// Parsed stack map frames. `None` means the body was edited and the
    /// encoder must recompute frames and maxima.
    pub frames: Option<Vec<(Label, Frame)>>,
    /// Frames the body had before its last edit, consulted when merges
    /// lose precision during recomputation.
    pub(crate) hints: Vec<(Label, Frame)>,
    pub(crate) next_label: u32,
}

impl Default for Code {
    fn default() -> Self {
        Self::new()
    }
}

impl Code {
    /// An empty body whose derived metadata will be computed on encode.
    pub const fn new() -> Self {
        Self {
            max_stack: 0,
            max_locals: 0,
            insns: Vec::new(),
            handlers: Vec::new(),
            locals: Vec::new(),
            frames: None,
            hints: Vec::new(),
            next_label: 0,
        }
    }

    pub fn with_insns(insns: Vec<Insn>) -> Self {
        let next_label = insns
            .iter()
            .filter_map(|i| match i {
                Insn::Label(l) => Some(l.0 + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Self {
            insns,
            next_label,
            ..Self::new()
        }
    }

    /// Allocates a label that is not bound anywhere yet.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn real_insns(&self) -> impl Iterator<Item = &Insn> {
        self.insns.iter().filter(|i| i.is_real())
    }

    /// Marks derived metadata stale. Current frames are kept as hints.
    pub fn invalidate(&mut self) {
        if let Some(frames) = self.frames.take() {
            if !frames.is_empty() {
                self.hints = frames;
            }
        }
    }

    /// Inserts `insns` ahead of the first instruction.
    pub fn prepend(&mut self, insns: Vec<Insn>) {
        self.insns.splice(0..0, insns);
        self.invalidate();
    }

    /// Inserts the sequence produced by `splice` in front of every return
    /// instruction and returns how many sites were patched. The closure
    /// receives the opcode of the return it precedes.
    pub fn insert_before_returns(&mut self, mut splice: impl FnMut(u8) -> Vec<Insn>) -> usize {
        let mut out = Vec::with_capacity(self.insns.len());
        let mut sites = 0;
        for insn in std::mem::take(&mut self.insns) {
            if let Insn::Simple(op) = insn {
                if opcode::is_return(op) {
                    out.extend(splice(op));
                    sites += 1;
                }
            }
            out.push(insn);
        }
        self.insns = out;
        if sites > 0 {
            self.invalidate();
        }
        sites
    }

    /// True if any instruction calls `owner.name desc`.
    pub fn contains_call(&self, owner: &str, name: &str, desc: &str) -> bool {
        self.insns.iter().any(|i| i.calls(owner, name, desc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn new(access: AccessFlags, name: &str, desc: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            desc: desc.to_string(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
    pub code: Option<Code>,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn new(access: AccessFlags, name: &str, desc: &str, code: Option<Code>) -> Self {
        Self {
            access,
            name: name.to_string(),
            desc: desc.to_string(),
            code,
            attributes: Vec::new(),
        }
    }

    pub const fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    pub const fn is_abstract(&self) -> bool {
        self.access.contains(AccessFlags::ABSTRACT)
    }

    pub fn descriptor(&self) -> Result<MethodDescriptor, ClassFormatError> {
        MethodDescriptor::parse(&self.desc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// An empty public class targeting Java 8.
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        Self {
            minor_version: 0,
            major_version: 52,
            pool: ConstantPool::new(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        decoder::parse_class(bytes)
    }

    /// Serializes the class, recomputing frames and maxima of every edited
    /// method against `hierarchy`.
    pub fn to_bytes(&self, hierarchy: &dyn TypeHierarchy) -> Result<Vec<u8>, WriteError> {
        encoder::write_class(self, hierarchy)
    }

    pub const fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str, desc: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    pub fn method_mut(&mut self, name: &str, desc: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Method> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Appends an interface. Returns false if it was already implemented.
    pub fn add_interface(&mut self, name: &str) -> bool {
        if self.interfaces.iter().any(|i| i == name) {
            return false;
        }
        self.interfaces.push(name.to_string());
        true
    }

    /// Appends a field. Returns false if an identical field exists and fails
    /// if the name is taken with another descriptor.
    pub fn add_field(&mut self, field: Field) -> Result<bool, AdapterError> {
        if let Some(existing) = self.field(&field.name) {
            if existing.desc == field.desc {
                return Ok(false);
            }
            return Err(AdapterError::FieldConflict {
                owner: self.name.clone(),
                name: field.name,
                existing: existing.desc.clone(),
                expected: field.desc,
            });
        }
        self.fields.push(field);
        Ok(true)
    }

    /// Appends a method. Returns false if one with the same name and
    /// descriptor exists.
    pub fn add_method(&mut self, method: Method) -> bool {
        if self.method(&method.name, &method.desc).is_some() {
            return false;
        }
        self.methods.push(method);
        true
    }

    /// Swaps the body of an existing method. Returns false when the new body
    /// has the same instructions as the current one.
    pub fn replace_method_body(
        &mut self,
        name: &str,
        desc: &str,
        code: Code,
    ) -> Result<bool, AdapterError> {
        let owner = self.name.clone();
        let method = self
            .method_mut(name, desc)
            .ok_or_else(|| AdapterError::MissingMethod {
                owner,
                name: name.to_string(),
                desc: desc.to_string(),
            })?;
        if method.code.as_ref().is_some_and(|c| c.insns == code.insns) {
            return Ok(false);
        }
        method.access.remove(AccessFlags::ABSTRACT | AccessFlags::NATIVE);
        method.code = Some(code);
        Ok(true)
    }
}
