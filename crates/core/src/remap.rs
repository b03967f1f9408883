//! Rewrites class and member references inside method bodies.
//!
//! Used when a body moves from one class to another and when a whole class
//! swaps one supertype for another.

use crate::class_file::{Code, Handler, LocalVariable, Method};
use crate::frames::{Frame, VerificationType};
use crate::instruction::{Bootstrap, Handle, Insn, Label, LdcValue};
use std::collections::HashMap;

/// A rewritten field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, Default)]
pub struct Remapper {
    classes: HashMap<String, String>,
    fields: HashMap<(String, String), FieldTarget>,
    methods: HashMap<(String, String, String), (String, String)>,
    method_owners: HashMap<(String, String), String>,
}

impl Remapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renames every reference to class `from`.
    pub fn map_class(&mut self, from: &str, to: &str) -> &mut Self {
        if from != to {
            self.classes.insert(from.to_string(), to.to_string());
        }
        self
    }

    /// Redirects accesses of `owner.name` to another field.
    pub fn map_field(&mut self, owner: &str, name: &str, target: FieldTarget) -> &mut Self {
        self.fields
            .insert((owner.to_string(), name.to_string()), target);
        self
    }

    /// Redirects calls of exactly `owner.name desc` to `to_owner.to_name`.
    pub fn map_method(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        to_owner: &str,
        to_name: &str,
    ) -> &mut Self {
        self.methods.insert(
            (owner.to_string(), name.to_string(), desc.to_string()),
            (to_owner.to_string(), to_name.to_string()),
        );
        self
    }

    /// Redirects calls of `owner.name` (any descriptor) to `to_owner`.
    pub fn map_method_owner(&mut self, owner: &str, name: &str, to_owner: &str) -> &mut Self {
        self.method_owners
            .insert((owner.to_string(), name.to_string()), to_owner.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
            && self.fields.is_empty()
            && self.methods.is_empty()
            && self.method_owners.is_empty()
    }

    /// Maps an internal name or an array descriptor.
    pub fn class(&self, name: &str) -> String {
        if name.starts_with('[') {
            return self.desc(name);
        }
        self.classes
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Maps every class named in a field or method descriptor.
    pub fn desc(&self, desc: &str) -> String {
        let mut out = String::with_capacity(desc.len());
        let mut rest = desc;
        while let Some(start) = rest.find('L') {
            out.push_str(&rest[..=start]);
            let tail = &rest[start + 1..];
            match tail.find(';') {
                Some(end) => {
                    out.push_str(&self.class(&tail[..end]));
                    out.push(';');
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn vtype(&self, vtype: &VerificationType) -> VerificationType {
        match vtype {
            VerificationType::Object(name) => VerificationType::Object(self.class(name)),
            other => other.clone(),
        }
    }

    fn frames(&self, frames: &[(Label, Frame)]) -> Vec<(Label, Frame)> {
        frames
            .iter()
            .map(|(label, frame)| {
                (
                    *label,
                    Frame {
                        locals: frame.locals.iter().map(|v| self.vtype(v)).collect(),
                        stack: frame.stack.iter().map(|v| self.vtype(v)).collect(),
                    },
                )
            })
            .collect()
    }

    /// Owner and name a call of `owner.name desc` is redirected to.
    fn method_target(&self, owner: &str, name: &str, desc: &str) -> (String, String) {
        let key = (owner.to_string(), name.to_string(), desc.to_string());
        if let Some(target) = self.methods.get(&key) {
            return target.clone();
        }
        let owner = self
            .method_owners
            .get(&(key.0, key.1))
            .cloned()
            .unwrap_or_else(|| self.class(owner));
        (owner, name.to_string())
    }

    fn handle(&self, handle: &Handle) -> Handle {
        if handle.is_field() {
            let key = (handle.owner.clone(), handle.name.clone());
            if let Some(target) = self.fields.get(&key) {
                return Handle::new(
                    handle.kind,
                    &target.owner,
                    &target.name,
                    &target.desc,
                    handle.interface,
                );
            }
            return Handle::new(
                handle.kind,
                &self.class(&handle.owner),
                &handle.name,
                &self.desc(&handle.desc),
                handle.interface,
            );
        }
        let (owner, name) = self.method_target(&handle.owner, &handle.name, &handle.desc);
        Handle::new(
            handle.kind,
            &owner,
            &name,
            &self.desc(&handle.desc),
            handle.interface,
        )
    }

    fn bootstrap(&self, bootstrap: &Bootstrap) -> Bootstrap {
        Bootstrap::new(
            self.handle(&bootstrap.handle),
            bootstrap.args.iter().map(|arg| self.ldc(arg)).collect(),
        )
    }

    fn ldc(&self, value: &LdcValue) -> LdcValue {
        match value {
            LdcValue::Class(class) => LdcValue::Class(self.class(class)),
            LdcValue::MethodType(desc) => LdcValue::MethodType(self.desc(desc)),
            LdcValue::Handle(handle) => LdcValue::Handle(self.handle(handle)),
            LdcValue::Dynamic {
                name,
                desc,
                bootstrap,
            } => LdcValue::Dynamic {
                name: name.clone(),
                desc: self.desc(desc),
                bootstrap: Box::new(self.bootstrap(bootstrap)),
            },
            other => other.clone(),
        }
    }

    /// Rewrites one instruction.
    pub fn insn(&self, insn: &Insn) -> Insn {
        match insn {
            Insn::Type { opcode, class } => Insn::type_insn(*opcode, self.class(class)),
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => match self.fields.get(&(owner.clone(), name.clone())) {
                Some(target) => Insn::field(*opcode, &target.owner, &target.name, &target.desc),
                None => Insn::field(*opcode, &self.class(owner), name, &self.desc(desc)),
            },
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                interface,
            } => {
                let (owner, name) = self.method_target(owner, name, desc);
                Insn::method(*opcode, &owner, &name, &self.desc(desc), *interface)
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bootstrap,
            } => Insn::InvokeDynamic {
                name: name.clone(),
                desc: self.desc(desc),
                bootstrap: Box::new(self.bootstrap(bootstrap)),
            },
            Insn::MultiANewArray { class, dims } => Insn::MultiANewArray {
                class: self.class(class),
                dims: *dims,
            },
            Insn::Ldc(value) => Insn::Ldc(self.ldc(value)),
            other => other.clone(),
        }
    }

    /// Rewrites a method body, including the types recorded in its frames.
    pub fn code(&self, code: &Code) -> Code {
        let handlers = code
            .handlers
            .iter()
            .map(|h| Handler {
                catch_type: h.catch_type.as_deref().map(|c| self.class(c)),
                ..h.clone()
            })
            .collect();
        let locals = code
            .locals
            .iter()
            .filter(|v| !v.generic)
            .map(|v| LocalVariable {
                desc: self.desc(&v.desc),
                ..v.clone()
            })
            .collect();
        Code {
            insns: code.insns.iter().map(|insn| self.insn(insn)).collect(),
            handlers,
            locals,
            frames: code.frames.as_deref().map(|frames| self.frames(frames)),
            hints: self.frames(&code.hints),
            ..code.clone()
        }
    }

    /// Copies a method for insertion into another class. Raw attributes are
    /// dropped because they index the source constant pool.
    pub fn transplant(&self, method: &Method) -> Method {
        let code = method.code.as_ref().map(|code| {
            let mut code = self.code(code);
            code.invalidate();
            code
        });
        Method {
            access: method.access,
            name: method.name.clone(),
            desc: self.desc(&method.desc),
            code,
            attributes: Vec::new(),
        }
    }
}
