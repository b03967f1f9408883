use crate::util::{convert, multiply, return_insn, synthesize};
use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, FieldType, Insn, MethodDescriptor};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// How the hooked field is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Through `this`.
    Instance,
    /// Through the owner class.
    Static,
}

impl FieldAccess {
    pub(crate) const fn get(self) -> u8 {
        match self {
            Self::Instance => GETFIELD,
            Self::Static => GETSTATIC,
        }
    }

    pub(crate) const fn put(self) -> u8 {
        match self {
            Self::Instance => PUTFIELD,
            Self::Static => PUTSTATIC,
        }
    }
}

/// Adds a public method returning the value of a hooked field.
///
/// With a multiplier the stored value is decoded as `stored * multiplier`
/// before it is returned.
#[derive(Debug, Clone)]
pub struct AddGetter {
    method: String,
    desc: String,
    field: MemberRef,
    access: FieldAccess,
    multiplier: Option<i64>,
}

impl AddGetter {
    pub fn new(
        method: &str,
        desc: &str,
        field: MemberRef,
        access: FieldAccess,
        multiplier: Option<i64>,
    ) -> Self {
        Self {
            method: method.to_string(),
            desc: desc.to_string(),
            field,
            access,
            multiplier,
        }
    }
}

impl Adapter for AddGetter {
    fn name(&self) -> &'static str {
        match self.access {
            FieldAccess::Instance => "AddGetter",
            FieldAccess::Static => "AddStaticGetter",
        }
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        if class.method(&self.method, &self.desc).is_some() {
            return Ok(false);
        }
        let context = format!("getter {}.{}{}", class.name, self.method, self.desc);
        let desc = MethodDescriptor::parse(&self.desc)?;
        let ret = match (&desc.ret, desc.params.is_empty()) {
            (Some(ret), true) => ret,
            _ => {
                return Err(AdapterError::DescriptorMismatch {
                    context,
                    msg: "a getter takes no arguments and returns a value".to_string(),
                })
            }
        };
        let field_ty = FieldType::parse(&self.field.desc)?;

        let mut insns = Vec::new();
        if self.access == FieldAccess::Instance {
            insns.push(Insn::var(ALOAD, 0));
        }
        insns.push(Insn::field(
            self.access.get(),
            &self.field.owner,
            &self.field.name,
            &self.field.desc,
        ));
        if let Some(multiplier) = self.multiplier {
            insns.extend(multiply(&field_ty, multiplier, &context)?);
        }
        insns.extend(convert(&field_ty, ret, &context)?);
        insns.push(return_insn(Some(ret)));

        class.add_method(synthesize(&self.method, &self.desc, insns));
        debug!("{} reads {}", context, self.field);
        Ok(true)
    }
}
