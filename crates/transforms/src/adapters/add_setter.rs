use crate::adapters::FieldAccess;
use crate::util::{convert, load_args, multiply, synthesize};
use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, FieldType, Insn, MethodDescriptor};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Adds a public method storing its single argument into a hooked field.
///
/// With a multiplier the argument is encoded as `value * inverse` so that a
/// getter using the multiplier reads back the same value.
#[derive(Debug, Clone)]
pub struct AddSetter {
    method: String,
    desc: String,
    field: MemberRef,
    access: FieldAccess,
    inverse: Option<i64>,
}

impl AddSetter {
    pub fn new(
        method: &str,
        desc: &str,
        field: MemberRef,
        access: FieldAccess,
        inverse: Option<i64>,
    ) -> Self {
        Self {
            method: method.to_string(),
            desc: desc.to_string(),
            field,
            access,
            inverse,
        }
    }
}

impl Adapter for AddSetter {
    fn name(&self) -> &'static str {
        "AddSetter"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        if class.method(&self.method, &self.desc).is_some() {
            return Ok(false);
        }
        let context = format!("setter {}.{}{}", class.name, self.method, self.desc);
        let desc = MethodDescriptor::parse(&self.desc)?;
        let [value] = desc.params.as_slice() else {
            return Err(AdapterError::DescriptorMismatch {
                context,
                msg: "a setter takes exactly one argument".to_string(),
            });
        };
        if desc.ret.is_some() {
            return Err(AdapterError::DescriptorMismatch {
                context,
                msg: "a setter returns void".to_string(),
            });
        }
        let field_ty = FieldType::parse(&self.field.desc)?;

        let mut insns = Vec::new();
        if self.access == FieldAccess::Instance {
            insns.push(Insn::var(ALOAD, 0));
        }
        insns.extend(load_args([value], 1));
        insns.extend(convert(value, &field_ty, &context)?);
        if let Some(inverse) = self.inverse {
            insns.extend(multiply(&field_ty, inverse, &context)?);
        }
        insns.push(Insn::field(
            self.access.put(),
            &self.field.owner,
            &self.field.name,
            &self.field.desc,
        ));
        insns.push(Insn::simple(RETURN));

        class.add_method(synthesize(&self.method, &self.desc, insns));
        debug!("{} writes {}", context, self.field);
        Ok(true)
    }
}
