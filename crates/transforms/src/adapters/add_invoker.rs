use crate::util::{convert, discard, push_constant, return_insn, synthesize, virtual_call};
use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, Insn, MethodDescriptor};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Adds a public method forwarding its arguments to a hooked method.
///
/// Obfuscated methods often carry an extra trailing parameter whose value
/// must lie in a specific range; when `dummy` is set it is pushed as that
/// last argument.
#[derive(Debug, Clone)]
pub struct AddInvoker {
    method: String,
    desc: String,
    target: MemberRef,
    dummy: Option<i64>,
}

impl AddInvoker {
    pub fn new(method: &str, desc: &str, target: MemberRef, dummy: Option<i64>) -> Self {
        Self {
            method: method.to_string(),
            desc: desc.to_string(),
            target,
            dummy,
        }
    }
}

impl Adapter for AddInvoker {
    fn name(&self) -> &'static str {
        "AddInvoker"
    }

    fn apply(&self, class: &mut ClassFile, ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        if class.method(&self.method, &self.desc).is_some() {
            return Ok(false);
        }
        let context = format!("invoker {}.{}{}", class.name, self.method, self.desc);
        let api = MethodDescriptor::parse(&self.desc)?;
        let hooked = MethodDescriptor::parse(&self.target.desc)?;
        let expected = api.params.len() + usize::from(self.dummy.is_some());
        if hooked.params.len() != expected {
            return Err(AdapterError::DescriptorMismatch {
                context,
                msg: format!(
                    "{} takes {} arguments, {expected} are supplied",
                    self.target,
                    hooked.params.len()
                ),
            });
        }

        let mut insns = vec![Insn::var(ALOAD, 0)];
        let mut slot = 1;
        for (from, to) in api.params.iter().zip(&hooked.params) {
            insns.push(Insn::var(from.load_opcode(), slot));
            insns.extend(convert(from, to, &context)?);
            slot += from.size();
        }
        if let (Some(dummy), Some(ty)) = (self.dummy, hooked.params.last()) {
            insns.push(push_constant(ty, dummy, &context)?);
        }

        let (opcode, interface) = if self.target.owner == class.name {
            virtual_call(class, &self.target.owner, &self.target.name, &self.target.desc)
        } else if ctx.hierarchy().is_interface(&self.target.owner) {
            (INVOKEINTERFACE, true)
        } else {
            (INVOKEVIRTUAL, false)
        };
        insns.push(Insn::method(
            opcode,
            &self.target.owner,
            &self.target.name,
            &self.target.desc,
            interface,
        ));

        match (&hooked.ret, &api.ret) {
            (Some(from), Some(to)) => insns.extend(convert(from, to, &context)?),
            (from, None) => insns.extend(discard(from.as_ref())),
            (None, Some(_)) => {
                return Err(AdapterError::DescriptorMismatch {
                    context,
                    msg: format!("{} returns void", self.target),
                })
            }
        }
        insns.push(return_insn(api.ret.as_ref()));

        class.add_method(synthesize(&self.method, &self.desc, insns));
        debug!("{} calls {}", context, self.target);
        Ok(true)
    }
}
