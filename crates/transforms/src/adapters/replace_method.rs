use crate::util::{convert, discard, load_args, return_insn};
use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, Code, Insn, MethodDescriptor};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Replaces the body of a hooked method with a call to a delegate,
/// keeping the obfuscated name and descriptor.
#[derive(Debug, Clone)]
pub struct ReplaceMethod {
    name: String,
    desc: String,
    delegate: MemberRef,
    invoke: u8,
}

impl ReplaceMethod {
    pub fn new(name: &str, desc: &str, delegate: MemberRef, invoke: u8) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            delegate,
            invoke,
        }
    }
}

impl Adapter for ReplaceMethod {
    fn name(&self) -> &'static str {
        "ReplaceMethod"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let context = format!("replace {}.{}{}", class.name, self.name, self.desc);
        let mismatch = |msg: String| AdapterError::DescriptorMismatch {
            context: context.clone(),
            msg,
        };
        let method = class
            .method(&self.name, &self.desc)
            .ok_or_else(|| AdapterError::MissingMethod {
                owner: class.name.clone(),
                name: self.name.clone(),
                desc: self.desc.clone(),
            })?;
        let hooked_static = method.is_static();
        let hooked = method.descriptor()?;
        let delegate = MethodDescriptor::parse(&self.delegate.desc)?;
        let with_receiver = self.invoke != INVOKESTATIC;
        if with_receiver && hooked_static {
            return Err(mismatch("instance delegate for a static method".to_string()));
        }
        let k = delegate.params.len();
        if k > hooked.params.len() || delegate.params[..] != hooked.params[..k] {
            return Err(mismatch(format!(
                "{} is not a parameter prefix",
                self.delegate.desc
            )));
        }

        let mut insns = Vec::new();
        if with_receiver {
            insns.push(Insn::var(ALOAD, 0));
        }
        insns.extend(load_args(&hooked.params[..k], u16::from(!hooked_static)));
        insns.push(Insn::method(
            self.invoke,
            &self.delegate.owner,
            &self.delegate.name,
            &self.delegate.desc,
            false,
        ));
        match (&delegate.ret, &hooked.ret) {
            (Some(from), Some(to)) => insns.extend(convert(from, to, &context)?),
            (from, None) => insns.extend(discard(from.as_ref())),
            (None, Some(_)) => return Err(mismatch("delegate returns void".to_string())),
        }
        insns.push(return_insn(hooked.ret.as_ref()));

        let replaced = class.replace_method_body(&self.name, &self.desc, Code::with_insns(insns))?;
        if replaced {
            debug!("{context} now delegates to {}", self.delegate);
        }
        Ok(replaced)
    }
}
