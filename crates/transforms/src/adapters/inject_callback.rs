use crate::util::{convert, discard, free_local, load_args};
use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, Insn, MethodDescriptor};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Where the callback runs relative to the hooked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// The method(s) receiving the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectTarget {
    Method { name: String, desc: String },
    /// Every `<init>` whose leading parameters match the callback.
    Constructors,
}

/// Splices a call to a callback method into an existing method body.
///
/// The callback receives `this` and the leading arguments of the hooked
/// method. After placement on a non-void method, a callback with parameters
/// also receives the pending return value as its last argument, and with
/// `end` set its own result replaces that value.
#[derive(Debug, Clone)]
pub struct InjectCallback {
    target: InjectTarget,
    placement: Placement,
    end: bool,
    callback: MemberRef,
    invoke: u8,
}

impl InjectCallback {
    /// `invoke` is the opcode used to reach the callback: `invokevirtual`,
    /// `invokespecial` for private callbacks or `invokestatic`.
    pub fn new(
        target: InjectTarget,
        placement: Placement,
        end: bool,
        callback: MemberRef,
        invoke: u8,
    ) -> Self {
        Self {
            target,
            placement,
            end,
            callback,
            invoke,
        }
    }

    /// The instructions spliced at one site, or `None` if `desc` does not
    /// match the callback's parameters.
    fn splice(
        &self,
        hooked_static: bool,
        hooked: &MethodDescriptor,
        callback: &MethodDescriptor,
        temp: u16,
        context: &str,
    ) -> Result<Option<Vec<Insn>>, AdapterError> {
        let mismatch = |msg: String| AdapterError::DescriptorMismatch {
            context: context.to_string(),
            msg,
        };
        let with_receiver = self.invoke != INVOKESTATIC;
        if with_receiver && hooked_static {
            return Err(mismatch("instance callback on a static method".to_string()));
        }
        let pending = match self.placement {
            Placement::After => hooked.ret.as_ref(),
            Placement::Before => None,
        };
        if self.end && self.placement == Placement::Before {
            return Err(mismatch("`end` requires after placement".to_string()));
        }
        let passes_value = pending.is_some() && !callback.params.is_empty();
        let k = callback.params.len() - usize::from(passes_value);
        if k > hooked.params.len() || callback.params[..k] != hooked.params[..k] {
            return Ok(None);
        }

        let mut call = Vec::new();
        if with_receiver {
            call.push(Insn::var(ALOAD, 0));
        }
        call.extend(load_args(&hooked.params[..k], u16::from(!hooked_static)));
        if let (true, Some(ret), Some(last)) = (passes_value, pending, callback.params.last()) {
            call.push(Insn::var(ret.load_opcode(), temp));
            call.extend(convert(ret, last, context)?);
        }
        call.push(Insn::method(
            self.invoke,
            &self.callback.owner,
            &self.callback.name,
            &self.callback.desc,
            false,
        ));

        let mut seq = Vec::new();
        match (pending, self.end) {
            (Some(ret), true) => {
                let Some(result) = callback.ret.as_ref() else {
                    return Err(mismatch("`end` callback returns void".to_string()));
                };
                seq.push(Insn::var(ret.store_opcode(), temp));
                seq.extend(call);
                seq.extend(convert(result, ret, context)?);
            }
            (Some(ret), false) => {
                seq.push(Insn::var(ret.store_opcode(), temp));
                seq.extend(call);
                seq.extend(discard(callback.ret.as_ref()));
                seq.push(Insn::var(ret.load_opcode(), temp));
            }
            (None, end) => {
                if end && callback.ret.is_some() {
                    return Err(mismatch("`end` on a void method needs a void callback".to_string()));
                }
                seq.extend(call);
                seq.extend(discard(callback.ret.as_ref()));
            }
        }
        Ok(Some(seq))
    }
}

impl Adapter for InjectCallback {
    fn name(&self) -> &'static str {
        "InjectCallback"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let owner = class.name.clone();
        let missing = |name: &str, desc: &str| AdapterError::MissingMethod {
            owner: owner.clone(),
            name: name.to_string(),
            desc: desc.to_string(),
        };
        let sites: Vec<usize> = match &self.target {
            InjectTarget::Method { name, desc } => {
                let index = class
                    .methods
                    .iter()
                    .position(|m| &m.name == name && &m.desc == desc)
                    .ok_or_else(|| missing(name, desc))?;
                vec![index]
            }
            InjectTarget::Constructors => {
                if self.placement == Placement::Before {
                    return Err(AdapterError::DescriptorMismatch {
                        context: format!("inject into {} constructors", class.name),
                        msg: "constructors only accept after placement".to_string(),
                    });
                }
                class
                    .methods
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.name == "<init>")
                    .map(|(i, _)| i)
                    .collect()
            }
        };
        let callback = MethodDescriptor::parse(&self.callback.desc)?;
        let (cb_owner, cb_name, cb_desc) =
            (&self.callback.owner, &self.callback.name, &self.callback.desc);

        let mut matched = 0;
        let mut changed = false;
        for index in sites {
            let method = &class.methods[index];
            let context = format!("inject {} into {}.{}{}", cb_name, class.name, method.name, method.desc);
            let Some(code) = method.code.as_ref() else {
                return Err(AdapterError::DescriptorMismatch {
                    context,
                    msg: "method has no body".to_string(),
                });
            };
            if code.contains_call(cb_owner, cb_name, cb_desc) {
                matched += 1;
                continue;
            }
            let hooked = method.descriptor()?;
            let hooked_static = method.is_static();
            let temp = free_local(code, hooked.params_size() + u16::from(!hooked_static));
            let Some(seq) = self.splice(hooked_static, &hooked, &callback, temp, &context)? else {
                if self.target == InjectTarget::Constructors {
                    debug!("{context}: parameters do not match, skipped");
                    continue;
                }
                return Err(AdapterError::DescriptorMismatch {
                    context,
                    msg: format!("callback parameters {} are not a prefix", self.callback.desc),
                });
            };

            let Some(code) = class.methods[index].code.as_mut() else {
                continue;
            };
            match self.placement {
                Placement::Before => code.prepend(seq),
                Placement::After => {
                    let sites = code.insert_before_returns(|_| seq.clone());
                    debug!("{context}: patched {sites} return sites");
                }
            }
            matched += 1;
            changed = true;
        }
        if matched == 0 {
            return Err(missing("<init>", &self.callback.desc));
        }
        Ok(changed)
    }
}
