//! Turns mixin descriptors into adapter registrations.
//!
//! Resolution is eager and all-or-nothing: a descriptor either yields its
//! complete list of registrations or a [`ResolveError`], and nothing is
//! registered in the second case.

use crate::descriptor::{FieldSpec, MethodDecl, MixinDescriptor, Placement};
use crate::hooks::{FieldHook, HookTable, MethodHook};
use crate::injector::Stage;
use crate::math::{inverse_i32, inverse_i64};
use grafter_core::opcode::*;
use grafter_core::remap::FieldTarget;
use grafter_core::{AccessFlags, FieldType, Method, MethodDescriptor, Remapper};
use grafter_transform::adapters::{
    AddField, AddGetter, AddInterface, AddInvoker, AddMethods, AddSetter, CopyMethod, FieldAccess,
    InjectCallback, InjectTarget, ReplaceMethod,
};
use grafter_transform::{self as transform, Adapter, MemberRef};
use grafter_utils::errors::ResolveError;
use tracing::debug;

/// Pseudo-hook naming every constructor of the target class.
pub const CONSTRUCTOR: &str = "<init>";

/// One adapter bound to a class and a stage.
#[derive(Debug)]
pub struct Registration {
    pub stage: Stage,
    pub class: String,
    pub adapter: Box<dyn Adapter>,
}

#[derive(Debug, Default)]
struct Registrations(Vec<Registration>);

impl Registrations {
    fn push(&mut self, stage: Stage, class: &str, adapter: impl Adapter + 'static) {
        debug!("{stage}: {} on {class}", adapter.name());
        self.0.push(Registration {
            stage,
            class: class.to_string(),
            adapter: Box::new(adapter),
        });
    }
}

/// Resolves descriptors against one hook table.
#[derive(Debug, Clone, Copy)]
pub struct MixinResolver<'a> {
    hooks: &'a HookTable,
}

impl<'a> MixinResolver<'a> {
    pub const fn new(hooks: &'a HookTable) -> Self {
        Self { hooks }
    }

    pub fn resolve(&self, mixin: &MixinDescriptor) -> Result<Vec<Registration>, ResolveError> {
        let target = self.hooks.class_hook(&mixin.target)?.obf_name.clone();
        let remapper = self.remapper(mixin, &target)?;
        let mut out = Registrations::default();

        for interface in &mixin.interfaces {
            out.push(Stage::PreCopy, &target, AddInterface::new(interface));
        }

        for field in &mixin.fields {
            self.field(mixin, field, &target, &remapper, &mut out)?;
        }

        for spec in &mixin.getters {
            check_abstract(mixin, &spec.method, "getter")?;
            let hook = self.field_hook(mixin, &spec.hook, spec.is_static)?;
            let multiplier = check_multiplier(hook)?;
            out.push(
                Stage::PreCopy,
                &target,
                AddGetter::new(
                    &spec.method.name,
                    &remapper.desc(&spec.method.desc),
                    field_ref(hook),
                    access(spec.is_static),
                    multiplier,
                ),
            );
        }

        for spec in &mixin.setters {
            check_abstract(mixin, &spec.method, "setter")?;
            let hook = self.field_hook(mixin, &spec.hook, spec.is_static)?;
            let inverse = if spec.encode {
                inverse(hook)?
            } else {
                check_multiplier(hook)?;
                None
            };
            out.push(
                Stage::PreCopy,
                &target,
                AddSetter::new(
                    &spec.method.name,
                    &remapper.desc(&spec.method.desc),
                    field_ref(hook),
                    access(spec.is_static),
                    inverse,
                ),
            );
        }

        for spec in &mixin.invokes {
            check_abstract(mixin, &spec.method, "invoke")?;
            if spec.is_static {
                return Err(ResolveError::Unsupported(format!(
                    "static invocation shim {}.{}",
                    mixin.target, spec.method.name
                )));
            }
            let hook = self.hooks.method(&mixin.target, &spec.hook)?;
            let desc = remapper.desc(&spec.method.desc);
            let api = MethodDescriptor::parse(&desc)?;
            let hooked = MethodDescriptor::parse(&hook.desc)?;
            let supplied = api.params.len() + usize::from(hook.dummy_value.is_some());
            if supplied != hooked.params.len() {
                return Err(ResolveError::DescriptorMismatch {
                    context: format!("invoke {}.{}", mixin.target, spec.method.name),
                    msg: format!(
                        "{}{} takes {} arguments, {supplied} are supplied",
                        spec.hook,
                        hook.desc,
                        hooked.params.len()
                    ),
                });
            }
            out.push(
                Stage::PreCopy,
                &target,
                AddInvoker::new(&spec.method.name, &desc, method_ref(hook), hook.dummy_value),
            );
        }

        let mut copied = Vec::new();
        for spec in &mixin.injects {
            let callback = concrete(mixin, &spec.method, "inject")?;
            let desc = remapper.desc(&spec.method.desc);
            let context = format!("inject {}.{}", mixin.target, spec.method.name);
            let (inject_target, hooked_desc) = if spec.hook == CONSTRUCTOR {
                if spec.placement == Placement::Before {
                    return Err(ResolveError::DescriptorMismatch {
                        context,
                        msg: "constructors only accept after placement".to_string(),
                    });
                }
                (InjectTarget::Constructors, None)
            } else {
                let hook = self.hooks.method(&mixin.target, &spec.hook)?;
                let method = InjectTarget::Method {
                    name: hook.obf_name.clone(),
                    desc: hook.desc.clone(),
                };
                (method, Some(hook.desc.as_str()))
            };
            check_callback(&desc, hooked_desc, spec.placement, spec.end, &context)?;
            let placement = match spec.placement {
                Placement::Before => transform::adapters::Placement::Before,
                Placement::After => transform::adapters::Placement::After,
            };
            out.push(
                Stage::PreCopy,
                &target,
                InjectCallback::new(
                    inject_target,
                    placement,
                    spec.end,
                    MemberRef::new(&target, &spec.method.name, &desc),
                    invoke_opcode(callback),
                ),
            );
            copied.push(&spec.method);
        }

        let mut replaced = Vec::new();
        for spec in &mixin.replaces {
            let replacement = concrete(mixin, &spec.method, "replace")?;
            let hook = if spec.is_static {
                self.hooks.static_method(&spec.hook)?
            } else {
                self.hooks.method(&mixin.target, &spec.hook)?
            };
            let context = format!("replace {}.{}", mixin.target, spec.method.name);
            if !replacement.is_static() && hook.owner != target {
                return Err(ResolveError::Unsupported(format!(
                    "{context}: an instance replacement must live on {target}, not {}",
                    hook.owner
                )));
            }
            let desc = remapper.desc(&spec.method.desc);
            check_delegate(&desc, &hook.desc, &context)?;
            replaced.push((
                hook.owner.clone(),
                ReplaceMethod::new(
                    &hook.obf_name,
                    &hook.desc,
                    MemberRef::new(&target, &spec.method.name, &desc),
                    invoke_opcode(replacement),
                ),
            ));
            copied.push(&spec.method);
        }

        for decl in &mixin.methods {
            concrete(mixin, decl, "method")?;
            copied.push(decl);
        }
        if let Some(class) = mixin.class.as_ref().filter(|_| !copied.is_empty()) {
            let methods = copied
                .iter()
                .map(|d| (d.name.clone(), d.desc.clone()))
                .collect();
            out.push(
                Stage::PreCopy,
                &target,
                AddMethods::new(class.clone(), methods, remapper.clone()),
            );
        }

        for spec in &mixin.copies {
            check_abstract(mixin, &spec.method, "copy")?;
            let hook = if spec.is_static {
                self.hooks.static_method(&spec.hook)?
            } else {
                self.hooks.method(&mixin.target, &spec.hook)?
            };
            out.push(
                Stage::Copy,
                &target,
                CopyMethod::new(method_ref(hook), &spec.method.name),
            );
        }

        for (owner, adapter) in replaced {
            out.push(Stage::PostCopy, &owner, adapter);
        }

        debug!(
            "resolved mixin {} onto {target}: {} adapters",
            mixin.target,
            out.0.len()
        );
        Ok(out.0)
    }

    /// Renames the mixin class to the target and points shadow fields at
    /// their hooks.
    fn remapper(&self, mixin: &MixinDescriptor, target: &str) -> Result<Remapper, ResolveError> {
        let mut remapper = Remapper::new();
        let Some(class) = &mixin.class else {
            return Ok(remapper);
        };
        remapper.map_class(&class.name, target);
        for field in &mixin.fields {
            if let Some(hook) = &field.shadow {
                let hook = self.field_hook(mixin, hook, field.is_static())?;
                remapper.map_field(
                    &class.name,
                    &field.name,
                    FieldTarget {
                        owner: hook.owner.clone(),
                        name: hook.obf_name.clone(),
                        desc: hook.desc.clone(),
                    },
                );
            }
        }
        Ok(remapper)
    }

    fn field(
        &self,
        mixin: &MixinDescriptor,
        field: &FieldSpec,
        target: &str,
        remapper: &Remapper,
        out: &mut Registrations,
    ) -> Result<(), ResolveError> {
        let desc = remapper.desc(&field.desc);
        let (backing, hook) = match &field.shadow {
            Some(hook) => {
                let hook = self.field_hook(mixin, hook, field.is_static())?;
                check_multiplier(hook)?;
                (field_ref(hook), Some(hook))
            }
            None => {
                out.push(
                    Stage::PreCopy,
                    target,
                    AddField::new(field.access, &field.name, &desc),
                );
                (MemberRef::new(target, &field.name, &desc), None)
            }
        };
        if let Some(name) = field.getter_name() {
            out.push(
                Stage::PreCopy,
                target,
                AddGetter::new(
                    &name,
                    &format!("(){desc}"),
                    backing.clone(),
                    access(field.is_static()),
                    hook.and_then(|h| h.multiplier),
                ),
            );
        }
        if let Some(name) = field.setter_name() {
            let inverse = match hook {
                Some(hook) => inverse(hook)?,
                None => None,
            };
            out.push(
                Stage::PreCopy,
                target,
                AddSetter::new(
                    &name,
                    &format!("({desc})V"),
                    backing,
                    access(field.is_static()),
                    inverse,
                ),
            );
        }
        Ok(())
    }

    fn field_hook(
        &self,
        mixin: &MixinDescriptor,
        hook: &str,
        is_static: bool,
    ) -> Result<&'a FieldHook, ResolveError> {
        if is_static {
            self.hooks.static_field(hook)
        } else {
            self.hooks.field(&mixin.target, hook)
        }
    }
}

const fn access(is_static: bool) -> FieldAccess {
    if is_static {
        FieldAccess::Static
    } else {
        FieldAccess::Instance
    }
}

fn field_ref(hook: &FieldHook) -> MemberRef {
    MemberRef::new(&hook.owner, &hook.obf_name, &hook.desc)
}

fn method_ref(hook: &MethodHook) -> MemberRef {
    MemberRef::new(&hook.owner, &hook.obf_name, &hook.desc)
}

fn invoke_opcode(method: &Method) -> u8 {
    if method.is_static() {
        INVOKESTATIC
    } else if method.access.contains(AccessFlags::PRIVATE) {
        INVOKESPECIAL
    } else {
        INVOKEVIRTUAL
    }
}

/// Accessor, invoke and copy specs declare a contract the adapter fills in,
/// so their mixin method must not have a body.
fn check_abstract(
    mixin: &MixinDescriptor,
    decl: &MethodDecl,
    kind: &'static str,
) -> Result<(), ResolveError> {
    let declared = mixin
        .class
        .as_ref()
        .and_then(|c| c.method(&decl.name, &decl.desc));
    let is_abstract = declared
        .map(|m| m.is_abstract() || m.code.is_none())
        .or(decl.is_abstract)
        .unwrap_or(true);
    if is_abstract {
        Ok(())
    } else {
        Err(ResolveError::NotAbstract {
            kind,
            mixin: mixin.target.clone(),
            method: decl.name.clone(),
        })
    }
}

/// The compiled body of a method that is copied into the target.
fn concrete<'m>(
    mixin: &'m MixinDescriptor,
    decl: &MethodDecl,
    kind: &'static str,
) -> Result<&'m Method, ResolveError> {
    let class = mixin
        .class
        .as_ref()
        .ok_or_else(|| ResolveError::MissingMixinClass(mixin.target.clone()))?;
    let method = class
        .method(&decl.name, &decl.desc)
        .ok_or_else(|| ResolveError::MissingMixinMethod {
            class: class.name.clone(),
            name: decl.name.clone(),
            desc: decl.desc.clone(),
        })?;
    if method.is_abstract() || method.code.is_none() || decl.is_abstract == Some(true) {
        return Err(ResolveError::NotConcrete {
            kind,
            mixin: mixin.target.clone(),
            method: decl.name.clone(),
        });
    }
    Ok(method)
}

fn check_multiplier(hook: &FieldHook) -> Result<Option<i64>, ResolveError> {
    let Some(multiplier) = hook.multiplier else {
        return Ok(None);
    };
    match FieldType::parse(&hook.desc)? {
        FieldType::Int | FieldType::Long if multiplier != 0 => Ok(Some(multiplier)),
        FieldType::Int | FieldType::Long => Err(ResolveError::EvenMultiplier {
            field: hook.name.clone(),
            multiplier,
        }),
        _ => Err(ResolveError::MultiplierType {
            field: hook.name.clone(),
            desc: hook.desc.clone(),
            multiplier,
        }),
    }
}

/// The encode-direction factor for a hooked field, if it has a multiplier.
fn inverse(hook: &FieldHook) -> Result<Option<i64>, ResolveError> {
    let Some(multiplier) = check_multiplier(hook)? else {
        return Ok(None);
    };
    let inverse = if hook.desc == "I" {
        inverse_i32(multiplier as i32).map(i64::from)
    } else {
        inverse_i64(multiplier)
    };
    inverse
        .map(Some)
        .ok_or_else(|| ResolveError::EvenMultiplier {
            field: hook.name.clone(),
            multiplier,
        })
}

fn check_callback(
    desc: &str,
    hooked: Option<&str>,
    placement: Placement,
    end: bool,
    context: &str,
) -> Result<(), ResolveError> {
    let mismatch = |msg: &str| ResolveError::DescriptorMismatch {
        context: context.to_string(),
        msg: msg.to_string(),
    };
    if end && placement == Placement::Before {
        return Err(mismatch("`end` requires after placement"));
    }
    let callback = MethodDescriptor::parse(desc)?;
    let Some(hooked) = hooked else {
        return if end {
            Err(mismatch("`end` cannot replace a constructor result"))
        } else {
            Ok(())
        };
    };
    let hooked = MethodDescriptor::parse(hooked)?;
    let pending = placement == Placement::After && hooked.ret.is_some();
    let k = callback.params.len() - usize::from(pending && !callback.params.is_empty());
    if k > hooked.params.len() || callback.params[..k] != hooked.params[..k] {
        return Err(mismatch("callback parameters are not a prefix of the hooked method's"));
    }
    if end && hooked.ret.is_some() && callback.ret.is_none() {
        return Err(mismatch("`end` callback must return a value"));
    }
    Ok(())
}

fn check_delegate(desc: &str, hooked: &str, context: &str) -> Result<(), ResolveError> {
    let delegate = MethodDescriptor::parse(desc)?;
    let hooked = MethodDescriptor::parse(hooked)?;
    let k = delegate.params.len();
    let prefix = k <= hooked.params.len() && delegate.params[..] == hooked.params[..k];
    let returns = hooked.ret.is_none() || delegate.ret.is_some();
    if prefix && returns {
        Ok(())
    } else {
        Err(ResolveError::DescriptorMismatch {
            context: context.to_string(),
            msg: format!("{desc} cannot stand in for {hooked}"),
        })
    }
}
