use crate::{Adapter, AdapterContext};
use grafter_core::{AccessFlags, ClassFile, Method, Remapper};
use grafter_utils::errors::AdapterError;
use std::sync::Arc;
use tracing::debug;

/// Copies concrete methods from a compiled mixin class into the target.
///
/// Bodies pass through `remapper`, which renames the mixin class to the
/// target and redirects shadow fields to their hooked counterparts. Synthetic
/// mixin methods reached through method handles (lambda bodies) come along.
#[derive(Debug, Clone)]
pub struct AddMethods {
    mixin: Arc<ClassFile>,
    methods: Vec<(String, String)>,
    remapper: Remapper,
}

impl AddMethods {
    pub fn new(mixin: Arc<ClassFile>, methods: Vec<(String, String)>, remapper: Remapper) -> Self {
        Self {
            mixin,
            methods,
            remapper,
        }
    }

    /// Synthetic methods of the mixin that `method` points at through
    /// method handles.
    fn companions<'a>(&'a self, method: &Method) -> Vec<(&'a str, &'a str)> {
        let Some(code) = &method.code else {
            return Vec::new();
        };
        code.insns
            .iter()
            .flat_map(|insn| insn.handles())
            .filter(|h| h.owner == self.mixin.name && !h.is_field())
            .filter_map(|h| self.mixin.method(&h.name, &h.desc))
            .filter(|m| m.access.contains(AccessFlags::SYNTHETIC))
            .map(|m| (m.name.as_str(), m.desc.as_str()))
            .collect()
    }
}

impl Adapter for AddMethods {
    fn name(&self) -> &'static str {
        "AddMethods"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let mut changed = false;
        let mut pending: Vec<(&str, &str)> = self
            .methods
            .iter()
            .map(|(name, desc)| (name.as_str(), desc.as_str()))
            .collect();
        let mut next = 0;
        while let Some(&(name, desc)) = pending.get(next) {
            next += 1;
            let source =
                self.mixin
                    .method(name, desc)
                    .ok_or_else(|| AdapterError::MissingMethod {
                        owner: self.mixin.name.clone(),
                        name: name.to_string(),
                        desc: desc.to_string(),
                    })?;
            for companion in self.companions(source) {
                if !pending.contains(&companion) {
                    pending.push(companion);
                }
            }
            if class.method(name, &self.remapper.desc(desc)).is_some() {
                continue;
            }
            let copy = self.remapper.transplant(source);
            debug!("copied {}.{}{} into {}", self.mixin.name, name, desc, class.name);
            changed |= class.add_method(copy);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{round_trip, target, with_ctx};
    use crate::ClassBatch;
    use grafter_core::opcode::*;
    use grafter_core::remap::FieldTarget;
    use grafter_core::{Bootstrap, Code, Handle, Insn, LdcValue};

    fn mixin() -> ClassFile {
        let mut class = ClassFile::new("mixins/CounterMixin", Some("java/lang/Object"));
        class.add_method(Method::new(
            AccessFlags::PUBLIC,
            "twice",
            "()I",
            Some(Code::with_insns(vec![
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, "mixins/CounterMixin", "value", "I"),
                Insn::simple(ICONST_2),
                Insn::simple(IMUL),
                Insn::simple(IRETURN),
            ])),
        ));
        class.add_method(Method::new(
            AccessFlags::PUBLIC,
            "self",
            "()Lmixins/CounterMixin;",
            Some(Code::with_insns(vec![Insn::var(ALOAD, 0), Insn::simple(ARETURN)])),
        ));
        class
    }

    #[test]
    fn test_methods_are_remapped_into_target() {
        let mut remapper = Remapper::new();
        remapper.map_class("mixins/CounterMixin", "a").map_field(
            "mixins/CounterMixin",
            "value",
            FieldTarget {
                owner: "a".into(),
                name: "b".into(),
                desc: "I".into(),
            },
        );
        let adapter = AddMethods::new(
            Arc::new(mixin()),
            vec![
                ("twice".into(), "()I".into()),
                ("self".into(), "()Lmixins/CounterMixin;".into()),
            ],
            remapper,
        );
        let mut class = target();
        with_ctx(&ClassBatch::new(), |ctx| {
            assert!(adapter.apply(&mut class, ctx).unwrap());
            assert!(!adapter.apply(&mut class, ctx).unwrap());
        });
        let parsed = round_trip(&class);
        assert!(parsed.method("self", "()La;").is_some());
        let twice = parsed.method("twice", "()I").unwrap().code.as_ref().unwrap();
        assert!(twice
            .insns
            .contains(&Insn::field(GETFIELD, "a", "b", "I")));
    }

    #[test]
    fn test_missing_mixin_method() {
        let adapter = AddMethods::new(
            Arc::new(mixin()),
            vec![("absent".into(), "()V".into())],
            Remapper::new(),
        );
        let mut class = target();
        with_ctx(&ClassBatch::new(), |ctx| {
            assert!(matches!(
                adapter.apply(&mut class, ctx),
                Err(AdapterError::MissingMethod { .. })
            ));
        });
    }

    #[test]
    fn test_lambda_bodies_follow_their_call_site() {
        let metafactory = Handle::new(
            6,
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
            false,
        );
        let mut mixin = mixin();
        mixin.add_method(Method::new(
            AccessFlags::PUBLIC,
            "task",
            "()Ljava/lang/Runnable;",
            Some(Code::with_insns(vec![
                Insn::InvokeDynamic {
                    name: "run".into(),
                    desc: "()Ljava/lang/Runnable;".into(),
                    bootstrap: Box::new(Bootstrap::new(
                        metafactory,
                        vec![
                            LdcValue::MethodType("()V".into()),
                            LdcValue::Handle(Handle::new(
                                6,
                                "mixins/CounterMixin",
                                "lambda$task$0",
                                "()V",
                                false,
                            )),
                            LdcValue::MethodType("()V".into()),
                        ],
                    )),
                },
                Insn::simple(ARETURN),
            ])),
        ));
        mixin.add_method(Method::new(
            AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
            "lambda$task$0",
            "()V",
            Some(Code::with_insns(vec![Insn::simple(RETURN)])),
        ));

        let mut remapper = Remapper::new();
        remapper.map_class("mixins/CounterMixin", "a");
        let adapter = AddMethods::new(
            Arc::new(mixin),
            vec![("task".into(), "()Ljava/lang/Runnable;".into())],
            remapper,
        );
        let mut class = target();
        with_ctx(&ClassBatch::new(), |ctx| {
            assert!(adapter.apply(&mut class, ctx).unwrap());
        });
        let parsed = round_trip(&class);
        assert!(parsed.method("lambda$task$0", "()V").is_some());
        assert!(parsed.method("twice", "()I").is_none());
        let task = parsed.method("task", "()Ljava/lang/Runnable;").unwrap();
        let handles: Vec<_> = task.code.as_ref().unwrap().insns[0]
            .handles()
            .into_iter()
            .map(|h| format!("{}.{}", h.owner, h.name))
            .collect();
        assert_eq!(
            handles,
            vec![
                "java/lang/invoke/LambdaMetafactory.metafactory",
                "a.lambda$task$0"
            ]
        );
    }
}
