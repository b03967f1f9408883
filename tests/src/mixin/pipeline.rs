use crate::fixtures::{
    batch, counter_class, counter_hooks, init_tracing, mixin_class, super_init, OBJECT,
};
use crate::vm::{Value, Vm};
use grafter_core::opcode::*;
use grafter_core::{AccessFlags, ClassFile, Code, Insn, Method};
use grafter_mixin::descriptor::{FieldSpec, HookedMethod, InjectSpec, MethodDecl, Placement};
use grafter_mixin::{inject, math, HookTable, InjectConfig, MixinDescriptor, Stage};
use grafter_utils::errors::{InjectError, ResolveError};

const APPLET: &str = "java/applet/Applet";
const PANEL: &str = "java/awt/Panel";

fn shadow(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.into(),
        desc: "I".into(),
        access: AccessFlags::empty(),
        shadow: Some(name.into()),
        getter: None,
        setter: None,
    }
}

fn abstract_method(hook: &str, name: &str, desc: &str) -> HookedMethod {
    HookedMethod {
        hook: hook.into(),
        method: MethodDecl::new(name, desc),
        is_static: false,
    }
}

/// Interface, accessors, shim, an after-callback, a copy and a replacement.
fn full_mixin() -> MixinDescriptor {
    // onFooDone() { this.value = this.value + 1; }
    let on_foo_done = vec![
        Insn::var(ALOAD, 0),
        Insn::var(ALOAD, 0),
        Insn::field(GETFIELD, "CounterMixin", "value", "I"),
        Insn::simple(ICONST_1),
        Insn::simple(IADD),
        Insn::field(PUTFIELD, "CounterMixin", "value", "I"),
        Insn::simple(RETURN),
    ];
    // twice(int x) { this.value = x * 2; }
    let twice = vec![
        Insn::var(ALOAD, 0),
        Insn::var(ILOAD, 1),
        Insn::simple(ICONST_2),
        Insn::simple(IMUL),
        Insn::field(PUTFIELD, "CounterMixin", "value", "I"),
        Insn::simple(RETURN),
    ];
    let class = mixin_class(
        "CounterMixin",
        vec![
            ("getValue", "()I", None),
            ("onFooDone", "()V", Some(on_foo_done)),
            ("twice", "(I)V", Some(twice)),
        ],
    );
    let mut mixin = MixinDescriptor::new("Counter").with_class(class);
    mixin.interfaces.push("api/Counter".into());
    mixin.fields.push(shadow("value"));
    mixin.getters.push(abstract_method("value", "getValue", "()I"));
    mixin.invokes.push(abstract_method("foo", "callFoo", "(I)I"));
    mixin.injects.push(InjectSpec {
        hook: "foo".into(),
        method: MethodDecl::new("onFooDone", "()V"),
        placement: Placement::After,
        end: false,
    });
    mixin.copies.push(abstract_method("foo", "fooCopy", "(II)I"));
    mixin.replaces.push(HookedMethod {
        hook: "bar".into(),
        method: MethodDecl::new("twice", "(I)V"),
        is_static: false,
    });
    mixin
}

#[test]
fn test_full_mixin_executes() {
    init_tracing();
    let mut batch = batch(&[counter_class()]);
    let report = inject(
        counter_hooks(None),
        &[full_mixin()],
        &mut batch,
        InjectConfig::library(),
    )
    .unwrap();
    assert_eq!(report.modified(), vec!["a"]);
    assert_eq!(report.pass(Stage::EntryPoint).unwrap().modified, Vec::<String>::new());
    for stage in [Stage::PreCopy, Stage::Copy, Stage::PostCopy] {
        assert_eq!(report.pass(stage).unwrap().modified, vec!["a".to_string()], "{stage}");
    }

    let class = ClassFile::parse(batch.get("a").unwrap()).unwrap();
    assert_eq!(class.interfaces, vec!["api/Counter".to_string()]);

    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();
    vm.call("a", "bar", "(I)V", vec![obj, Value::Int(21)]).unwrap();
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(42));

    // foo returns its dummy argument, then the callback bumps the field
    assert_eq!(
        vm.call("a", "callFoo", "(I)I", vec![obj, Value::Int(3)]).unwrap(),
        Some(Value::Int(5))
    );
    assert_eq!(
        vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
        Some(Value::Int(43))
    );

    // the copy is taken after the callback was spliced in
    assert_eq!(
        vm.call("a", "fooCopy", "(II)I", vec![obj, Value::Int(1), Value::Int(9)])
            .unwrap(),
        Some(Value::Int(9))
    );
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(44));
}

#[test]
fn test_reinjection_is_byte_identical() {
    let mut first = batch(&[counter_class()]);
    inject(counter_hooks(Some(7)), &[full_mixin()], &mut first, InjectConfig::library()).unwrap();

    let mut second = first.clone();
    let report = inject(
        counter_hooks(Some(7)),
        &[full_mixin()],
        &mut second,
        InjectConfig::library(),
    )
    .unwrap();
    assert!(report.modified().is_empty(), "{:?}", report.modified());
    assert_eq!(second, first);
}

#[test]
fn test_parallel_apply_matches_sequential() {
    let classes = [counter_class(), ClassFile::new("zz", Some(OBJECT))];
    let mut sequential = batch(&classes);
    let mut parallel = batch(&classes);
    let config = InjectConfig {
        parallel: true,
        ..InjectConfig::library()
    };
    inject(counter_hooks(None), &[full_mixin()], &mut sequential, InjectConfig::library()).unwrap();
    inject(counter_hooks(None), &[full_mixin()], &mut parallel, config).unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn test_missing_target_reported_once() {
    init_tracing();
    let hooks: HookTable = serde_json::from_str(
        r#"{ "classes": [ { "name": "Ghost", "obfName": "zz",
             "fields": [ { "name": "value", "obfName": "q", "desc": "I" } ] } ] }"#,
    )
    .unwrap();
    let mut mixin = MixinDescriptor::new("Ghost");
    mixin.interfaces.push("api/Ghost".into());
    mixin.getters.push(abstract_method("value", "getValue", "()I"));
    mixin.getters.push(abstract_method("value", "getValueAgain", "()I"));

    let mut batch = batch(&[counter_class()]);
    let before = batch.clone();
    let report = inject(hooks, &[mixin], &mut batch, InjectConfig::library()).unwrap();

    assert_eq!(report.missing().collect::<Vec<_>>(), vec![(Stage::PreCopy, "zz")]);
    assert!(report.modified().is_empty());
    assert_eq!(batch, before);
}

#[test]
fn test_concrete_getter_is_configuration_error() {
    let class = mixin_class(
        "CounterMixin",
        vec![(
            "getValue",
            "()I",
            Some(vec![Insn::simple(ICONST_0), Insn::simple(IRETURN)]),
        )],
    );
    let mut mixin = MixinDescriptor::new("Counter").with_class(class);
    mixin.getters.push(abstract_method("value", "getValue", "()I"));

    let mut batch = batch(&[counter_class()]);
    let before = batch.clone();
    let err = inject(counter_hooks(None), &[mixin], &mut batch, InjectConfig::library()).unwrap_err();
    assert!(
        matches!(
            &err,
            InjectError::Resolve(ResolveError::NotAbstract { kind: "getter", method, .. }) if method == "getValue"
        ),
        "{err}"
    );
    assert_eq!(batch, before);
}

#[test]
fn test_even_multiplier_setter_is_configuration_error() {
    let mut mixin = MixinDescriptor::new("Counter");
    mixin.setters.push(grafter_mixin::descriptor::SetterSpec {
        hook: "value".into(),
        method: MethodDecl::new("setValue", "(I)V"),
        is_static: false,
        encode: true,
    });
    let mut batch = batch(&[counter_class()]);
    let err = inject(counter_hooks(Some(12)), &[mixin], &mut batch, InjectConfig::library()).unwrap_err();
    assert!(matches!(
        err,
        InjectError::Resolve(ResolveError::EvenMultiplier { multiplier: 12, .. })
    ));
}

#[test]
fn test_entry_point_adapts_applet() {
    init_tracing();
    let hooks: HookTable = serde_json::from_str(
        r#"{ "classes": [ { "name": "GameEngine", "obfName": "client" } ] }"#,
    )
    .unwrap();
    let mut client = ClassFile::new("client", Some(APPLET));
    let mut init = super_init(APPLET);
    init.push(Insn::simple(RETURN));
    client.add_method(Method::new(
        AccessFlags::PUBLIC,
        "<init>",
        "()V",
        Some(Code::with_insns(init)),
    ));
    let mut batch = batch(&[client, counter_class()]);

    let report = inject(hooks, &[], &mut batch, InjectConfig::default()).unwrap();
    assert_eq!(report.pass(Stage::EntryPoint).unwrap().modified, vec!["client".to_string()]);

    let client = ClassFile::parse(batch.get("client").unwrap()).unwrap();
    assert_eq!(client.super_name.as_deref(), Some(PANEL));
    let init = client.method("<init>", "()V").unwrap().code.as_ref().unwrap();
    assert!(init.contains_call(PANEL, "<init>", "()V"));
    assert!(!init.contains_call(APPLET, "<init>", "()V"));
}

#[test]
fn test_multiplier_inverse_property() {
    for m in [1, 3, 7, -1, -1_234_567, 0x5bd1_e995_u32 as i32, i32::MAX, i32::MIN + 1] {
        let inv = math::inverse_i32(m).unwrap();
        assert_eq!(m.wrapping_mul(inv), 1, "{m}");
        for v in [0, 10, -10, i32::MAX, i32::MIN] {
            assert_eq!(math::decode_i32(math::encode_i32(v, m).unwrap(), m), v);
        }
    }
    for m in [3_i64, -0x2545_f491_4f6c_dd1d, i64::MAX] {
        let inv = math::inverse_i64(m).unwrap();
        assert_eq!(m.wrapping_mul(inv), 1, "{m}");
        assert_eq!(math::decode_i64(math::encode_i64(-5, m).unwrap(), m), -5);
    }
    for even in [0, 2, 12, i32::MIN] {
        assert_eq!(math::inverse_i32(even), None);
    }
    assert_eq!(math::inverse_i64(1 << 40), None);
}
