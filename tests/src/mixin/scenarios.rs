use crate::fixtures::{batch, counter_class, counter_hooks, init_tracing, mixin_class};
use crate::vm::{Value, Vm};
use grafter_core::opcode::*;
use grafter_core::{AccessFlags, ClassFile, Insn};
use grafter_mixin::descriptor::{
    FieldSpec, HookedMethod, InjectSpec, MethodDecl, Placement, SetterSpec,
};
use grafter_mixin::{inject, math, InjectConfig, MixinDescriptor};
use grafter_transform::ClassBatch;

fn accessors() -> MixinDescriptor {
    let mut mixin = MixinDescriptor::new("Counter");
    mixin.getters.push(HookedMethod {
        hook: "value".into(),
        method: MethodDecl::new("getValue", "()I"),
        is_static: false,
    });
    mixin.setters.push(SetterSpec {
        hook: "value".into(),
        method: MethodDecl::new("setValue", "(I)V"),
        is_static: false,
        encode: true,
    });
    mixin
}

fn run(multiplier: Option<i64>, mixin: MixinDescriptor) -> ClassBatch {
    init_tracing();
    let mut batch = batch(&[counter_class()]);
    inject(
        counter_hooks(multiplier),
        &[mixin],
        &mut batch,
        InjectConfig::library(),
    )
    .unwrap();
    batch
}

fn method_insns(batch: &ClassBatch, name: &str, desc: &str) -> Vec<Insn> {
    let class = ClassFile::parse(batch.get("a").unwrap()).unwrap();
    let method = class.method(name, desc).unwrap();
    method.code.as_ref().unwrap().real_insns().cloned().collect()
}

#[test]
fn test_plain_accessors_round_trip() {
    let batch = run(None, accessors());
    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();

    for v in [0, 1, -1, 123_456, i32::MAX, i32::MIN] {
        vm.call("a", "setValue", "(I)V", vec![obj, Value::Int(v)]).unwrap();
        assert_eq!(vm.field(obj, "b", "I"), Value::Int(v));
        assert_eq!(
            vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
            Some(Value::Int(v))
        );
    }
}

#[test]
fn test_multiplied_accessors_encode_and_decode() {
    let batch = run(Some(7), accessors());
    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();

    vm.call("a", "setValue", "(I)V", vec![obj, Value::Int(10)]).unwrap();
    // 10 * 3067833783 mod 2^32
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(613_566_758));
    assert_eq!(
        vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
        Some(Value::Int(10))
    );

    vm.set_field(obj, "b", Value::Int(math::encode_i32(-99, 7).unwrap()));
    assert_eq!(
        vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
        Some(Value::Int(-99))
    );
}

#[test]
fn test_invocation_shim_passes_dummy_value() {
    let mut mixin = MixinDescriptor::new("Counter");
    mixin.invokes.push(HookedMethod {
        hook: "foo".into(),
        method: MethodDecl::new("callFoo", "(I)I"),
        is_static: false,
    });
    let batch = run(None, mixin);

    assert_eq!(
        method_insns(&batch, "callFoo", "(I)I"),
        vec![
            Insn::var(ALOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::push_int(5),
            Insn::method(INVOKEVIRTUAL, "a", "foo", "(II)I", false),
            Insn::simple(IRETURN),
        ]
    );

    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();
    for x in [0, 5, -17, 1 << 20] {
        assert_eq!(
            vm.call("a", "callFoo", "(I)I", vec![obj, Value::Int(x)]).unwrap(),
            Some(Value::Int(5))
        );
    }
}

#[test]
fn test_entry_callback_runs_before_original_body() {
    // onBar(int x) { seen = this.value; arg = x; }
    let callback = vec![
        Insn::var(ALOAD, 0),
        Insn::field(GETFIELD, "CounterMixin", "value", "I"),
        Insn::field(PUTSTATIC, "CounterMixin", "seen", "I"),
        Insn::var(ILOAD, 1),
        Insn::field(PUTSTATIC, "CounterMixin", "arg", "I"),
        Insn::simple(RETURN),
    ];
    let class = mixin_class("CounterMixin", vec![("onBar", "(I)V", Some(callback))]);
    let mut mixin = MixinDescriptor::new("Counter").with_class(class);
    mixin.fields.push(FieldSpec {
        name: "value".into(),
        desc: "I".into(),
        access: AccessFlags::empty(),
        shadow: Some("value".into()),
        getter: None,
        setter: None,
    });
    for name in ["seen", "arg"] {
        mixin.fields.push(FieldSpec {
            name: name.into(),
            desc: "I".into(),
            access: AccessFlags::PUBLIC | AccessFlags::STATIC,
            shadow: None,
            getter: None,
            setter: None,
        });
    }
    mixin.injects.push(InjectSpec {
        hook: "bar".into(),
        method: MethodDecl::new("onBar", "(I)V"),
        placement: Placement::Before,
        end: false,
    });
    let batch = run(None, mixin);

    let bar = method_insns(&batch, "bar", "(I)V");
    assert_eq!(
        bar[..3],
        [
            Insn::var(ALOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::method(INVOKEVIRTUAL, "a", "onBar", "(I)V", false),
        ]
    );
    assert!(method_insns(&batch, "onBar", "(I)V")
        .contains(&Insn::field(GETFIELD, "a", "b", "I")));

    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();
    vm.set_field(obj, "b", Value::Int(7));
    vm.call("a", "bar", "(I)V", vec![obj, Value::Int(42)]).unwrap();

    assert_eq!(vm.static_field("a", "seen", "I"), Value::Int(7));
    assert_eq!(vm.static_field("a", "arg", "I"), Value::Int(42));
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(42));
}
