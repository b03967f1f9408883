use crate::fixtures::{batch, counter_class, init_tracing};
use crate::vm::{Value, Vm};
use grafter_core::opcode::*;
use grafter_core::{AccessFlags, ClassFile, Code, Insn, Method};
use grafter_transform::adapters::{AddGetter, FieldAccess, InjectCallback, InjectTarget, Placement};
use grafter_transform::{Adapter, AdapterContext, AdapterGroup, MemberRef};
use grafter_utils::errors::{AdapterError, InjectError};

/// `static void markN() { log = log * 10 + N; }`
fn marker(id: i32) -> Method {
    Method::new(
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        &format!("mark{id}"),
        "()V",
        Some(Code::with_insns(vec![
            Insn::field(GETSTATIC, "a", "log", "I"),
            Insn::push_int(10),
            Insn::simple(IMUL),
            Insn::push_int(id),
            Insn::simple(IADD),
            Insn::field(PUTSTATIC, "a", "log", "I"),
            Insn::simple(RETURN),
        ])),
    )
}

fn marker_callback(id: i32) -> InjectCallback {
    InjectCallback::new(
        InjectTarget::Method {
            name: "bar".into(),
            desc: "(I)V".into(),
        },
        Placement::Before,
        false,
        MemberRef::new("a", &format!("mark{id}"), "()V"),
        INVOKESTATIC,
    )
}

fn marked_class() -> ClassFile {
    let mut class = counter_class();
    class.add_method(marker(1));
    class.add_method(marker(2));
    class
}

/// Registers the two marker callbacks in `order` and returns the log
/// written by one call to `bar`.
fn run_markers(order: [i32; 2]) -> i32 {
    init_tracing();
    let mut group = AdapterGroup::new("markers");
    for id in order {
        group.add_adapter("a", marker_callback(id));
    }
    let mut batch = batch(&[marked_class()]);
    let report = group.apply(&mut batch, false).unwrap();
    assert_eq!(report.modified, vec!["a".to_string()]);

    let mut vm = Vm::from_batch(&batch).unwrap();
    let obj = vm.construct("a").unwrap();
    vm.call("a", "bar", "(I)V", vec![obj, Value::Int(1)]).unwrap();
    match vm.static_field("a", "log", "I") {
        Value::Int(log) => log,
        other => panic!("log is {other:?}"),
    }
}

#[test]
fn test_chain_applies_in_registration_order() {
    // each before-callback is prepended, so the last registered runs first
    assert_eq!(run_markers([1, 2]), 21);
    assert_eq!(run_markers([2, 1]), 12);
}

#[test]
fn test_missing_target_reported_once_per_pass() {
    let mut group = AdapterGroup::new("pre-copy");
    group.add_adapter("zz", marker_callback(1));
    group.add_adapter("zz", marker_callback(2));
    group.add_adapter(
        "a",
        AddGetter::new("getB", "()I", MemberRef::new("a", "b", "I"), FieldAccess::Instance, None),
    );

    let mut batch = batch(&[counter_class()]);
    let report = group.apply(&mut batch, true).unwrap();
    assert_eq!(report.missing, vec!["zz".to_string()]);
    assert_eq!(report.modified, vec!["a".to_string()]);
}

#[derive(Debug)]
struct Failing;

impl Adapter for Failing {
    fn name(&self) -> &'static str {
        "Failing"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        Err(AdapterError::MissingMethod {
            owner: class.name.clone(),
            name: "absent".into(),
            desc: "()V".into(),
        })
    }
}

#[test]
fn test_failure_mid_chain_leaves_batch_untouched() {
    let mut group = AdapterGroup::new("pre-copy");
    group.add_adapter(
        "a",
        AddGetter::new("getB", "()I", MemberRef::new("a", "b", "I"), FieldAccess::Instance, None),
    );
    group.add_adapter("a", Failing);

    let mut batch = batch(&[counter_class()]);
    let before = batch.clone();
    let err = group.apply(&mut batch, false).unwrap_err();
    assert!(
        matches!(&err, InjectError::Adapter { class, adapter: "Failing", .. } if class == "a"),
        "{err}"
    );
    assert_eq!(batch, before);
}
