//! Programmatically built classes and hook tables shared by the tests.

use grafter_core::opcode::*;
use grafter_core::{AccessFlags, ClassFile, ClassHierarchy, Code, Field, Insn, Method};
use grafter_mixin::HookTable;
use grafter_transform::ClassBatch;

pub const OBJECT: &str = "java/lang/Object";

/// Hook table for the obfuscated class `a`, known as `Counter`.
///
/// `multiplier` applies to the `value` field.
pub fn counter_hooks(multiplier: Option<i64>) -> HookTable {
    let multiplier = multiplier.map_or_else(String::new, |m| format!(r#", "multiplier": {m}"#));
    let json = format!(
        r#"{{
            "classes": [ {{
                "name": "Counter", "obfName": "a",
                "fields": [ {{ "name": "value", "obfName": "b", "desc": "I"{multiplier} }} ],
                "methods": [
                    {{ "name": "foo", "obfName": "foo", "desc": "(II)I", "dummyValue": 5 }},
                    {{ "name": "bar", "obfName": "bar", "desc": "(I)V" }}
                ]
            }} ]
        }}"#
    );
    serde_json::from_str(&json).expect("fixture hook table")
}

/// `super()` for a constructor of a class extending `super_name`.
pub fn super_init(super_name: &str) -> Vec<Insn> {
    vec![
        Insn::var(ALOAD, 0),
        Insn::method(INVOKESPECIAL, super_name, "<init>", "()V", false),
    ]
}

/// The obfuscated class `a`:
///
/// ```text
/// int b;
/// a()              { super(); }
/// int foo(int x, int dummy) { return dummy; }
/// void bar(int x)  { this.b = x; }
/// ```
pub fn counter_class() -> ClassFile {
    let mut class = ClassFile::new("a", Some(OBJECT));
    class
        .add_field(Field::new(AccessFlags::empty(), "b", "I"))
        .expect("fresh field");
    let mut init = super_init(OBJECT);
    init.push(Insn::simple(RETURN));
    class.add_method(Method::new(
        AccessFlags::PUBLIC,
        "<init>",
        "()V",
        Some(Code::with_insns(init)),
    ));
    class.add_method(Method::new(
        AccessFlags::empty(),
        "foo",
        "(II)I",
        Some(Code::with_insns(vec![
            Insn::var(ILOAD, 2),
            Insn::simple(IRETURN),
        ])),
    ));
    class.add_method(Method::new(
        AccessFlags::empty(),
        "bar",
        "(I)V",
        Some(Code::with_insns(vec![
            Insn::var(ALOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::field(PUTFIELD, "a", "b", "I"),
            Insn::simple(RETURN),
        ])),
    ));
    class
}

/// Abstract mixin class with an optional concrete body per method.
pub fn mixin_class(name: &str, methods: Vec<(&str, &str, Option<Vec<Insn>>)>) -> ClassFile {
    let mut class = ClassFile::new(name, Some(OBJECT));
    class.access = AccessFlags::PUBLIC | AccessFlags::ABSTRACT;
    for (method, desc, body) in methods {
        let access = if body.is_some() {
            AccessFlags::PUBLIC
        } else {
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT
        };
        class.add_method(Method::new(access, method, desc, body.map(Code::with_insns)));
    }
    class
}

/// Serializes `classes` into a batch keyed by class name.
pub fn batch(classes: &[ClassFile]) -> ClassBatch {
    let hierarchy = ClassHierarchy::new();
    classes
        .iter()
        .map(|c| (c.name.clone(), c.to_bytes(&hierarchy).expect("fixture encodes")))
        .collect()
}

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
