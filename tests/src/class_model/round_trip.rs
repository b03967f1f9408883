use crate::fixtures::{counter_class, OBJECT};
use crate::vm::{Value, Vm};
use grafter_core::opcode::*;
use grafter_core::frames::VerificationType;
use grafter_core::hierarchy::ClassHeader;
use grafter_core::{AccessFlags, ClassFile, ClassHierarchy, Code, Insn, Method};
use grafter_utils::errors::ClassFormatError;

/// `static int sum(int n) { int s = 0; while (n > 0) { s += n; n--; } return s; }`
fn sum_method() -> Method {
    let mut code = Code::new();
    let head = code.new_label();
    let done = code.new_label();
    code.insns = vec![
        Insn::simple(ICONST_0),
        Insn::var(ISTORE, 1),
        Insn::Label(head),
        Insn::var(ILOAD, 0),
        Insn::jump(IFLE, done),
        Insn::var(ILOAD, 1),
        Insn::var(ILOAD, 0),
        Insn::simple(IADD),
        Insn::var(ISTORE, 1),
        Insn::Iinc { index: 0, delta: -1 },
        Insn::jump(GOTO, head),
        Insn::Label(done),
        Insn::var(ILOAD, 1),
        Insn::simple(IRETURN),
    ];
    Method::new(AccessFlags::PUBLIC | AccessFlags::STATIC, "sum", "(I)I", Some(code))
}

#[test]
fn test_loop_gets_frames_and_runs() {
    let mut class = ClassFile::new("t", Some(OBJECT));
    class.add_method(sum_method());
    let bytes = class.to_bytes(&ClassHierarchy::new()).unwrap();

    let parsed = ClassFile::parse(&bytes).unwrap();
    let code = parsed.method("sum", "(I)I").unwrap().code.as_ref().unwrap();
    assert_eq!((code.max_stack, code.max_locals), (2, 2));
    assert_eq!(code.frames.as_ref().map(Vec::len), Some(2));

    let mut vm = Vm::new();
    vm.load(parsed);
    assert_eq!(
        vm.call("t", "sum", "(I)I", vec![Value::Int(100)]).unwrap(),
        Some(Value::Int(5050))
    );
}

#[test]
fn test_edit_recomputes_only_touched_method() {
    let mut class = counter_class();
    class.add_method(sum_method());
    let parsed = ClassFile::parse(&class.to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();
    let untouched = parsed.method("sum", "(I)I").unwrap().code.clone();

    let mut edited = parsed.clone();
    let bar = edited.method_mut("bar", "(I)V").unwrap().code.as_mut().unwrap();
    // bar(x) { this.b = x + x; }
    bar.prepend(vec![
        Insn::var(ILOAD, 1),
        Insn::var(ILOAD, 1),
        Insn::simple(IADD),
        Insn::var(ISTORE, 1),
    ]);
    assert!(bar.frames.is_none());

    let reparsed = ClassFile::parse(&edited.to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();
    assert_eq!(reparsed.method("sum", "(I)I").unwrap().code, untouched);

    let mut vm = Vm::new();
    vm.load(reparsed);
    let obj = vm.construct("a").unwrap();
    vm.call("a", "bar", "(I)V", vec![obj, Value::Int(8)]).unwrap();
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(16));
}

#[test]
fn test_dead_code_is_neutralized() {
    let mut code = Code::new();
    let end = code.new_label();
    code.insns = vec![
        Insn::jump(GOTO, end),
        Insn::simple(ICONST_1),
        Insn::simple(POP),
        Insn::Label(end),
        Insn::simple(ICONST_3),
        Insn::simple(IRETURN),
    ];
    let mut class = ClassFile::new("t", Some(OBJECT));
    class.add_method(Method::new(AccessFlags::STATIC, "three", "()I", Some(code)));

    let parsed = ClassFile::parse(&class.to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();
    let body = parsed.method("three", "()I").unwrap().code.as_ref().unwrap();
    assert!(body.real_insns().any(|i| *i == Insn::simple(ATHROW)));

    let mut vm = Vm::new();
    vm.load(parsed);
    assert_eq!(vm.call("t", "three", "()I", vec![]).unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_truncated_class_is_malformed() {
    let bytes = counter_class().to_bytes(&ClassHierarchy::new()).unwrap();
    for len in [0, 3, 9, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(
                ClassFile::parse(&bytes[..len]),
                Err(ClassFormatError::UnexpectedEof(_))
            ),
            "prefix of {len} bytes"
        );
    }
}

/// `static int far(boolean z) { if (z) { <40000 nops> return 1; } return 2; }`
fn far_branch_method() -> Method {
    let mut code = Code::new();
    let skip = code.new_label();
    code.insns = vec![Insn::var(ILOAD, 0), Insn::jump(IFEQ, skip)];
    code.insns.extend((0..40_000).map(|_| Insn::simple(NOP)));
    code.insns.extend([
        Insn::simple(ICONST_1),
        Insn::simple(IRETURN),
        Insn::Label(skip),
        Insn::simple(ICONST_2),
        Insn::simple(IRETURN),
    ]);
    Method::new(AccessFlags::STATIC, "far", "(Z)I", Some(code))
}

#[test]
fn test_branches_past_32k_run_after_round_trip() {
    let mut class = ClassFile::new("t", Some(OBJECT));
    class.add_method(far_branch_method());
    let bytes = class.to_bytes(&ClassHierarchy::new()).unwrap();

    let parsed = ClassFile::parse(&bytes).unwrap();
    let code = parsed.method("far", "(Z)I").unwrap().code.as_ref().unwrap();
    assert!(code.real_insns().any(|i| *i == Insn::simple(NOP)));
    let reparsed = ClassFile::parse(&parsed.to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();

    let mut vm = Vm::new();
    vm.load(reparsed);
    assert_eq!(vm.call("t", "far", "(Z)I", vec![Value::Int(0)]).unwrap(), Some(Value::Int(2)));
    assert_eq!(vm.call("t", "far", "(Z)I", vec![Value::Int(1)]).unwrap(), Some(Value::Int(1)));
}

/// `static int size(boolean z) { return (z ? new ArrayList() : new LinkedList()).size(); }`
fn list_size_class() -> ClassFile {
    let mut code = Code::new();
    let other = code.new_label();
    let join = code.new_label();
    let construct = |class: &str| {
        [
            Insn::type_insn(NEW, class),
            Insn::simple(DUP),
            Insn::method(INVOKESPECIAL, class, "<init>", "()V", false),
        ]
    };
    code.insns = vec![Insn::var(ILOAD, 0), Insn::jump(IFEQ, other)];
    code.insns.extend(construct("java/util/ArrayList"));
    code.insns.push(Insn::jump(GOTO, join));
    code.insns.push(Insn::Label(other));
    code.insns.extend(construct("java/util/LinkedList"));
    code.insns.extend([
        Insn::Label(join),
        Insn::method(INVOKEVIRTUAL, "java/util/AbstractList", "size", "()I", false),
        Insn::simple(IRETURN),
    ]);
    let mut class = ClassFile::new("t", Some(OBJECT));
    class.add_method(Method::new(AccessFlags::STATIC, "size", "(Z)I", Some(code)));
    class
}

fn join_stack(class: &ClassFile) -> Vec<VerificationType> {
    let code = class.method("size", "(Z)I").unwrap().code.as_ref().unwrap();
    code.frames
        .iter()
        .flatten()
        .find(|(_, frame)| !frame.stack.is_empty())
        .map(|(_, frame)| frame.stack.clone())
        .unwrap()
}

#[test]
fn test_edited_method_keeps_join_types_from_its_frames() {
    // Frames as a compiler with the JDK on its classpath would emit them.
    let mut jdk = ClassHierarchy::new();
    for (name, super_name) in [
        ("java/util/AbstractList", OBJECT),
        ("java/util/ArrayList", "java/util/AbstractList"),
        ("java/util/LinkedList", "java/util/AbstractList"),
    ] {
        jdk.insert(ClassHeader {
            name: name.into(),
            super_name: Some(super_name.into()),
            interfaces: Vec::new(),
            is_interface: false,
        });
    }
    let compiled = ClassFile::parse(&list_size_class().to_bytes(&jdk).unwrap()).unwrap();
    let abstract_list = vec![VerificationType::Object("java/util/AbstractList".into())];
    assert_eq!(join_stack(&compiled), abstract_list);

    let mut edited = compiled.clone();
    let code = edited.method_mut("size", "(Z)I").unwrap().code.as_mut().unwrap();
    code.prepend(vec![Insn::simple(NOP)]);
    let rewritten = ClassFile::parse(&edited.to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();
    assert_eq!(join_stack(&rewritten), abstract_list);

    let fresh = ClassFile::parse(&list_size_class().to_bytes(&ClassHierarchy::new()).unwrap()).unwrap();
    assert_eq!(
        join_stack(&fresh),
        vec![VerificationType::Object(OBJECT.into())]
    );
}
