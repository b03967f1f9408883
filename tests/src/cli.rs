use crate::fixtures::{counter_class, init_tracing, mixin_class};
use crate::vm::{Value, Vm};
use grafter_cli::commands::inject::{read_tree, run, InjectArgs};
use grafter_core::opcode::*;
use grafter_core::{ClassFile, ClassHierarchy, Insn};
use std::fs;
use std::path::{Path, PathBuf};

const HOOKS: &str = r#"{
    "classes": [ {
        "name": "Counter", "obfName": "a",
        "fields": [ { "name": "value", "obfName": "b", "desc": "I", "multiplier": 7 } ],
        "methods": [ { "name": "bar", "obfName": "bar", "desc": "(I)V" } ]
    } ]
}"#;

const MIXIN: &str = r#"{
    "target": "Counter",
    "class": "CounterMixin.class",
    "interfaces": [ "api/Counter" ],
    "fields": [ { "name": "value", "desc": "I", "shadow": "value" } ],
    "getters": [ { "hook": "value", "method": { "name": "getValue", "desc": "()I" } } ],
    "setters": [ { "hook": "value", "method": { "name": "setValue", "desc": "(I)V" } } ],
    "injects": [ { "hook": "bar", "method": { "name": "onBar", "desc": "(I)V" }, "placement": "after" } ]
}"#;

/// Lays out hooks, a mixin with its compiled class, and an input tree.
fn workspace(root: &Path) -> InjectArgs {
    let hierarchy = ClassHierarchy::new();
    fs::write(root.join("hooks.json"), HOOKS).unwrap();

    let mixins = root.join("mixins");
    fs::create_dir_all(&mixins).unwrap();
    // onBar(int x) { this.value = this.value + x; }
    let on_bar = vec![
        Insn::var(ALOAD, 0),
        Insn::var(ALOAD, 0),
        Insn::field(GETFIELD, "CounterMixin", "value", "I"),
        Insn::var(ILOAD, 1),
        Insn::simple(IADD),
        Insn::field(PUTFIELD, "CounterMixin", "value", "I"),
        Insn::simple(RETURN),
    ];
    let class = mixin_class(
        "CounterMixin",
        vec![
            ("getValue", "()I", None),
            ("setValue", "(I)V", None),
            ("onBar", "(I)V", Some(on_bar)),
        ],
    );
    fs::write(mixins.join("CounterMixin.class"), class.to_bytes(&hierarchy).unwrap()).unwrap();
    fs::write(mixins.join("counter.json"), MIXIN).unwrap();

    let input = root.join("in");
    fs::create_dir_all(input.join("obf")).unwrap();
    fs::write(input.join("obf/a.class"), counter_class().to_bytes(&hierarchy).unwrap()).unwrap();
    fs::write(input.join("readme.txt"), "untouched").unwrap();

    InjectArgs {
        hooks: root.join("hooks.json"),
        mixins: vec![mixins.join("counter.json")],
        input,
        output: root.join("out"),
        no_entry_point: true,
        parallel: false,
        classpath: Vec::new(),
        jdk: false,
        java_home: None,
    }
}

fn files(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                out.push((path.strip_prefix(root).unwrap().to_path_buf(), fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn test_inject_directory() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let args = workspace(dir.path());
    let report = run(&args).unwrap();
    assert_eq!(report.modified(), vec!["a"]);

    assert_eq!(fs::read(args.output.join("readme.txt")).unwrap(), b"untouched");
    let class = ClassFile::parse(&fs::read(args.output.join("obf/a.class")).unwrap()).unwrap();
    assert_eq!(class.interfaces, vec!["api/Counter".to_string()]);
    assert!(class.method("onBar", "(I)V").is_some());

    let tree = read_tree(&args.output).unwrap();
    let mut vm = Vm::from_batch(&tree.batch).unwrap();
    let obj = vm.construct("a").unwrap();
    vm.call("a", "setValue", "(I)V", vec![obj, Value::Int(10)]).unwrap();
    assert_eq!(
        vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
        Some(Value::Int(10))
    );
    // bar stores x raw, then the after-callback adds x through the shadow
    vm.call("a", "bar", "(I)V", vec![obj, Value::Int(4)]).unwrap();
    assert_eq!(vm.field(obj, "b", "I"), Value::Int(8));
    assert_eq!(
        vm.call("a", "getValue", "()I", vec![obj]).unwrap(),
        Some(Value::Int(56))
    );
}

#[test]
fn test_inject_output_is_a_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let first = workspace(dir.path());
    run(&first).unwrap();

    let second = InjectArgs {
        input: first.output.clone(),
        output: dir.path().join("again"),
        hooks: first.hooks.clone(),
        mixins: first.mixins.clone(),
        no_entry_point: true,
        parallel: true,
        classpath: Vec::new(),
        jdk: false,
        java_home: None,
    };
    let report = run(&second).unwrap();
    assert!(report.modified().is_empty());
    assert_eq!(files(&second.output), files(&first.output));
}

#[test]
fn test_entry_point_needs_engine_hook() {
    let dir = tempfile::tempdir().unwrap();
    let args = InjectArgs {
        no_entry_point: false,
        ..workspace(dir.path())
    };
    let err = run(&args).unwrap_err();
    assert!(err.to_string().contains("GameEngine"), "{err}");
    assert!(!args.output.exists());
}
