//! A small interpreter for the straight-line and branching integer code the
//! injector produces, enough to execute rewritten classes in tests.
//!
//! Calls that resolve to no loaded method are recorded in
//! [`Vm::external_calls`] and return a default value.

use grafter_core::opcode::*;
use grafter_core::{ClassFile, FieldType, Insn, Label, LdcValue, Method, MethodDescriptor};
use grafter_transform::ClassBatch;
use grafter_utils::errors::ClassFormatError;
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

/// Upper bound on executed instructions per top-level call.
const FUEL: usize = 100_000;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("format error: {0}")]
    Format(#[from] ClassFormatError),
    #[error("unsupported instruction {0}")]
    Unsupported(String),
    #[error("operand stack underflow in {0}")]
    Underflow(String),
    #[error("type confusion in {method}: expected {expected}")]
    Type { method: String, expected: &'static str },
    #[error("null dereference in {0}")]
    NullPointer(String),
    #[error("exception thrown in {0}")]
    Thrown(String),
    #[error("out of fuel")]
    OutOfFuel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// A heap reference; `None` is null.
    Ref(Option<usize>),
    /// Second half of a wide local.
    Top,
}

impl Value {
    fn default_for(desc: &str) -> Self {
        match FieldType::parse(desc) {
            Ok(FieldType::Long) => Self::Long(0),
            Ok(FieldType::Float) => Self::Float(0.0),
            Ok(FieldType::Double) => Self::Double(0.0),
            Ok(FieldType::Object(_) | FieldType::Array(_)) => Self::Ref(None),
            _ => Self::Int(0),
        }
    }

    const fn is_wide(self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }
}

#[derive(Debug, Clone)]
pub struct Object {
    pub class: String,
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct Vm {
    classes: HashMap<String, ClassFile>,
    heap: Vec<Object>,
    statics: HashMap<(String, String), Value>,
    /// `owner.name desc` of every call that left the loaded classes.
    pub external_calls: Vec<String>,
    fuel: usize,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_batch(batch: &ClassBatch) -> Result<Self, VmError> {
        let mut vm = Self::new();
        for (_, bytes) in batch.iter() {
            vm.load(ClassFile::parse(bytes)?);
        }
        Ok(vm)
    }

    pub fn load(&mut self, class: ClassFile) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Allocates an instance without running a constructor.
    pub fn alloc(&mut self, class: &str) -> Value {
        self.heap.push(Object {
            class: class.to_string(),
            fields: HashMap::new(),
        });
        Value::Ref(Some(self.heap.len() - 1))
    }

    /// Allocates an instance and runs its no-argument constructor.
    pub fn construct(&mut self, class: &str) -> Result<Value, VmError> {
        let obj = self.alloc(class);
        self.call(class, "<init>", "()V", vec![obj])?;
        Ok(obj)
    }

    pub fn object(&self, value: Value) -> Option<&Object> {
        match value {
            Value::Ref(Some(id)) => self.heap.get(id),
            _ => None,
        }
    }

    /// Raw value of an instance field, the default if never written.
    pub fn field(&self, obj: Value, name: &str, desc: &str) -> Value {
        self.object(obj)
            .and_then(|o| o.fields.get(name).copied())
            .unwrap_or_else(|| Value::default_for(desc))
    }

    pub fn set_field(&mut self, obj: Value, name: &str, value: Value) {
        if let Value::Ref(Some(id)) = obj {
            if let Some(o) = self.heap.get_mut(id) {
                o.fields.insert(name.to_string(), value);
            }
        }
    }

    pub fn static_field(&self, owner: &str, name: &str, desc: &str) -> Value {
        self.statics
            .get(&(owner.to_string(), name.to_string()))
            .copied()
            .unwrap_or_else(|| Value::default_for(desc))
    }

    pub fn set_static(&mut self, owner: &str, name: &str, value: Value) {
        self.statics
            .insert((owner.to_string(), name.to_string()), value);
    }

    /// Calls `owner.name desc`. For instance methods `args[0]` is the receiver.
    pub fn call(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, VmError> {
        self.fuel = FUEL;
        self.invoke(owner, name, desc, args)
    }

    fn resolve<'a>(
        &'a self,
        mut class: &'a str,
        name: &str,
        desc: &str,
    ) -> Option<(&'a ClassFile, &'a Method)> {
        loop {
            let file = self.classes.get(class)?;
            if let Some(method) = file.method(name, desc).filter(|m| m.code.is_some()) {
                return Some((file, method));
            }
            class = file.super_name.as_deref()?;
        }
    }

    fn invoke(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, VmError> {
        let signature = format!("{owner}.{name}{desc}");
        let found = self
            .resolve(owner, name, desc)
            .and_then(|(class, method)| Some((class.name.clone(), method.code.clone()?)));
        let Some((class_name, code)) = found else {
            trace!("external call {signature}");
            self.external_calls.push(signature);
            let ret = MethodDescriptor::parse(desc)?.ret;
            return Ok(ret.map(|t| Value::default_for(&t.to_string())));
        };
        let context = format!("{class_name}.{name}{desc}");

        let mut locals = Vec::new();
        for arg in args {
            locals.push(arg);
            if arg.is_wide() {
                locals.push(Value::Top);
            }
        }
        let labels: HashMap<Label, usize> = code
            .insns
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                Insn::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();
        let mut frame = Frame {
            stack: Vec::new(),
            locals,
            context,
        };

        let mut pc = 0;
        while let Some(insn) = code.insns.get(pc) {
            pc += 1;
            self.fuel = self.fuel.checked_sub(1).ok_or(VmError::OutOfFuel)?;
            match insn {
                Insn::Label(_) | Insn::Line(_) => {}
                Insn::Simple(op) => {
                    if let Some(ret) = self.simple(*op, &mut frame)? {
                        return Ok(ret);
                    }
                }
                Insn::IntOp { opcode, operand } if matches!(*opcode, BIPUSH | SIPUSH) => {
                    frame.push(Value::Int(*operand));
                }
                Insn::Var { opcode, index } => frame.var(*opcode, *index)?,
                Insn::Iinc { index, delta } => {
                    let i = usize::from(*index);
                    let v = frame.local_int(i)?;
                    frame.store(i, Value::Int(v.wrapping_add(i32::from(*delta))));
                }
                Insn::Type { opcode, class } => match *opcode {
                    NEW => {
                        let obj = self.alloc(class);
                        frame.push(obj);
                    }
                    CHECKCAST => {}
                    _ => return Err(VmError::Unsupported(insn.to_string())),
                },
                Insn::Field {
                    opcode,
                    owner,
                    name,
                    desc,
                } => match *opcode {
                    GETSTATIC => frame.push(self.static_field(owner, name, desc)),
                    PUTSTATIC => {
                        let v = frame.pop()?;
                        self.set_static(owner, name, v);
                    }
                    GETFIELD => {
                        let obj = frame.pop()?;
                        if obj == Value::Ref(None) {
                            return Err(VmError::NullPointer(frame.context.clone()));
                        }
                        frame.push(self.field(obj, name, desc));
                    }
                    PUTFIELD => {
                        let v = frame.pop()?;
                        let obj = frame.pop()?;
                        if obj == Value::Ref(None) {
                            return Err(VmError::NullPointer(frame.context.clone()));
                        }
                        self.set_field(obj, name, v);
                    }
                    _ => return Err(VmError::Unsupported(insn.to_string())),
                },
                Insn::Method {
                    opcode,
                    owner,
                    name,
                    desc,
                    ..
                } => {
                    let params = MethodDescriptor::parse(desc)?.params.len();
                    let receiver = usize::from(*opcode != INVOKESTATIC);
                    let at = frame
                        .stack
                        .len()
                        .checked_sub(params + receiver)
                        .ok_or_else(|| VmError::Underflow(frame.context.clone()))?;
                    let args = frame.stack.split_off(at);
                    let target = match (*opcode, args.first()) {
                        (INVOKEVIRTUAL | INVOKEINTERFACE, Some(obj)) => self
                            .object(*obj)
                            .map(|o| o.class.clone())
                            .ok_or_else(|| VmError::NullPointer(frame.context.clone()))?,
                        _ => owner.clone(),
                    };
                    if let Some(v) = self.invoke(&target, name, desc, args)? {
                        frame.push(v);
                    }
                }
                Insn::Ldc(value) => match value {
                    LdcValue::Int(v) => frame.push(Value::Int(*v)),
                    LdcValue::Long(v) => frame.push(Value::Long(*v)),
                    LdcValue::Float(bits) => frame.push(Value::Float(f32::from_bits(*bits))),
                    LdcValue::Double(bits) => frame.push(Value::Double(f64::from_bits(*bits))),
                    LdcValue::String(_) => {
                        let s = self.alloc("java/lang/String");
                        frame.push(s);
                    }
                    _ => return Err(VmError::Unsupported(insn.to_string())),
                },
                Insn::Jump { opcode, target } => {
                    if frame.branch(*opcode)? {
                        pc = labels
                            .get(target)
                            .copied()
                            .ok_or_else(|| VmError::Unsupported(insn.to_string()))?;
                    }
                }
                _ => return Err(VmError::Unsupported(insn.to_string())),
            }
        }
        Err(VmError::Unsupported(format!("fell off the end of {}", frame.context)))
    }

    /// Executes an operand-free instruction. `Some` means the method returned.
    fn simple(&mut self, op: u8, frame: &mut Frame) -> Result<Option<Option<Value>>, VmError> {
        match op {
            NOP => {}
            ACONST_NULL => frame.push(Value::Ref(None)),
            ICONST_M1..=ICONST_5 => frame.push(Value::Int(i32::from(op) - i32::from(ICONST_0))),
            LCONST_0 | LCONST_1 => frame.push(Value::Long(i64::from(op - LCONST_0))),
            IADD | ISUB | IMUL | IAND | IOR | IXOR => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.push(Value::Int(match op {
                    IADD => a.wrapping_add(b),
                    ISUB => a.wrapping_sub(b),
                    IMUL => a.wrapping_mul(b),
                    IAND => a & b,
                    IOR => a | b,
                    _ => a ^ b,
                }));
            }
            LADD | LSUB | LMUL => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Long(match op {
                    LADD => a.wrapping_add(b),
                    LSUB => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                }));
            }
            INEG => {
                let a = frame.pop_int()?;
                frame.push(Value::Int(a.wrapping_neg()));
            }
            I2L => {
                let a = frame.pop_int()?;
                frame.push(Value::Long(i64::from(a)));
            }
            L2I => {
                let a = frame.pop_long()?;
                frame.push(Value::Int(a as i32));
            }
            POP | POP2 => {
                frame.pop()?;
            }
            DUP => {
                let v = frame.pop()?;
                frame.push(v);
                frame.push(v);
            }
            SWAP => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(b);
                frame.push(a);
            }
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN => return Ok(Some(Some(frame.pop()?))),
            RETURN => return Ok(Some(None)),
            ATHROW => return Err(VmError::Thrown(frame.context.clone())),
            _ => return Err(VmError::Unsupported(mnemonic(op).to_string())),
        }
        Ok(None)
    }
}

/// Operand stack and locals of one activation. Wide values take a single
/// stack entry.
struct Frame {
    stack: Vec<Value>,
    locals: Vec<Value>,
    context: String,
}

impl Frame {
    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::Underflow(self.context.clone()))
    }

    fn pop_int(&mut self) -> Result<i32, VmError> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            _ => Err(self.confused("int")),
        }
    }

    fn pop_long(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            _ => Err(self.confused("long")),
        }
    }

    fn confused(&self, expected: &'static str) -> VmError {
        VmError::Type {
            method: self.context.clone(),
            expected,
        }
    }

    fn local_int(&self, index: usize) -> Result<i32, VmError> {
        match self.locals.get(index) {
            Some(Value::Int(v)) => Ok(*v),
            _ => Err(self.confused("int local")),
        }
    }

    fn store(&mut self, index: usize, v: Value) {
        let width = if v.is_wide() { 2 } else { 1 };
        if self.locals.len() < index + width {
            self.locals.resize(index + width, Value::Top);
        }
        self.locals[index] = v;
        if width == 2 {
            self.locals[index + 1] = Value::Top;
        }
    }

    fn var(&mut self, opcode: u8, index: u16) -> Result<(), VmError> {
        let i = usize::from(index);
        match opcode {
            ILOAD | LLOAD | FLOAD | DLOAD | ALOAD => {
                let v = self
                    .locals
                    .get(i)
                    .copied()
                    .filter(|v| *v != Value::Top)
                    .ok_or_else(|| self.confused("initialized local"))?;
                self.push(v);
            }
            ISTORE | LSTORE | FSTORE | DSTORE | ASTORE => {
                let v = self.pop()?;
                self.store(i, v);
            }
            _ => return Err(VmError::Unsupported(mnemonic(opcode).to_string())),
        }
        Ok(())
    }

    fn branch(&mut self, opcode: u8) -> Result<bool, VmError> {
        Ok(match opcode {
            GOTO | GOTO_W => true,
            IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE => {
                let a = self.pop_int()?;
                match opcode {
                    IFEQ => a == 0,
                    IFNE => a != 0,
                    IFLT => a < 0,
                    IFGE => a >= 0,
                    IFGT => a > 0,
                    _ => a <= 0,
                }
            }
            IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                match opcode {
                    IF_ICMPEQ => a == b,
                    IF_ICMPNE => a != b,
                    IF_ICMPLT => a < b,
                    IF_ICMPGE => a >= b,
                    IF_ICMPGT => a > b,
                    _ => a <= b,
                }
            }
            IFNULL => self.pop()? == Value::Ref(None),
            IFNONNULL => self.pop()? != Value::Ref(None),
            _ => return Err(VmError::Unsupported(mnemonic(opcode).to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafter_core::{AccessFlags, Code};

    #[test]
    fn test_runs_loop_with_branches() {
        let mut class = ClassFile::new("t", Some("java/lang/Object"));
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
        class.add_method(Method::new(AccessFlags::STATIC, "sum", "(I)I", Some(code)));

        let mut vm = Vm::new();
        vm.load(class);
        assert_eq!(vm.call("t", "sum", "(I)I", vec![Value::Int(4)]).unwrap(), Some(Value::Int(10)));
    }

    #[test]
    fn test_external_calls_are_recorded() {
        let mut class = ClassFile::new("t", Some("java/lang/Object"));
        class.add_method(Method::new(
            AccessFlags::PUBLIC,
            "<init>",
            "()V",
            Some(Code::with_insns(vec![
                Insn::var(ALOAD, 0),
                Insn::method(INVOKESPECIAL, "java/lang/Object", "<init>", "()V", false),
                Insn::simple(RETURN),
            ])),
        ));
        let mut vm = Vm::new();
        vm.load(class);
        vm.construct("t").unwrap();
        assert_eq!(vm.external_calls, vec!["java/lang/Object.<init>()V".to_string()]);
    }
}
