//! Instruction synthesis helpers shared by the adapters.

use grafter_core::hierarchy::OBJECT;
use grafter_core::opcode::*;
use grafter_core::{AccessFlags, ClassFile, Code, FieldType, Insn};
use grafter_utils::errors::AdapterError;

/// Loads consecutive parameters starting at local `slot`.
pub fn load_args<'a>(params: impl IntoIterator<Item = &'a FieldType>, mut slot: u16) -> Vec<Insn> {
    let mut out = Vec::new();
    for ty in params {
        out.push(Insn::var(ty.load_opcode(), slot));
        slot += ty.size();
    }
    out
}

/// The return instruction for a method returning `ret`.
pub fn return_insn(ret: Option<&FieldType>) -> Insn {
    Insn::simple(ret.map_or(RETURN, FieldType::return_opcode))
}

/// Pushes `value` as a constant of type `ty`.
pub fn push_constant(ty: &FieldType, value: i64, context: &str) -> Result<Insn, AdapterError> {
    match ty {
        FieldType::Long => Ok(Insn::push_long(value)),
        t if t.is_int_like() => Ok(Insn::push_int(value as i32)),
        other => Err(AdapterError::DescriptorMismatch {
            context: context.to_string(),
            msg: format!("cannot synthesize a constant of type {other}"),
        }),
    }
}

/// Converts the value on top of the stack from `from` to `to`.
///
/// References narrow with `checkcast`; `int`-like types share a stack
/// representation. Anything else is rejected.
pub fn convert(from: &FieldType, to: &FieldType, context: &str) -> Result<Vec<Insn>, AdapterError> {
    if from == to || (from.is_int_like() && to.is_int_like()) {
        return Ok(Vec::new());
    }
    if from.is_reference() && to.is_reference() {
        if matches!(to, FieldType::Object(name) if name == OBJECT) {
            return Ok(Vec::new());
        }
        return Ok(vec![Insn::type_insn(CHECKCAST, to.internal_name())]);
    }
    Err(AdapterError::DescriptorMismatch {
        context: context.to_string(),
        msg: format!("{from} is not convertible to {to}"),
    })
}

/// Pops a value of type `ty`, if any.
pub fn discard(ty: Option<&FieldType>) -> Option<Insn> {
    ty.map(|t| Insn::simple(if t.is_wide() { POP2 } else { POP }))
}

/// Multiplies the value on top of the stack by `factor`.
pub fn multiply(ty: &FieldType, factor: i64, context: &str) -> Result<Vec<Insn>, AdapterError> {
    let op = match ty {
        FieldType::Long => LMUL,
        FieldType::Int => IMUL,
        other => {
            return Err(AdapterError::DescriptorMismatch {
                context: context.to_string(),
                msg: format!("multiplier on a field of type {other}"),
            })
        }
    };
    Ok(vec![push_constant(ty, factor, context)?, Insn::simple(op)])
}

/// First local slot not used by the parameters or any instruction of `code`.
pub fn free_local(code: &Code, params_slots: u16) -> u16 {
    code.insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Var { opcode, index } => Some(index + if is_wide_var(*opcode) { 2 } else { 1 }),
            Insn::Iinc { index, .. } => Some(index + 1),
            _ => None,
        })
        .chain(code.locals.iter().map(|l| l.index + 1))
        .fold(params_slots.max(code.max_locals), u16::max)
}

const fn is_wide_var(opcode: u8) -> bool {
    matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE)
}

/// Opcode for calling `name desc` on an instance of `class`.
pub fn virtual_call(class: &ClassFile, owner: &str, name: &str, desc: &str) -> (u8, bool) {
    if class.is_interface() {
        return (INVOKEINTERFACE, true);
    }
    let private = owner == class.name
        && class
            .method(name, desc)
            .is_some_and(|m| m.access.contains(AccessFlags::PRIVATE));
    (if private { INVOKESPECIAL } else { INVOKEVIRTUAL }, false)
}

/// Builds a public, concrete method from a straight-line body.
pub fn synthesize(name: &str, desc: &str, insns: Vec<Insn>) -> grafter_core::Method {
    grafter_core::Method::new(AccessFlags::PUBLIC, name, desc, Some(Code::with_insns(insns)))
}
