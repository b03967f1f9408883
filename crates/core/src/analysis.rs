//! Recomputation of stack map frames, `max_stack` and `max_locals` for edited
//! method bodies.
//!
//! A worklist abstract interpreter runs over the real instructions. Join
//! points merge reference types through the [`TypeHierarchy`]. Unreachable
//! code is overwritten with `nop ... athrow` and cut out of exception ranges,
//! so every emitted frame describes reachable state.
//!
//! Frames a body carried before it was edited serve as hints: where the
//! hierarchy can only offer `java/lang/Object` for a join, the type the
//! original compiler recorded at that label is kept. This matters for classes
//! the hierarchy does not know, such as library types.

use crate::access::AccessFlags;
use crate::class_file::{Code, Handler, Method};
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::frames::{initial_locals, Frame, VerificationType as V};
use crate::hierarchy::{TypeHierarchy, OBJECT};
use crate::instruction::{Insn, Label, LdcValue};
use crate::opcode::{self, *};
use grafter_utils::errors::WriteError;
use std::collections::{BTreeMap, HashMap};

/// Abstract state before one instruction. Locals are expanded: a long or
/// double occupies its slot plus a trailing `Top`.
#[derive(Debug, Clone, PartialEq)]
struct State {
    locals: Vec<V>,
    stack: Vec<V>,
}

struct Analyzer<'a> {
    class_name: &'a str,
    method: String,
    hierarchy: &'a dyn TypeHierarchy,
}

fn expand(compressed: &[V], max_locals: usize) -> Vec<V> {
    let mut locals = Vec::with_capacity(max_locals);
    for vtype in compressed {
        let wide = vtype.is_wide();
        locals.push(vtype.clone());
        if wide {
            locals.push(V::Top);
        }
    }
    if locals.len() < max_locals {
        locals.resize(max_locals, V::Top);
    }
    locals
}

fn compress(locals: &[V]) -> Vec<V> {
    let mut out = Vec::with_capacity(locals.len());
    let mut i = 0;
    while i < locals.len() {
        let vtype = &locals[i];
        out.push(vtype.clone());
        i += if vtype.is_wide() { 2 } else { 1 };
    }
    while out.last() == Some(&V::Top) {
        out.pop();
    }
    out
}

fn slots(stack: &[V]) -> usize {
    stack.iter().map(|v| if v.is_wide() { 2 } else { 1 }).sum()
}

fn array_of(element: &str) -> String {
    if element.starts_with('[') {
        format!("[{element}")
    } else {
        format!("[L{element};")
    }
}

fn newarray_type(atype: i32) -> Option<&'static str> {
    Some(match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        _ => return None,
    })
}

impl Analyzer<'_> {
    fn underflow(&self, index: usize) -> WriteError {
        WriteError::StackUnderflow {
            method: self.method.clone(),
            index,
        }
    }

    fn verify(&self, msg: impl Into<String>) -> WriteError {
        WriteError::Verify {
            method: self.method.clone(),
            msg: msg.into(),
        }
    }

    fn merge_refs(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        match (a.strip_prefix('['), b.strip_prefix('[')) {
            (Some(ea), Some(eb)) => {
                let object = |e: &str| {
                    e.strip_prefix('L')
                        .and_then(|e| e.strip_suffix(';'))
                        .map(str::to_string)
                };
                match (object(ea), object(eb)) {
                    (Some(oa), Some(ob)) => {
                        format!("[L{};", self.hierarchy.common_supertype(&oa, &ob))
                    }
                    _ if ea.starts_with('[') && eb.starts_with('[') => {
                        format!("[{}", self.merge_refs(ea, eb))
                    }
                    _ => OBJECT.to_string(),
                }
            }
            (None, None) => self.hierarchy.common_supertype(a, b),
            _ => OBJECT.to_string(),
        }
    }

    fn merge_type(&self, a: &V, b: &V) -> V {
        match (a, b) {
            _ if a == b => a.clone(),
            (V::Null, V::Object(_)) => b.clone(),
            (V::Object(_), V::Null) => a.clone(),
            (V::Object(x), V::Object(y)) => V::Object(self.merge_refs(x, y)),
            _ => V::Top,
        }
    }

    /// Replaces a merged type by the hinted one where the merge lost
    /// precision the hint still has.
    fn pin(&self, state: &mut State, hint: &State) {
        let stack = if state.stack.len() == hint.stack.len() {
            hint.stack.as_slice()
        } else {
            &[]
        };
        let pairs = state
            .locals
            .iter_mut()
            .zip(&hint.locals)
            .chain(state.stack.iter_mut().zip(stack));
        for (merged, hinted) in pairs {
            if let (V::Object(have), V::Object(want)) = (&*merged, hinted) {
                if have != want && self.hierarchy.is_assignable(have, want) {
                    *merged = hinted.clone();
                }
            }
        }
    }

    /// Merges `incoming` into `slot`. Returns true when the slot changed.
    fn merge_into(
        &self,
        slot: &mut Option<State>,
        incoming: &State,
        index: usize,
        hint: Option<&State>,
    ) -> Result<bool, WriteError> {
        let Some(current) = slot else {
            *slot = Some(incoming.clone());
            return Ok(true);
        };
        if current.stack.len() != incoming.stack.len() {
            return Err(WriteError::InconsistentStack {
                method: self.method.clone(),
                index,
            });
        }
        let mut merged = current.clone();
        for (mine, theirs) in merged
            .locals
            .iter_mut()
            .chain(merged.stack.iter_mut())
            .zip(incoming.locals.iter().chain(incoming.stack.iter()))
        {
            *mine = self.merge_type(mine, theirs);
        }
        if let Some(hint) = hint {
            self.pin(&mut merged, hint);
        }
        if merged == *current {
            return Ok(false);
        }
        *current = merged;
        Ok(true)
    }

    fn pop(&self, stack: &mut Vec<V>, index: usize) -> Result<V, WriteError> {
        stack.pop().ok_or_else(|| self.underflow(index))
    }

    fn pop_n(&self, stack: &mut Vec<V>, n: usize, index: usize) -> Result<(), WriteError> {
        for _ in 0..n {
            self.pop(stack, index)?;
        }
        Ok(())
    }

    fn set_local(&self, locals: &mut Vec<V>, slot: usize, value: V) {
        let wide = value.is_wide();
        let needed = slot + if wide { 2 } else { 1 };
        if locals.len() < needed {
            locals.resize(needed, V::Top);
        }
        if slot > 0 && locals[slot - 1].is_wide() {
            locals[slot - 1] = V::Top;
        }
        locals[slot] = value;
        if wide {
            locals[slot + 1] = V::Top;
        }
    }

    fn ldc_type(value: &LdcValue) -> Result<V, WriteError> {
        Ok(match value {
            LdcValue::Int(_) => V::Integer,
            LdcValue::Float(_) => V::Float,
            LdcValue::Long(_) => V::Long,
            LdcValue::Double(_) => V::Double,
            LdcValue::String(_) => V::Object("java/lang/String".into()),
            LdcValue::Class(_) => V::Object("java/lang/Class".into()),
            LdcValue::MethodType(_) => V::Object("java/lang/invoke/MethodType".into()),
            LdcValue::Handle(_) => V::Object("java/lang/invoke/MethodHandle".into()),
            LdcValue::Dynamic { desc, .. } => V::of(&FieldType::parse(desc)?),
        })
    }

    fn invoke(
        &self,
        state: &mut State,
        desc: &str,
        receiver: Option<(&str, &str)>,
        index: usize,
    ) -> Result<(), WriteError> {
        let desc = MethodDescriptor::parse(desc)?;
        self.pop_n(&mut state.stack, desc.params.len(), index)?;
        if let Some((owner, name)) = receiver {
            let target = self.pop(&mut state.stack, index)?;
            if name == "<init>" {
                let initialized = match &target {
                    V::UninitializedThis => V::Object(self.class_name.to_string()),
                    V::Uninitialized(_) => V::Object(owner.to_string()),
                    _ => return Err(self.verify("<init> called on an initialized value")),
                };
                for v in state.locals.iter_mut().chain(state.stack.iter_mut()) {
                    if *v == target {
                        *v = initialized.clone();
                    }
                }
            }
        }
        if let Some(ret) = &desc.ret {
            state.stack.push(V::of(ret));
        }
        Ok(())
    }

    /// Applies one instruction to `state`. `new_label` is the label bound to
    /// this instruction, used for `new`.
    fn execute(
        &self,
        insn: &Insn,
        state: &mut State,
        index: usize,
        new_label: Option<Label>,
    ) -> Result<(), WriteError> {
        let stack = &mut state.stack;
        match insn {
            Insn::Label(_) | Insn::Line(_) => {}
            Insn::Simple(op) => match *op {
                NOP => {}
                ACONST_NULL => stack.push(V::Null),
                ICONST_M1..=ICONST_5 => stack.push(V::Integer),
                LCONST_0 | LCONST_1 => stack.push(V::Long),
                FCONST_0..=FCONST_2 => stack.push(V::Float),
                DCONST_0 | DCONST_1 => stack.push(V::Double),
                IALOAD | BALOAD | CALOAD | SALOAD => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Integer);
                }
                LALOAD => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Long);
                }
                FALOAD => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Float);
                }
                DALOAD => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Double);
                }
                AALOAD => {
                    self.pop(stack, index)?;
                    let array = self.pop(stack, index)?;
                    let element = match &array {
                        V::Object(desc) if desc.starts_with('[') => {
                            V::of(&FieldType::parse(&desc[1..])?)
                        }
                        _ => V::Null,
                    };
                    stack.push(element);
                }
                IASTORE..=SASTORE => self.pop_n(stack, 3, index)?,
                POP => {
                    self.pop(stack, index)?;
                }
                POP2 => {
                    if !self.pop(stack, index)?.is_wide() {
                        self.pop(stack, index)?;
                    }
                }
                DUP => {
                    let v = self.pop(stack, index)?;
                    stack.extend([v.clone(), v]);
                }
                DUP_X1 => {
                    let v1 = self.pop(stack, index)?;
                    let v2 = self.pop(stack, index)?;
                    stack.extend([v1.clone(), v2, v1]);
                }
                DUP_X2 => {
                    let v1 = self.pop(stack, index)?;
                    let v2 = self.pop(stack, index)?;
                    if v2.is_wide() {
                        stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v3 = self.pop(stack, index)?;
                        stack.extend([v1.clone(), v3, v2, v1]);
                    }
                }
                DUP2 => {
                    let v1 = self.pop(stack, index)?;
                    if v1.is_wide() {
                        stack.extend([v1.clone(), v1]);
                    } else {
                        let v2 = self.pop(stack, index)?;
                        stack.extend([v2.clone(), v1.clone(), v2, v1]);
                    }
                }
                DUP2_X1 => {
                    let v1 = self.pop(stack, index)?;
                    if v1.is_wide() {
                        let v2 = self.pop(stack, index)?;
                        stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v2 = self.pop(stack, index)?;
                        let v3 = self.pop(stack, index)?;
                        stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    }
                }
                DUP2_X2 => {
                    let v1 = self.pop(stack, index)?;
                    if v1.is_wide() {
                        let v2 = self.pop(stack, index)?;
                        if v2.is_wide() {
                            stack.extend([v1.clone(), v2, v1]);
                        } else {
                            let v3 = self.pop(stack, index)?;
                            stack.extend([v1.clone(), v3, v2, v1]);
                        }
                    } else {
                        let v2 = self.pop(stack, index)?;
                        let v3 = self.pop(stack, index)?;
                        if v3.is_wide() {
                            stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                        } else {
                            let v4 = self.pop(stack, index)?;
                            stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                        }
                    }
                }
                SWAP => {
                    let v1 = self.pop(stack, index)?;
                    let v2 = self.pop(stack, index)?;
                    stack.extend([v1, v2]);
                }
                IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR
                | LCMP | FCMPL | FCMPG | DCMPL | DCMPG => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Integer);
                }
                LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR | LSHL | LSHR | LUSHR => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Long);
                }
                FADD | FSUB | FMUL | FDIV | FREM => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Float);
                }
                DADD | DSUB | DMUL | DDIV | DREM => {
                    self.pop_n(stack, 2, index)?;
                    stack.push(V::Double);
                }
                INEG | L2I | F2I | D2I | I2B | I2C | I2S | ARRAYLENGTH => {
                    self.pop(stack, index)?;
                    stack.push(V::Integer);
                }
                LNEG | I2L | F2L | D2L => {
                    self.pop(stack, index)?;
                    stack.push(V::Long);
                }
                FNEG | I2F | L2F | D2F => {
                    self.pop(stack, index)?;
                    stack.push(V::Float);
                }
                DNEG | I2D | L2D | F2D => {
                    self.pop(stack, index)?;
                    stack.push(V::Double);
                }
                IRETURN..=ARETURN | ATHROW | MONITORENTER | MONITOREXIT => {
                    self.pop(stack, index)?;
                }
                RETURN => {}
                other => {
                    return Err(self.verify(format!("unexpected {}", opcode::mnemonic(other))))
                }
            },
            Insn::IntOp { opcode, operand } => {
                if *opcode == NEWARRAY {
                    self.pop(stack, index)?;
                    let desc = newarray_type(*operand)
                        .ok_or_else(|| self.verify(format!("newarray type {operand}")))?;
                    stack.push(V::Object(desc.into()));
                } else {
                    stack.push(V::Integer);
                }
            }
            Insn::Var { opcode, index: slot } => {
                let slot = usize::from(*slot);
                match *opcode {
                    ILOAD => stack.push(V::Integer),
                    LLOAD => stack.push(V::Long),
                    FLOAD => stack.push(V::Float),
                    DLOAD => stack.push(V::Double),
                    ALOAD => stack.push(state.locals.get(slot).cloned().unwrap_or(V::Top)),
                    ISTORE | LSTORE | FSTORE | DSTORE | ASTORE => {
                        let v = self.pop(stack, index)?;
                        self.set_local(&mut state.locals, slot, v);
                    }
                    _ => return Err(self.verify("ret is not supported")),
                }
            }
            Insn::Iinc { index: slot, .. } => {
                self.set_local(&mut state.locals, usize::from(*slot), V::Integer);
            }
            Insn::Type { opcode, class } => match *opcode {
                NEW => {
                    let label = new_label.ok_or_else(|| self.verify("unlabelled new"))?;
                    stack.push(V::Uninitialized(label));
                }
                ANEWARRAY => {
                    self.pop(stack, index)?;
                    stack.push(V::Object(array_of(class)));
                }
                CHECKCAST => {
                    self.pop(stack, index)?;
                    stack.push(V::Object(class.clone()));
                }
                _ => {
                    self.pop(stack, index)?;
                    stack.push(V::Integer);
                }
            },
            Insn::Field { opcode, desc, .. } => {
                let ty = V::of(&FieldType::parse(desc)?);
                match *opcode {
                    GETSTATIC => stack.push(ty),
                    PUTSTATIC => {
                        self.pop(stack, index)?;
                    }
                    GETFIELD => {
                        self.pop(stack, index)?;
                        stack.push(ty);
                    }
                    _ => self.pop_n(stack, 2, index)?,
                }
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } => {
                let receiver = (*opcode != INVOKESTATIC).then_some((owner.as_str(), name.as_str()));
                self.invoke(state, desc, receiver, index)?;
            }
            Insn::InvokeDynamic { desc, .. } => self.invoke(state, desc, None, index)?,
            Insn::Ldc(value) => stack.push(Self::ldc_type(value)?),
            Insn::Jump { opcode, .. } => match *opcode {
                GOTO | GOTO_W => {}
                JSR | JSR_W => return Err(self.verify("jsr is not supported")),
                op if opcode::is_binary_branch(op) => self.pop_n(stack, 2, index)?,
                _ => {
                    self.pop(stack, index)?;
                }
            },
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop(stack, index)?;
            }
            Insn::MultiANewArray { class, dims } => {
                self.pop_n(stack, usize::from(*dims), index)?;
                stack.push(V::Object(class.clone()));
            }
        }
        Ok(())
    }
}

/// Real instruction index of every label; labels at the very end map to
/// `real_count`.
fn label_positions(code: &Code) -> HashMap<Label, usize> {
    let mut positions = HashMap::new();
    let mut real = 0;
    for insn in &code.insns {
        match insn {
            Insn::Label(label) => {
                positions.insert(*label, real);
            }
            other if other.is_real() => real += 1,
            _ => {}
        }
    }
    positions
}

/// Successors of a real instruction, not counting exception edges.
fn successors(
    insn: &Insn,
    next: usize,
    positions: &HashMap<Label, usize>,
) -> Result<Vec<usize>, WriteError> {
    let at = |label: &Label| {
        positions
            .get(label)
            .copied()
            .ok_or(WriteError::UnboundLabel(label.0))
    };
    Ok(match insn {
        Insn::Jump { opcode, target } if matches!(*opcode, GOTO | GOTO_W) => vec![at(target)?],
        Insn::Jump { target, .. } => vec![next, at(target)?],
        Insn::TableSwitch {
            default, targets, ..
        } => std::iter::once(default)
            .chain(targets)
            .map(at)
            .collect::<Result<_, _>>()?,
        Insn::LookupSwitch { default, pairs } => std::iter::once(default)
            .chain(pairs.iter().map(|(_, l)| l))
            .map(at)
            .collect::<Result<_, _>>()?,
        Insn::Simple(op) if opcode::ends_flow(*op) => Vec::new(),
        _ => vec![next],
    })
}

fn max_locals_needed(code: &Code, params: usize) -> usize {
    code.real_insns()
        .filter_map(|insn| match insn {
            Insn::Var { opcode, index } => {
                let wide = matches!(*opcode, LLOAD | DLOAD | LSTORE | DSTORE);
                Some(usize::from(*index) + if wide { 2 } else { 1 })
            }
            Insn::Iinc { index, .. } => Some(usize::from(*index) + 1),
            _ => None,
        })
        .fold(params, usize::max)
}

/// Returns a copy of `code`, the body of `method`, with frames, `max_stack`
/// and `max_locals` recomputed. Frames are only produced when `with_frames`.
pub fn recompute(
    class_name: &str,
    method: &Method,
    code: &Code,
    hierarchy: &dyn TypeHierarchy,
    with_frames: bool,
) -> Result<Code, WriteError> {
    let analyzer = Analyzer {
        class_name,
        method: format!("{class_name}.{}{}", method.name, method.desc),
        hierarchy,
    };
    let desc = method.descriptor()?;
    let entry = initial_locals(class_name, method.access, &method.name, &desc);
    let params = usize::from(desc.params_size())
        + usize::from(!method.access.contains(AccessFlags::STATIC));
    let max_locals = max_locals_needed(code, params);

    let mut code = code.clone();
    let real: Vec<usize> = code
        .insns
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.is_real())
        .map(|(i, _)| i)
        .collect();
    if real.is_empty() {
        return Err(analyzer.verify("empty body"));
    }
    let count = real.len();
    let positions = label_positions(&code);

    let hints: HashMap<usize, State> = code
        .frames
        .as_deref()
        .filter(|frames| !frames.is_empty())
        .unwrap_or(code.hints.as_slice())
        .iter()
        .filter_map(|(label, frame)| {
            let at = *positions.get(label)?;
            let state = State {
                locals: expand(&frame.locals, max_locals),
                stack: frame.stack.clone(),
            };
            (at < count).then_some((at, state))
        })
        .collect();

    // Labels to bind in front of real instructions that lack one.
    let mut pending: BTreeMap<usize, Label> = BTreeMap::new();
    let mut first_label: HashMap<usize, Label> = HashMap::new();
    for (label, at) in &positions {
        first_label
            .entry(*at)
            .and_modify(|l: &mut Label| *l = (*l).min(*label))
            .or_insert(*label);
    }
    let mut label_at = |at: usize, code: &mut Code| -> Label {
        if let Some(label) = first_label.get(&at) {
            return *label;
        }
        let label = code.new_label();
        first_label.insert(at, label);
        pending.insert(at, label);
        label
    };

    let mut new_labels = HashMap::new();
    for (i, &pos) in real.iter().enumerate() {
        if matches!(&code.insns[pos], Insn::Type { opcode, .. } if *opcode == NEW) {
            new_labels.insert(i, label_at(i, &mut code));
        }
    }

    let at = |l: &Label| positions.get(l).copied().ok_or(WriteError::UnboundLabel(l.0));
    let handler_ranges = code
        .handlers
        .iter()
        .map(|h| {
            let handler = at(&h.handler)?;
            if handler >= count {
                return Err(analyzer.verify("exception handler past the end of the code"));
            }
            Ok((at(&h.start)?, at(&h.end)?, handler, h.clone()))
        })
        .collect::<Result<Vec<_>, WriteError>>()?;

    let mut states: Vec<Option<State>> = vec![None; count];
    states[0] = Some(State {
        locals: expand(&entry, max_locals),
        stack: Vec::new(),
    });
    let mut worklist = vec![0usize];
    let mut max_stack = 0usize;
    // Instructions that need a frame: branch and handler targets.
    let mut targets = vec![false; count];
    for (_, _, handler, _) in &handler_ranges {
        targets[*handler] = true;
    }
    for &pos in &real {
        let jumps: Vec<&Label> = match &code.insns[pos] {
            Insn::Jump { target, .. } => vec![target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(default).chain(targets).collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(default)
                .chain(pairs.iter().map(|(_, l)| l))
                .collect(),
            _ => continue,
        };
        for label in jumps {
            let target = at(label)?;
            if target < count {
                targets[target] = true;
            }
        }
    }

    while let Some(i) = worklist.pop() {
        let Some(before) = states[i].clone() else {
            continue;
        };
        let insn = &code.insns[real[i]];

        for (start, end, handler, h) in &handler_ranges {
            if (*start..*end).contains(&i) {
                let catch = h.catch_type.as_deref().unwrap_or("java/lang/Throwable");
                let state = State {
                    locals: before.locals.clone(),
                    stack: vec![V::Object(catch.to_string())],
                };
                let hint = hints.get(handler);
                if analyzer.merge_into(&mut states[*handler], &state, *handler, hint)? {
                    worklist.push(*handler);
                }
            }
        }

        let mut after = before.clone();
        analyzer.execute(insn, &mut after, i, new_labels.get(&i).copied())?;
        max_stack = max_stack.max(slots(&before.stack)).max(slots(&after.stack));

        for s in successors(insn, i + 1, &positions)? {
            if s >= count {
                return Err(analyzer.verify("execution falls off the end of the code"));
            }
            if analyzer.merge_into(&mut states[s], &after, s, hints.get(&s))? {
                worklist.push(s);
            }
        }
    }

    code.hints = Vec::new();
    if !with_frames {
        code.max_stack = max_stack as u16;
        code.max_locals = max_locals as u16;
        code.frames = Some(Vec::new());
        return Ok(code);
    }

    // Blocks after an unconditional transfer need a frame as well.
    for i in 1..count {
        if let Some(op) = code.insns[real[i - 1]].opcode() {
            if opcode::ends_flow(op) {
                targets[i] = true;
            }
        }
    }

    // Unreachable runs become nop ... athrow.
    let mut dead_runs = Vec::new();
    let mut i = 0;
    while i < count {
        if states[i].is_none() {
            let start = i;
            while i < count && states[i].is_none() {
                i += 1;
            }
            dead_runs.push((start, i));
        } else {
            i += 1;
        }
    }
    let throwable = V::Object("java/lang/Throwable".into());
    for (start, end) in &dead_runs {
        for j in *start..*end {
            code.insns[real[j]] = Insn::Simple(if j + 1 == *end { ATHROW } else { NOP });
        }
        states[*start] = Some(State {
            locals: Vec::new(),
            stack: vec![throwable.clone()],
        });
        targets[*start] = true;
        max_stack = max_stack.max(1);
    }

    let is_dead = |j: usize| dead_runs.iter().any(|(s, e)| (*s..*e).contains(&j));
    let mut handlers = Vec::with_capacity(code.handlers.len());
    for (start, end, _, h) in &handler_ranges {
        let mut j = *start;
        while j < *end {
            if is_dead(j) {
                j += 1;
                continue;
            }
            let live_start = j;
            while j < *end && !is_dead(j) {
                j += 1;
            }
            let same = live_start == *start && j == *end;
            handlers.push(Handler {
                start: if same { h.start } else { label_at(live_start, &mut code) },
                end: if same { h.end } else { label_at(j, &mut code) },
                handler: h.handler,
                catch_type: h.catch_type.clone(),
            });
        }
    }
    code.handlers = handlers;

    let mut frames = Vec::new();
    for i in 0..count {
        if !targets[i] {
            continue;
        }
        if let Some(state) = &states[i] {
            let label = label_at(i, &mut code);
            frames.push((
                label,
                Frame {
                    locals: compress(&state.locals),
                    stack: state.stack.clone(),
                },
            ));
        }
    }

    if !pending.is_empty() {
        let mut insns = Vec::with_capacity(code.insns.len() + pending.len());
        let mut seen = 0;
        for insn in std::mem::take(&mut code.insns) {
            if insn.is_real() {
                if let Some(label) = pending.get(&seen) {
                    insns.push(Insn::Label(*label));
                }
                seen += 1;
            }
            insns.push(insn);
        }
        if let Some(label) = pending.get(&count) {
            insns.push(Insn::Label(*label));
        }
        code.insns = insns;
    }

    code.max_stack = max_stack as u16;
    code.max_locals = max_locals as u16;
    code.frames = Some(frames);
    Ok(code)
}
