//! Serialization of the class model back to class file bytes.

use crate::analysis;
use crate::bootstrap::{self, BootstrapTable};
use crate::class_file::{Attribute, ClassFile, Code, Method};
use crate::constant_pool::ConstantPool;
use crate::descriptor::MethodDescriptor;
use crate::frames::{encode_stack_map, initial_locals, Frame};
use crate::hierarchy::TypeHierarchy;
use crate::instruction::{Insn, Label};
use crate::io::ByteSink;
use crate::opcode::{self, *};
use grafter_utils::errors::WriteError;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::trace;

const MAGIC: u32 = 0xCAFE_BABE;
const MAX_CODE: usize = 65535;

/// Serializes `class`. Methods whose frames were invalidated get their
/// stack map and maxima recomputed first.
pub fn write_class(class: &ClassFile, hierarchy: &dyn TypeHierarchy) -> Result<Vec<u8>, WriteError> {
    let mut pool = class.pool.clone();
    let mut bootstraps = BootstrapTable::from_attributes(&class.attributes)?;
    let mut body = Vec::new();

    body.put_u16(class.access.bits());
    body.put_u16(pool.class_index(&class.name)?);
    match &class.super_name {
        Some(name) => body.put_u16(pool.class_index(name)?),
        None => body.put_u16(0),
    }
    body.put_u16(class.interfaces.len() as u16);
    for interface in &class.interfaces {
        body.put_u16(pool.class_index(interface)?);
    }

    body.put_u16(class.fields.len() as u16);
    for field in &class.fields {
        body.put_u16(field.access.bits());
        body.put_u16(pool.utf8_index(&field.name)?);
        body.put_u16(pool.utf8_index(&field.desc)?);
        write_attributes(&mut body, &mut pool, &field.attributes)?;
    }

    body.put_u16(class.methods.len() as u16);
    for method in &class.methods {
        body.put_u16(method.access.bits());
        body.put_u16(pool.utf8_index(&method.name)?);
        body.put_u16(pool.utf8_index(&method.desc)?);
        let extra = u16::from(method.code.is_some());
        body.put_u16(method.attributes.len() as u16 + extra);
        if let Some(code) = &method.code {
            let data = write_code(class, method, code, &mut pool, &mut bootstraps, hierarchy)?;
            put_attribute(&mut body, &mut pool, "Code", &data)?;
        }
        for attribute in &method.attributes {
            put_attribute(&mut body, &mut pool, &attribute.name, &attribute.data)?;
        }
    }

    // Call sites may have added bootstrap methods; earlier entries keep
    // their index.
    let mut attributes: Vec<(&str, Cow<'_, [u8]>)> = class
        .attributes
        .iter()
        .map(|a| (a.name.as_str(), Cow::Borrowed(a.data.as_slice())))
        .collect();
    if !bootstraps.is_empty() {
        let table = Cow::Owned(bootstraps.write());
        match attributes
            .iter_mut()
            .find(|(name, _)| *name == bootstrap::ATTRIBUTE)
        {
            Some((_, data)) => *data = table,
            None => attributes.push((bootstrap::ATTRIBUTE, table)),
        }
    }
    body.put_u16(attributes.len() as u16);
    for (name, data) in &attributes {
        put_attribute(&mut body, &mut pool, name, data)?;
    }

    let mut out = Vec::with_capacity(body.len() + 16 * pool.len());
    out.put_u32(MAGIC);
    out.put_u16(class.minor_version);
    out.put_u16(class.major_version);
    pool.write(&mut out);
    out.put_bytes(&body);
    Ok(out)
}

fn put_attribute(
    out: &mut Vec<u8>,
    pool: &mut ConstantPool,
    name: &str,
    data: &[u8],
) -> Result<(), WriteError> {
    out.put_u16(pool.utf8_index(name)?);
    out.put_u32(data.len() as u32);
    out.put_bytes(data);
    Ok(())
}

fn write_attributes(
    out: &mut Vec<u8>,
    pool: &mut ConstantPool,
    attributes: &[Attribute],
) -> Result<(), WriteError> {
    out.put_u16(attributes.len() as u16);
    for attribute in attributes {
        put_attribute(out, pool, &attribute.name, &attribute.data)?;
    }
    Ok(())
}

fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

/// Byte size of `insn` at `pc`. `ldc` needs its pool index to pick a form.
fn insn_size(insn: &Insn, pc: usize, ldc: Option<(u16, bool)>) -> usize {
    match insn {
        Insn::Label(_) | Insn::Line(_) => 0,
        Insn::Simple(_) => 1,
        Insn::IntOp { opcode, .. } => {
            if *opcode == SIPUSH {
                3
            } else {
                2
            }
        }
        Insn::Var { opcode, index } => match index {
            0..=3 if *opcode != RET => 1,
            0..=255 => 2,
            _ => 4,
        },
        Insn::Iinc { index, delta } => {
            if *index <= 255 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Jump { opcode, .. } if matches!(*opcode, GOTO_W | JSR_W) => 5,
        Insn::Type { .. } | Insn::Field { .. } | Insn::Jump { .. } => 3,
        Insn::Method { opcode, .. } => {
            if *opcode == INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::Ldc(_) => match ldc {
            Some((index, wide)) if !wide && index <= 255 => 2,
            _ => 3,
        },
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(pc) + 12 + 4 * targets.len(),
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(pc) + 8 + 8 * pairs.len(),
        Insn::MultiANewArray { .. } => 4,
    }
}

struct Layout {
    /// Offset of every bound label.
    positions: HashMap<Label, usize>,
    /// Offset of every instruction, pseudo-instructions included.
    offsets: Vec<usize>,
    /// Interned `ldc` operands, by instruction index.
    ldc: HashMap<usize, (u16, bool)>,
    len: usize,
}

fn layout(
    code: &Code,
    pool: &mut ConstantPool,
    bootstraps: &mut BootstrapTable,
) -> Result<Layout, WriteError> {
    let mut positions = HashMap::new();
    let mut offsets = Vec::with_capacity(code.insns.len());
    let mut ldc = HashMap::new();
    let mut pc = 0;
    for (i, insn) in code.insns.iter().enumerate() {
        offsets.push(pc);
        if let Insn::Label(label) = insn {
            positions.insert(*label, pc);
        }
        if let Insn::Ldc(value) = insn {
            let index = bootstraps.intern_loadable(pool, value)?;
            ldc.insert(i, (index, value.is_wide()));
        }
        pc += insn_size(insn, pc, ldc.get(&i).copied());
    }
    Ok(Layout {
        positions,
        offsets,
        ldc,
        len: pc,
    })
}

fn position(positions: &HashMap<Label, usize>, label: Label) -> Result<usize, WriteError> {
    positions
        .get(&label)
        .copied()
        .ok_or(WriteError::UnboundLabel(label.0))
}

/// Branches whose offset does not fit their 16-bit form, with that offset.
fn far_jumps(code: &Code, layout: &Layout) -> Result<Vec<(usize, i64)>, WriteError> {
    let mut far = Vec::new();
    for (i, insn) in code.insns.iter().enumerate() {
        if let Insn::Jump { opcode, target } = insn {
            if matches!(*opcode, GOTO_W | JSR_W) {
                continue;
            }
            let delta = position(&layout.positions, *target)? as i64 - layout.offsets[i] as i64;
            if i16::try_from(delta).is_err() {
                far.push((i, delta));
            }
        }
    }
    Ok(far)
}

/// Switches far `goto`/`jsr` to their wide forms and turns a far conditional
/// into an inverted conditional over a `goto_w`. Returns true when new
/// blocks were introduced, which invalidates the stack map.
fn widen(code: &mut Code, far: &[(usize, i64)]) -> Result<bool, WriteError> {
    let far: HashMap<usize, i64> = far.iter().copied().collect();
    let mut split = false;
    let insns = std::mem::take(&mut code.insns);
    let mut out = Vec::with_capacity(insns.len() + 3 * far.len());
    for (i, insn) in insns.into_iter().enumerate() {
        let Some(delta) = far.get(&i).copied() else {
            out.push(insn);
            continue;
        };
        match insn {
            Insn::Jump {
                opcode: GOTO,
                target,
            } => out.push(Insn::jump(GOTO_W, target)),
            Insn::Jump {
                opcode: JSR,
                target,
            } => out.push(Insn::jump(JSR_W, target)),
            Insn::Jump { opcode, target } => {
                let inverse =
                    opcode::invert_branch(opcode).ok_or(WriteError::BranchOutOfRange(delta))?;
                let skip = code.new_label();
                out.extend([
                    Insn::jump(inverse, skip),
                    Insn::jump(GOTO_W, target),
                    Insn::Label(skip),
                ]);
                split = true;
            }
            other => out.push(other),
        }
    }
    code.insns = out;
    Ok(split)
}

fn emit(
    code: &Code,
    layout: &Layout,
    pool: &mut ConstantPool,
    bootstraps: &mut BootstrapTable,
) -> Result<Vec<u8>, WriteError> {
    let mut out = Vec::with_capacity(layout.len);
    let offset16 = |pc: usize, label: Label| -> Result<u16, WriteError> {
        let delta = position(&layout.positions, label)? as i64 - pc as i64;
        i16::try_from(delta)
            .map(|d| d as u16)
            .map_err(|_| WriteError::BranchOutOfRange(delta))
    };
    let offset32 = |pc: usize, label: Label| -> Result<u32, WriteError> {
        Ok((position(&layout.positions, label)? as i64 - pc as i64) as i32 as u32)
    };
    for (i, insn) in code.insns.iter().enumerate() {
        let pc = layout.offsets[i];
        match insn {
            Insn::Label(_) | Insn::Line(_) => {}
            Insn::Simple(op) => out.put_u8(*op),
            Insn::IntOp { opcode, operand } => {
                out.put_u8(*opcode);
                if *opcode == SIPUSH {
                    out.put_u16(*operand as i16 as u16);
                } else {
                    out.put_u8(*operand as u8);
                }
            }
            Insn::Var { opcode, index } => match index {
                0..=3 if *opcode != RET => {
                    let short = if *opcode <= ALOAD {
                        ILOAD_0 + (opcode - ILOAD) * 4
                    } else {
                        ISTORE_0 + (opcode - ISTORE) * 4
                    };
                    out.put_u8(short + *index as u8);
                }
                0..=255 => {
                    out.put_u8(*opcode);
                    out.put_u8(*index as u8);
                }
                _ => {
                    out.put_u8(WIDE);
                    out.put_u8(*opcode);
                    out.put_u16(*index);
                }
            },
            Insn::Iinc { index, delta } => {
                if *index <= 255 && i8::try_from(*delta).is_ok() {
                    out.put_u8(IINC);
                    out.put_u8(*index as u8);
                    out.put_u8(*delta as i8 as u8);
                } else {
                    out.put_u8(WIDE);
                    out.put_u8(IINC);
                    out.put_u16(*index);
                    out.put_u16(*delta as u16);
                }
            }
            Insn::Type { opcode, class } => {
                out.put_u8(*opcode);
                out.put_u16(pool.class_index(class)?);
            }
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => {
                out.put_u8(*opcode);
                out.put_u16(pool.field_ref(owner, name, desc)?);
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                interface,
            } => {
                out.put_u8(*opcode);
                out.put_u16(pool.method_ref(owner, name, desc, *interface)?);
                if *opcode == INVOKEINTERFACE {
                    let args = MethodDescriptor::parse(desc)?.params_size() + 1;
                    out.put_u8(args as u8);
                    out.put_u8(0);
                }
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bootstrap,
            } => {
                out.put_u8(INVOKEDYNAMIC);
                out.put_u16(bootstraps.intern_invoke_dynamic(pool, name, desc, bootstrap)?);
                out.put_u16(0);
            }
            Insn::Ldc(_) => {
                let (index, wide) = layout
                    .ldc
                    .get(&i)
                    .copied()
                    .ok_or(WriteError::PoolOverflow)?;
                if wide {
                    out.put_u8(LDC2_W);
                    out.put_u16(index);
                } else if index <= 255 {
                    out.put_u8(LDC);
                    out.put_u8(index as u8);
                } else {
                    out.put_u8(LDC_W);
                    out.put_u16(index);
                }
            }
            Insn::Jump { opcode, target } if matches!(*opcode, GOTO_W | JSR_W) => {
                out.put_u8(*opcode);
                out.put_u32(offset32(pc, *target)?);
            }
            Insn::Jump { opcode, target } => {
                out.put_u8(*opcode);
                out.put_u16(offset16(pc, *target)?);
            }
            Insn::TableSwitch {
                default,
                low,
                high,
                targets,
            } => {
                out.put_u8(TABLESWITCH);
                out.put_bytes(&[0; 3][..switch_padding(pc)]);
                out.put_u32(offset32(pc, *default)?);
                out.put_u32(*low as u32);
                out.put_u32(*high as u32);
                for target in targets {
                    out.put_u32(offset32(pc, *target)?);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                out.put_u8(LOOKUPSWITCH);
                out.put_bytes(&[0; 3][..switch_padding(pc)]);
                out.put_u32(offset32(pc, *default)?);
                out.put_u32(pairs.len() as u32);
                let mut sorted = pairs.clone();
                sorted.sort_by_key(|(key, _)| *key);
                for (key, target) in sorted {
                    out.put_u32(key as u32);
                    out.put_u32(offset32(pc, target)?);
                }
            }
            Insn::MultiANewArray { class, dims } => {
                out.put_u8(MULTIANEWARRAY);
                out.put_u16(pool.class_index(class)?);
                out.put_u8(*dims);
            }
        }
    }
    Ok(out)
}

fn write_code(
    class: &ClassFile,
    method: &Method,
    code: &Code,
    pool: &mut ConstantPool,
    bootstraps: &mut BootstrapTable,
    hierarchy: &dyn TypeHierarchy,
) -> Result<Vec<u8>, WriteError> {
    let with_frames = class.major_version >= 50;
    let mut code = if code.frames.is_none() {
        trace!(class = %class.name, method = %method.name, "recomputing frames");
        Cow::Owned(analysis::recompute(
            &class.name,
            method,
            code,
            hierarchy,
            with_frames,
        )?)
    } else {
        Cow::Borrowed(code)
    };

    // Widening only grows the code, so this settles once no branch is far.
    let layout = loop {
        let layout = layout(&code, pool, bootstraps)?;
        let far = far_jumps(&code, &layout)?;
        if far.is_empty() {
            break layout;
        }
        trace!(class = %class.name, method = %method.name, count = far.len(), "widening branches");
        let mut widened = code.into_owned();
        if widen(&mut widened, &far)? {
            widened = analysis::recompute(&class.name, method, &widened, hierarchy, with_frames)?;
        }
        code = Cow::Owned(widened);
    };
    if layout.len > MAX_CODE {
        return Err(WriteError::CodeTooLarge {
            method: format!("{}.{}{}", class.name, method.name, method.desc),
            len: layout.len,
        });
    }
    let bytecode = emit(&code, &layout, pool, bootstraps)?;
    let positions = &layout.positions;

    let mut out = Vec::with_capacity(bytecode.len() + 32);
    out.put_u16(code.max_stack);
    out.put_u16(code.max_locals);
    out.put_u32(bytecode.len() as u32);
    out.put_bytes(&bytecode);

    let mut table = Vec::new();
    for handler in &code.handlers {
        let start = position(positions, handler.start)?;
        let end = position(positions, handler.end)?;
        if start >= end {
            continue;
        }
        table.push((
            start,
            end,
            position(positions, handler.handler)?,
            match &handler.catch_type {
                Some(name) => pool.class_index(name)?,
                None => 0,
            },
        ));
    }
    out.put_u16(table.len() as u16);
    for (start, end, handler, catch) in table {
        out.put_u16(start as u16);
        out.put_u16(end as u16);
        out.put_u16(handler as u16);
        out.put_u16(catch);
    }

    let mut attributes: Vec<(&str, Vec<u8>)> = Vec::new();

    let frames = code.frames.as_deref().unwrap_or_default();
    if class.major_version >= 50 && !frames.is_empty() {
        let mut resolved: Vec<(usize, &Frame)> = frames
            .iter()
            .map(|(label, frame)| Ok((position(positions, *label)?, frame)))
            .collect::<Result<_, WriteError>>()?;
        resolved.sort_by_key(|(pc, _)| *pc);
        resolved.dedup_by_key(|(pc, _)| *pc);
        let desc = method.descriptor()?;
        let initial = initial_locals(&class.name, method.access, &method.name, &desc);
        attributes.push((
            "StackMapTable",
            encode_stack_map(&resolved, &initial, pool, positions)?,
        ));
    }

    let lines: Vec<(usize, u16)> = code
        .insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Line(line) if layout.offsets[i] < layout.len => {
                Some((layout.offsets[i], *line))
            }
            _ => None,
        })
        .collect();
    if !lines.is_empty() {
        let mut data = Vec::with_capacity(2 + 4 * lines.len());
        data.put_u16(lines.len() as u16);
        for (pc, line) in lines {
            data.put_u16(pc as u16);
            data.put_u16(line);
        }
        attributes.push(("LineNumberTable", data));
    }

    for (generic, name) in [(false, "LocalVariableTable"), (true, "LocalVariableTypeTable")] {
        let vars: Vec<_> = code.locals.iter().filter(|v| v.generic == generic).collect();
        if vars.is_empty() {
            continue;
        }
        let mut data = Vec::with_capacity(2 + 10 * vars.len());
        data.put_u16(vars.len() as u16);
        for var in vars {
            let start = position(positions, var.start)?;
            let end = position(positions, var.end)?;
            data.put_u16(start as u16);
            data.put_u16(end.saturating_sub(start) as u16);
            data.put_u16(pool.utf8_index(&var.name)?);
            data.put_u16(pool.utf8_index(&var.desc)?);
            data.put_u16(var.index);
        }
        attributes.push((name, data));
    }

    out.put_u16(attributes.len() as u16);
    for (name, data) in attributes {
        put_attribute(&mut out, pool, name, &data)?;
    }
    Ok(out)
}
