//! Class file parsing into the symbolic model.

use crate::access::AccessFlags;
use crate::bootstrap::BootstrapTable;
use crate::class_file::{Attribute, ClassFile, Code, Field, Handler, LocalVariable, Method};
use crate::constant_pool::{ConstantPool, RefKind};
use crate::descriptor::MethodDescriptor;
use crate::frames::{decode_stack_map, initial_locals};
use crate::hierarchy::ClassHeader;
use crate::instruction::{Insn, Label};
use crate::io::ByteReader;
use crate::opcode::{self, *};
use grafter_utils::errors::ClassFormatError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const MAGIC: u32 = 0xCAFE_BABE;

/// What the code decoder needs to know about the enclosing method.
struct MethodContext<'a> {
    class_name: &'a str,
    access: AccessFlags,
    name: &'a str,
    desc: &'a str,
    bootstraps: &'a BootstrapTable,
}

/// A method whose `Code` attribute waits for the class attributes.
struct RawMethod<'p, 'd> {
    access: AccessFlags,
    name: &'p str,
    desc: &'p str,
    code: Option<&'d [u8]>,
    attributes: Vec<Attribute>,
}

fn read_preamble(reader: &mut ByteReader<'_>) -> Result<(u16, u16, ConstantPool), ClassFormatError> {
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    let minor = reader.u16()?;
    let major = reader.u16()?;
    let pool = ConstantPool::parse(reader)?;
    Ok((minor, major, pool))
}

fn read_class_names(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<(String, Option<String>, Vec<String>), ClassFormatError> {
    let name = pool.class_name(reader.u16()?)?.to_string();
    let super_index = reader.u16()?;
    let super_name = if super_index == 0 {
        None
    } else {
        Some(pool.class_name(super_index)?.to_string())
    };
    let count = reader.u16()?;
    let interfaces = (0..count)
        .map(|_| Ok(pool.class_name(reader.u16()?)?.to_string()))
        .collect::<Result<_, ClassFormatError>>()?;
    Ok((name, super_name, interfaces))
}

fn read_attribute<'p, 'd>(
    reader: &mut ByteReader<'d>,
    pool: &'p ConstantPool,
) -> Result<(&'p str, &'d [u8]), ClassFormatError> {
    let name = pool.utf8(reader.u16()?)?;
    let len = reader.u32()? as usize;
    Ok((name, reader.bytes(len)?))
}

fn read_attributes(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassFormatError> {
    let count = reader.u16()?;
    (0..count)
        .map(|_| {
            let (name, data) = read_attribute(reader, pool)?;
            Ok(Attribute {
                name: name.to_string(),
                data: data.to_vec(),
            })
        })
        .collect()
}

/// Parses a complete class file.
pub fn parse_class(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
    let mut reader = ByteReader::new(bytes);
    let (minor_version, major_version, pool) = read_preamble(&mut reader)?;
    let access = AccessFlags::from_bits_retain(reader.u16()?);
    let (name, super_name, interfaces) = read_class_names(&mut reader, &pool)?;

    let field_count = reader.u16()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    for _ in 0..field_count {
        let access = AccessFlags::from_bits_retain(reader.u16()?);
        let field_name = pool.utf8(reader.u16()?)?.to_string();
        let desc = pool.utf8(reader.u16()?)?.to_string();
        fields.push(Field {
            access,
            name: field_name,
            desc,
            attributes: read_attributes(&mut reader, &pool)?,
        });
    }

    let method_count = reader.u16()?;
    let mut raw_methods = Vec::with_capacity(usize::from(method_count));
    for _ in 0..method_count {
        let mut method = RawMethod {
            access: AccessFlags::from_bits_retain(reader.u16()?),
            name: pool.utf8(reader.u16()?)?,
            desc: pool.utf8(reader.u16()?)?,
            code: None,
            attributes: Vec::new(),
        };
        for _ in 0..reader.u16()? {
            let (attr_name, data) = read_attribute(&mut reader, &pool)?;
            if attr_name == "Code" {
                method.code = Some(data);
            } else {
                method.attributes.push(Attribute {
                    name: attr_name.to_string(),
                    data: data.to_vec(),
                });
            }
        }
        raw_methods.push(method);
    }

    let attributes = read_attributes(&mut reader, &pool)?;
    if reader.remaining() != 0 {
        return Err(ClassFormatError::BadAttribute {
            attribute: "ClassFile",
            msg: format!("{} trailing bytes", reader.remaining()),
        });
    }

    // Bodies refer to the bootstrap table, which follows the methods.
    let bootstraps = BootstrapTable::from_attributes(&attributes)?;
    let mut methods = Vec::with_capacity(raw_methods.len());
    for raw in raw_methods {
        let code = match raw.code {
            Some(data) => {
                let ctx = MethodContext {
                    class_name: &name,
                    access: raw.access,
                    name: raw.name,
                    desc: raw.desc,
                    bootstraps: &bootstraps,
                };
                Some(decode_code(data, &pool, &ctx)?)
            }
            None => None,
        };
        methods.push(Method {
            access: raw.access,
            name: raw.name.to_string(),
            desc: raw.desc.to_string(),
            code,
            attributes: raw.attributes,
        });
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        pool,
        access,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

/// Parses only what the type hierarchy needs: names, superclass, interfaces.
pub fn parse_header(bytes: &[u8]) -> Result<ClassHeader, ClassFormatError> {
    let mut reader = ByteReader::new(bytes);
    let (_, _, pool) = read_preamble(&mut reader)?;
    let access = AccessFlags::from_bits_retain(reader.u16()?);
    let (name, super_name, interfaces) = read_class_names(&mut reader, &pool)?;
    Ok(ClassHeader {
        name,
        super_name,
        interfaces,
        is_interface: access.contains(AccessFlags::INTERFACE),
    })
}

fn branch(
    pc: usize,
    offset: i64,
    len: usize,
    labels: &mut BTreeSet<usize>,
) -> Result<Label, ClassFormatError> {
    let target = pc as i64 + offset;
    if target < 0 || target >= len as i64 {
        return Err(ClassFormatError::InvalidBranch { pc, target });
    }
    labels.insert(target as usize);
    Ok(Label(target as u32))
}

fn decode_insns(
    code: &[u8],
    pool: &ConstantPool,
    bootstraps: &BootstrapTable,
    labels: &mut BTreeSet<usize>,
) -> Result<Vec<(usize, Insn)>, ClassFormatError> {
    let len = code.len();
    let mut reader = ByteReader::new(code);
    let mut out = Vec::new();
    while reader.remaining() > 0 {
        let pc = reader.pos();
        let op = reader.u8()?;
        let insn = match op {
            _ if opcode::is_simple(op) => Insn::Simple(op),
            BIPUSH => Insn::IntOp {
                opcode: op,
                operand: i32::from(reader.i8()?),
            },
            SIPUSH => Insn::IntOp {
                opcode: op,
                operand: i32::from(reader.i16()?),
            },
            NEWARRAY => Insn::IntOp {
                opcode: op,
                operand: i32::from(reader.u8()?),
            },
            LDC => Insn::Ldc(bootstraps.loadable(pool, u16::from(reader.u8()?))?),
            LDC_W | LDC2_W => Insn::Ldc(bootstraps.loadable(pool, reader.u16()?)?),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::var(op, u16::from(reader.u8()?)),
            ILOAD_0..=ALOAD_3 => {
                let n = op - ILOAD_0;
                Insn::var(ILOAD + n / 4, u16::from(n % 4))
            }
            ISTORE_0..=ASTORE_3 => {
                let n = op - ISTORE_0;
                Insn::var(ISTORE + n / 4, u16::from(n % 4))
            }
            IINC => Insn::Iinc {
                index: u16::from(reader.u8()?),
                delta: i16::from(reader.i8()?),
            },
            WIDE => match reader.u8()? {
                IINC => Insn::Iinc {
                    index: reader.u16()?,
                    delta: reader.i16()?,
                },
                wide @ (ILOAD..=ALOAD | ISTORE..=ASTORE | RET) => Insn::var(wide, reader.u16()?),
                other => return Err(ClassFormatError::UnknownOpcode { pc, opcode: other }),
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let offset = i64::from(reader.i16()?);
                Insn::jump(op, branch(pc, offset, len, labels)?)
            }
            GOTO_W | JSR_W => {
                let offset = i64::from(reader.i32()?);
                let canonical = if op == GOTO_W { GOTO } else { JSR };
                Insn::jump(canonical, branch(pc, offset, len, labels)?)
            }
            TABLESWITCH => {
                reader.seek((pc + 4) & !3)?;
                let default = branch(pc, i64::from(reader.i32()?), len, labels)?;
                let low = reader.i32()?;
                let high = reader.i32()?;
                if high < low {
                    return Err(ClassFormatError::BadAttribute {
                        attribute: "Code",
                        msg: format!("tableswitch at {pc} has high {high} below low {low}"),
                    });
                }
                let count = (i64::from(high) - i64::from(low) + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(branch(pc, i64::from(reader.i32()?), len, labels)?);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                reader.seek((pc + 4) & !3)?;
                let default = branch(pc, i64::from(reader.i32()?), len, labels)?;
                let count = reader.i32()?;
                if count < 0 {
                    return Err(ClassFormatError::BadAttribute {
                        attribute: "Code",
                        msg: format!("lookupswitch at {pc} has {count} pairs"),
                    });
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = reader.i32()?;
                    pairs.push((key, branch(pc, i64::from(reader.i32()?), len, labels)?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            GETSTATIC..=PUTFIELD => {
                let index = reader.u16()?;
                let member = pool.member_ref(index)?;
                if member.kind != RefKind::Field {
                    return Err(ClassFormatError::WrongConstant {
                        index,
                        expected: "Fieldref",
                    });
                }
                Insn::field(op, member.owner, member.name, member.desc)
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let index = reader.u16()?;
                if op == INVOKEINTERFACE {
                    reader.u16()?;
                }
                let member = pool.member_ref(index)?;
                if member.kind == RefKind::Field {
                    return Err(ClassFormatError::WrongConstant {
                        index,
                        expected: "Methodref",
                    });
                }
                Insn::method(
                    op,
                    member.owner,
                    member.name,
                    member.desc,
                    member.kind == RefKind::InterfaceMethod,
                )
            }
            INVOKEDYNAMIC => {
                let constant = reader.u16()?;
                reader.u16()?;
                bootstraps.invoke_dynamic(pool, constant)?
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Insn::type_insn(op, pool.class_name(reader.u16()?)?)
            }
            MULTIANEWARRAY => {
                let class = pool.class_name(reader.u16()?)?.to_string();
                Insn::MultiANewArray {
                    class,
                    dims: reader.u8()?,
                }
            }
            _ => return Err(ClassFormatError::UnknownOpcode { pc, opcode: op }),
        };
        out.push((pc, insn));
    }
    Ok(out)
}

fn decode_code(
    data: &[u8],
    pool: &ConstantPool,
    ctx: &MethodContext<'_>,
) -> Result<Code, ClassFormatError> {
    let bad = |msg: String| ClassFormatError::BadAttribute {
        attribute: "Code",
        msg,
    };
    let mut reader = ByteReader::new(data);
    let max_stack = reader.u16()?;
    let max_locals = reader.u16()?;
    let code_len = reader.u32()? as usize;
    let bytecode = reader.bytes(code_len)?;

    let mut labels = BTreeSet::new();
    let decoded = decode_insns(bytecode, pool, ctx.bootstraps, &mut labels)?;

    let mut handlers = Vec::new();
    for _ in 0..reader.u16()? {
        let start = usize::from(reader.u16()?);
        let end = usize::from(reader.u16()?);
        let handler = usize::from(reader.u16()?);
        let catch = reader.u16()?;
        if start >= end || end > code_len || handler >= code_len {
            return Err(bad(format!(
                "exception range {start}..{end} -> {handler} outside {code_len}"
            )));
        }
        labels.extend([start, end, handler]);
        handlers.push(Handler {
            start: Label(start as u32),
            end: Label(end as u32),
            handler: Label(handler as u32),
            catch_type: if catch == 0 {
                None
            } else {
                Some(pool.class_name(catch)?.to_string())
            },
        });
    }

    let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
    let mut locals = Vec::new();
    let mut stack_map = Vec::new();
    for _ in 0..reader.u16()? {
        let (name, body) = read_attribute(&mut reader, pool)?;
        let mut sub = ByteReader::new(body);
        match name {
            "StackMapTable" => {
                let desc = MethodDescriptor::parse(ctx.desc)?;
                let initial = initial_locals(ctx.class_name, ctx.access, ctx.name, &desc);
                stack_map = decode_stack_map(body, pool, initial, |pc| {
                    labels.insert(pc);
                    Label(pc as u32)
                })?;
                for (pc, _) in &stack_map {
                    if *pc >= code_len {
                        return Err(bad(format!("frame at {pc} outside {code_len}")));
                    }
                    labels.insert(*pc);
                }
            }
            "LineNumberTable" => {
                for _ in 0..sub.u16()? {
                    let pc = usize::from(sub.u16()?);
                    let line = sub.u16()?;
                    if pc < code_len {
                        lines.entry(pc).or_default().push(line);
                    }
                }
            }
            "LocalVariableTable" | "LocalVariableTypeTable" => {
                for _ in 0..sub.u16()? {
                    let start = usize::from(sub.u16()?);
                    let end = start + usize::from(sub.u16()?);
                    let var_name = pool.utf8(sub.u16()?)?;
                    let var_desc = pool.utf8(sub.u16()?)?;
                    let index = sub.u16()?;
                    if end > code_len {
                        debug!(method = ctx.name, var = var_name, "skipping out-of-range local");
                        continue;
                    }
                    labels.extend([start, end]);
                    locals.push(LocalVariable {
                        start: Label(start as u32),
                        end: Label(end as u32),
                        name: var_name.to_string(),
                        desc: var_desc.to_string(),
                        index,
                        generic: name == "LocalVariableTypeTable",
                    });
                }
            }
            other => debug!(method = ctx.name, attribute = other, "dropping code attribute"),
        }
    }

    let starts: BTreeSet<usize> = decoded.iter().map(|(pc, _)| *pc).collect();
    if let Some(pc) = labels
        .iter()
        .find(|pc| **pc != code_len && !starts.contains(pc))
    {
        return Err(bad(format!("offset {pc} is not an instruction boundary")));
    }

    let mut insns = Vec::with_capacity(decoded.len() + labels.len());
    for (pc, insn) in decoded {
        if labels.contains(&pc) {
            insns.push(Insn::Label(Label(pc as u32)));
        }
        if let Some(numbers) = lines.get(&pc) {
            insns.extend(numbers.iter().map(|n| Insn::Line(*n)));
        }
        insns.push(insn);
    }
    if labels.contains(&code_len) {
        insns.push(Insn::Label(Label(code_len as u32)));
    }

    Ok(Code {
        max_stack,
        max_locals,
        insns,
        handlers,
        locals,
        frames: Some(
            stack_map
                .into_iter()
                .map(|(pc, frame)| (Label(pc as u32), frame))
                .collect(),
        ),
        hints: Vec::new(),
        next_label: code_len as u32 + 1,
    })
}
