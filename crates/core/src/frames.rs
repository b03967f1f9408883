//! Verification types and the StackMapTable attribute.

use crate::access::AccessFlags;
use crate::constant_pool::ConstantPool;
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::instruction::Label;
use crate::io::{ByteReader, ByteSink};
use grafter_utils::errors::{ClassFormatError, WriteError};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal name or array descriptor.
    Object(String),
    /// Result of the `new` instruction bound at the label.
    Uninitialized(Label),
}

impl VerificationType {
    pub fn of(ty: &FieldType) -> Self {
        match ty {
            FieldType::Float => Self::Float,
            FieldType::Long => Self::Long,
            FieldType::Double => Self::Double,
            FieldType::Object(_) | FieldType::Array(_) => Self::Object(ty.internal_name()),
            _ => Self::Integer,
        }
    }

    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    pub const fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Object(_) | Self::UninitializedThis | Self::Uninitialized(_)
        )
    }
}

/// A stack map frame in its compressed form: long and double take one entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

/// Locals on method entry, compressed.
pub fn initial_locals(
    class_name: &str,
    access: AccessFlags,
    name: &str,
    desc: &MethodDescriptor,
) -> Vec<VerificationType> {
    let mut locals = Vec::with_capacity(desc.params.len() + 1);
    if !access.contains(AccessFlags::STATIC) {
        if name == "<init>" && class_name != "java/lang/Object" {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(class_name.to_string()));
        }
    }
    locals.extend(desc.params.iter().map(VerificationType::of));
    locals
}

fn read_vtype(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
    labels: &mut impl FnMut(usize) -> Label,
) -> Result<VerificationType, ClassFormatError> {
    Ok(match reader.u8()? {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(pool.class_name(reader.u16()?)?.to_string()),
        8 => VerificationType::Uninitialized(labels(usize::from(reader.u16()?))),
        tag => {
            return Err(ClassFormatError::BadAttribute {
                attribute: "StackMapTable",
                msg: format!("unknown verification type tag {tag}"),
            })
        }
    })
}

/// Decodes a StackMapTable into frames keyed by absolute offset.
///
/// `labels` maps a bytecode offset to the label bound there.
pub(crate) fn decode_stack_map(
    data: &[u8],
    pool: &ConstantPool,
    initial: Vec<VerificationType>,
    mut labels: impl FnMut(usize) -> Label,
) -> Result<Vec<(usize, Frame)>, ClassFormatError> {
    let bad = |msg: String| ClassFormatError::BadAttribute {
        attribute: "StackMapTable",
        msg,
    };
    let mut reader = ByteReader::new(data);
    let count = reader.u16()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut locals = initial;
    let mut offset: Option<usize> = None;
    for _ in 0..count {
        let frame_type = reader.u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (usize::from(frame_type), Vec::new()),
            64..=127 => (
                usize::from(frame_type - 64),
                vec![read_vtype(&mut reader, pool, &mut labels)?],
            ),
            247 => {
                let delta = usize::from(reader.u16()?);
                (delta, vec![read_vtype(&mut reader, pool, &mut labels)?])
            }
            248..=250 => {
                let delta = usize::from(reader.u16()?);
                let chop = usize::from(251 - frame_type);
                if chop > locals.len() {
                    return Err(bad(format!("chop of {chop} locals from {}", locals.len())));
                }
                locals.truncate(locals.len() - chop);
                (delta, Vec::new())
            }
            251 => (usize::from(reader.u16()?), Vec::new()),
            252..=254 => {
                let delta = usize::from(reader.u16()?);
                for _ in 0..(frame_type - 251) {
                    locals.push(read_vtype(&mut reader, pool, &mut labels)?);
                }
                (delta, Vec::new())
            }
            255 => {
                let delta = usize::from(reader.u16()?);
                let n = reader.u16()?;
                locals = (0..n)
                    .map(|_| read_vtype(&mut reader, pool, &mut labels))
                    .collect::<Result<_, _>>()?;
                let n = reader.u16()?;
                let stack = (0..n)
                    .map(|_| read_vtype(&mut reader, pool, &mut labels))
                    .collect::<Result<_, _>>()?;
                (delta, stack)
            }
            reserved => return Err(bad(format!("reserved frame type {reserved}"))),
        };
        let at = match offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        offset = Some(at);
        frames.push((
            at,
            Frame {
                locals: locals.clone(),
                stack,
            },
        ));
    }
    Ok(frames)
}

fn write_vtype(
    out: &mut Vec<u8>,
    vtype: &VerificationType,
    pool: &mut ConstantPool,
    positions: &HashMap<Label, usize>,
) -> Result<(), WriteError> {
    match vtype {
        VerificationType::Top => out.put_u8(0),
        VerificationType::Integer => out.put_u8(1),
        VerificationType::Float => out.put_u8(2),
        VerificationType::Double => out.put_u8(3),
        VerificationType::Long => out.put_u8(4),
        VerificationType::Null => out.put_u8(5),
        VerificationType::UninitializedThis => out.put_u8(6),
        VerificationType::Object(name) => {
            out.put_u8(7);
            out.put_u16(pool.class_index(name)?);
        }
        VerificationType::Uninitialized(label) => {
            let pc = positions
                .get(label)
                .ok_or(WriteError::UnboundLabel(label.0))?;
            out.put_u8(8);
            out.put_u16(*pc as u16);
        }
    }
    Ok(())
}

/// Encodes frames, already sorted by offset, using the most compact frame
/// type for each delta against the previous frame.
pub(crate) fn encode_stack_map(
    frames: &[(usize, &Frame)],
    initial: &[VerificationType],
    pool: &mut ConstantPool,
    positions: &HashMap<Label, usize>,
) -> Result<Vec<u8>, WriteError> {
    let mut out = Vec::new();
    out.put_u16(frames.len() as u16);
    let mut prev_locals: &[VerificationType] = initial;
    let mut prev_offset: Option<usize> = None;
    for (offset, frame) in frames {
        let delta = match prev_offset {
            None => *offset,
            Some(prev) => offset - prev - 1,
        };
        prev_offset = Some(*offset);
        let locals = frame.locals.as_slice();
        let same_locals = locals == prev_locals;
        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                out.put_u8(delta as u8);
            } else {
                out.put_u8(251);
                out.put_u16(delta as u16);
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                out.put_u8(64 + delta as u8);
            } else {
                out.put_u8(247);
                out.put_u16(delta as u16);
            }
            write_vtype(&mut out, &frame.stack[0], pool, positions)?;
        } else if frame.stack.is_empty()
            && locals.len() < prev_locals.len()
            && prev_locals.len() - locals.len() <= 3
            && prev_locals.starts_with(locals)
        {
            out.put_u8(251 - (prev_locals.len() - locals.len()) as u8);
            out.put_u16(delta as u16);
        } else if frame.stack.is_empty()
            && locals.len() > prev_locals.len()
            && locals.len() - prev_locals.len() <= 3
            && locals.starts_with(prev_locals)
        {
            out.put_u8(251 + (locals.len() - prev_locals.len()) as u8);
            out.put_u16(delta as u16);
            for vtype in &locals[prev_locals.len()..] {
                write_vtype(&mut out, vtype, pool, positions)?;
            }
        } else {
            out.put_u8(255);
            out.put_u16(delta as u16);
            out.put_u16(locals.len() as u16);
            for vtype in locals {
                write_vtype(&mut out, vtype, pool, positions)?;
            }
            out.put_u16(frame.stack.len() as u16);
            for vtype in &frame.stack {
                write_vtype(&mut out, vtype, pool, positions)?;
            }
        }
        prev_locals = locals;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationType as V;

    fn frame(locals: Vec<V>, stack: Vec<V>) -> Frame {
        Frame { locals, stack }
    }

    #[test]
    fn initial_locals_for_constructor() {
        let desc = MethodDescriptor::parse("(JLfo;)V").unwrap();
        let locals = initial_locals("client", AccessFlags::PUBLIC, "<init>", &desc);
        assert_eq!(
            locals,
            vec![V::UninitializedThis, V::Long, V::Object("fo".into())]
        );
        let statics = initial_locals("client", AccessFlags::STATIC, "f", &desc);
        assert_eq!(statics.len(), 2);
    }

    #[test]
    fn compact_frame_types_survive_decoding() {
        let initial = vec![V::Object("a".into())];
        let append = frame(vec![V::Object("a".into()), V::Integer, V::Long], vec![]);
        let same_one = frame(append.locals.clone(), vec![V::Object("java/lang/String".into())]);
        let chop = frame(vec![V::Object("a".into())], vec![]);
        let full = frame(vec![V::Integer], vec![V::Null, V::Uninitialized(Label(90))]);
        let far_same = frame(full.locals.clone(), vec![]);
        let frames = [
            (4, &append),
            (10, &same_one),
            (12, &chop),
            (30, &full),
            (200, &far_same),
        ];
        let mut pool = ConstantPool::new();
        let positions = HashMap::from([(Label(90), 90usize)]);
        let bytes = encode_stack_map(&frames, &initial, &mut pool, &positions).unwrap();
        // append, same_locals_1, chop, full, same_frame_extended
        let decoded =
            decode_stack_map(&bytes, &pool, initial.clone(), |pc| Label(pc as u32)).unwrap();
        let expected: Vec<(usize, Frame)> =
            frames.iter().map(|(o, f)| (*o, (*f).clone())).collect();
        assert_eq!(decoded, expected);
        assert_eq!(bytes[2], 253);
    }
}
