use bytes::{Buf, BufMut};

use crate::{ArgSpec, ArgType, ArgValue, ArgumentValues, DecodeError, EncodeError, PrimitiveType};

/// Wire step resolved once from an [`ArgType`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Bool,
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float32,
    Float64,
    Ascii,
    Utf8,
    Array(Box<Step>),
}

impl Step {
    fn compile(ty: &ArgType) -> Self {
        match ty {
            ArgType::Primitive(p) => match p {
                PrimitiveType::Bool => Step::Bool,
                PrimitiveType::Int8 => Step::Int8,
                PrimitiveType::Int16 => Step::Int16,
                PrimitiveType::Int32 => Step::Int32,
                PrimitiveType::Uint8 => Step::Uint8,
                PrimitiveType::Uint16 => Step::Uint16,
                PrimitiveType::Uint32 | PrimitiveType::FlowId => Step::Uint32,
                PrimitiveType::Float32 => Step::Float32,
                PrimitiveType::Float64 => Step::Float64,
                PrimitiveType::Ascii => Step::Ascii,
                PrimitiveType::Utf8 => Step::Utf8,
            },
            ArgType::Array(element) => Step::Array(Box::new(Step::compile(element))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Step::Bool => "bool",
            Step::Int8 | Step::Int16 | Step::Int32 => "signed integer",
            Step::Uint8 | Step::Uint16 | Step::Uint32 => "unsigned integer",
            Step::Float32 | Step::Float64 => "number",
            Step::Ascii => "ascii string",
            Step::Utf8 => "utf8 string",
            Step::Array(_) => "array",
        }
    }
}

/// Argument slots in wire order: `(output slot, step)`.
fn compile_plan(args: &[ArgSpec]) -> Vec<(usize, Step)> {
    let mut plan: Vec<(u32, usize, Step)> = args
        .iter()
        .enumerate()
        .map(|(slot, arg)| (arg.ordinal, slot, Step::compile(&arg.ty)))
        .collect();
    plan.sort_by_key(|(ordinal, _, _)| *ordinal);
    plan.into_iter().map(|(_, slot, step)| (slot, step)).collect()
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn read_bytes<B: Buf>(buf: &mut B, len: usize) -> Result<Vec<u8>, DecodeError> {
    ensure(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn read_value<B: Buf>(step: &Step, buf: &mut B) -> Result<ArgValue, DecodeError> {
    let value = match step {
        Step::Bool => {
            ensure(buf, 1)?;
            ArgValue::Bool(buf.get_u8() != 0)
        }
        Step::Int8 => {
            ensure(buf, 1)?;
            ArgValue::Int(buf.get_i8() as i64)
        }
        Step::Int16 => {
            ensure(buf, 2)?;
            ArgValue::Int(buf.get_i16() as i64)
        }
        Step::Int32 => {
            ensure(buf, 4)?;
            ArgValue::Int(buf.get_i32() as i64)
        }
        Step::Uint8 => {
            ensure(buf, 1)?;
            ArgValue::Int(buf.get_u8() as i64)
        }
        Step::Uint16 => {
            ensure(buf, 2)?;
            ArgValue::Int(buf.get_u16() as i64)
        }
        Step::Uint32 => {
            ensure(buf, 4)?;
            ArgValue::Int(buf.get_u32() as i64)
        }
        Step::Float32 => {
            ensure(buf, 4)?;
            ArgValue::Float(buf.get_f32() as f64)
        }
        Step::Float64 => {
            ensure(buf, 8)?;
            ArgValue::Float(buf.get_f64())
        }
        Step::Ascii => {
            ensure(buf, 2)?;
            let len = buf.get_u16() as usize;
            if len == 0 {
                return Ok(ArgValue::Null);
            }
            let bytes = read_bytes(buf, len)?;
            if !bytes.is_ascii() {
                return Err(DecodeError::InvalidAscii);
            }
            ArgValue::String(String::from_utf8(bytes)?)
        }
        Step::Utf8 => {
            ensure(buf, 2)?;
            let chars = buf.get_u16();
            if chars == 0 {
                return Ok(ArgValue::Null);
            }
            ensure(buf, 2)?;
            let len = buf.get_u16() as usize;
            ArgValue::String(String::from_utf8(read_bytes(buf, len)?)?)
        }
        Step::Array(element) => {
            ensure(buf, 4)?;
            let len = buf.get_u32() as usize;
            // Each element takes at least one byte, so a length past the
            // remaining buffer is a truncation rather than an allocation.
            ensure(buf, len)?;
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(read_value(element, buf)?);
            }
            ArgValue::Array(values)
        }
    };
    Ok(value)
}

fn write_value<B: BufMut>(
    step: &Step,
    value: &ArgValue,
    slot: usize,
    buf: &mut B,
) -> Result<(), EncodeError> {
    let mismatch = || EncodeError::TypeMismatch {
        slot,
        expected: step.name(),
    };
    let int = |value: &ArgValue| value.as_i64().ok_or_else(mismatch);

    match step {
        Step::Bool => buf.put_u8(value.as_bool().ok_or_else(mismatch)? as u8),
        Step::Int8 => buf.put_i8(int(value)? as i8),
        Step::Int16 => buf.put_i16(int(value)? as i16),
        Step::Int32 => buf.put_i32(int(value)? as i32),
        Step::Uint8 => buf.put_u8(int(value)? as u8),
        Step::Uint16 => buf.put_u16(int(value)? as u16),
        Step::Uint32 => buf.put_u32(int(value)? as u32),
        Step::Float32 => buf.put_f32(value.as_f64().ok_or_else(mismatch)? as f32),
        Step::Float64 => buf.put_f64(value.as_f64().ok_or_else(mismatch)?),
        Step::Ascii => match value {
            ArgValue::Null => buf.put_u16(0),
            ArgValue::String(s) => {
                if !s.is_ascii() {
                    return Err(mismatch());
                }
                let len = u16::try_from(s.len()).map_err(|_| EncodeError::TooLong { slot })?;
                buf.put_u16(len);
                buf.put_slice(s.as_bytes());
            }
            _ => return Err(mismatch()),
        },
        Step::Utf8 => match value {
            ArgValue::Null => buf.put_u16(0),
            ArgValue::String(s) => {
                let chars = u16::try_from(s.chars().count())
                    .map_err(|_| EncodeError::TooLong { slot })?;
                let len = u16::try_from(s.len()).map_err(|_| EncodeError::TooLong { slot })?;
                buf.put_u16(chars);
                if chars > 0 {
                    buf.put_u16(len);
                    buf.put_slice(s.as_bytes());
                }
            }
            _ => return Err(mismatch()),
        },
        Step::Array(element) => {
            let values = value.as_array().ok_or_else(mismatch)?;
            let len = u32::try_from(values.len()).map_err(|_| EncodeError::TooLong { slot })?;
            buf.put_u32(len);
            for value in values {
                write_value(element, value, slot, buf)?;
            }
        }
    }
    Ok(())
}

/// Decodes argument bytes for one event type. Compiled once per type.
#[derive(Debug, Clone)]
pub struct ArgDecoder {
    plan: Vec<(usize, Step)>,
}

impl ArgDecoder {
    pub fn compile(args: &[ArgSpec]) -> Self {
        ArgDecoder {
            plan: compile_plan(args),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.plan.len()
    }

    /// Returns values in schema order, regardless of wire order.
    pub fn decode<B: Buf>(&self, buf: &mut B) -> Result<ArgumentValues, DecodeError> {
        let mut values = vec![ArgValue::Null; self.plan.len()];
        for (slot, step) in &self.plan {
            values[*slot] = read_value(step, buf)?;
        }
        Ok(values)
    }
}

/// Writes argument values in the layout [`ArgDecoder`] reads.
#[derive(Debug, Clone)]
pub struct ArgEncoder {
    plan: Vec<(usize, Step)>,
}

impl ArgEncoder {
    pub fn compile(args: &[ArgSpec]) -> Self {
        ArgEncoder {
            plan: compile_plan(args),
        }
    }

    pub fn encode<B: BufMut>(&self, values: &[ArgValue], buf: &mut B) -> Result<(), EncodeError> {
        if values.len() != self.plan.len() {
            return Err(EncodeError::ValueCount {
                expected: self.plan.len(),
                actual: values.len(),
            });
        }
        for (slot, step) in &self.plan {
            write_value(step, &values[*slot], *slot, buf)?;
        }
        Ok(())
    }

    pub fn encode_to_vec(&self, values: &[ArgValue]) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode(values, &mut buf)?;
        Ok(buf)
    }
}
