//! Self-describing value bytestream used for cached record payloads.
//!
//! Each value is a varint type id followed by its body. Scalar types and a
//! set of well-known list types have fixed ids. Any other composite type is
//! announced in the stream the first time it is used: a definition record
//! (id 0, the new id, then a type descriptor) precedes the value. Those
//! per-stream registrations are dropped when the state is reset for reuse.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{CodecError, Key, Value};

const DEFINITION_ID: u64 = 0;
const FIRST_DYNAMIC_ID: u64 = 64;
const MAX_DESCRIPTOR_DEPTH: usize = 8;

const DESCRIPTOR_DYNAMIC: u8 = 0x7E;
const DESCRIPTOR_LIST: u8 = 0x7F;

/// Wire-level type of one encoded value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Timestamp,
    Key,
    EmptyList,
    /// List element carrying its own scalar type id.
    Dynamic,
    List(Box<WireType>),
}

impl WireType {
    fn fixed_id(&self) -> Option<u64> {
        match self {
            WireType::Bool => Some(1),
            WireType::Int => Some(2),
            WireType::Float => Some(3),
            WireType::String => Some(4),
            WireType::Bytes => Some(5),
            WireType::Timestamp => Some(6),
            WireType::Key => Some(7),
            WireType::EmptyList => Some(8),
            WireType::Dynamic | WireType::List(_) => None,
        }
    }

    fn from_fixed_id(id: u64) -> Option<WireType> {
        Some(match id {
            1 => WireType::Bool,
            2 => WireType::Int,
            3 => WireType::Float,
            4 => WireType::String,
            5 => WireType::Bytes,
            6 => WireType::Timestamp,
            7 => WireType::Key,
            8 => WireType::EmptyList,
            _ => return None,
        })
    }

    fn list(inner: WireType) -> WireType {
        WireType::List(Box::new(inner))
    }

    /// The wire type a value is written as.
    fn of(value: &Value) -> Result<WireType, String> {
        match value {
            Value::Bool(_) => Ok(WireType::Bool),
            Value::Int(_) => Ok(WireType::Int),
            Value::Float(_) => Ok(WireType::Float),
            Value::String(_) => Ok(WireType::String),
            Value::Bytes(_) => Ok(WireType::Bytes),
            Value::Timestamp(_) => Ok(WireType::Timestamp),
            Value::Key(_) => Ok(WireType::Key),
            Value::List(items) => {
                let mut element: Option<WireType> = None;
                for item in items {
                    let ty = match item {
                        Value::Null | Value::List(_) | Value::Record(_) => {
                            return Err(format!("{} is not allowed inside a list", item.describe()))
                        }
                        scalar => WireType::of(scalar)?,
                    };
                    element = match element {
                        None => Some(ty),
                        Some(seen) if seen == ty => Some(seen),
                        Some(_) => Some(WireType::Dynamic),
                    };
                }
                Ok(match element {
                    None => WireType::EmptyList,
                    Some(inner) => WireType::list(inner),
                })
            }
            Value::Null | Value::Record(_) => {
                Err(format!("{} values are not encodable", value.describe()))
            }
        }
    }
}

/// List types every encoder and decoder knows without a definition record.
fn bootstrap_types() -> [(WireType, u64); 7] {
    [
        (WireType::list(WireType::Key), 16),
        (WireType::list(WireType::Timestamp), 17),
        (WireType::list(WireType::Int), 18),
        (WireType::list(WireType::Float), 19),
        (WireType::list(WireType::Bool), 20),
        (WireType::list(WireType::String), 21),
        (WireType::list(WireType::Bytes), 22),
    ]
}

// ============================================================================
// ENCODER
// ============================================================================

/// Reusable encoder state. `Default` is an empty, unbootstrapped placeholder;
/// use [`ValueEncoder::new`] for a working encoder.
#[derive(Debug, Default)]
pub struct ValueEncoder {
    buf: Vec<u8>,
    ids: HashMap<WireType, u64>,
    next_id: u64,
}

impl ValueEncoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            ids: bootstrap_types().into_iter().collect(),
            next_id: FIRST_DYNAMIC_ID,
        }
    }

    /// Types currently known to this encoder, bootstrapped ones included.
    pub fn registered_types(&self) -> usize {
        self.ids.len()
    }

    /// Append one value to the stream.
    pub fn encode(&mut self, value: &Value) -> Result<(), String> {
        let ty = WireType::of(value)?;
        let id = self.type_id(&ty);
        put_uvarint(&mut self.buf, id);
        write_body(&mut self.buf, &ty, value)
    }

    fn type_id(&mut self, ty: &WireType) -> u64 {
        if let Some(id) = ty.fixed_id() {
            return id;
        }
        if let Some(id) = self.ids.get(ty) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(ty.clone(), id);
        put_uvarint(&mut self.buf, DEFINITION_ID);
        put_uvarint(&mut self.buf, id);
        write_descriptor(&mut self.buf, ty);
        id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Clear the buffer and forget per-stream type registrations.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.ids.retain(|_, id| *id < FIRST_DYNAMIC_ID);
        self.next_id = FIRST_DYNAMIC_ID;
    }
}

fn write_descriptor(buf: &mut Vec<u8>, ty: &WireType) {
    match ty {
        WireType::Dynamic => buf.push(DESCRIPTOR_DYNAMIC),
        WireType::List(inner) => {
            buf.push(DESCRIPTOR_LIST);
            write_descriptor(buf, inner);
        }
        // Fixed ids are all below 0x7E.
        scalar => buf.push(scalar.fixed_id().unwrap_or_default() as u8),
    }
}

fn write_body(buf: &mut Vec<u8>, ty: &WireType, value: &Value) -> Result<(), String> {
    match (ty, value) {
        (WireType::Bool, Value::Bool(v)) => buf.push(u8::from(*v)),
        (WireType::Int, Value::Int(v)) => put_varint(buf, *v),
        (WireType::Float, Value::Float(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (WireType::String, Value::String(v)) => put_bytes(buf, v.as_bytes()),
        (WireType::Bytes, Value::Bytes(v)) => put_bytes(buf, v),
        (WireType::Timestamp, Value::Timestamp(v)) => {
            put_varint(buf, v.timestamp());
            put_uvarint(buf, u64::from(v.timestamp_subsec_nanos()));
        }
        (WireType::Key, Value::Key(v)) => write_key(buf, v),
        (WireType::EmptyList, Value::List(_)) => {}
        (WireType::Dynamic, scalar) => {
            let inner = WireType::of(scalar)?;
            put_uvarint(buf, inner.fixed_id().unwrap_or_default());
            write_body(buf, &inner, scalar)?;
        }
        (WireType::List(inner), Value::List(items)) => {
            put_uvarint(buf, items.len() as u64);
            for item in items {
                write_body(buf, inner, item)?;
            }
        }
        (ty, value) => return Err(format!("{} does not match wire type {ty:?}", value.describe())),
    }
    Ok(())
}

fn write_key(buf: &mut Vec<u8>, key: &Key) {
    put_bytes(buf, key.kind().as_bytes());
    put_bytes(buf, key.string_id().as_bytes());
    put_varint(buf, key.int_id());
    match key.parent() {
        Some(parent) => {
            buf.push(1);
            write_key(buf, parent);
        }
        None => buf.push(0),
    }
}

// ============================================================================
// DECODER
// ============================================================================

/// Reusable decoder state. `Default` is an empty placeholder; use
/// [`ValueDecoder::new`] for a working decoder.
#[derive(Debug, Default)]
pub struct ValueDecoder {
    types: HashMap<u64, WireType>,
}

impl ValueDecoder {
    pub fn new() -> Self {
        Self {
            types: bootstrap_types().into_iter().map(|(ty, id)| (id, ty)).collect(),
        }
    }

    pub fn registered_types(&self) -> usize {
        self.types.len()
    }

    /// Read the next value, consuming any definition records before it.
    pub fn decode(&mut self, input: &mut &[u8]) -> Result<Value, CodecError> {
        loop {
            let id = get_uvarint(input, "type id")?;
            if id == DEFINITION_ID {
                let new_id = get_uvarint(input, "type definition")?;
                if new_id < FIRST_DYNAMIC_ID {
                    return Err(CodecError::UnknownWireType(new_id));
                }
                let ty = read_descriptor(input, 0)?;
                self.types.insert(new_id, ty);
                continue;
            }
            let ty = match WireType::from_fixed_id(id) {
                Some(ty) => ty,
                None => self
                    .types
                    .get(&id)
                    .cloned()
                    .ok_or(CodecError::UnknownWireType(id))?,
            };
            return read_body(input, &ty);
        }
    }

    /// Forget per-stream type registrations.
    pub fn reset(&mut self) {
        self.types.retain(|id, _| *id < FIRST_DYNAMIC_ID);
    }
}

fn read_descriptor(input: &mut &[u8], depth: usize) -> Result<WireType, CodecError> {
    if depth > MAX_DESCRIPTOR_DEPTH {
        return Err(CodecError::InvalidMetadata {
            reason: "type descriptor nested too deeply".to_string(),
        });
    }
    let tag = take(input, 1, "type descriptor")?[0];
    match tag {
        DESCRIPTOR_DYNAMIC => Ok(WireType::Dynamic),
        DESCRIPTOR_LIST => Ok(WireType::list(read_descriptor(input, depth + 1)?)),
        other => WireType::from_fixed_id(u64::from(other))
            .ok_or(CodecError::UnknownWireType(u64::from(other))),
    }
}

fn read_body(input: &mut &[u8], ty: &WireType) -> Result<Value, CodecError> {
    Ok(match ty {
        WireType::Bool => Value::Bool(take(input, 1, "bool")?[0] != 0),
        WireType::Int => Value::Int(get_varint(input, "int")?),
        WireType::Float => {
            let raw = take(input, 8, "float")?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            Value::Float(f64::from_le_bytes(bytes))
        }
        WireType::String => {
            let raw = get_bytes(input, "string")?;
            let text = std::str::from_utf8(raw).map_err(|e| CodecError::DecodeFailed {
                field: "string".to_string(),
                reason: e.to_string(),
            })?;
            Value::String(text.to_string())
        }
        WireType::Bytes => Value::Bytes(get_bytes(input, "bytes")?.to_vec()),
        WireType::Timestamp => {
            let secs = get_varint(input, "timestamp")?;
            let nanos = get_uvarint(input, "timestamp")?;
            let time = u32::try_from(nanos)
                .ok()
                .and_then(|nanos| DateTime::<Utc>::from_timestamp(secs, nanos))
                .ok_or_else(|| CodecError::DecodeFailed {
                    field: "timestamp".to_string(),
                    reason: format!("out of range: {secs}s {nanos}ns"),
                })?;
            Value::Timestamp(time)
        }
        WireType::Key => Value::Key(read_key(input, 0)?),
        WireType::EmptyList => Value::List(Vec::new()),
        WireType::Dynamic => {
            let id = get_uvarint(input, "list element type")?;
            let inner = WireType::from_fixed_id(id)
                .filter(|ty| *ty != WireType::EmptyList)
                .ok_or(CodecError::UnknownWireType(id))?;
            read_body(input, &inner)?
        }
        WireType::List(inner) => {
            let count = get_uvarint(input, "list length")?;
            // Every element body is at least one byte.
            if count > input.len() as u64 {
                return Err(CodecError::Truncated {
                    context: "list elements".to_string(),
                });
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_body(input, inner)?);
            }
            Value::List(items)
        }
    })
}

fn read_key(input: &mut &[u8], depth: usize) -> Result<Key, CodecError> {
    let utf8 = |raw: &[u8]| {
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| CodecError::DecodeFailed {
                field: "key".to_string(),
                reason: e.to_string(),
            })
    };
    let kind = utf8(get_bytes(input, "key kind")?)?;
    let string_id = utf8(get_bytes(input, "key name")?)?;
    let int_id = get_varint(input, "key id")?;
    let parent = match take(input, 1, "key parent flag")?[0] {
        0 => None,
        _ if depth >= 64 => {
            return Err(CodecError::DecodeFailed {
                field: "key".to_string(),
                reason: "ancestor path too deep".to_string(),
            })
        }
        _ => Some(read_key(input, depth + 1)?),
    };
    Ok(Key::new(kind, string_id, int_id, parent))
}

// ============================================================================
// PRIMITIVES
// ============================================================================

pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn put_varint(buf: &mut Vec<u8>, v: i64) {
    put_uvarint(buf, ((v << 1) ^ (v >> 63)) as u64);
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn take<'a>(input: &mut &'a [u8], n: usize, context: &str) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::Truncated {
            context: context.to_string(),
        });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

fn get_uvarint(input: &mut &[u8], context: &str) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = take(input, 1, context)?[0];
        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(CodecError::DecodeFailed {
        field: context.to_string(),
        reason: "varint overflow".to_string(),
    })
}

fn get_varint(input: &mut &[u8], context: &str) -> Result<i64, CodecError> {
    let raw = get_uvarint(input, context)?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

fn get_bytes<'a>(input: &mut &'a [u8], context: &str) -> Result<&'a [u8], CodecError> {
    let len = get_uvarint(input, context)?;
    let len = usize::try_from(len).map_err(|_| CodecError::Truncated {
        context: context.to_string(),
    })?;
    take(input, len, context)
}
