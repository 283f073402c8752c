//! Cached record format.
//!
//! A record is one state byte, a metadata block, and a payload:
//!
//! ```text
//! 0x00                                  empty record: cached "not found"
//! 0x01 <token>+<token>+...| <payload>   normal record
//! ```
//!
//! Each metadata token is a dotted field path, optionally prefixed with `$`
//! (the value is a whole list) or `!` (the value is null and has no payload
//! entry). The payload holds one wire value per non-null token, in token
//! order. Nested structs flatten to `Outer.Inner` paths and repeated groups
//! unroll element by element, so decoding needs nothing but the destination
//! schema. Tokens may arrive in any order and unknown stored fields are
//! rejected, while fields missing from the record keep their defaults.

pub mod pool;
pub mod wire;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::schema::{CompiledSchema, FieldPath, FieldType, Schema, Segment};
use crate::{CacheResult, CodecError, Entity, Record, SchemaRegistry, Value};

use pool::StatePool;
use wire::{ValueDecoder, ValueEncoder};

pub const HEADER_EMPTY: u8 = 0x00;
pub const HEADER_NORMAL: u8 = 0x01;

const MARKER_LIST: char = '$';
const MARKER_NULL: char = '!';
const TOKEN_SEPARATOR: char = '+';
const METADATA_END: u8 = b'|';

const MAX_IDLE_STATES: usize = 64;

static NULL: Value = Value::Null;
static EMPTY_LIST: Value = Value::List(Vec::new());
static EMPTY_RECORD: Record = Record::new();

static GLOBAL_CODEC: Lazy<Arc<EntityCodec>> =
    Lazy::new(|| Arc::new(EntityCodec::new(SchemaRegistry::global())));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Plain,
    List,
    Null,
}

struct Token<'v> {
    name: String,
    marker: Marker,
    value: &'v Value,
}

/// Encodes entities to and from the cached record format.
#[derive(Debug)]
pub struct EntityCodec {
    registry: Arc<SchemaRegistry>,
    encoders: StatePool<ValueEncoder>,
    decoders: StatePool<ValueDecoder>,
}

impl EntityCodec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            encoders: StatePool::new(MAX_IDLE_STATES),
            decoders: StatePool::new(MAX_IDLE_STATES),
        }
    }

    /// The codec bound to the process-wide schema registry.
    pub fn global() -> Arc<EntityCodec> {
        Arc::clone(&GLOBAL_CODEC)
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Encode `src`, or the empty record when `src` is `None`.
    pub fn encode<T: Entity>(&self, src: Option<&T>) -> CacheResult<Vec<u8>> {
        let Some(src) = src else {
            return Ok(vec![HEADER_EMPTY]);
        };
        let schema = self.registry.compiled::<T>()?;
        Ok(self.encode_record(&schema, Some(&src.to_record()))?)
    }

    /// Decode into `dst`. Key fields of `dst` are kept; every other field is
    /// replaced. An empty record fails with [`CodecError::EntityNotFound`]
    /// and leaves `dst` untouched.
    pub fn decode<T: Entity>(&self, bytes: &[u8], dst: &mut T) -> CacheResult<()> {
        let schema = self.registry.compiled::<T>()?;
        let mut record = self.decode_record(&schema, bytes)?;
        schema.copy_key_fields(&dst.to_record(), &mut record);
        *dst = T::from_record(record)?;
        Ok(())
    }

    pub fn encode_record(
        &self,
        schema: &CompiledSchema,
        record: Option<&Record>,
    ) -> Result<Vec<u8>, CodecError> {
        let Some(record) = record else {
            return Ok(vec![HEADER_EMPTY]);
        };

        let mut tokens = Vec::new();
        flatten(schema.schema(), "", record, true, &mut tokens)?;

        let mut encoder = self.encoders.acquire();
        let mut metadata = String::new();
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                metadata.push(TOKEN_SEPARATOR);
            }
            match token.marker {
                Marker::Plain => {}
                Marker::List => metadata.push(MARKER_LIST),
                Marker::Null => metadata.push(MARKER_NULL),
            }
            metadata.push_str(&token.name);
            if token.marker != Marker::Null {
                encoder
                    .encode(token.value)
                    .map_err(|reason| CodecError::EncodeFailed {
                        field: token.name.clone(),
                        reason,
                    })?;
            }
        }

        let payload = encoder.bytes();
        let mut out = Vec::with_capacity(2 + metadata.len() + payload.len());
        out.push(HEADER_NORMAL);
        out.extend_from_slice(metadata.as_bytes());
        out.push(METADATA_END);
        out.extend_from_slice(payload);
        Ok(out)
    }

    pub fn decode_record(&self, schema: &CompiledSchema, bytes: &[u8]) -> Result<Record, CodecError> {
        let (&header, body) = bytes.split_first().ok_or(CodecError::EmptyInput)?;
        match header {
            HEADER_EMPTY => return Err(CodecError::EntityNotFound),
            HEADER_NORMAL => {}
            other => return Err(CodecError::UnrecognizedHeader(other)),
        }

        let end = body
            .iter()
            .position(|b| *b == METADATA_END)
            .ok_or_else(|| CodecError::InvalidMetadata {
                reason: "missing metadata terminator".to_string(),
            })?;
        let metadata = std::str::from_utf8(&body[..end]).map_err(|e| CodecError::InvalidMetadata {
            reason: e.to_string(),
        })?;
        let mut payload = &body[end + 1..];

        let mut decoder = self.decoders.acquire();
        let mut root = Record::new();
        let mut history: HashMap<String, HashSet<String>> = HashMap::new();

        if !metadata.is_empty() {
            for token in metadata.split(TOKEN_SEPARATOR) {
                let (marker, name) = parse_token(token)?;
                let path = schema.path(name).ok_or_else(|| CodecError::UnknownField {
                    field: name.to_string(),
                })?;
                let value = match marker {
                    Marker::Null => Value::Null,
                    _ => decoder.decode(&mut payload)?,
                };
                place(&mut root, name, path, marker, value, &mut history)?;
            }
        }

        if !payload.is_empty() {
            return Err(CodecError::TrailingData {
                remaining: payload.len(),
            });
        }
        Ok(root)
    }
}

fn parse_token(token: &str) -> Result<(Marker, &str), CodecError> {
    let (marker, name) = if let Some(name) = token.strip_prefix(MARKER_LIST) {
        (Marker::List, name)
    } else if let Some(name) = token.strip_prefix(MARKER_NULL) {
        (Marker::Null, name)
    } else {
        (Marker::Plain, token)
    };
    if name.is_empty() {
        return Err(CodecError::InvalidMetadata {
            reason: format!("empty field token {token:?}"),
        });
    }
    Ok((marker, name))
}

// ============================================================================
// FLATTEN
// ============================================================================

fn flatten<'v>(
    schema: &Schema,
    prefix: &str,
    record: &'v Record,
    top: bool,
    out: &mut Vec<Token<'v>>,
) -> Result<(), CodecError> {
    for field in schema.fields() {
        if top && field.role.is_key_role() {
            continue;
        }
        let name = format!("{prefix}{}", field.name);
        let value = record.get(&field.name).unwrap_or(&NULL);
        let wrong_shape = |expected: &str| CodecError::EncodeFailed {
            field: name.clone(),
            reason: format!("expected {expected}, found {}", value.describe()),
        };

        match &field.ty {
            FieldType::Scalar(ty) => {
                if !ty.accepts(value) {
                    return Err(wrong_shape(ty.name()));
                }
                let marker = if value.is_null() {
                    Marker::Null
                } else {
                    Marker::Plain
                };
                out.push(Token { name, marker, value });
            }
            FieldType::List(ty) => {
                let items = match value {
                    Value::Null => {
                        out.push(Token {
                            name,
                            marker: Marker::List,
                            value: &EMPTY_LIST,
                        });
                        continue;
                    }
                    Value::List(items) => items,
                    _ => return Err(wrong_shape("list")),
                };
                if items.iter().any(|item| !ty.accepts(item)) {
                    return Err(wrong_shape(&format!("list of {}", ty.name())));
                }
                if items.iter().any(Value::is_null) {
                    // Null elements cannot live inside a wire list, so the
                    // list is spelled out one token per element.
                    for item in items {
                        let marker = if item.is_null() {
                            Marker::Null
                        } else {
                            Marker::Plain
                        };
                        out.push(Token {
                            name: name.clone(),
                            marker,
                            value: item,
                        });
                    }
                } else {
                    out.push(Token {
                        name,
                        marker: Marker::List,
                        value,
                    });
                }
            }
            FieldType::Nested(inner) => {
                let nested = match value {
                    Value::Null => &EMPTY_RECORD,
                    Value::Record(nested) => nested,
                    _ => return Err(wrong_shape("record")),
                };
                flatten(inner, &format!("{name}."), nested, false, out)?;
            }
            FieldType::Repeated(inner) => {
                let items = match value {
                    Value::Null => continue,
                    Value::List(items) => items,
                    _ => return Err(wrong_shape("list of records")),
                };
                let prefix = format!("{name}.");
                for item in items {
                    let element = match item {
                        Value::Null => &EMPTY_RECORD,
                        Value::Record(element) => element,
                        _ => return Err(wrong_shape("list of records")),
                    };
                    flatten(inner, &prefix, element, false, out)?;
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// REGROUP
// ============================================================================

/// Store one decoded token into the record tree.
///
/// Inside a repeated group, a new element starts when the group has not been
/// seen yet or when the same child path shows up again.
fn place(
    root: &mut Record,
    name: &str,
    path: &FieldPath,
    marker: Marker,
    value: Value,
    history: &mut HashMap<String, HashSet<String>>,
) -> Result<(), CodecError> {
    let parts: Vec<&str> = name.split('.').collect();
    let Some((leaf_name, groups)) = parts.split_last() else {
        return Err(CodecError::UnknownField {
            field: name.to_string(),
        });
    };

    let mut start_element = false;
    if let Some(idx) = path.segments.iter().position(|s| *s == Segment::Repeated) {
        let group = parts[..=idx].join(".");
        let child = parts[idx + 1..].join(".");
        let seen = history.entry(group).or_default();
        if seen.is_empty() || seen.contains(&child) {
            seen.clear();
            start_element = true;
        }
        seen.insert(child);
    }

    let mut current = root;
    for (segment, part) in path.segments.iter().zip(groups) {
        let slot = current.slot_mut(part);
        current = match segment {
            Segment::Nested => slot.make_record(),
            Segment::Repeated => {
                let elements = slot.make_list();
                if start_element || elements.is_empty() {
                    elements.push(Value::Record(Record::new()));
                }
                let last = elements.len() - 1;
                elements[last].make_record()
            }
        };
    }

    let check = |v: &Value| -> Result<(), CodecError> {
        if path.leaf.accepts(v) {
            Ok(())
        } else {
            Err(CodecError::DecodeFailed {
                field: name.to_string(),
                reason: format!("expected {}, found {}", path.leaf.name(), v.describe()),
            })
        }
    };

    let slot = current.slot_mut(leaf_name);
    match (path.is_list, marker) {
        (true, Marker::List) => match value {
            Value::List(items) => {
                items.iter().try_for_each(check)?;
                *slot = Value::List(items);
            }
            other => {
                return Err(CodecError::DecodeFailed {
                    field: name.to_string(),
                    reason: format!("expected list, found {}", other.describe()),
                })
            }
        },
        // A single value for a list field: one element, or a field that was
        // stored as a scalar before it became a list.
        (true, _) => {
            check(&value)?;
            slot.make_list().push(value);
        }
        (false, Marker::List) => {
            return Err(CodecError::DecodeFailed {
                field: name.to_string(),
                reason: "list value for a scalar field".to_string(),
            })
        }
        (false, _) => {
            check(&value)?;
            *slot = value;
        }
    }
    Ok(())
}
