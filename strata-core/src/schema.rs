//! Declarative entity schemas and the process-wide schema registry.
//!
//! An entity type describes its fields once through [`Schema`]. The
//! [`SchemaRegistry`] validates that description the first time the type is
//! used and caches the compiled form, so key resolution and the record codec
//! never rebuild it on the hot path.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::sync::{rw_read, rw_write};
use crate::{CacheResult, Entity, Record, SchemaError, Value, ValueType};

/// Characters with meaning in the cached record's metadata block.
pub const RESERVED_NAME_CHARS: [char; 5] = ['.', '+', '|', '$', '!'];

// ============================================================================
// DECLARATION
// ============================================================================

/// What a field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ValueType),
    List(ValueType),
    /// A nested struct, flattened under `Name.` when cached.
    Nested(Schema),
    /// A list of nested structs, unrolled element by element when cached.
    Repeated(Schema),
}

/// The part a field plays in deriving the entity's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRole {
    Data,
    Id,
    Kind { default: Option<String> },
    Parent,
}

impl FieldRole {
    pub fn is_key_role(&self) -> bool {
        !matches!(self, FieldRole::Data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub role: FieldRole,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            role: FieldRole::Data,
        }
    }

    pub fn role(mut self, role: FieldRole) -> Self {
        self.role = role;
        self
    }
}

/// Ordered field table for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    type_name: String,
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Identifier field; must be [`ValueType::Int`] or [`ValueType::String`].
    pub fn id(self, name: &str, ty: ValueType) -> Self {
        self.field(FieldDef::new(name, FieldType::Scalar(ty)).role(FieldRole::Id))
    }

    /// Kind override field with an optional default kind name.
    pub fn kind(self, name: &str, default: Option<&str>) -> Self {
        let role = FieldRole::Kind {
            default: default.map(str::to_string),
        };
        self.field(FieldDef::new(name, FieldType::Scalar(ValueType::String)).role(role))
    }

    /// Parent key field.
    pub fn parent(self, name: &str) -> Self {
        self.field(FieldDef::new(name, FieldType::Scalar(ValueType::Key)).role(FieldRole::Parent))
    }

    pub fn scalar(self, name: &str, ty: ValueType) -> Self {
        self.field(FieldDef::new(name, FieldType::Scalar(ty)))
    }

    pub fn list(self, name: &str, ty: ValueType) -> Self {
        self.field(FieldDef::new(name, FieldType::List(ty)))
    }

    pub fn nested(self, name: &str, schema: Schema) -> Self {
        self.field(FieldDef::new(name, FieldType::Nested(schema)))
    }

    pub fn repeated(self, name: &str, schema: Schema) -> Self {
        self.field(FieldDef::new(name, FieldType::Repeated(schema)))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

// ============================================================================
// COMPILED FORM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Int,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdField {
    pub name: String,
    pub ty: IdType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindField {
    pub name: String,
    pub default: Option<String>,
}

/// How a group segment of a dotted field path is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Nested,
    Repeated,
}

/// Resolved location of one leaf field, addressed by its dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// One entry per enclosing group, outermost first.
    pub segments: Vec<Segment>,
    pub leaf: ValueType,
    pub is_list: bool,
}

/// Validated schema plus its key-role fields and leaf path index.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    schema: Schema,
    id: Option<IdField>,
    kind: Option<KindField>,
    parent: Option<String>,
    paths: HashMap<String, FieldPath>,
}

impl CompiledSchema {
    pub fn compile(schema: Schema) -> CacheResult<Self> {
        let type_name = schema.type_name().to_string();
        let mut id = None;
        let mut kind = None;
        let mut parent = None;

        for field in schema.fields() {
            match &field.role {
                FieldRole::Data => {}
                FieldRole::Id => {
                    if id.is_some() {
                        return Err(SchemaError::AmbiguousId { type_name }.into());
                    }
                    let ty = match field.ty {
                        FieldType::Scalar(ValueType::Int) => IdType::Int,
                        FieldType::Scalar(ValueType::String) => IdType::String,
                        _ => {
                            return Err(SchemaError::InvalidIdType {
                                type_name,
                                field: field.name.clone(),
                            }
                            .into())
                        }
                    };
                    id = Some(IdField {
                        name: field.name.clone(),
                        ty,
                    });
                }
                FieldRole::Kind { default } => {
                    if kind.is_some() {
                        return Err(SchemaError::AmbiguousKind { type_name }.into());
                    }
                    if field.ty != FieldType::Scalar(ValueType::String) {
                        return Err(SchemaError::InvalidKindType {
                            type_name,
                            field: field.name.clone(),
                        }
                        .into());
                    }
                    kind = Some(KindField {
                        name: field.name.clone(),
                        default: default.clone().filter(|d| !d.is_empty()),
                    });
                }
                FieldRole::Parent => {
                    if parent.is_some() {
                        return Err(SchemaError::AmbiguousParent { type_name }.into());
                    }
                    if field.ty != FieldType::Scalar(ValueType::Key) {
                        return Err(SchemaError::InvalidParentType {
                            type_name,
                            field: field.name.clone(),
                        }
                        .into());
                    }
                    parent = Some(field.name.clone());
                }
            }
        }

        let mut paths = HashMap::new();
        index_paths(&schema, "", &[], true, false, &mut paths)?;

        Ok(Self {
            schema,
            id,
            kind,
            parent,
            paths,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn id_field(&self) -> Option<&IdField> {
        self.id.as_ref()
    }

    pub fn kind_field(&self) -> Option<&KindField> {
        self.kind.as_ref()
    }

    pub fn parent_field(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Look up a stored leaf by dotted path. Key-role fields are not stored
    /// and never resolve.
    pub fn path(&self, name: &str) -> Option<&FieldPath> {
        self.paths.get(name)
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.id.as_ref().is_some_and(|f| f.name == name)
            || self.kind.as_ref().is_some_and(|f| f.name == name)
            || self.parent.as_deref() == Some(name)
    }

    /// Split a record into its stored data fields, dropping key-role fields.
    pub fn data_record(&self, record: Record) -> Record {
        let mut data = Record::new();
        for (name, value) in record.iter() {
            if !self.is_key_field(name) {
                data.set(name, value.clone());
            }
        }
        data
    }

    /// Copy key-role fields from `from` into `into`.
    pub fn copy_key_fields(&self, from: &Record, into: &mut Record) {
        let names = [
            self.id.as_ref().map(|f| f.name.as_str()),
            self.kind.as_ref().map(|f| f.name.as_str()),
            self.parent.as_deref(),
        ];
        for name in names.into_iter().flatten() {
            into.set(name, from.get(name).cloned().unwrap_or(Value::Null));
        }
    }
}

fn index_paths(
    schema: &Schema,
    prefix: &str,
    segments: &[Segment],
    top: bool,
    in_repeated: bool,
    out: &mut HashMap<String, FieldPath>,
) -> CacheResult<()> {
    let mut seen = std::collections::HashSet::new();
    for field in schema.fields() {
        if field.name.is_empty() || field.name.contains(RESERVED_NAME_CHARS) {
            return Err(SchemaError::InvalidFieldName {
                type_name: schema.type_name().to_string(),
                field: field.name.clone(),
                reason: "field names must be non-empty and avoid . + | $ !".to_string(),
            }
            .into());
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                type_name: schema.type_name().to_string(),
                field: field.name.clone(),
            }
            .into());
        }
        if top && field.role.is_key_role() {
            continue;
        }

        let name = format!("{prefix}{}", field.name);
        if in_repeated && matches!(field.ty, FieldType::List(_) | FieldType::Repeated(_)) {
            return Err(SchemaError::NestedRepeated {
                type_name: schema.type_name().to_string(),
                field: name,
            }
            .into());
        }
        match &field.ty {
            FieldType::Scalar(ty) | FieldType::List(ty) => {
                out.insert(
                    name,
                    FieldPath {
                        segments: segments.to_vec(),
                        leaf: *ty,
                        is_list: matches!(field.ty, FieldType::List(_)),
                    },
                );
            }
            FieldType::Nested(inner) | FieldType::Repeated(inner) => {
                let repeated = matches!(field.ty, FieldType::Repeated(_));
                let mut nested = segments.to_vec();
                nested.push(if repeated {
                    Segment::Repeated
                } else {
                    Segment::Nested
                });
                index_paths(
                    inner,
                    &format!("{name}."),
                    &nested,
                    false,
                    in_repeated || repeated,
                    out,
                )?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// REGISTRY
// ============================================================================

static GLOBAL_REGISTRY: Lazy<Arc<SchemaRegistry>> = Lazy::new(|| Arc::new(SchemaRegistry::new()));

/// Compiled schemas keyed by entity type.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    compiled: RwLock<HashMap<TypeId, Arc<CompiledSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<SchemaRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Compiled schema for `T`, compiling and caching it on first use.
    /// Invalid schemas are reported every time and never cached.
    pub fn compiled<T: Entity>(&self) -> CacheResult<Arc<CompiledSchema>> {
        let type_id = TypeId::of::<T>();
        if let Some(found) = rw_read(&self.compiled, "schema", "lookup").get(&type_id) {
            return Ok(Arc::clone(found));
        }

        let fresh = Arc::new(CompiledSchema::compile(T::schema())?);
        let mut compiled = rw_write(&self.compiled, "schema", "insert");
        Ok(Arc::clone(compiled.entry(type_id).or_insert(fresh)))
    }

    pub fn len(&self) -> usize {
        rw_read(&self.compiled, "schema", "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
