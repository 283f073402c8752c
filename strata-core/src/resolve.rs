//! Key derivation from entity fields, and writing keys back into entities.

use std::fmt;
use std::sync::Arc;

use crate::schema::{CompiledSchema, IdType};
use crate::{CacheError, CacheResult, Entity, Key, KeyError, Record, SchemaRegistry, Value};

/// Maps an entity's type name to its default kind.
pub type KindNameResolver = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Derives keys from the id, kind and parent fields an entity declares.
#[derive(Clone)]
pub struct KeyResolver {
    registry: Arc<SchemaRegistry>,
    kind_name: KindNameResolver,
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("schemas", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(SchemaRegistry::global())
    }
}

impl KeyResolver {
    /// Resolver whose default kind is the schema's type name.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            kind_name: Arc::new(|type_name: &str| type_name.to_string()),
        }
    }

    pub fn with_kind_name_resolver(mut self, resolver: KindNameResolver) -> Self {
        self.kind_name = resolver;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn schema<T: Entity>(&self) -> CacheResult<Arc<CompiledSchema>> {
        self.registry.compiled::<T>()
    }

    /// Default kind for a type name when no kind field overrides it.
    pub fn kind_name(&self, type_name: &str) -> String {
        (self.kind_name)(type_name)
    }

    /// Kind for `src`: its kind field, then that field's default, then the
    /// kind-name resolver.
    pub fn kind<T: Entity>(&self, src: &T) -> CacheResult<String> {
        let schema = self.schema::<T>()?;
        self.kind_of(&schema, &src.to_record())
    }

    fn kind_of(&self, schema: &CompiledSchema, record: &Record) -> CacheResult<String> {
        if let Some(field) = schema.kind_field() {
            match record.get(&field.name) {
                Some(Value::String(kind)) if !kind.is_empty() => return Ok(kind.clone()),
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(other) => return Err(type_mismatch(&field.name, "string", other)),
            }
            if let Some(default) = &field.default {
                return Ok(default.clone());
            }
        }
        Ok(self.kind_name(schema.type_name()))
    }

    /// Key for `src`, and whether its id field is a string.
    ///
    /// An unset id yields an incomplete key; callers decide whether that is
    /// acceptable.
    pub fn resolve_key<T: Entity>(&self, src: &T) -> CacheResult<(Key, bool)> {
        let schema = self.schema::<T>()?;
        let record = src.to_record();

        let mut string_id = String::new();
        let mut int_id = 0;
        let mut has_string_id = false;
        if let Some(field) = schema.id_field() {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            match (field.ty, value) {
                (_, Value::Null) => has_string_id = field.ty == IdType::String,
                (IdType::Int, Value::Int(id)) => int_id = *id,
                (IdType::String, Value::String(id)) => {
                    has_string_id = true;
                    string_id = id.clone();
                }
                (IdType::Int, other) => return Err(type_mismatch(&field.name, "int", other)),
                (IdType::String, other) => {
                    return Err(type_mismatch(&field.name, "string", other))
                }
            }
        }

        let parent = match schema.parent_field() {
            None => None,
            Some(name) => match record.get(name) {
                None | Some(Value::Null) => None,
                Some(Value::Key(parent)) => Some(parent.clone()),
                Some(other) => return Err(type_mismatch(name, "key", other)),
            },
        };

        let kind = self.kind_of(&schema, &record)?;
        Ok((Key::new(kind, string_id, int_id, parent), has_string_id))
    }

    /// Write `key` back into the id, kind and parent fields of `dst`.
    ///
    /// The kind field is only overwritten when the key's kind differs from
    /// both the field's default and the resolver's default, so entities that
    /// rely on defaults keep an empty kind field.
    pub fn apply_key<T: Entity>(&self, dst: &mut T, key: &Key) -> CacheResult<()> {
        let schema = self.schema::<T>()?;
        let id = schema.id_field().ok_or_else(|| KeyError::MissingIdField {
            type_name: schema.type_name().to_string(),
        })?;

        let mut record = dst.to_record();
        match id.ty {
            IdType::Int => record.set(&id.name, Value::Int(key.int_id())),
            IdType::String => record.set(&id.name, Value::String(key.string_id().to_string())),
        }

        if let Some(kind) = schema.kind_field() {
            let differs_from_default = kind.default.as_deref() != Some(key.kind());
            if differs_from_default && self.kind_name(schema.type_name()) != key.kind() {
                record.set(&kind.name, Value::String(key.kind().to_string()));
            }
        }

        if let Some(parent) = schema.parent_field() {
            let value = key.parent().cloned().map(Value::Key).unwrap_or(Value::Null);
            record.set(parent, value);
        }

        *dst = T::from_record(record)?;
        Ok(())
    }
}

fn type_mismatch(field: &str, expected: &str, found: &Value) -> CacheError {
    CacheError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        found: found.describe().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Schema, SchemaError, ValueType};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Story {
        id: i64,
        feed: Option<Key>,
        title: String,
    }

    impl Entity for Story {
        fn schema() -> Schema {
            Schema::new("Story")
                .id("Id", ValueType::Int)
                .parent("Feed")
                .scalar("Title", ValueType::String)
        }
        fn to_record(&self) -> Record {
            Record::new()
                .with("Id", self.id)
                .with("Feed", self.feed.clone())
                .with("Title", self.title.as_str())
        }
        fn from_record(mut record: Record) -> CacheResult<Self> {
            Ok(Self {
                id: record.take("Id")?,
                feed: record.take("Feed")?,
                title: record.take("Title")?,
            })
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        name: String,
        kind: String,
    }

    impl Entity for Account {
        fn schema() -> Schema {
            Schema::new("Account")
                .id("Name", ValueType::String)
                .kind("Kind", Some("U"))
        }
        fn to_record(&self) -> Record {
            Record::new()
                .with("Name", self.name.as_str())
                .with("Kind", self.kind.as_str())
        }
        fn from_record(mut record: Record) -> CacheResult<Self> {
            Ok(Self {
                name: record.take("Name")?,
                kind: record.take("Kind")?,
            })
        }
    }

    #[derive(Debug, Clone)]
    struct TwoIds;

    impl Entity for TwoIds {
        fn schema() -> Schema {
            Schema::new("TwoIds")
                .id("A", ValueType::Int)
                .id("B", ValueType::String)
        }
        fn to_record(&self) -> Record {
            Record::new()
        }
        fn from_record(_record: Record) -> CacheResult<Self> {
            Ok(TwoIds)
        }
    }

    fn resolver() -> KeyResolver {
        KeyResolver::new(Arc::new(SchemaRegistry::new()))
    }

    #[test]
    fn test_resolve_int_id_with_parent() {
        let feed = Key::with_name("Feed", "f");
        let story = Story {
            id: 7,
            feed: Some(feed.clone()),
            ..Default::default()
        };
        let (key, has_string_id) = resolver().resolve_key(&story).unwrap();
        assert_eq!(key, Key::with_id("Story", 7).with_parent(feed));
        assert!(!has_string_id);
    }

    #[test]
    fn test_resolve_unset_id_is_incomplete() {
        let (key, _) = resolver().resolve_key(&Story::default()).unwrap();
        assert!(key.is_incomplete());
        assert_eq!(key.kind(), "Story");
    }

    #[test]
    fn test_kind_resolution_order() {
        let resolver = resolver();
        let mut account = Account {
            name: "ann".into(),
            kind: String::new(),
        };
        assert_eq!(resolver.kind(&account).unwrap(), "U");
        account.kind = "Admin".into();
        assert_eq!(resolver.kind(&account).unwrap(), "Admin");

        let prefixed = resolver.with_kind_name_resolver(Arc::new(|name: &str| format!("x{name}")));
        assert_eq!(prefixed.kind(&Story::default()).unwrap(), "xStory");
    }

    #[test]
    fn test_string_id_reported() {
        let account = Account {
            name: String::new(),
            kind: String::new(),
        };
        let (key, has_string_id) = resolver().resolve_key(&account).unwrap();
        assert!(has_string_id);
        assert!(key.is_incomplete());
    }

    #[test]
    fn test_ambiguous_id_rejected() {
        let err = resolver().resolve_key(&TwoIds).unwrap_err();
        assert!(matches!(err, CacheError::Schema(SchemaError::AmbiguousId { .. })));
    }

    #[test]
    fn test_apply_key_sets_id_and_parent() {
        let parent = Key::with_name("Feed", "f");
        let mut story = Story::default();
        resolver()
            .apply_key(&mut story, &Key::with_id("Story", 9).with_parent(parent.clone()))
            .unwrap();
        assert_eq!(story.id, 9);
        assert_eq!(story.feed, Some(parent));
    }

    #[test]
    fn test_apply_key_kind_only_when_not_default() {
        let resolver = resolver();
        let mut account = Account::default();
        resolver
            .apply_key(&mut account, &Key::with_name("U", "ann"))
            .unwrap();
        assert_eq!(account.name, "ann");
        assert_eq!(account.kind, "");

        resolver
            .apply_key(&mut account, &Key::with_name("Admin", "ann"))
            .unwrap();
        assert_eq!(account.kind, "Admin");
    }

    #[test]
    fn test_apply_key_requires_id_field() {
        #[derive(Clone)]
        struct NoId;
        impl Entity for NoId {
            fn schema() -> Schema {
                Schema::new("NoId").scalar("A", ValueType::Int)
            }
            fn to_record(&self) -> Record {
                Record::new()
            }
            fn from_record(_record: Record) -> CacheResult<Self> {
                Ok(NoId)
            }
        }
        let err = resolver()
            .apply_key(&mut NoId, &Key::with_id("NoId", 1))
            .unwrap_err();
        assert!(matches!(err, CacheError::Key(KeyError::MissingIdField { .. })));
    }
}
