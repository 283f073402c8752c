//! Error types for strata operations

use std::fmt;

use thiserror::Error;

use crate::Key;

/// Schema declaration errors, raised when a schema is compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Only one field may be marked id on {type_name}")]
    AmbiguousId { type_name: String },

    #[error("Only one field may be marked kind on {type_name}")]
    AmbiguousKind { type_name: String },

    #[error("Only one field may be marked parent on {type_name}")]
    AmbiguousParent { type_name: String },

    #[error("Id field {field} on {type_name} must be a string or int64")]
    InvalidIdType { type_name: String, field: String },

    #[error("Kind field {field} on {type_name} must be a string")]
    InvalidKindType { type_name: String, field: String },

    #[error("Parent field {field} on {type_name} must be a key")]
    InvalidParentType { type_name: String, field: String },

    #[error("Repeated group field {field} on {type_name} may not hold a list or repeated group")]
    NestedRepeated { type_name: String, field: String },

    #[error("Duplicate field {field} on {type_name}")]
    DuplicateField { type_name: String, field: String },

    #[error("Invalid field name {field:?} on {type_name}: {reason}")]
    InvalidFieldName {
        type_name: String,
        field: String,
        reason: String,
    },
}

/// Key derivation and key parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Incomplete key for kind {kind}")]
    IncompleteKey { kind: String },

    #[error("Empty string id on put for kind {kind}")]
    EmptyStringId { kind: String },

    #[error("Could not set id field: {type_name} has no id field")]
    MissingIdField { type_name: String },

    #[error("Malformed encoded key {encoded:?}: {reason}")]
    Malformed { encoded: String, reason: String },
}

/// Cache record encoding and decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The record is the empty marker: a cached "not found".
    #[error("Entity not found in cached record")]
    EntityNotFound,

    #[error("Empty input")]
    EmptyInput,

    #[error("Unrecognized cache header: {0:#04x}")]
    UnrecognizedHeader(u8),

    #[error("Invalid metadata block: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Could not find field {field}")]
    UnknownField { field: String },

    #[error("Unknown wire type id {0}")]
    UnknownWireType(u64),

    #[error("Truncated payload while reading {context}")]
    Truncated { context: String },

    #[error("{remaining} trailing payload bytes after last field")]
    TrailingData { remaining: usize },

    #[error("Encode failed for field {field}: {reason}")]
    EncodeFailed { field: String, reason: String },

    #[error("Decode failed for field {field}: {reason}")]
    DecodeFailed { field: String, reason: String },
}

/// Primary store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {key}")]
    NotFound { key: Key },

    #[error("Field mismatch on {kind}.{field}: {reason}")]
    FieldMismatch {
        kind: String,
        field: String,
        reason: String,
    },

    #[error("Invalid entity type: {reason}")]
    InvalidEntityType { reason: String },

    #[error("Invalid key {key}: {reason}")]
    InvalidKey { key: Key, reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Concurrent transaction conflict: {reason}")]
    Concurrent { reason: String },

    #[error("Store backend error: {reason}")]
    Backend { reason: String },
}

/// Distributed cache errors. These never reach callers of the tier cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DistributedCacheError {
    #[error("Distributed cache deadline exceeded")]
    Timeout,

    #[error("Distributed cache transport error: {reason}")]
    Transport { reason: String },
}

impl DistributedCacheError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DistributedCacheError::Timeout)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Could not parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all strata errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Distributed cache error: {0}")]
    Distributed(#[from] DistributedCacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("{0}")]
    Multi(MultiError),

    #[error("Nested transactions are not supported")]
    NestedTransaction,

    #[error("Transaction already finished")]
    TransactionClosed,
}

impl CacheError {
    /// True for a primary-store not-found or a cached negative result.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CacheError::Store(StoreError::NotFound { .. })
                | CacheError::Codec(CodecError::EntityNotFound)
        )
    }

    /// Error kinds that keep their per-index shape when a batch result is
    /// collapsed.
    fn keeps_index_shape(&self) -> bool {
        matches!(
            self,
            CacheError::Store(
                StoreError::NotFound { .. }
                    | StoreError::FieldMismatch { .. }
                    | StoreError::InvalidEntityType { .. }
            ) | CacheError::Codec(CodecError::EntityNotFound)
        )
    }
}

/// Result type alias for strata operations.
pub type CacheResult<T> = Result<T, CacheError>;

// ============================================================================
// BATCH ERRORS
// ============================================================================

/// Per-index errors for a batch operation, aligned with the input order.
/// `None` marks an index that succeeded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiError(Vec<Option<CacheError>>);

impl MultiError {
    pub fn new(errors: Vec<Option<CacheError>>) -> Self {
        Self(errors)
    }

    /// Build from per-item results. Returns `None` when every item succeeded.
    pub fn from_results<T>(results: &[CacheResult<T>]) -> Option<Self> {
        if results.iter().all(|r| r.is_ok()) {
            return None;
        }
        Some(Self(results.iter().map(|r| r.as_ref().err().cloned()).collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CacheError> {
        self.0.get(idx).and_then(|e| e.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&CacheError>> {
        self.0.iter().map(|e| e.as_ref())
    }

    pub fn into_inner(self) -> Vec<Option<CacheError>> {
        self.0
    }

    /// Whether the error at `idx` is a not-found.
    pub fn is_not_found(&self, idx: usize) -> bool {
        self.get(idx).is_some_and(CacheError::is_not_found)
    }

    /// Reduce to a single error when every entry is textually identical,
    /// unless that error is one callers inspect per index.
    pub fn collapse(self) -> CacheError {
        let first = match self.0.first() {
            Some(Some(first)) => first.clone(),
            _ => return CacheError::Multi(self),
        };
        if first.keeps_index_shape() {
            return CacheError::Multi(self);
        }
        let text = first.to_string();
        let identical = self
            .0
            .iter()
            .all(|e| e.as_ref().is_some_and(|e| e.to_string() == text));
        if identical {
            first
        } else {
            CacheError::Multi(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut errors = self.0.iter().flatten();
        match errors.next() {
            None => write!(f, "(0 errors)"),
            Some(first) => {
                let rest = errors.count();
                match rest {
                    0 => write!(f, "{first}"),
                    1 => write!(f, "{first} (and 1 other error)"),
                    n => write!(f, "{first} (and {n} other errors)"),
                }
            }
        }
    }
}

/// Whether the error for batch position `idx` is a not-found.
///
/// A bare not-found matches every index; a [`MultiError`] is inspected at
/// `idx`.
pub fn not_found(err: &CacheError, idx: usize) -> bool {
    match err {
        CacheError::Multi(multi) => multi.is_not_found(idx),
        other => other.is_not_found(),
    }
}

/// Collapse per-item results into one outcome for the whole batch.
pub fn batch_outcome<T>(results: Vec<CacheResult<T>>) -> CacheResult<Vec<T>> {
    match MultiError::from_results(&results) {
        Some(multi) => Err(multi.collapse()),
        None => Ok(results.into_iter().flatten().collect()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
