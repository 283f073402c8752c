//! strata core - keys, schemas, records and the cached record codec
//!
//! Entities describe their stored shape once through a [`Schema`] and convert
//! to and from a normalized [`Record`]. Everything above this crate (the tier
//! cache, transactions, batching) works on those records and on [`Key`]s
//! derived by the [`KeyResolver`].

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod resolve;
pub mod schema;
pub mod sync;
pub mod value;

pub use codec::{EntityCodec, HEADER_EMPTY, HEADER_NORMAL};
pub use config::TierCacheConfig;
pub use error::{
    batch_outcome, not_found, CacheError, CacheResult, CodecError, ConfigError,
    DistributedCacheError, KeyError, MultiError, SchemaError, StoreError,
};
pub use key::Key;
pub use resolve::{KeyResolver, KindNameResolver};
pub use schema::{
    CompiledSchema, FieldDef, FieldRole, FieldType, IdType, Schema, SchemaRegistry,
};
pub use value::{Blob, FromValue, IntoValue, Record, Value, ValueType};

/// A struct the tier cache can store.
///
/// `to_record` must emit every field the schema declares that has a value,
/// key fields included; `from_record` must accept a record with any subset of
/// those fields and default the rest. Nested and repeated struct fields use
/// the same trait for their element types.
pub trait Entity: Clone + Send + Sync + 'static {
    fn schema() -> Schema;
    fn to_record(&self) -> Record;
    fn from_record(record: Record) -> CacheResult<Self>;
}
