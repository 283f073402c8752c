//! strata test utilities
//!
//! Shared test infrastructure for the strata workspace:
//! - Fixture entity types covering every field shape the codec handles
//! - Proptest generators for those entities and for keys
//! - A harness wiring a `TierCache` to instrumented in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use strata_core::{
    Blob, CacheError, CacheResult, Entity, FromValue, IntoValue, Key, Record, Schema,
    TierCacheConfig, Value, ValueType,
};
pub use strata_storage::{MockDistributedCache, MockPrimaryStore, TierCache};

// ============================================================================
// FIXTURE ENTITIES
// ============================================================================

/// A feed, keyed by its URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub url: String,
    pub title: String,
    pub updated: DateTime<Utc>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl Entity for Feed {
    fn schema() -> Schema {
        Schema::new("Feed")
            .id("url", ValueType::String)
            .scalar("Title", ValueType::String)
            .scalar("Updated", ValueType::Timestamp)
            .list("Tags", ValueType::String)
            .scalar("Notes", ValueType::String)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("url", self.url.clone())
            .with("Title", self.title.clone())
            .with("Updated", self.updated)
            .with("Tags", self.tags.clone())
            .with("Notes", self.notes.clone())
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            url: record.take("url")?,
            title: record.take("Title")?,
            updated: record.take("Updated")?,
            tags: record.take("Tags")?,
            notes: record.take("Notes")?,
        })
    }
}

/// A media attachment; stored inline in a [`Story`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enclosure {
    pub url: String,
    pub length: i64,
    pub media_type: Option<String>,
}

impl Entity for Enclosure {
    fn schema() -> Schema {
        Schema::new("Enclosure")
            .scalar("Url", ValueType::String)
            .scalar("Length", ValueType::Int)
            .scalar("Type", ValueType::String)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("Url", self.url.clone())
            .with("Length", self.length)
            .with("Type", self.media_type.clone())
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            url: record.take("Url")?,
            length: record.take("Length")?,
            media_type: record.take("Type")?,
        })
    }
}

/// A story under a feed. An id of 0 leaves the key incomplete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Story {
    pub id: i64,
    pub feed: Option<Key>,
    pub title: String,
    pub score: f64,
    pub ranks: Vec<Option<i64>>,
    pub enclosures: Vec<Enclosure>,
}

impl Entity for Story {
    fn schema() -> Schema {
        Schema::new("Story")
            .id("id", ValueType::Int)
            .parent("feed")
            .scalar("Title", ValueType::String)
            .scalar("Score", ValueType::Float)
            .list("Ranks", ValueType::Int)
            .repeated("Enclosures", Enclosure::schema())
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("feed", self.feed.clone())
            .with("Title", self.title.clone())
            .with("Score", self.score)
            .with("Ranks", self.ranks.clone())
            .with_repeated("Enclosures", &self.enclosures)
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            feed: record.take("feed")?,
            title: record.take("Title")?,
            score: record.take("Score")?,
            ranks: record.take("Ranks")?,
            enclosures: record.take_repeated("Enclosures")?,
        })
    }
}

/// An account whose kind comes from a field, defaulting to `User`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub name: String,
    pub kind: String,
    pub email: String,
    pub avatar: Blob,
}

impl Entity for Account {
    fn schema() -> Schema {
        Schema::new("Account")
            .id("name", ValueType::String)
            .kind("kind", Some("User"))
            .scalar("Email", ValueType::String)
            .scalar("Avatar", ValueType::Bytes)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("name", self.name.clone())
            .with("kind", self.kind.clone())
            .with("Email", self.email.clone())
            .with("Avatar", self.avatar.clone())
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            name: record.take("name")?,
            kind: record.take("kind")?,
            email: record.take("Email")?,
            avatar: record.take("Avatar")?,
        })
    }
}

/// Lists with and without null elements, plus a nested struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tagged {
    pub id: i64,
    pub labels: Vec<String>,
    pub weights: Vec<Option<f64>>,
    pub cover: Enclosure,
}

impl Entity for Tagged {
    fn schema() -> Schema {
        Schema::new("Tagged")
            .id("id", ValueType::Int)
            .list("Labels", ValueType::String)
            .list("Weights", ValueType::Float)
            .nested("Cover", Enclosure::schema())
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("Labels", self.labels.clone())
            .with("Weights", self.weights.clone())
            .with_nested("Cover", &self.cover)
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            labels: record.take("Labels")?,
            weights: record.take("Weights")?,
            cover: record.take_nested("Cover")?,
        })
    }
}

/// A user-defined integer scalar. Stored as a plain int.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score(pub i64);

impl IntoValue for Score {
    fn into_value(self) -> Value {
        Value::Int(self.0)
    }
}

impl FromValue for Score {
    fn from_value(field: &str, value: Value) -> CacheResult<Self> {
        i64::from_value(field, value).map(Score)
    }
}

/// Custom scalar fields, single and listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Leaderboard {
    pub id: i64,
    pub best: Score,
    pub history: Vec<Score>,
}

impl Entity for Leaderboard {
    fn schema() -> Schema {
        Schema::new("Leaderboard")
            .id("id", ValueType::Int)
            .scalar("Best", ValueType::Int)
            .list("History", ValueType::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("Best", self.best)
            .with("History", self.history.clone())
    }

    fn from_record(mut record: Record) -> CacheResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            best: record.take("Best")?,
            history: record.take("History")?,
        })
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// A tier cache over instrumented in-memory collaborators.
pub struct Harness {
    pub cache: TierCache,
    pub store: MockPrimaryStore,
    pub distributed: MockDistributedCache,
}

impl Harness {
    /// Harness with deadlines loose enough for loaded CI machines.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: TierCacheConfig) -> Self {
        Self::with_store(MockPrimaryStore::new(), config)
    }

    pub fn with_store(store: MockPrimaryStore, config: TierCacheConfig) -> Self {
        let distributed = MockDistributedCache::new();
        let cache = TierCache::builder(Arc::new(store.clone()), Arc::new(distributed.clone()))
            .config(config)
            .build()
            .unwrap_or_else(|err| panic!("invalid harness config: {err}"));
        Self {
            cache,
            store,
            distributed,
        }
    }

    /// A second cache over the same collaborators, with its own local tier.
    pub fn fresh_cache(&self) -> TierCache {
        TierCache::builder(
            Arc::new(self.store.clone()),
            Arc::new(self.distributed.clone()),
        )
        .config(self.cache.config().clone())
        .build()
        .unwrap_or_else(|err| panic!("invalid harness config: {err}"))
    }

    pub fn memkey(&self, key: &Key) -> String {
        self.cache.memkey(key)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_config() -> TierCacheConfig {
    TierCacheConfig::default()
        .with_get_timeout(Duration::from_millis(100))
        .with_put_timeouts(Duration::from_millis(100), Duration::from_millis(200))
}

/// Route `tracing` output to the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for fixture entities and keys.

    use super::*;
    use proptest::prelude::*;

    /// Timestamps between 2000 and 2040 with microsecond precision.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (946_684_800i64..2_208_988_800, 0u32..1_000_000).prop_map(|(secs, micros)| {
            DateTime::from_timestamp(secs, micros * 1_000).unwrap_or_default()
        })
    }

    /// Text including the characters the key and metadata formats escape.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ,/%.+|$!é]{0,24}"
    }

    /// Finite floats; NaN never compares equal after a round trip.
    pub fn arb_float() -> impl Strategy<Value = f64> {
        -1.0e12f64..1.0e12
    }

    pub fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            ("[A-Z][a-z]{0,8}", 1i64..i64::MAX).prop_map(|(kind, id)| Key::with_id(kind, id)),
            ("[A-Z][a-z]{0,8}", "[^\\x00]{1,16}").prop_map(|(kind, name)| Key::with_name(kind, name)),
        ];
        leaf.prop_recursive(3, 4, 1, |parent| {
            (parent, "[A-Z][a-z]{0,8}", 1i64..1000)
                .prop_map(|(parent, kind, id)| Key::with_id(kind, id).with_parent(parent))
        })
    }

    pub fn arb_feed() -> impl Strategy<Value = Feed> {
        (
            "[a-z]{1,12}",
            arb_text(),
            arb_timestamp(),
            prop::collection::vec(arb_text(), 0..4),
            prop::option::of(arb_text()),
        )
            .prop_map(|(url, title, updated, tags, notes)| Feed {
                url: format!("https://{url}.example/rss"),
                title,
                updated,
                tags,
                notes,
            })
    }

    pub fn arb_enclosure() -> impl Strategy<Value = Enclosure> {
        (arb_text(), any::<i64>(), prop::option::of(arb_text())).prop_map(
            |(url, length, media_type)| Enclosure {
                url,
                length,
                media_type,
            },
        )
    }

    pub fn arb_story() -> impl Strategy<Value = Story> {
        (
            1i64..1_000_000,
            prop::option::of("[a-z]{1,8}".prop_map(|name| Key::with_name("Feed", name))),
            arb_text(),
            arb_float(),
            prop::collection::vec(prop::option::of(any::<i64>()), 0..5),
            prop::collection::vec(arb_enclosure(), 0..4),
        )
            .prop_map(|(id, feed, title, score, ranks, enclosures)| Story {
                id,
                feed,
                title,
                score,
                ranks,
                enclosures,
            })
    }

    pub fn arb_account() -> impl Strategy<Value = Account> {
        (
            "[a-z]{1,10}",
            prop_oneof![Just(String::new()), Just("Admin".to_string())],
            arb_text(),
            prop::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(name, kind, email, avatar)| Account {
                name,
                kind,
                email,
                avatar: Blob(avatar),
            })
    }

    pub fn arb_leaderboard() -> impl Strategy<Value = Leaderboard> {
        (
            1i64..1_000_000,
            any::<i64>(),
            prop::collection::vec(any::<i64>().prop_map(Score), 0..8),
        )
            .prop_map(|(id, best, history)| Leaderboard {
                id,
                best: Score(best),
                history,
            })
    }

    pub fn arb_tagged() -> impl Strategy<Value = Tagged> {
        (
            1i64..1_000_000,
            prop::collection::vec(arb_text(), 0..5),
            prop::collection::vec(prop::option::of(arb_float()), 0..5),
            arb_enclosure(),
        )
            .prop_map(|(id, labels, weights, cover)| Tagged {
                id,
                labels,
                weights,
                cover,
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made entities for common scenarios.

    use super::*;

    pub fn feed(url: &str) -> Feed {
        Feed {
            url: url.to_string(),
            title: format!("Feed at {url}"),
            updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            tags: vec!["news".to_string()],
            notes: None,
        }
    }

    pub fn story(id: i64, title: &str) -> Story {
        Story {
            id,
            feed: Some(Key::with_name("Feed", "f")),
            title: title.to_string(),
            score: 1.5,
            ranks: vec![Some(1), None],
            enclosures: vec![Enclosure {
                url: format!("https://cdn.example/{id}.mp3"),
                length: 1024,
                media_type: Some("audio/mpeg".to_string()),
            }],
        }
    }

    /// A story with no id, for insert tests.
    pub fn new_story(title: &str) -> Story {
        story(0, title)
    }

    /// An empty story carrying only the key fields of `id`.
    pub fn story_key(id: i64) -> Story {
        Story {
            id,
            feed: Some(Key::with_name("Feed", "f")),
            ..Story::default()
        }
    }

    pub fn account(name: &str) -> Account {
        Account {
            name: name.to_string(),
            kind: String::new(),
            email: format!("{name}@example.com"),
            avatar: Blob(vec![0x89, 0x50, 0x4E, 0x47]),
        }
    }
}
