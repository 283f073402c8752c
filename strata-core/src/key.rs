//! Entity keys.
//!
//! A key names one entity: a kind, exactly one of a string or integer id,
//! and an optional parent key forming the ancestor path. A key with neither
//! id is incomplete and is only valid as input to a put.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CacheResult, KeyError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    string_id: String,
    int_id: i64,
    parent: Option<Box<Key>>,
}

impl Key {
    /// Build a key from its parts. A non-empty `string_id` wins over `int_id`.
    pub fn new(
        kind: impl Into<String>,
        string_id: impl Into<String>,
        int_id: i64,
        parent: Option<Key>,
    ) -> Self {
        let string_id = string_id.into();
        let int_id = if string_id.is_empty() { int_id } else { 0 };
        Self {
            kind: kind.into(),
            string_id,
            int_id,
            parent: parent.map(Box::new),
        }
    }

    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, name, 0, None)
    }

    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self::new(kind, "", id, None)
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::new(kind, "", 0, None)
    }

    /// Re-root this key under `parent`.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn string_id(&self) -> &str {
        &self.string_id
    }

    pub fn int_id(&self) -> i64 {
        self.int_id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn is_incomplete(&self) -> bool {
        self.string_id.is_empty() && self.int_id == 0
    }

    /// Whether `ancestor` is this key or appears on its parent chain.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// The same kind and parent with the given integer id.
    pub fn completed(&self, int_id: i64) -> Key {
        Key {
            kind: self.kind.clone(),
            string_id: String::new(),
            int_id,
            parent: self.parent.clone(),
        }
    }

    /// Stable string form covering the full parent chain.
    ///
    /// Segments run root first, separated by `/`. Each segment is the kind,
    /// a comma, then `i<int>`, `s<name>`, or nothing for an incomplete key.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        if let Some(parent) = self.parent() {
            parent.encode_into(out);
            out.push('/');
        }
        escape_into(&self.kind, out);
        out.push(',');
        if !self.string_id.is_empty() {
            out.push('s');
            escape_into(&self.string_id, out);
        } else if self.int_id != 0 {
            out.push('i');
            out.push_str(&self.int_id.to_string());
        }
    }

    /// Parse the output of [`Key::encode`].
    pub fn decode(encoded: &str) -> CacheResult<Key> {
        let malformed = |reason: &str| KeyError::Malformed {
            encoded: encoded.to_string(),
            reason: reason.to_string(),
        };
        if encoded.is_empty() {
            return Err(malformed("empty key").into());
        }

        let mut key: Option<Key> = None;
        for segment in encoded.split('/') {
            let (kind, id) = segment
                .split_once(',')
                .ok_or_else(|| malformed("segment without kind separator"))?;
            let kind = unescape(kind).ok_or_else(|| malformed("bad escape in kind"))?;
            if kind.is_empty() {
                return Err(malformed("empty kind").into());
            }
            if key.as_ref().is_some_and(Key::is_incomplete) {
                return Err(malformed("incomplete parent").into());
            }
            let next = match id.as_bytes().first() {
                None => Key::new(kind, "", 0, key.take()),
                Some(b's') => {
                    let name = unescape(&id[1..]).ok_or_else(|| malformed("bad escape in name"))?;
                    Key::new(kind, name, 0, key.take())
                }
                Some(b'i') => {
                    let int_id = id[1..]
                        .parse::<i64>()
                        .map_err(|_| malformed("bad integer id"))?;
                    Key::new(kind, "", int_id, key.take())
                }
                Some(_) => return Err(malformed("unknown id tag").into()),
            };
            key = Some(next);
        }
        key.ok_or_else(|| malformed("empty key").into())
    }

    /// The distributed-cache key: `prefix` followed by the encoded key.
    pub fn cache_key(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(prefix.len() + 32);
        out.push_str(prefix);
        self.encode_into(&mut out);
        out
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}/")?;
        }
        if !self.string_id.is_empty() {
            write!(f, "{}({:?})", self.kind, self.string_id)
        } else if self.int_id != 0 {
            write!(f, "{}({})", self.kind, self.int_id)
        } else {
            write!(f, "{}(?)", self.kind)
        }
    }
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ',' => out.push_str("%2C"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
}

fn unescape(escaped: &str) -> Option<String> {
    let mut out = Vec::with_capacity(escaped.len());
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_with_parent() {
        let key = Key::with_name("Feed", "http://a/b").with_parent(Key::with_id("User", 1));
        assert_eq!(key.to_string(), "User(1)/Feed(\"http://a/b\")");
        assert_eq!(Key::incomplete("Story").to_string(), "Story(?)");
    }

    #[test]
    fn test_encode_escapes_separators() {
        let key = Key::with_name("Feed", "a,b/c%");
        assert_eq!(key.encode(), "Feed,sa%2Cb%2Fc%25");
        assert_eq!(Key::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn test_cache_key_prefix() {
        let key = Key::with_id("Story", 7).with_parent(Key::with_name("Feed", "f"));
        assert_eq!(key.cache_key("g2:"), "g2:Feed,sf/Story,i7");
    }

    #[test]
    fn test_string_id_wins() {
        let key = Key::new("K", "name", 5, None);
        assert_eq!(key.int_id(), 0);
        assert_eq!(key.string_id(), "name");
        assert!(!key.is_incomplete());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Key::decode("").is_err());
        assert!(Key::decode("NoComma").is_err());
        assert!(Key::decode("K,x12").is_err());
        assert!(Key::decode("K,iabc").is_err());
        assert!(Key::decode("P,/K,i1").is_err());
        assert!(Key::decode("K,s%zz").is_err());
    }

    #[test]
    fn test_ancestry() {
        let root = Key::with_id("User", 1);
        let feed = Key::with_name("Feed", "f").with_parent(root.clone());
        let story = Key::with_id("Story", 3).with_parent(feed.clone());
        assert!(story.has_ancestor(&root));
        assert!(story.has_ancestor(&feed));
        assert!(story.has_ancestor(&story));
        assert!(!feed.has_ancestor(&story));
    }

    #[test]
    fn test_completed_keeps_parent() {
        let parent = Key::with_id("User", 2);
        let key = Key::incomplete("Story").with_parent(parent.clone());
        let done = key.completed(7);
        assert_eq!(done.int_id(), 7);
        assert_eq!(done.parent(), Some(&parent));
    }

    fn arb_segment() -> impl Strategy<Value = (String, String, i64)> {
        (
            "[A-Za-z%,/]{1,8}",
            prop_oneof!["".prop_map(String::from), "[ -~]{1,12}"],
            1i64..i64::MAX,
        )
    }

    proptest! {
        #[test]
        fn prop_encode_decode(segments in prop::collection::vec(arb_segment(), 1..4)) {
            let mut key: Option<Key> = None;
            for (kind, name, id) in segments {
                key = Some(Key::new(kind, name, id, key.take()));
            }
            let key = key.unwrap();
            prop_assert_eq!(Key::decode(&key.encode()).unwrap(), key);
        }
    }
}
