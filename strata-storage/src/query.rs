//! Primary-store queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strata_core::{IntoValue, Key, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Le => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// A stored value satisfies the filter; list values match when any
    /// element does, and missing fields never match.
    pub fn matches(&self, record: &Record) -> bool {
        match record.get(&self.field) {
            None => false,
            Some(Value::List(items)) => items.iter().any(|item| self.matches_value(item)),
            Some(value) => self.matches_value(value),
        }
    }

    fn matches_value(&self, value: &Value) -> bool {
        value
            .compare(&self.value)
            .is_some_and(|ordering| self.op.holds(ordering))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// Position in a query's result sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(usize);

impl Cursor {
    pub fn new(position: usize) -> Self {
        Self(position)
    }

    pub fn position(&self) -> usize {
        self.0
    }
}

/// One result row; `record` is `None` for keys-only queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub key: Key,
    pub record: Option<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    kind: String,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    limit: Option<usize>,
    offset: usize,
    start: Option<Cursor>,
    keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            filters: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: 0,
            start: None,
            keys_only: false,
        }
    }

    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl IntoValue) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into_value(),
        });
        self
    }

    pub fn order(mut self, field: &str) -> Self {
        self.orders.push(Order {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.orders.push(Order {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Resume from a cursor returned by an earlier run of the same query.
    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Rows to skip before the first result: the start cursor plus the offset.
    pub fn skip(&self) -> usize {
        self.start.map(|c| c.position()).unwrap_or(0) + self.offset
    }

    /// Kind, ancestor and filter match for one stored entity.
    pub fn matches(&self, key: &Key, record: &Record) -> bool {
        key.kind() == self.kind
            && self.ancestor.as_ref().is_none_or(|a| key.has_ancestor(a))
            && self.filters.iter().all(|f| f.matches(record))
    }

    /// Result ordering: declared orders first, then the encoded key.
    pub fn compare(&self, a: (&Key, &Record), b: (&Key, &Record)) -> Ordering {
        for order in &self.orders {
            let left = a.1.get(&order.field).unwrap_or(&Value::Null);
            let right = b.1.get(&order.field).unwrap_or(&Value::Null);
            let ordering = left.compare(right).unwrap_or(Ordering::Equal);
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.0.encode().cmp(&b.0.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(score: i64, tags: Vec<&str>) -> Record {
        Record::new().with("Score", score).with("Tags", tags)
    }

    #[test]
    fn test_filter_ops() {
        let record = story(5, vec![]);
        let q = |op, v: i64| Query::new("Story").filter("Score", op, v);
        let key = Key::with_id("Story", 1);
        assert!(q(FilterOp::Eq, 5).matches(&key, &record));
        assert!(q(FilterOp::Ge, 5).matches(&key, &record));
        assert!(q(FilterOp::Lt, 6).matches(&key, &record));
        assert!(!q(FilterOp::Gt, 5).matches(&key, &record));
        assert!(!q(FilterOp::Ne, 5).matches(&key, &record));
    }

    #[test]
    fn test_filter_list_any_element() {
        let record = story(1, vec!["go", "rust"]);
        let key = Key::with_id("Story", 1);
        assert!(Query::new("Story")
            .filter("Tags", FilterOp::Eq, "rust")
            .matches(&key, &record));
        assert!(!Query::new("Story")
            .filter("Tags", FilterOp::Eq, "zig")
            .matches(&key, &record));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let key = Key::with_id("Story", 1);
        assert!(!Query::new("Story")
            .filter("Nope", FilterOp::Ne, 1i64)
            .matches(&key, &Record::new()));
    }

    #[test]
    fn test_ancestor_and_kind() {
        let feed = Key::with_name("Feed", "f");
        let key = Key::with_id("Story", 1).with_parent(feed.clone());
        assert!(Query::new("Story").ancestor(feed.clone()).matches(&key, &Record::new()));
        assert!(!Query::new("Story")
            .ancestor(Key::with_name("Feed", "g"))
            .matches(&key, &Record::new()));
        assert!(!Query::new("Feed").matches(&key, &Record::new()));
    }

    #[test]
    fn test_compare_orders_then_key() {
        let q = Query::new("Story").order_desc("Score");
        let (k1, k2) = (Key::with_id("Story", 1), Key::with_id("Story", 2));
        let (low, high) = (story(1, vec![]), story(9, vec![]));
        assert_eq!(q.compare((&k1, &high), (&k2, &low)), Ordering::Less);
        assert_eq!(q.compare((&k1, &low), (&k2, &low)), Ordering::Less);
    }

    #[test]
    fn test_skip_combines_cursor_and_offset() {
        let q = Query::new("Story").start(Cursor::new(10)).offset(2);
        assert_eq!(q.skip(), 12);
    }
}
