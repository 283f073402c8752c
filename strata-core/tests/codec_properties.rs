//! Property tests for the cached record codec.
//!
//! **Round trip**: decoding the encoding of any entity into a value that
//! carries the same key fields yields an equal entity. This covers null
//! scalars, lists with and without null elements, nested structs and
//! repeated groups.
//!
//! **Negative entries**: the empty record decodes as not-found and leaves
//! the destination untouched.

use proptest::prelude::*;
use strata_core::codec::wire::ValueDecoder;
use strata_core::{EntityCodec, Key, KeyResolver, Value, HEADER_EMPTY};
use strata_test_utils::generators::*;
use strata_test_utils::{Account, Feed, Leaderboard, Score, Story, Tagged};

/// Decode every payload value of an encoded record; returns the values and
/// how many type definitions the stream announced.
fn payload_values(bytes: &[u8]) -> (Vec<Value>, usize) {
    let end = bytes.iter().position(|&b| b == b'|').unwrap();
    let mut payload = &bytes[end + 1..];
    let mut decoder = ValueDecoder::new();
    let bootstrapped = decoder.registered_types();
    let mut values = Vec::new();
    while !payload.is_empty() {
        values.push(decoder.decode(&mut payload).unwrap());
    }
    (values, decoder.registered_types() - bootstrapped)
}

// ============================================================================
// ROUND TRIP
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_story_round_trip(story in arb_story()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode(Some(&story)).unwrap();

        let mut decoded = Story { id: story.id, feed: story.feed.clone(), ..Story::default() };
        codec.decode(&bytes, &mut decoded).unwrap();
        prop_assert_eq!(decoded, story);
    }

    #[test]
    fn prop_feed_round_trip(feed in arb_feed()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode(Some(&feed)).unwrap();

        let mut decoded = Feed { url: feed.url.clone(), ..Feed::default() };
        codec.decode(&bytes, &mut decoded).unwrap();
        prop_assert_eq!(decoded, feed);
    }

    #[test]
    fn prop_account_round_trip(account in arb_account()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode(Some(&account)).unwrap();

        let mut decoded = Account {
            name: account.name.clone(),
            kind: account.kind.clone(),
            ..Account::default()
        };
        codec.decode(&bytes, &mut decoded).unwrap();
        prop_assert_eq!(decoded, account);
    }

    #[test]
    fn prop_tagged_round_trip(tagged in arb_tagged()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode(Some(&tagged)).unwrap();

        let mut decoded = Tagged { id: tagged.id, ..Tagged::default() };
        codec.decode(&bytes, &mut decoded).unwrap();
        prop_assert_eq!(decoded, tagged);
    }

    #[test]
    fn prop_custom_scalar_round_trip(board in arb_leaderboard()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode(Some(&board)).unwrap();

        let (_, definitions) = payload_values(&bytes);
        prop_assert_eq!(definitions, 0);

        let mut decoded = Leaderboard { id: board.id, ..Leaderboard::default() };
        codec.decode(&bytes, &mut decoded).unwrap();
        prop_assert_eq!(decoded, board);
    }

    #[test]
    fn prop_empty_record_never_mutates(story in arb_story()) {
        let codec = EntityCodec::global();
        let bytes = codec.encode::<Story>(None).unwrap();
        prop_assert_eq!(&bytes, &vec![HEADER_EMPTY]);

        let mut dst = story.clone();
        let err = codec.decode(&bytes, &mut dst).unwrap_err();
        prop_assert!(err.is_not_found());
        prop_assert_eq!(dst, story);
    }

    #[test]
    fn prop_key_fields_survive_resolution(story in arb_story()) {
        let resolver = KeyResolver::default();
        let (key, has_string_id) = resolver.resolve_key(&story).unwrap();
        prop_assert!(!has_string_id);
        prop_assert_eq!(key.int_id(), story.id);
        prop_assert_eq!(key.parent(), story.feed.as_ref());

        let mut rebuilt = Story::default();
        resolver.apply_key(&mut rebuilt, &key).unwrap();
        prop_assert_eq!(rebuilt.id, story.id);
        prop_assert_eq!(rebuilt.feed, story.feed);
    }

    #[test]
    fn prop_key_encoding_round_trip(key in arb_key()) {
        let encoded = key.encode();
        prop_assert_eq!(Key::decode(&encoded).unwrap(), key);
    }
}

// ============================================================================
// SHAPE MIGRATION
// ============================================================================

#[test]
fn test_decode_ignores_destination_non_key_fields() {
    let codec = EntityCodec::global();
    let source = strata_test_utils::fixtures::story(4, "fresh");
    let bytes = codec.encode(Some(&source)).unwrap();

    let mut stale = strata_test_utils::fixtures::story(4, "stale");
    stale.enclosures.clear();
    stale.ranks = vec![Some(9); 3];
    codec.decode(&bytes, &mut stale).unwrap();
    assert_eq!(stale, source);
}

#[test]
fn test_account_kind_default_not_written_back() {
    let resolver = KeyResolver::default();
    let account = strata_test_utils::fixtures::account("ann");
    let (key, has_string_id) = resolver.resolve_key(&account).unwrap();
    assert!(has_string_id);
    assert_eq!(key, Key::with_name("User", "ann"));

    let mut rebuilt = strata_test_utils::Account::default();
    resolver.apply_key(&mut rebuilt, &key).unwrap();
    assert_eq!(rebuilt.kind, "");

    let admin = Key::with_name("Admin", "root");
    resolver.apply_key(&mut rebuilt, &admin).unwrap();
    assert_eq!(rebuilt.kind, "Admin");
    assert_eq!(rebuilt.name, "root");
}

#[test]
fn test_custom_scalars_use_plain_int_encoding() {
    let board = Leaderboard {
        id: 3,
        best: Score(9),
        history: vec![Score(1), Score(2)],
    };
    let bytes = EntityCodec::global().encode(Some(&board)).unwrap();
    let (values, definitions) = payload_values(&bytes);
    assert_eq!(definitions, 0);
    assert_eq!(
        values,
        vec![Value::Int(9), Value::List(vec![Value::Int(1), Value::Int(2)])]
    );
}
