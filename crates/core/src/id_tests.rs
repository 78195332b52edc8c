// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId("tst-");
}

#[test]
fn generated_ids_carry_prefix_and_are_unique() {
    let a = TestId::new();
    let b = TestId::new();
    assert!(a.as_str().starts_with("tst-"));
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 4 + 19);
}

#[test]
fn suffix_strips_prefix() {
    let id = TestId::from_string("tst-abc");
    assert_eq!(id.suffix(), "abc");
}

#[test]
fn suffix_tolerates_foreign_prefix() {
    let id = TestId::from_string("other");
    assert_eq!(id.suffix(), "other");
}

#[test]
fn hash_map_lookup_by_str() {
    let mut map = HashMap::new();
    map.insert(TestId::from_string("tst-k"), 42);
    assert_eq!(map.get("tst-k"), Some(&42));
}

#[test]
fn serde_round_trip_is_transparent() {
    let id = TestId::from_string("tst-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"tst-xyz\"");
    let back: TestId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn deserialize_rejects_oversized_id() {
    let long = format!("\"{}\"", "x".repeat(ID_MAX_LEN + 1));
    assert!(serde_json::from_str::<TestId>(&long).is_err());
}

#[test]
fn id_buf_empty_and_display() {
    let id = IdBuf::new("");
    assert!(id.is_empty());
    assert_eq!(format!("{}", IdBuf::new("abc")), "abc");
}
