//! Property-based tests for the store, its backends and the index engine.

use proptest::prelude::*;
use serde_json::{json, Value};
use stash_engine::clock::ManualClock;
use stash_engine::index::index_from_scan;
use stash_engine::{
    BackendKind, CacheConfig, Database, DbConfig, IndexDefinition, IndexEngine, QueryOptions,
    Record, SortDirection, StoreDefinition,
};
use std::sync::Arc;

fn open(kind: BackendKind) -> Arc<Database> {
    let config = DbConfig::new("props", 1).with_store(
        StoreDefinition::new("items").index(IndexDefinition::new("by_color", "color")),
    );
    Database::open_with_clock(config, kind, ManualClock::shared(1_000)).unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Put { id: u8, color: Option<u8>, size: i32 },
    Delete { id: u8 },
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0u8..12, proptest::option::of(0u8..4), -50i32..50)
            .prop_map(|(id, color, size)| Op::Put { id, color, size }),
        3 => (0u8..12).prop_map(|id| Op::Delete { id }),
        1 => Just(Op::Clear),
    ]
}

fn item(id: u8, color: Option<u8>, size: i32) -> Record {
    let mut value = json!({"id": format!("i{id}"), "size": size});
    if let Some(color) = color {
        value["color"] = json!(format!("c{color}"));
    }
    Record::from_value(value).unwrap()
}

fn apply(db: &Database, op: &Op) {
    match op {
        Op::Put { id, color, size } => {
            db.put("items", item(*id, *color, *size)).unwrap();
        }
        Op::Delete { id } => db.delete("items", &format!("i{id}")).unwrap(),
        Op::Clear => db.clear("items").unwrap(),
    }
}

fn ids(records: &[Record]) -> Vec<String> {
    records.iter().filter_map(|r| r.key("id")).collect()
}

proptest! {
    #[test]
    fn prop_index_matches_a_fresh_scan(ops in prop::collection::vec(arb_op(), 0..40)) {
        let db = open(BackendKind::Indexed);
        let engine = IndexEngine::new(db.clone(), CacheConfig::default());
        // built up front so it is maintained incrementally from here on
        engine.build_index("items", "color").unwrap();

        for op in &ops {
            apply(&db, op);
        }

        let maintained = engine.index_snapshot("items", "color").unwrap();
        let all = db.get_all("items", &QueryOptions::default()).unwrap();
        prop_assert_eq!(&maintained, &index_from_scan(&all, "id", "color"));

        engine.build_index("items", "color").unwrap();
        let first = engine.index_snapshot("items", "color").unwrap();
        engine.build_index("items", "color").unwrap();
        let second = engine.index_snapshot("items", "color").unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &maintained);
    }

    #[test]
    fn prop_backends_agree(ops in prop::collection::vec(arb_op(), 0..40), color in 0u8..4) {
        let indexed = open(BackendKind::Indexed);
        let flat = open(BackendKind::Flat);
        for op in &ops {
            apply(&indexed, op);
            apply(&flat, op);
        }

        let ordered = QueryOptions::new().order_by("id", SortDirection::Asc);
        prop_assert_eq!(
            indexed.get_all("items", &ordered).unwrap(),
            flat.get_all("items", &ordered).unwrap()
        );
        prop_assert_eq!(indexed.count("items").unwrap(), flat.count("items").unwrap());

        let value = json!(format!("c{color}"));
        let by_index = |db: &Database| {
            db.find_by_index("items", "by_color", &value, &ordered).unwrap()
        };
        prop_assert_eq!(by_index(&indexed), by_index(&flat));
    }

    #[test]
    fn prop_get_returns_what_was_added(
        fields in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6),
        flat in any::<bool>(),
    ) {
        let kind = if flat { BackendKind::Flat } else { BackendKind::Indexed };
        let db = open(kind);
        let mut record = Record::new();
        for (name, value) in &fields {
            record.set(name.clone(), json!(value));
        }
        record.remove("id");

        let id = db.add("items", record.clone()).unwrap();
        let stored = db.get("items", &id).unwrap().unwrap();

        let mut expected = record.content();
        expected.insert("id".into(), Value::from(id));
        prop_assert_eq!(stored.content(), expected);
    }

    #[test]
    fn prop_pagination_slices_the_ordered_result(
        sizes in prop::collection::vec(-100i32..100, 0..30),
        offset in 0usize..35,
        limit in 0usize..35,
        descending in any::<bool>(),
    ) {
        let db = open(BackendKind::Indexed);
        for (i, size) in sizes.iter().enumerate() {
            db.put("items", item(i as u8, None, *size)).unwrap();
        }
        let direction = if descending { SortDirection::Desc } else { SortDirection::Asc };
        let ordered = QueryOptions::new().order_by("size", direction);

        let everything = db.get_all("items", &ordered).unwrap();
        let sizes_seen: Vec<i64> = everything
            .iter()
            .filter_map(|r| r.get("size").and_then(Value::as_i64))
            .collect();
        prop_assert!(sizes_seen.windows(2).all(|w| if descending { w[0] >= w[1] } else { w[0] <= w[1] }), "sizes not ordered: {:?}", sizes_seen);

        let page = db
            .get_all("items", &ordered.clone().offset(offset).limit(limit))
            .unwrap();
        let expected: Vec<Record> = everything.into_iter().skip(offset).take(limit).collect();
        prop_assert_eq!(ids(&page), ids(&expected));
    }
}
