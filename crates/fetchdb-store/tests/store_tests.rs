use std::collections::BTreeSet;

use serde_json::json;

use fetchdb_core::traits::{DocStore, SchemaResolver};
use fetchdb_core::types::NestedIdentity;
use fetchdb_store::{MemSchema, MemStore};

fn schema() -> MemSchema {
    MemSchema::new().field("title").alias("headline", "title").metadata_field("_id")
}

#[test]
fn builder_cuts_segments_and_assigns_bases() {
    let mut builder = MemStore::builder(schema()).segment_size(2);
    for n in 0..5 {
        builder = builder.push_doc(&format!("d{n}"), &json!({"title": n}));
    }
    let store = builder.build();
    let metas = store.segments();
    assert_eq!(metas.len(), 3);
    assert_eq!((metas[0].doc_base, metas[0].max_doc), (0, 2));
    assert_eq!((metas[1].doc_base, metas[1].max_doc), (2, 2));
    assert_eq!((metas[2].doc_base, metas[2].max_doc), (4, 1));
}

#[test]
fn nested_blocks_are_never_split_across_segments() {
    let store = MemStore::builder(schema())
        .segment_size(2)
        .push_doc("a", &json!({"title": "a"}))
        .push_doc("b", &json!({"title": "b"}))
        .push_doc_with_children(
            "parent",
            &json!({"title": "p", "kids": [{"k": 1}, {"k": 2}]}),
            vec![NestedIdentity::new("kids", 0), NestedIdentity::new("kids", 1)],
        )
        .build();
    let metas = store.segments();
    assert_eq!(metas.len(), 2);
    // The whole three-row block lands in the second segment.
    assert_eq!(metas[1].max_doc, 3);
}

#[test]
fn leaf_loader_serves_only_requested_fields() {
    let store = MemStore::builder(schema())
        .push_doc("a", &json!({"title": "hello", "unmapped": true}))
        .build();
    let fields: BTreeSet<String> = ["title".to_string()].into_iter().collect();
    let loader = store.stored_field_loader(false, &fields);
    let mut leaf = loader.leaf(0, None).unwrap();
    leaf.advance_to(0).unwrap();
    assert_eq!(leaf.id().as_deref(), Some("a"));
    let stored = leaf.stored_fields();
    assert_eq!(stored.get("title").unwrap(), &vec![json!("hello")]);
    // _id is stored but was not requested; unmapped keys are never stored.
    assert!(!stored.contains_key("_id"));
    assert!(!stored.contains_key("unmapped"));
    // Source is only served when the loader was built for it.
    assert!(leaf.source().is_none());
}

#[test]
fn source_round_trips_through_the_loader() {
    let store = MemStore::builder(schema()).push_doc("a", &json!({"title": "t"})).build();
    let loader = store.stored_field_loader(true, &BTreeSet::new());
    let mut leaf = loader.leaf(0, None).unwrap();
    leaf.advance_to(0).unwrap();
    let bytes = leaf.source().unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed, json!({"title": "t"}));
}

#[test]
fn nested_resolver_reports_child_rows_only() {
    let store = MemStore::builder(schema())
        .push_doc_with_children(
            "p",
            &json!({"kids": [{"k": 1}]}),
            vec![NestedIdentity::new("kids", 0)],
        )
        .build();
    let resolver = store.nested_resolver();
    let mut leaf = resolver.leaf(0).unwrap();
    let child = leaf.advance(0).unwrap().unwrap();
    assert_eq!(child.root_local_doc, 1);
    assert_eq!(child.identity.path(), "kids[0]");
    assert!(leaf.advance(1).unwrap().is_none());
}

#[test]
fn schema_expands_wildcards_and_aliases() {
    let s = schema();
    assert_eq!(s.matching_field_names("headline"), vec!["headline".to_string()]);
    assert!(s.matching_field_names("nope").is_empty());
    let mut wildcard = s.matching_field_names("*");
    wildcard.sort();
    assert_eq!(wildcard, vec!["_id".to_string(), "headline".to_string(), "title".to_string()]);
    assert_eq!(s.stored_key("headline").as_deref(), Some("title"));
    assert!(s.is_metadata_field("_id"));
    assert!(s.is_metadata_field("_unknown_underscore"));
    assert!(!s.is_metadata_field("title"));
}
