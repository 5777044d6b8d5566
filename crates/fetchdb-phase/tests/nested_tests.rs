use serde_json::{json, Value};

use fetchdb_core::error::FetchError;
use fetchdb_core::types::NestedIdentity;
use fetchdb_phase::project_nested_source;

fn as_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn single_level_projection() {
    let root = as_map(json!({"a": "x", "nested": [{"b": 1}, {"b": 2}]}));
    let identity = NestedIdentity::new("nested", 1);
    let projected = project_nested_source(&identity, &root).unwrap();
    assert_eq!(Value::Object(projected), json!({"nested": {"b": 2}}));
}

#[test]
fn two_level_projection() {
    let root = as_map(json!({"outer": [{"inner": [{"v": "p"}, {"v": "q"}]}]}));
    let identity = NestedIdentity::with_child("outer", 0, NestedIdentity::new("inner", 1));
    let projected = project_nested_source(&identity, &root).unwrap();
    assert_eq!(Value::Object(projected), json!({"outer": {"inner": {"v": "q"}}}));
}

#[test]
fn dotted_path_projection() {
    let root = as_map(json!({"a": {"b": [{"v": 1}, {"v": 2}]}}));
    let identity = NestedIdentity::new("a.b", 0);
    let projected = project_nested_source(&identity, &root).unwrap();
    assert_eq!(Value::Object(projected), json!({"a.b": {"v": 1}}));
}

#[test]
fn single_object_treated_as_one_element_array() {
    let root = as_map(json!({"nested": {"b": 7}}));
    let identity = NestedIdentity::new("nested", 0);
    let projected = project_nested_source(&identity, &root).unwrap();
    assert_eq!(Value::Object(projected), json!({"nested": {"b": 7}}));
}

#[test]
fn missing_array_is_an_inconsistent_source_error() {
    let root = as_map(json!({"a": "x"}));
    let identity = NestedIdentity::new("nested", 0);
    let err = project_nested_source(&identity, &root).unwrap_err();
    assert!(matches!(err, FetchError::InconsistentSource { path } if path == "nested"));
}

#[test]
fn missing_array_at_inner_level_fails_too() {
    let root = as_map(json!({"outer": [{"v": 1}]}));
    let identity = NestedIdentity::with_child("outer", 0, NestedIdentity::new("inner", 0));
    let err = project_nested_source(&identity, &root).unwrap_err();
    assert!(matches!(err, FetchError::InconsistentSource { path } if path == "inner"));
}

#[test]
fn offset_out_of_range_is_an_inconsistent_source_error() {
    let root = as_map(json!({"nested": [{"b": 1}]}));
    let identity = NestedIdentity::new("nested", 5);
    let err = project_nested_source(&identity, &root).unwrap_err();
    assert!(matches!(err, FetchError::InconsistentSource { path } if path == "nested[5]"));
}

#[test]
fn identity_path_renders_full_chain() {
    let identity = NestedIdentity::with_child("outer", 0, NestedIdentity::new("inner", 1));
    assert_eq!(identity.path(), "outer[0].inner[1]");
}
