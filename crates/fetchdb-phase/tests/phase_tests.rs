use std::collections::BTreeMap;

use serde_json::{json, Value};

use fetchdb_core::error::FetchError;
use fetchdb_core::traits::{DocStore, FetchExtension, FetchProcessor, InnerHitResolver, InnerHitsSpec};
use fetchdb_core::types::{
    CancelToken, FetchRequest, FieldValues, Hit, HitContext, NestedIdentity, ShardTarget,
    SourceSpec, StoredFieldsSpec, TotalHits,
};
use fetchdb_phase::{FetchPhase, InnerHitsPhase};
use fetchdb_store::{MemDoc, MemSchema, MemStore};

fn schema() -> MemSchema {
    MemSchema::new()
        .field("title")
        .alias("headline", "title")
        .metadata_field("_id")
}

/// Six docs spread over three segments of two rows each.
fn flat_store() -> MemStore {
    let mut builder = MemStore::builder(schema()).segment_size(2);
    for n in 0..6 {
        let id = format!("d{n}");
        builder = builder.push_doc(&id, &json!({"title": format!("title {n}"), "n": n}));
    }
    builder.build()
}

fn request(ids: Vec<u32>) -> FetchRequest {
    FetchRequest::new(ShardTarget::new("docs", 0), ids)
}

#[test]
fn results_come_back_in_requested_order() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let req = request(vec![5, 0, 3, 2, 4, 1]);
    let result = phase.execute(&store, &req).unwrap();
    let doc_ids: Vec<u32> = result.hits.iter().map(|h| h.doc_id).collect();
    assert_eq!(doc_ids, vec![5, 0, 3, 2, 4, 1]);
    let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_deref().unwrap()).collect();
    assert_eq!(ids, vec!["d5", "d0", "d3", "d2", "d4", "d1"]);
}

#[test]
fn default_request_returns_source() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request(vec![2])).unwrap();
    let hit = &result.hits[0];
    assert_eq!(hit.source.as_ref().unwrap()["title"], json!("title 2"));
}

#[test]
fn explicit_source_disabled_returns_no_source() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let mut req = request(vec![2]);
    req.source = Some(SourceSpec::disabled());
    let result = phase.execute(&store, &req).unwrap();
    assert!(result.hits[0].source.is_none());
    assert_eq!(result.hits[0].id.as_deref(), Some("d2"));
}

#[test]
fn empty_input_short_circuits_without_touching_storage() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let mut req = request(Vec::new());
    req.total_hits = TotalHits { value: 42, exact: false };
    req.max_score = Some(1.5);
    let result = phase.execute(&store, &req).unwrap();
    assert!(result.hits.is_empty());
    assert_eq!(result.total_hits, TotalHits { value: 42, exact: false });
    assert_eq!(result.max_score, Some(1.5));
    assert_eq!(store.counters().loader_builds(), 0);
}

#[test]
fn alias_fan_out_reads_the_stored_key_once() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let mut req = request(vec![0]);
    req.stored_fields =
        Some(StoredFieldsSpec::fields(vec!["title".to_string(), "headline".to_string()]));
    let result = phase.execute(&store, &req).unwrap();
    let hit = &result.hits[0];
    let title = hit.doc_fields.get("title").unwrap();
    let headline = hit.doc_fields.get("headline").unwrap();
    assert_eq!(title.values, vec![json!("title 0")]);
    assert_eq!(headline.values, title.values);
    // One physical row read serves both display names.
    assert_eq!(store.counters().advances(), 1);
}

#[test]
fn missing_id_becomes_a_placeholder_hit() {
    let store = MemStore::builder(schema())
        .push_row(MemDoc { id: None, stored: BTreeMap::new(), source: None, nested: None })
        .push_doc("alive", &json!({"title": "still here"}))
        .build();
    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request(vec![0, 1])).unwrap();
    let ghost = &result.hits[0];
    assert_eq!(ghost.doc_id, 0);
    assert!(ghost.id.is_none());
    assert!(ghost.doc_fields.is_empty() && ghost.meta_fields.is_empty());
    assert!(ghost.source.is_none());
    assert_eq!(result.hits[1].id.as_deref(), Some("alive"));
}

#[test]
fn out_of_range_doc_id_is_a_storage_error() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let err = phase.execute(&store, &request(vec![99])).unwrap_err();
    match err {
        FetchError::Phase { source, .. } => {
            assert!(matches!(*source, FetchError::StorageRead { doc_id: 99, .. }));
        }
        other => panic!("expected phase error, got {other}"),
    }
}

#[test]
fn cancellation_before_fetch_starts() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let req = request(vec![0, 1]);
    req.cancel.cancel();
    assert!(matches!(phase.execute(&store, &req).unwrap_err(), FetchError::Cancelled));
    assert_eq!(store.counters().loader_builds(), 0);
}

struct CancelOnFirstDoc;

struct CancelProcessor {
    cancel: CancelToken,
}

impl FetchExtension for CancelOnFirstDoc {
    fn processor<'a>(
        &'a self,
        request: &FetchRequest,
        _store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        Ok(Some(Box::new(CancelProcessor { cancel: request.cancel.clone() })))
    }
}

impl FetchProcessor for CancelProcessor {
    fn name(&self) -> &str {
        "CancelOnFirstDoc"
    }

    fn set_segment(&mut self, _segment_ord: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, _ctx: &mut HitContext) -> anyhow::Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[test]
fn cancellation_between_segments_stops_before_the_next_rebind() {
    let store = flat_store();
    let phase = FetchPhase::new(vec![Box::new(CancelOnFirstDoc) as Box<dyn FetchExtension>]);
    // Two docs in different segments; the flag is set while processing the
    // first, so the second segment must never be opened.
    let err = phase.execute(&store, &request(vec![0, 4])).unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
    assert_eq!(store.counters().leaf_builds(), 1);
}

struct AppendMarker;

struct AppendProcessor;

impl FetchExtension for AppendMarker {
    fn processor<'a>(
        &'a self,
        _request: &FetchRequest,
        _store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        Ok(Some(Box::new(AppendProcessor)))
    }
}

impl FetchProcessor for AppendProcessor {
    fn name(&self) -> &str {
        "AppendMarker"
    }

    fn set_segment(&mut self, _segment_ord: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &mut HitContext) -> anyhow::Result<()> {
        ctx.hit
            .doc_fields
            .insert("marker".to_string(), FieldValues::new("marker", vec![json!(true)]));
        Ok(())
    }
}

struct OptOut;

impl FetchExtension for OptOut {
    fn processor<'a>(
        &'a self,
        _request: &FetchRequest,
        _store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        Ok(None)
    }
}

#[test]
fn processors_run_in_order_and_opt_outs_are_skipped() {
    let store = flat_store();
    let phase = FetchPhase::new(vec![
        Box::new(OptOut) as Box<dyn FetchExtension>,
        Box::new(AppendMarker) as Box<dyn FetchExtension>,
    ]);
    let result = phase.execute(&store, &request(vec![1, 3])).unwrap();
    for hit in &result.hits {
        assert_eq!(hit.doc_fields.get("marker").unwrap().values, vec![json!(true)]);
    }
}

struct FailingExtension;

struct FailingProcessor;

impl FetchExtension for FailingExtension {
    fn processor<'a>(
        &'a self,
        _request: &FetchRequest,
        _store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        Ok(Some(Box::new(FailingProcessor)))
    }
}

impl FetchProcessor for FailingProcessor {
    fn name(&self) -> &str {
        "FailingExtension"
    }

    fn set_segment(&mut self, _segment_ord: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, _ctx: &mut HitContext) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

#[test]
fn processor_failure_carries_the_doc_id() {
    let store = flat_store();
    let phase = FetchPhase::new(vec![Box::new(FailingExtension) as Box<dyn FetchExtension>]);
    let err = phase.execute(&store, &request(vec![3])).unwrap_err();
    match err {
        FetchError::Phase { source, .. } => {
            assert!(matches!(*source, FetchError::ExtensionProcess { doc_id: 3, .. }));
        }
        other => panic!("expected phase error, got {other}"),
    }
}

struct BrokenBuild;

impl FetchExtension for BrokenBuild {
    fn processor<'a>(
        &'a self,
        _request: &FetchRequest,
        _store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        anyhow::bail!("bad extension config")
    }
}

#[test]
fn extension_build_failure_aborts_before_any_document() {
    let store = flat_store();
    let phase = FetchPhase::new(vec![Box::new(BrokenBuild) as Box<dyn FetchExtension>]);
    let err = phase.execute(&store, &request(vec![0])).unwrap_err();
    match err {
        FetchError::Phase { source, .. } => {
            assert!(matches!(*source, FetchError::ExtensionBuild { .. }));
        }
        other => panic!("expected phase error, got {other}"),
    }
    // The pipeline is built before any document is assembled.
    assert_eq!(store.counters().advances(), 0);
}

#[test]
fn profiling_records_segment_and_read_counts() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let mut req = request(vec![0, 2, 4, 5]);
    req.profile = true;
    let result = phase.execute(&store, &req).unwrap();
    let profile = result.profile.unwrap();
    assert_eq!(profile.segment_transitions, 3);
    assert_eq!(profile.storage_reads, 4);
    assert_eq!(profile.source_loads, 4);
}

fn nested_store() -> MemStore {
    let source = json!({
        "title": "hello",
        "comments": [{"text": "first"}, {"text": "second"}],
    });
    MemStore::builder(schema())
        .push_doc_with_children(
            "p1",
            &source,
            vec![NestedIdentity::new("comments", 0), NestedIdentity::new("comments", 1)],
        )
        .build()
}

#[test]
fn nested_hit_projects_the_matching_subtree() {
    let store = nested_store();
    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request(vec![1])).unwrap();
    let hit = &result.hits[0];
    assert_eq!(hit.doc_id, 1);
    assert_eq!(hit.id.as_deref(), Some("p1"));
    assert_eq!(hit.nested_identity.as_ref().unwrap().path(), "comments[1]");
    assert_eq!(hit.source.as_ref().unwrap(), &json!({"comments": {"text": "second"}}));
}

#[test]
fn nested_hit_without_explicit_fields_loads_no_child_fields() {
    let store = nested_store();
    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request(vec![0])).unwrap();
    let hit = &result.hits[0];
    assert!(hit.doc_fields.is_empty());
    assert_eq!(hit.source.as_ref().unwrap(), &json!({"comments": {"text": "first"}}));
}

struct CommentsResolver;

impl InnerHitResolver for CommentsResolver {
    fn inner_hits(&self, parent: &Hit) -> anyhow::Result<Vec<InnerHitsSpec>> {
        if parent.id.as_deref() == Some("p1") && parent.nested_identity.is_none() {
            Ok(vec![InnerHitsSpec {
                name: "comments".to_string(),
                request: FetchRequest::new(ShardTarget::new("docs", 0), vec![0, 1]),
            }])
        } else {
            Ok(Vec::new())
        }
    }
}

#[test]
fn inner_hits_reuse_the_parent_root_source() {
    let store = nested_store();
    let phase = FetchPhase::new(vec![
        Box::new(InnerHitsPhase::new(Box::new(CommentsResolver))) as Box<dyn FetchExtension>,
    ]);
    // Doc 2 is the root row of the nested block.
    let result = phase.execute(&store, &request(vec![2])).unwrap();
    let parent = &result.hits[0];
    let children = parent.inner_hits.get("comments").unwrap();
    assert_eq!(children.hits.len(), 2);
    assert_eq!(children.hits[0].nested_identity.as_ref().unwrap().path(), "comments[0]");
    assert_eq!(children.hits[1].source.as_ref().unwrap(), &json!({"comments": {"text": "second"}}));
    // Two loaders: the parent fetch and the sub-fetch. The cached root
    // lookup spares the per-child root read.
    assert_eq!(store.counters().loader_builds(), 2);
}

#[test]
fn nested_identity_against_missing_array_fails_loudly() {
    // Child row claims a nested path the stored source does not contain.
    let store = MemStore::builder(schema())
        .push_doc_with_children(
            "p1",
            &json!({"title": "no comments here"}),
            vec![NestedIdentity::new("comments", 0)],
        )
        .build();
    let phase = FetchPhase::new(Vec::new());
    let err = phase.execute(&store, &request(vec![0])).unwrap_err();
    match err {
        FetchError::Phase { source, .. } => {
            assert!(matches!(*source, FetchError::InconsistentSource { ref path } if path == "comments"));
        }
        other => panic!("expected phase error, got {other}"),
    }
}

#[test]
fn hits_serialize_for_the_cli() {
    let store = flat_store();
    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request(vec![0])).unwrap();
    let rendered: Value = serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
    assert_eq!(rendered["hits"][0]["id"], json!("d0"));
}
