//! Per-document hit assembly: drives the segment-scoped loaders to build
//! the in-memory hit, choosing the nested or non-nested path.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;

use fetchdb_core::error::{FetchError, Result};
use fetchdb_core::traits::{
    DocStore, LeafNestedResolver, LeafSourceLoader, LeafStoredFieldLoader, SchemaResolver,
};
use fetchdb_core::types::{DocRef, FetchRequest, FieldValues, Hit, HitContext, SourceView};

use crate::batch::SegmentBatch;
use crate::nested::{self, RootCache};
use crate::plan::FieldSelectionPlan;
use crate::profile::Profiler;

/// Request-scoped state shared by every hit assembly.
pub(crate) struct AssembleCx<'a> {
    pub store: &'a dyn DocStore,
    pub request: &'a FetchRequest,
    pub plan: &'a FieldSelectionPlan,
    pub profiler: Rc<dyn Profiler>,
}

/// Builds the hit context for one document, dispatching on whether the
/// segment-local id resolves to a nested occurrence.
pub(crate) fn prepare_hit(
    cx: &AssembleCx<'_>,
    batch: &SegmentBatch<'_>,
    doc: DocRef,
    leaf_fields: &mut dyn LeafStoredFieldLoader,
    leaf_source: &dyn LeafSourceLoader,
    leaf_nested: &mut dyn LeafNestedResolver,
    root_cache: Option<&RootCache>,
) -> Result<HitContext> {
    let local_doc = doc.doc_id - batch.doc_base;
    let nested = leaf_nested
        .advance(local_doc)
        .map_err(|e| FetchError::StorageRead { doc_id: doc.doc_id, source: e })?;
    match nested {
        None => prepare_non_nested(cx, batch, doc, local_doc, leaf_fields, leaf_source),
        Some(matched) => nested::prepare_nested_hit(cx, batch, doc, matched, leaf_fields, root_cache),
    }
}

/// Non-nested path: advance the stored-field cursor, decode fields per the
/// plan, and load source only when the plan requires it. A document whose
/// primary id is gone mid-flight yields a placeholder hit with no fields.
fn prepare_non_nested(
    cx: &AssembleCx<'_>,
    batch: &SegmentBatch<'_>,
    doc: DocRef,
    local_doc: u32,
    leaf_fields: &mut dyn LeafStoredFieldLoader,
    leaf_source: &dyn LeafSourceLoader,
) -> Result<HitContext> {
    let storage = |e: anyhow::Error| FetchError::StorageRead { doc_id: doc.doc_id, source: e };

    leaf_fields.advance_to(local_doc).map_err(storage)?;

    let Some(id) = leaf_fields.id() else {
        return Ok(HitContext::new(Hit::placeholder(doc.doc_id), batch.segment_ord, local_doc));
    };

    let mut hit = Hit::new(doc.doc_id, Some(id));
    let stored = leaf_fields.stored_fields();
    if !stored.is_empty() {
        fill_doc_and_meta_fields(cx.store.schema(), cx.plan, &stored, &mut hit);
    }

    let mut ctx = HitContext::new(hit, batch.segment_ord, local_doc);
    if cx.plan.source_required() {
        let start = Instant::now();
        let source = leaf_source.source(leaf_fields, local_doc);
        cx.profiler.source_load(start.elapsed());
        if let Some(bytes) = source.map_err(storage)? {
            ctx.source = Some(SourceView::from_bytes(bytes).map_err(storage)?);
        }
    }
    Ok(ctx)
}

/// Fans each physical stored key's display-coerced values out to every
/// requested display name, partitioned into metadata vs document fields by
/// the schema predicate. Keys absent from the plan map surface under their
/// own name.
pub(crate) fn fill_doc_and_meta_fields(
    schema: &dyn SchemaResolver,
    plan: &FieldSelectionPlan,
    stored: &BTreeMap<String, Vec<Value>>,
    hit: &mut Hit,
) {
    for (stored_key, values) in stored {
        let display_values: Vec<Value> = values
            .iter()
            .map(|v| schema.value_for_display(stored_key, v))
            .collect();
        if let Some(requested) = plan.requested_by_stored.get(stored_key) {
            for name in requested {
                put_field(schema, hit, name, display_values.clone());
            }
        } else {
            put_field(schema, hit, stored_key, display_values);
        }
    }
}

fn put_field(schema: &dyn SchemaResolver, hit: &mut Hit, name: &str, values: Vec<Value>) {
    let field = FieldValues::new(name, values);
    if schema.is_metadata_field(name) {
        hit.meta_fields.insert(name.to_string(), field);
    } else {
        hit.doc_fields.insert(name.to_string(), field);
    }
}
