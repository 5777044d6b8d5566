//! Nested-hit assembly: resolves the root document (cached or fresh read)
//! and projects the matching nested subtree out of the root source.

use std::collections::BTreeSet;

use serde_json::Value;

use fetchdb_core::error::{FetchError, Result};
use fetchdb_core::traits::LeafStoredFieldLoader;
use fetchdb_core::types::{DocRef, Hit, HitContext, NestedIdentity, NestedMatch, SourceMap, SourceView};

use crate::assemble::{fill_doc_and_meta_fields, AssembleCx};
use crate::batch::SegmentBatch;
use crate::profile::ProfiledStoredFieldLoader;

/// Pre-resolved root lookup handed down by an enclosing inner-hits fetch,
/// so the parent's already-decoded source is not re-read from storage.
#[derive(Debug, Clone)]
pub struct RootCache {
    pub root_id: Option<String>,
    pub source: Option<SourceView>,
}

/// Where the root document's id and source come from, resolved once per
/// nested hit.
enum RootSource<'a> {
    Cached(&'a RootCache),
    Fresh,
}

/// Nested path of hit assembly. Source is needed not only when the plan
/// asks for it but also under highlighting, which must read from the root
/// document's source: the entire source is stored once per root document.
pub(crate) fn prepare_nested_hit(
    cx: &AssembleCx<'_>,
    batch: &SegmentBatch<'_>,
    doc: DocRef,
    matched: NestedMatch,
    leaf_fields: &mut dyn LeafStoredFieldLoader,
    root_cache: Option<&RootCache>,
) -> Result<HitContext> {
    let storage = |e: anyhow::Error| FetchError::StorageRead { doc_id: doc.doc_id, source: e };

    let need_source = cx.plan.source_required() || cx.request.highlight;

    let root = match root_cache {
        Some(cache) => RootSource::Cached(cache),
        None => RootSource::Fresh,
    };
    let (root_id, root_map) = match root {
        RootSource::Cached(cache) => {
            let map = if need_source {
                cache.source.as_ref().map(|view| view.map().clone())
            } else {
                None
            };
            (cache.root_id.clone(), map)
        }
        RootSource::Fresh => {
            let loader = cx.store.stored_field_loader(need_source, &BTreeSet::new());
            let loader = ProfiledStoredFieldLoader::wrap(loader, &cx.profiler);
            let mut leaf = loader.leaf(batch.segment_ord, None).map_err(storage)?;
            leaf.advance_to(matched.root_local_doc).map_err(storage)?;
            let root_id = leaf.id();
            let map = if need_source {
                match leaf.source() {
                    Some(bytes) => Some(SourceView::from_bytes(bytes).map_err(storage)?.map().clone()),
                    None => Some(SourceMap::new()),
                }
            } else {
                None
            };
            (root_id, map)
        }
    };

    let local_doc = doc.doc_id - batch.doc_base;

    let mut hit = Hit::new(doc.doc_id, root_id);
    hit.nested_identity = Some(matched.identity.clone());

    // The nested document's own stored fields are loaded only when the
    // request named fields explicitly.
    if cx.plan.has_explicit_fields {
        leaf_fields.advance_to(local_doc).map_err(storage)?;
        let stored = leaf_fields.stored_fields();
        if !stored.is_empty() {
            fill_doc_and_meta_fields(cx.store.schema(), cx.plan, &stored, &mut hit);
        }
    }

    let mut ctx = HitContext::new(hit, batch.segment_ord, local_doc);
    if let Some(map) = root_map {
        if !map.is_empty() {
            let projected = project_nested_source(&matched.identity, &map)?;
            ctx.source = Some(SourceView::from_map(projected));
        }
    }
    Ok(ctx)
}

/// Isolates the nested object the identity chain points at and wraps it
/// back into the same field-path shape, narrowed to exactly one array
/// element per nested boundary. A missing nested array at any level is a
/// storage/mapping mismatch and fails loudly.
pub fn project_nested_source(identity: &NestedIdentity, root: &SourceMap) -> Result<SourceMap> {
    let sources = extract_nested_sources(&identity.field, root)
        .ok_or_else(|| FetchError::InconsistentSource { path: identity.field.clone() })?;
    let element = sources
        .get(identity.offset)
        .copied()
        .ok_or_else(|| FetchError::InconsistentSource { path: identity.path() })?;
    let inner = match &identity.child {
        Some(child) => Value::Object(project_nested_source(child, element)?),
        None => Value::Object(element.clone()),
    };
    let mut wrapper = SourceMap::new();
    wrapper.insert(identity.field.clone(), inner);
    Ok(wrapper)
}

/// Resolves a possibly dotted field path to the array-of-objects it holds.
/// A single object is treated as a one-element array.
fn extract_nested_sources<'a>(path: &str, source: &'a SourceMap) -> Option<Vec<&'a SourceMap>> {
    let mut current = source;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return match value {
                Value::Array(items) => {
                    let mut maps = Vec::with_capacity(items.len());
                    for item in items {
                        maps.push(item.as_object()?);
                    }
                    Some(maps)
                }
                Value::Object(map) => Some(vec![map]),
                _ => None,
            };
        }
        current = value.as_object()?;
    }
    None
}
