//! Collaborator contracts consumed by the fetch phase. The storage layer,
//! schema and result-enrichment extensions all live behind these traits;
//! the phase itself never touches a concrete backend.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FetchRequest, Hit, HitContext, NestedMatch, SegmentMeta};

/// A readable document store partitioned into immutable segments.
pub trait DocStore: Send + Sync {
    /// Segment ranges in increasing `doc_base` order.
    fn segments(&self) -> &[SegmentMeta];

    /// Builds a stored-field loader for the given physical keys;
    /// `load_source` additionally wires up raw source retrieval.
    fn stored_field_loader<'a>(
        &'a self,
        load_source: bool,
        fields: &BTreeSet<String>,
    ) -> Box<dyn StoredFieldLoader + 'a>;

    fn source_loader<'a>(&'a self) -> Box<dyn SourceLoader + 'a>;

    fn nested_resolver<'a>(&'a self) -> Box<dyn NestedResolver + 'a>;

    fn schema(&self) -> &dyn SchemaResolver;
}

pub trait StoredFieldLoader {
    /// Opens a segment-scoped cursor. `doc_hints` lists the segment-local
    /// ids about to be read, letting backends pick a sequential fast path.
    fn leaf<'a>(
        &'a self,
        segment_ord: usize,
        doc_hints: Option<&[u32]>,
    ) -> anyhow::Result<Box<dyn LeafStoredFieldLoader + 'a>>;
}

pub trait LeafStoredFieldLoader {
    fn advance_to(&mut self, local_doc: u32) -> anyhow::Result<()>;

    /// Primary identifier of the current document; `None` when the
    /// document disappeared (tombstoned / concurrently deleted).
    fn id(&self) -> Option<String>;

    fn stored_fields(&self) -> BTreeMap<String, Vec<Value>>;

    fn source(&self) -> Option<Vec<u8>>;
}

pub trait SourceLoader {
    /// Stored fields the source-reconstruction strategy needs loaded.
    fn required_stored_fields(&self) -> BTreeSet<String>;

    fn leaf<'a>(
        &'a self,
        segment_ord: usize,
        doc_hints: Option<&[u32]>,
    ) -> anyhow::Result<Box<dyn LeafSourceLoader + 'a>>;
}

pub trait LeafSourceLoader {
    fn source(
        &self,
        fields: &dyn LeafStoredFieldLoader,
        local_doc: u32,
    ) -> anyhow::Result<Option<Vec<u8>>>;
}

pub trait NestedResolver {
    fn leaf<'a>(&'a self, segment_ord: usize) -> anyhow::Result<Box<dyn LeafNestedResolver + 'a>>;
}

pub trait LeafNestedResolver {
    /// `Some` when the segment-local doc is a nested occurrence.
    fn advance(&mut self, local_doc: u32) -> anyhow::Result<Option<NestedMatch>>;
}

/// Field-name resolution against the index schema. One stored key may back
/// several display names (aliases, multi-fields).
pub trait SchemaResolver: Send + Sync {
    /// Expands a concrete name or `*` pattern to matching field names;
    /// unmapped names expand to nothing.
    fn matching_field_names(&self, pattern: &str) -> Vec<String>;

    /// Physical stored-storage key backing a concrete field name.
    fn stored_key(&self, field: &str) -> Option<String>;

    fn is_metadata_field(&self, name: &str) -> bool;

    /// Coerces a raw stored value into its display form per field type.
    fn value_for_display(&self, field: &str, value: &Value) -> Value;
}

/// A result-enrichment extension (sub-phase). Asked once per request
/// whether it participates; `None` opts out for the whole request.
pub trait FetchExtension {
    fn processor<'a>(
        &'a self,
        request: &FetchRequest,
        store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>>;
}

/// One extension's per-request state. Rebound to every segment before any
/// document in it is processed; segment-specific accessors must not leak
/// across segments.
pub trait FetchProcessor {
    fn name(&self) -> &str;

    fn set_segment(&mut self, segment_ord: usize) -> anyhow::Result<()>;

    fn process(&mut self, ctx: &mut HitContext) -> anyhow::Result<()>;
}

/// Names the inner-hit sub-requests to run for one parent hit.
#[derive(Debug, Clone)]
pub struct InnerHitsSpec {
    pub name: String,
    pub request: FetchRequest,
}

/// Maps a parent hit to its inner-hit sub-requests (child doc ids are
/// carried inside each sub-request). Supplied by the matching layer.
pub trait InnerHitResolver: Send + Sync {
    fn inner_hits(&self, parent: &Hit) -> anyhow::Result<Vec<InnerHitsSpec>>;
}
