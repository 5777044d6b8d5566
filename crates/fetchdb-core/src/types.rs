//! Domain types shared by the fetch phase, the storage backends and the CLI.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A decoded JSON object, the structured form of a document's source.
pub type SourceMap = serde_json::Map<String, Value>;

/// Reserved pseudo-field name: requesting it as a stored field toggles
/// source loading instead of adding a physical stored key.
pub const SOURCE_FIELD_NAME: &str = "_source";

/// Pairs a global doc id with its position in the caller's requested order.
///
/// The fetch phase visits documents in ascending `doc_id` order but writes
/// each finished hit back at `slot`, so callers always observe results in
/// the order they asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocRef {
    pub doc_id: u32,
    pub slot: usize,
}

/// Decoded display values for one requested field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    pub name: String,
    pub values: Vec<Value>,
}

impl FieldValues {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self { name: name.into(), values }
    }
}

/// A path through nested arrays-of-objects, root to innermost level.
///
/// `field` is the nested array's field path relative to the enclosing
/// level; `offset` indexes into that array. Constructed once when a nested
/// match is detected and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedIdentity {
    pub field: String,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub child: Option<Box<NestedIdentity>>,
}

impl NestedIdentity {
    pub fn new(field: impl Into<String>, offset: usize) -> Self {
        Self { field: field.into(), offset, child: None }
    }

    pub fn with_child(field: impl Into<String>, offset: usize, child: NestedIdentity) -> Self {
        Self { field: field.into(), offset, child: Some(Box::new(child)) }
    }

    /// Renders the chain as `field[offset].field[offset]...` provenance.
    pub fn path(&self) -> String {
        let mut out = String::new();
        let mut current = Some(self);
        while let Some(level) = current {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&level.field);
            out.push('[');
            out.push_str(&level.offset.to_string());
            out.push(']');
            current = level.child.as_deref();
        }
        out
    }
}

/// One materialized result record.
///
/// - `doc_id`: the global doc id this hit was fetched for
/// - `id`: the document's primary identifier; `None` marks a document whose
///   id was gone mid-fetch (concurrent delete), kept as a placeholder hit
/// - `doc_fields`/`meta_fields`: decoded stored fields keyed by display name
/// - `nested_identity`: set when the hit is a nested document occurrence
/// - `inner_hits`: named child result sets attached by the inner-hits phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub doc_id: u32,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub doc_fields: BTreeMap<String, FieldValues>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub meta_fields: BTreeMap<String, FieldValues>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nested_identity: Option<NestedIdentity>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub inner_hits: BTreeMap<String, ShardResult>,
}

impl Hit {
    pub fn placeholder(doc_id: u32) -> Self {
        Self::new(doc_id, None)
    }

    pub fn new(doc_id: u32, id: Option<String>) -> Self {
        Self {
            doc_id,
            id,
            doc_fields: BTreeMap::new(),
            meta_fields: BTreeMap::new(),
            nested_identity: None,
            score: None,
            source: None,
            inner_hits: BTreeMap::new(),
        }
    }
}

/// Structured view over a document's source, attached to a [`HitContext`]
/// so fetch processors can read it without re-reading storage. Keeps the
/// raw bytes when the view came straight from storage; a projected nested
/// view is map-only.
#[derive(Debug, Clone)]
pub struct SourceView {
    map: SourceMap,
    raw: Option<Vec<u8>>,
}

impl SourceView {
    pub fn from_bytes(raw: Vec<u8>) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_slice(&raw)?;
        match value {
            Value::Object(map) => Ok(Self { map, raw: Some(raw) }),
            other => Err(anyhow::anyhow!("source is not a JSON object: {}", other)),
        }
    }

    pub fn from_map(map: SourceMap) -> Self {
        Self { map, raw: None }
    }

    pub fn map(&self) -> &SourceMap {
        &self.map
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    /// Serialized form of the view; re-encodes when only a map is held.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.raw {
            Some(bytes) => Ok(bytes.clone()),
            None => Ok(serde_json::to_vec(&self.map)?),
        }
    }
}

/// Per-document scratch state threaded through the processor pipeline.
///
/// Created per document, discarded after all processors ran. Processors may
/// mutate the hit's fields and the attached source view, never `doc_id` or
/// `nested_identity`.
#[derive(Debug)]
pub struct HitContext {
    pub hit: Hit,
    pub segment_ord: usize,
    pub local_doc: u32,
    pub source: Option<SourceView>,
}

impl HitContext {
    pub fn new(hit: Hit, segment_ord: usize, local_doc: u32) -> Self {
        Self { hit, segment_ord, local_doc, source: None }
    }
}

/// Total-hit-count metadata carried over from the query phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub exact: bool,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self { value, exact: true }
    }
}

/// The shard a fetch runs against; carried on phase-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTarget {
    pub index: String,
    pub shard: u32,
}

impl ShardTarget {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self { index: index.into(), shard }
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

/// Timing breakdown recorded by the profiling wrapper, when enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub segment_transitions: u64,
    pub segment_transition_nanos: u64,
    pub source_loads: u64,
    pub source_load_nanos: u64,
    pub storage_reads: u64,
    pub storage_read_nanos: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub processors: BTreeMap<String, ProcessorProfile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorProfile {
    pub invocations: u64,
    pub nanos: u64,
}

/// What a fetch hands back to the caller: hits in the originally requested
/// order plus the query-phase metadata, and profiling data when requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResult {
    pub hits: Vec<Hit>,
    pub total_hits: TotalHits,
    pub max_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub profile: Option<ProfileResult>,
}

/// Explicit stored-fields request: names may be concrete or `*` patterns;
/// `fetch_fields == false` disables field loading entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFieldsSpec {
    pub fetch_fields: bool,
    pub field_names: Vec<String>,
}

impl StoredFieldsSpec {
    pub fn fields(names: Vec<String>) -> Self {
        Self { fetch_fields: true, field_names: names }
    }

    pub fn none() -> Self {
        Self { fetch_fields: false, field_names: Vec::new() }
    }
}

/// Explicit source request, with optional include/exclude filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub fetch: bool,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl SourceSpec {
    pub fn fetch_source() -> Self {
        Self { fetch: true, includes: Vec::new(), excludes: Vec::new() }
    }

    pub fn disabled() -> Self {
        Self { fetch: false, includes: Vec::new(), excludes: Vec::new() }
    }
}

/// Identifier range of one immutable storage segment: global doc ids
/// `[doc_base, doc_base + max_doc)` belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub doc_base: u32,
    pub max_doc: u32,
}

impl SegmentMeta {
    pub fn new(doc_base: u32, max_doc: u32) -> Self {
        Self { doc_base, max_doc }
    }

    pub fn contains(&self, doc_id: u32) -> bool {
        doc_id >= self.doc_base && doc_id < self.doc_base + self.max_doc
    }
}

/// A segment-local document resolved to a nested occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedMatch {
    pub root_local_doc: u32,
    pub identity: NestedIdentity,
}

/// Cooperative cancellation flag, polled by the orchestrator at request
/// start and segment boundaries. Clones share the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One fetch invocation: the doc ids to materialize (in the caller's
/// order) plus the request shape the field plan and pipeline are built
/// from.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub target: ShardTarget,
    pub doc_ids: Vec<u32>,
    pub stored_fields: Option<StoredFieldsSpec>,
    pub source: Option<SourceSpec>,
    pub script_fields: bool,
    pub highlight: bool,
    pub total_hits: TotalHits,
    pub max_score: Option<f32>,
    pub profile: bool,
    pub cancel: CancelToken,
}

impl FetchRequest {
    pub fn new(target: ShardTarget, doc_ids: Vec<u32>) -> Self {
        let total = doc_ids.len() as u64;
        Self {
            target,
            doc_ids,
            stored_fields: None,
            source: None,
            script_fields: false,
            highlight: false,
            total_hits: TotalHits::exact(total),
            max_score: None,
            profile: false,
            cancel: CancelToken::new(),
        }
    }
}
