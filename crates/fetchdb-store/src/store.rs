//! An in-memory segmented document store implementing the fetch-phase
//! collaborator traits. Backs the CLI and the integration tests; read
//! counters let tests assert how often storage was touched.

use anyhow::anyhow;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use fetchdb_core::traits::{
    DocStore, LeafNestedResolver, LeafSourceLoader, LeafStoredFieldLoader, NestedResolver,
    SchemaResolver, SourceLoader, StoredFieldLoader,
};
use fetchdb_core::types::{NestedIdentity, NestedMatch, SegmentMeta};

use crate::schema::MemSchema;

/// One stored row. Nested child rows carry the root-relative identity and
/// precede their root row within the segment, the way a nested block is
/// laid out on disk.
#[derive(Debug, Clone)]
pub struct MemDoc {
    pub id: Option<String>,
    pub stored: BTreeMap<String, Vec<Value>>,
    pub source: Option<Vec<u8>>,
    pub nested: Option<NestedMatch>,
}

#[derive(Debug, Clone, Default)]
pub struct MemSegment {
    pub docs: Vec<MemDoc>,
}

/// How often loaders were built and rows were read.
#[derive(Debug, Default)]
pub struct StoreCounters {
    loader_builds: AtomicUsize,
    leaf_builds: AtomicUsize,
    advances: AtomicUsize,
    source_reads: AtomicUsize,
}

impl StoreCounters {
    pub fn loader_builds(&self) -> usize {
        self.loader_builds.load(Ordering::Relaxed)
    }

    pub fn leaf_builds(&self) -> usize {
        self.leaf_builds.load(Ordering::Relaxed)
    }

    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::Relaxed)
    }

    pub fn source_reads(&self) -> usize {
        self.source_reads.load(Ordering::Relaxed)
    }
}

pub struct MemStore {
    segments: Vec<MemSegment>,
    metas: Vec<SegmentMeta>,
    schema: MemSchema,
    counters: StoreCounters,
}

impl MemStore {
    pub fn builder(schema: MemSchema) -> MemStoreBuilder {
        MemStoreBuilder {
            schema,
            segments: Vec::new(),
            current: Vec::new(),
            segment_size: None,
        }
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    fn segment(&self, segment_ord: usize) -> anyhow::Result<&MemSegment> {
        self.segments
            .get(segment_ord)
            .ok_or_else(|| anyhow!("no segment at ordinal {}", segment_ord))
    }
}

impl DocStore for MemStore {
    fn segments(&self) -> &[SegmentMeta] {
        &self.metas
    }

    fn stored_field_loader<'a>(
        &'a self,
        load_source: bool,
        fields: &BTreeSet<String>,
    ) -> Box<dyn StoredFieldLoader + 'a> {
        self.counters.loader_builds.fetch_add(1, Ordering::Relaxed);
        Box::new(MemStoredFieldLoader { store: self, load_source, fields: fields.clone() })
    }

    fn source_loader<'a>(&'a self) -> Box<dyn SourceLoader + 'a> {
        Box::new(MemSourceLoader { store: self })
    }

    fn nested_resolver<'a>(&'a self) -> Box<dyn NestedResolver + 'a> {
        Box::new(MemNestedResolver { store: self })
    }

    fn schema(&self) -> &dyn SchemaResolver {
        &self.schema
    }
}

struct MemStoredFieldLoader<'a> {
    store: &'a MemStore,
    load_source: bool,
    fields: BTreeSet<String>,
}

impl StoredFieldLoader for MemStoredFieldLoader<'_> {
    fn leaf<'a>(
        &'a self,
        segment_ord: usize,
        _doc_hints: Option<&[u32]>,
    ) -> anyhow::Result<Box<dyn LeafStoredFieldLoader + 'a>> {
        self.store.counters.leaf_builds.fetch_add(1, Ordering::Relaxed);
        let segment = self.store.segment(segment_ord)?;
        Ok(Box::new(MemLeafStoredFieldLoader {
            store: self.store,
            segment,
            load_source: self.load_source,
            fields: &self.fields,
            current: None,
        }))
    }
}

struct MemLeafStoredFieldLoader<'a> {
    store: &'a MemStore,
    segment: &'a MemSegment,
    load_source: bool,
    fields: &'a BTreeSet<String>,
    current: Option<&'a MemDoc>,
}

impl LeafStoredFieldLoader for MemLeafStoredFieldLoader<'_> {
    fn advance_to(&mut self, local_doc: u32) -> anyhow::Result<()> {
        self.store.counters.advances.fetch_add(1, Ordering::Relaxed);
        self.current = Some(
            self.segment
                .docs
                .get(local_doc as usize)
                .ok_or_else(|| anyhow!("local doc {} out of segment bounds", local_doc))?,
        );
        Ok(())
    }

    fn id(&self) -> Option<String> {
        self.current.and_then(|doc| doc.id.clone())
    }

    fn stored_fields(&self) -> BTreeMap<String, Vec<Value>> {
        let Some(doc) = self.current else {
            return BTreeMap::new();
        };
        doc.stored
            .iter()
            .filter(|(key, _)| self.fields.contains(*key))
            .map(|(key, values)| (key.clone(), values.clone()))
            .collect()
    }

    fn source(&self) -> Option<Vec<u8>> {
        if !self.load_source {
            return None;
        }
        let bytes = self.current.and_then(|doc| doc.source.clone());
        if bytes.is_some() {
            self.store.counters.source_reads.fetch_add(1, Ordering::Relaxed);
        }
        bytes
    }
}

struct MemSourceLoader<'a> {
    store: &'a MemStore,
}

impl SourceLoader for MemSourceLoader<'_> {
    fn required_stored_fields(&self) -> BTreeSet<String> {
        // Source is stored natively; no synthetic reconstruction needed.
        BTreeSet::new()
    }

    fn leaf<'a>(
        &'a self,
        segment_ord: usize,
        _doc_hints: Option<&[u32]>,
    ) -> anyhow::Result<Box<dyn LeafSourceLoader + 'a>> {
        self.store.segment(segment_ord)?;
        Ok(Box::new(MemLeafSourceLoader))
    }
}

struct MemLeafSourceLoader;

impl LeafSourceLoader for MemLeafSourceLoader {
    fn source(
        &self,
        fields: &dyn LeafStoredFieldLoader,
        _local_doc: u32,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(fields.source())
    }
}

struct MemNestedResolver<'a> {
    store: &'a MemStore,
}

impl NestedResolver for MemNestedResolver<'_> {
    fn leaf<'a>(&'a self, segment_ord: usize) -> anyhow::Result<Box<dyn LeafNestedResolver + 'a>> {
        let segment = self.store.segment(segment_ord)?;
        Ok(Box::new(MemLeafNestedResolver { segment }))
    }
}

struct MemLeafNestedResolver<'a> {
    segment: &'a MemSegment,
}

impl LeafNestedResolver for MemLeafNestedResolver<'_> {
    fn advance(&mut self, local_doc: u32) -> anyhow::Result<Option<NestedMatch>> {
        let doc = self
            .segment
            .docs
            .get(local_doc as usize)
            .ok_or_else(|| anyhow!("local doc {} out of segment bounds", local_doc))?;
        Ok(doc.nested.clone())
    }
}

/// Ingests documents into segments. Root docs get their `_id` plus every
/// canonical stored field present in the source; nested children are laid
/// out before their root row.
pub struct MemStoreBuilder {
    schema: MemSchema,
    segments: Vec<MemSegment>,
    current: Vec<MemDoc>,
    segment_size: Option<usize>,
}

impl MemStoreBuilder {
    /// Auto-cut segments once they reach `size` rows (checked between doc
    /// blocks, never splitting a nested block).
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = Some(size.max(1));
        self
    }

    pub fn push_doc(self, id: &str, source: &Value) -> Self {
        self.push_doc_with_children(id, source, Vec::new())
    }

    /// Pushes one root document preceded by its nested child rows, each
    /// carrying the given identity relative to the root.
    pub fn push_doc_with_children(
        mut self,
        id: &str,
        source: &Value,
        children: Vec<NestedIdentity>,
    ) -> Self {
        self.maybe_cut();
        let root_local = (self.current.len() + children.len()) as u32;
        for identity in children {
            self.current.push(MemDoc {
                id: None,
                stored: BTreeMap::new(),
                source: None,
                nested: Some(NestedMatch { root_local_doc: root_local, identity }),
            });
        }
        self.current.push(MemDoc {
            id: Some(id.to_string()),
            stored: self.stored_fields_for(id, source),
            source: Some(source.to_string().into_bytes()),
            nested: None,
        });
        self
    }

    /// Pushes a raw row as-is; lets tests model tombstones and custom
    /// stored fields.
    pub fn push_row(mut self, doc: MemDoc) -> Self {
        self.maybe_cut();
        self.current.push(doc);
        self
    }

    /// Closes the current segment.
    pub fn cut_segment(mut self) -> Self {
        if !self.current.is_empty() {
            self.segments.push(MemSegment { docs: std::mem::take(&mut self.current) });
        }
        self
    }

    pub fn build(mut self) -> MemStore {
        if !self.current.is_empty() {
            self.segments.push(MemSegment { docs: std::mem::take(&mut self.current) });
        }
        let mut metas = Vec::with_capacity(self.segments.len());
        let mut base = 0u32;
        for segment in &self.segments {
            let max_doc = segment.docs.len() as u32;
            metas.push(SegmentMeta::new(base, max_doc));
            base += max_doc;
        }
        MemStore {
            segments: self.segments,
            metas,
            schema: self.schema,
            counters: StoreCounters::default(),
        }
    }

    fn maybe_cut(&mut self) {
        if let Some(size) = self.segment_size {
            if self.current.len() >= size {
                self.segments.push(MemSegment { docs: std::mem::take(&mut self.current) });
            }
        }
    }

    fn stored_fields_for(&self, id: &str, source: &Value) -> BTreeMap<String, Vec<Value>> {
        let mut stored = BTreeMap::new();
        stored.insert("_id".to_string(), vec![Value::String(id.to_string())]);
        let Some(map) = source.as_object() else {
            return stored;
        };
        for field in self.schema.canonical_fields() {
            if let Some(value) = map.get(&field.name) {
                let values = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                stored.insert(field.stored_key.clone(), values);
            }
        }
        stored
    }
}
