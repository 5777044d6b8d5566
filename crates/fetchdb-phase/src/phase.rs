//! The fetch orchestrator: batches doc ids by segment, rebinds
//! segment-scoped loaders and processors, assembles each hit and writes it
//! back at its originally requested position.

use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, trace};

use fetchdb_core::error::{FetchError, Result};
use fetchdb_core::traits::{DocStore, FetchExtension};
use fetchdb_core::types::{FetchRequest, Hit, HitContext, ShardResult};

use crate::assemble::{prepare_hit, AssembleCx};
use crate::batch::{sort_doc_refs, SegmentBatches};
use crate::nested::RootCache;
use crate::pipeline::build_processors;
use crate::plan::FieldSelectionPlan;
use crate::profile::{NoopProfiler, ProfiledStoredFieldLoader, Profiler, RecordingProfiler};

/// Fetch phase of a search request: materializes the top matching
/// documents identified by the query phase into fully shaped hits.
pub struct FetchPhase {
    extensions: Vec<Box<dyn FetchExtension>>,
}

impl FetchPhase {
    pub fn new(extensions: Vec<Box<dyn FetchExtension>>) -> Self {
        Self { extensions }
    }

    pub fn execute(&self, store: &dyn DocStore, request: &FetchRequest) -> Result<ShardResult> {
        self.execute_sub(store, request, None)
    }

    /// Re-entrant entry point used by the inner-hits extension, carrying
    /// an optional pre-resolved root lookup for nested projection.
    pub(crate) fn execute_sub(
        &self,
        store: &dyn DocStore,
        request: &FetchRequest,
        root_cache: Option<&RootCache>,
    ) -> Result<ShardResult> {
        if request.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        if request.doc_ids.is_empty() {
            // No individual hits to process, so we shortcut; the
            // query-phase metadata is still carried over and no loader is
            // ever constructed.
            debug!(shard = %request.target, "fetch short-circuit: no doc ids");
            return Ok(ShardResult {
                hits: Vec::new(),
                total_hits: request.total_hits,
                max_score: request.max_score,
                profile: None,
            });
        }

        debug!(shard = %request.target, docs = request.doc_ids.len(), "fetch start");

        let profiler: Rc<dyn Profiler> = if request.profile {
            Rc::new(RecordingProfiler::default())
        } else {
            Rc::new(NoopProfiler)
        };

        let hits = self.build_hits(store, request, &profiler, root_cache);

        // Profiling is finalized whether or not assembly succeeded;
        // results are published only on success.
        let profile = profiler.finish();
        match hits {
            Ok(hits) => Ok(ShardResult {
                hits,
                total_hits: request.total_hits,
                max_score: request.max_score,
                profile,
            }),
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(other) => Err(FetchError::Phase {
                target: request.target.clone(),
                source: Box::new(other),
            }),
        }
    }

    fn build_hits(
        &self,
        store: &dyn DocStore,
        request: &FetchRequest,
        profiler: &Rc<dyn Profiler>,
        root_cache: Option<&RootCache>,
    ) -> Result<Vec<Hit>> {
        let sorted = sort_doc_refs(&request.doc_ids);

        let source_loader = store.source_loader();
        let plan = FieldSelectionPlan::resolve(
            request,
            store.schema(),
            &source_loader.required_stored_fields(),
        );
        let stored_loader = ProfiledStoredFieldLoader::wrap(
            store.stored_field_loader(plan.load_source, &plan.stored_fields),
            profiler,
        );
        let mut processors = build_processors(&self.extensions, request, store, profiler)?;
        let nested_resolver = store.nested_resolver();

        let cx = AssembleCx { store, request, plan: &plan, profiler: Rc::clone(profiler) };

        let mut out: Vec<Option<Hit>> = Vec::new();
        out.resize_with(request.doc_ids.len(), || None);

        for batch in SegmentBatches::new(&sorted, store.segments()) {
            // Cancellation is observed before every segment rebind; a
            // batch in flight is not preempted document-by-document.
            if request.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let first_doc = batch.refs.first().map_or(0, |r| r.doc_id);
            trace!(segment = batch.segment_ord, docs = batch.refs.len(), "segment transition");

            let rebind_start = Instant::now();
            let hints = batch.local_doc_hints();
            let mut leaf_fields = stored_loader
                .leaf(batch.segment_ord, Some(&hints))
                .map_err(|e| FetchError::StorageRead { doc_id: first_doc, source: e })?;
            let leaf_source = source_loader
                .leaf(batch.segment_ord, Some(&hints))
                .map_err(|e| FetchError::StorageRead { doc_id: first_doc, source: e })?;
            let mut leaf_nested = nested_resolver
                .leaf(batch.segment_ord)
                .map_err(|e| FetchError::StorageRead { doc_id: first_doc, source: e })?;
            for processor in &mut processors {
                processor
                    .set_segment(batch.segment_ord)
                    .map_err(|e| FetchError::ExtensionProcess { doc_id: first_doc, source: e })?;
            }
            profiler.segment_transition(rebind_start.elapsed());

            for &doc in batch.refs {
                let mut ctx = prepare_hit(
                    &cx,
                    &batch,
                    doc,
                    leaf_fields.as_mut(),
                    leaf_source.as_ref(),
                    leaf_nested.as_mut(),
                    root_cache,
                )?;
                for processor in &mut processors {
                    processor
                        .process(&mut ctx)
                        .map_err(|e| FetchError::ExtensionProcess { doc_id: doc.doc_id, source: e })?;
                }
                let HitContext { mut hit, source, .. } = ctx;
                if plan.source_required() && hit.source.is_none() {
                    if let Some(view) = &source {
                        hit.source = Some(Value::Object(view.map().clone()));
                    }
                }
                out[doc.slot] = Some(hit);
            }
        }

        if request.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut hits = Vec::with_capacity(out.len());
        for (slot, assembled) in out.into_iter().enumerate() {
            match assembled {
                Some(hit) => hits.push(hit),
                // Every valid doc id belongs to exactly one batch; an
                // unfilled slot means the id fell outside every segment.
                None => {
                    return Err(FetchError::StorageRead {
                        doc_id: request.doc_ids[slot],
                        source: anyhow::anyhow!("doc id outside any segment"),
                    })
                }
            }
        }
        debug!(shard = %request.target, hits = hits.len(), "fetch done");
        Ok(hits)
    }
}
