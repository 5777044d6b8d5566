//! Built-in inner-hits extension: re-enters the fetch machinery for each
//! parent hit's sub-requests, handing the parent's already-decoded source
//! down as a root cache so nested projection does not re-read storage.

use fetchdb_core::traits::{DocStore, FetchExtension, FetchProcessor, InnerHitResolver};
use fetchdb_core::types::{FetchRequest, HitContext};

use crate::nested::RootCache;
use crate::phase::FetchPhase;

pub struct InnerHitsPhase {
    resolver: Box<dyn InnerHitResolver>,
}

impl InnerHitsPhase {
    pub fn new(resolver: Box<dyn InnerHitResolver>) -> Self {
        Self { resolver }
    }
}

impl FetchExtension for InnerHitsPhase {
    fn processor<'a>(
        &'a self,
        _request: &FetchRequest,
        store: &'a dyn DocStore,
    ) -> anyhow::Result<Option<Box<dyn FetchProcessor + 'a>>> {
        Ok(Some(Box::new(InnerHitsProcessor { resolver: self.resolver.as_ref(), store })))
    }
}

struct InnerHitsProcessor<'a> {
    resolver: &'a dyn InnerHitResolver,
    store: &'a dyn DocStore,
}

impl FetchProcessor for InnerHitsProcessor<'_> {
    fn name(&self) -> &str {
        "InnerHitsPhase"
    }

    fn set_segment(&mut self, _segment_ord: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &mut HitContext) -> anyhow::Result<()> {
        let specs = self.resolver.inner_hits(&ctx.hit)?;
        if specs.is_empty() {
            return Ok(());
        }
        let root_cache = RootCache { root_id: ctx.hit.id.clone(), source: ctx.source.clone() };
        // Sub-requests run through the same machinery, minus further
        // inner-hit recursion.
        let sub_phase = FetchPhase::new(Vec::new());
        for spec in specs {
            let result = sub_phase.execute_sub(self.store, &spec.request, Some(&root_cache))?;
            ctx.hit.inner_hits.insert(spec.name, result);
        }
        Ok(())
    }
}
