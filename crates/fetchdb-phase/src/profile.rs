//! Timing hooks around segment transitions, source loading, storage reads
//! and processor runs. The no-op profiler is the default; the recording
//! one is picked when the request asks for profiling. One fetch is
//! single-threaded, so plain `Cell`/`RefCell` interior mutability behind
//! an `Rc` is enough.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fetchdb_core::traits::{FetchProcessor, LeafStoredFieldLoader, StoredFieldLoader};
use fetchdb_core::types::{HitContext, ProcessorProfile, ProfileResult};

pub trait Profiler {
    fn enabled(&self) -> bool;

    fn segment_transition(&self, elapsed: Duration);

    fn source_load(&self, elapsed: Duration);

    fn storage_read(&self, elapsed: Duration);

    fn processor(&self, name: &str, elapsed: Duration);

    fn finish(&self) -> Option<ProfileResult>;
}

#[derive(Debug, Default)]
pub struct NoopProfiler;

impl Profiler for NoopProfiler {
    fn enabled(&self) -> bool {
        false
    }

    fn segment_transition(&self, _elapsed: Duration) {}

    fn source_load(&self, _elapsed: Duration) {}

    fn storage_read(&self, _elapsed: Duration) {}

    fn processor(&self, _name: &str, _elapsed: Duration) {}

    fn finish(&self) -> Option<ProfileResult> {
        None
    }
}

#[derive(Debug, Default)]
pub struct RecordingProfiler {
    segment_transitions: Cell<u64>,
    segment_transition_nanos: Cell<u64>,
    source_loads: Cell<u64>,
    source_load_nanos: Cell<u64>,
    storage_reads: Cell<u64>,
    storage_read_nanos: Cell<u64>,
    processors: RefCell<BTreeMap<String, ProcessorProfile>>,
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl Profiler for RecordingProfiler {
    fn enabled(&self) -> bool {
        true
    }

    fn segment_transition(&self, elapsed: Duration) {
        self.segment_transitions.set(self.segment_transitions.get() + 1);
        self.segment_transition_nanos
            .set(self.segment_transition_nanos.get() + nanos(elapsed));
    }

    fn source_load(&self, elapsed: Duration) {
        self.source_loads.set(self.source_loads.get() + 1);
        self.source_load_nanos.set(self.source_load_nanos.get() + nanos(elapsed));
    }

    fn storage_read(&self, elapsed: Duration) {
        self.storage_reads.set(self.storage_reads.get() + 1);
        self.storage_read_nanos.set(self.storage_read_nanos.get() + nanos(elapsed));
    }

    fn processor(&self, name: &str, elapsed: Duration) {
        let mut processors = self.processors.borrow_mut();
        let entry = processors.entry(name.to_string()).or_default();
        entry.invocations += 1;
        entry.nanos += nanos(elapsed);
    }

    fn finish(&self) -> Option<ProfileResult> {
        Some(ProfileResult {
            segment_transitions: self.segment_transitions.get(),
            segment_transition_nanos: self.segment_transition_nanos.get(),
            source_loads: self.source_loads.get(),
            source_load_nanos: self.source_load_nanos.get(),
            storage_reads: self.storage_reads.get(),
            storage_read_nanos: self.storage_read_nanos.get(),
            processors: self.processors.borrow().clone(),
        })
    }
}

/// Decorates a stored-field loader so storage reads are timed transparently
/// to the rest of the pipeline. Returns the loader unchanged when the
/// profiler is disabled.
pub struct ProfiledStoredFieldLoader<'a> {
    inner: Box<dyn StoredFieldLoader + 'a>,
    profiler: Rc<dyn Profiler>,
}

impl<'a> ProfiledStoredFieldLoader<'a> {
    pub fn wrap(
        inner: Box<dyn StoredFieldLoader + 'a>,
        profiler: &Rc<dyn Profiler>,
    ) -> Box<dyn StoredFieldLoader + 'a> {
        if profiler.enabled() {
            Box::new(Self { inner, profiler: Rc::clone(profiler) })
        } else {
            inner
        }
    }
}

impl StoredFieldLoader for ProfiledStoredFieldLoader<'_> {
    fn leaf<'a>(
        &'a self,
        segment_ord: usize,
        doc_hints: Option<&[u32]>,
    ) -> anyhow::Result<Box<dyn LeafStoredFieldLoader + 'a>> {
        let inner = self.inner.leaf(segment_ord, doc_hints)?;
        Ok(Box::new(ProfiledLeaf { inner, profiler: Rc::clone(&self.profiler) }))
    }
}

struct ProfiledLeaf<'a> {
    inner: Box<dyn LeafStoredFieldLoader + 'a>,
    profiler: Rc<dyn Profiler>,
}

impl LeafStoredFieldLoader for ProfiledLeaf<'_> {
    fn advance_to(&mut self, local_doc: u32) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = self.inner.advance_to(local_doc);
        self.profiler.storage_read(start.elapsed());
        result
    }

    fn id(&self) -> Option<String> {
        self.inner.id()
    }

    fn stored_fields(&self) -> std::collections::BTreeMap<String, Vec<serde_json::Value>> {
        self.inner.stored_fields()
    }

    fn source(&self) -> Option<Vec<u8>> {
        self.inner.source()
    }
}

/// Decorates a processor so its total time across all documents is
/// recorded under its type name.
pub struct ProfiledProcessor<'a> {
    inner: Box<dyn FetchProcessor + 'a>,
    profiler: Rc<dyn Profiler>,
}

impl<'a> ProfiledProcessor<'a> {
    pub fn wrap(
        inner: Box<dyn FetchProcessor + 'a>,
        profiler: &Rc<dyn Profiler>,
    ) -> Box<dyn FetchProcessor + 'a> {
        if profiler.enabled() {
            Box::new(Self { inner, profiler: Rc::clone(profiler) })
        } else {
            inner
        }
    }
}

impl FetchProcessor for ProfiledProcessor<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_segment(&mut self, segment_ord: usize) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = self.inner.set_segment(segment_ord);
        self.profiler.processor(self.inner.name(), start.elapsed());
        result
    }

    fn process(&mut self, ctx: &mut HitContext) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = self.inner.process(ctx);
        self.profiler.processor(self.inner.name(), start.elapsed());
        result
    }
}
