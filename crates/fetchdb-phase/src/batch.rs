//! Sorting and segment batching of the requested doc ids.

use fetchdb_core::types::{DocRef, SegmentMeta};

/// Pairs each requested doc id with its position in the request, then
/// sorts ascending by doc id. Ids are unique, so stability is irrelevant.
pub fn sort_doc_refs(doc_ids: &[u32]) -> Vec<DocRef> {
    let mut refs: Vec<DocRef> = doc_ids
        .iter()
        .enumerate()
        .map(|(slot, &doc_id)| DocRef { doc_id, slot })
        .collect();
    refs.sort_by_key(|r| r.doc_id);
    refs
}

/// A maximal contiguous run of sorted doc refs falling into one segment.
#[derive(Debug)]
pub struct SegmentBatch<'a> {
    pub segment_ord: usize,
    pub doc_base: u32,
    pub refs: &'a [DocRef],
}

impl SegmentBatch<'_> {
    /// Segment-local ids of this batch, passed to leaf loaders as hints.
    pub fn local_doc_hints(&self) -> Vec<u32> {
        self.refs.iter().map(|r| r.doc_id - self.doc_base).collect()
    }
}

/// Lazily walks sorted doc refs and segments in lockstep, yielding one
/// batch per visited segment. Consumes the sorted slice by position and is
/// not restartable.
pub struct SegmentBatches<'a> {
    refs: &'a [DocRef],
    segments: &'a [SegmentMeta],
    pos: usize,
    segment_ord: usize,
}

impl<'a> SegmentBatches<'a> {
    pub fn new(refs: &'a [DocRef], segments: &'a [SegmentMeta]) -> Self {
        Self { refs, segments, pos: 0, segment_ord: 0 }
    }

    /// First position past the current segment. A forward scan, not a
    /// fresh binary search: the refs are sorted and each batch is visited
    /// once.
    fn end_reader_idx(&self, first_in_next: u32) -> usize {
        let mut i = self.pos + 1;
        while i < self.refs.len() {
            if self.refs[i].doc_id >= first_in_next {
                return i;
            }
            i += 1;
        }
        i
    }
}

impl<'a> Iterator for SegmentBatches<'a> {
    type Item = SegmentBatch<'a>;

    fn next(&mut self) -> Option<SegmentBatch<'a>> {
        if self.pos >= self.refs.len() {
            return None;
        }
        let doc_id = self.refs[self.pos].doc_id;
        // Skip segments before the one holding the next pending doc id.
        while self.segment_ord < self.segments.len()
            && !self.segments[self.segment_ord].contains(doc_id)
        {
            self.segment_ord += 1;
        }
        if self.segment_ord >= self.segments.len() {
            return None;
        }
        let meta = self.segments[self.segment_ord];
        let end = self.end_reader_idx(meta.doc_base + meta.max_doc);
        let batch = SegmentBatch {
            segment_ord: self.segment_ord,
            doc_base: meta.doc_base,
            refs: &self.refs[self.pos..end],
        };
        self.pos = end;
        Some(batch)
    }
}

/// True iff the sorted refs are stored sequentially (Dn = Dn-1 + 1).
pub fn has_sequential_docs(refs: &[DocRef]) -> bool {
    match (refs.first(), refs.last()) {
        (Some(first), Some(last)) => {
            (last.doc_id - first.doc_id) as usize == refs.len() - 1
        }
        _ => false,
    }
}
