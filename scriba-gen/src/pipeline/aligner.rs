// Timeline Aligner
//
// Concept: Merge per-source evidence lists into one globally ordered timeline
// Synchronization: Accepts Vec<SourceEvidence>, outputs AlignedTimeline
//
// Algorithm:
// 1. Verify every source is non-decreasing by ordering key (fatal otherwise)
// 2. k-way merge of source heads on (ordering key, kind rank, source rank, position)
//
// Tie-break at equal keys: keyframes before speech before document text, then
// the source declared first, then adapter order within the source.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{AlignedTimeline, EvidenceItem, SourceEvidence};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Head of one source during the merge
struct MergeHead {
    ordering_key: f64,
    kind_rank: u8,
    source_rank: usize,
    position: usize,
    /// Index into the merge's source list
    slot: usize,
}

impl MergeHead {
    fn of(item: &EvidenceItem, source_rank: usize, position: usize, slot: usize) -> Self {
        Self {
            ordering_key: item.ordering_key,
            kind_rank: item.kind.tie_rank(),
            source_rank,
            position,
            slot,
        }
    }

    fn sort_key_cmp(&self, other: &Self) -> Ordering {
        self.ordering_key
            .total_cmp(&other.ordering_key)
            .then(self.kind_rank.cmp(&other.kind_rank))
            .then(self.source_rank.cmp(&other.source_rank))
            .then(self.position.cmp(&other.position))
    }
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key_cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    // Reversed: BinaryHeap is a max-heap, the merge needs the smallest head
    fn cmp(&self, other: &Self) -> Ordering {
        other.sort_key_cmp(self)
    }
}

/// Timeline aligner
#[derive(Debug, Default)]
pub struct TimelineAligner;

impl TimelineAligner {
    /// Merge all sources into one timeline
    ///
    /// # Errors
    /// `OutOfOrderEvidence` if any source has a decreasing key; nothing is
    /// merged in that case.
    pub fn align(&self, mut sources: Vec<SourceEvidence>) -> PipelineResult<AlignedTimeline> {
        for source in &sources {
            check_monotonic(source)?;
        }

        // Declaration rank decides ties, not slot order in this list
        sources.sort_by_key(|s| s.rank);

        let total: usize = sources.iter().map(|s| s.items.len()).sum();
        let mut iterators: Vec<_> = sources
            .iter_mut()
            .map(|s| std::mem::take(&mut s.items).into_iter().enumerate().peekable())
            .collect();

        let mut heap = BinaryHeap::with_capacity(iterators.len());
        for (slot, iter) in iterators.iter_mut().enumerate() {
            if let Some((position, item)) = iter.peek() {
                heap.push(MergeHead::of(item, sources[slot].rank, *position, slot));
            }
        }

        let mut merged = Vec::with_capacity(total);
        while let Some(head) = heap.pop() {
            let iter = &mut iterators[head.slot];
            if let Some((_, item)) = iter.next() {
                merged.push(item);
            }
            if let Some((position, item)) = iter.peek() {
                heap.push(MergeHead::of(item, sources[head.slot].rank, *position, head.slot));
            }
        }

        tracing::info!(
            sources = sources.len(),
            items = merged.len(),
            "Timeline alignment complete"
        );

        Ok(AlignedTimeline::from_sorted(merged))
    }
}

fn check_monotonic(source: &SourceEvidence) -> PipelineResult<()> {
    for (index, pair) in source.items.windows(2).enumerate() {
        let (previous, current) = (pair[0].ordering_key, pair[1].ordering_key);
        if current < previous {
            tracing::error!(
                source_id = %source.source_id,
                index = index + 1,
                previous,
                current,
                "Source evidence is out of order, aborting alignment"
            );
            return Err(PipelineError::OutOfOrderEvidence {
                source_id: source.source_id.clone(),
                index: index + 1,
                previous,
                current,
            });
        }
    }
    Ok(())
}
